// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Startup configuration read from the environment by the management
//! surface. The DHT core itself only needs `NODE_URL`, `BOOTSTRAP_URL`,
//! `LOCKING_SRV_URL`, `IS_BOOTSTRAP`, and for a bootstrap node,
//! `CONSISTENCY_MODEL` and `REPLICATION_FACTOR`.

use crate::core::ConsistencyMode;
use derive_builder::Builder;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{0} must be a positive integer, got '{1}'")]
    NotAPositiveInt(&'static str, String),
    #[error("CONSISTENCY_MODEL must be LINEARIZABLE or EVENTUAL, got '{0}'")]
    BadConsistencyModel(String),
    #[error("IS_BOOTSTRAP must be 'true' or 'false', got '{0}'")]
    BadBool(String),
    #[error("a bootstrap node also requires {0}")]
    MissingForBootstrap(&'static str),
    #[error("{0}")]
    Builder(String),
}

/// A node's startup configuration, as handed to `Node::new`.
#[derive(Builder, Clone, Debug)]
#[builder(setter(into))]
pub struct NodeConfig {
    pub node_url: String,
    pub bootstrap_url: Option<String>,
    pub locking_srv_url: String,
    pub is_bootstrap: bool,
    #[builder(default)]
    pub consistency: Option<ConsistencyMode>,
    #[builder(default)]
    pub replication_factor: Option<usize>,
}

impl NodeConfig {
    /// Reads `NODE_URL`, `BOOTSTRAP_URL`, `LOCKING_SRV_URL`, `IS_BOOTSTRAP`,
    /// and, when `IS_BOOTSTRAP=true`, `CONSISTENCY_MODEL` and
    /// `REPLICATION_FACTOR`, per the management surface's contract.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_url = required("NODE_URL")?;
        let locking_srv_url = required("LOCKING_SRV_URL")?;
        let is_bootstrap = parse_bool(&required("IS_BOOTSTRAP")?)?;
        let bootstrap_url = std::env::var("BOOTSTRAP_URL").ok();

        let mut builder = NodeConfigBuilder::default();
        builder
            .node_url(node_url)
            .bootstrap_url(bootstrap_url)
            .locking_srv_url(locking_srv_url)
            .is_bootstrap(is_bootstrap);

        if is_bootstrap {
            let consistency = match required("CONSISTENCY_MODEL")
                .map_err(|_| ConfigError::MissingForBootstrap("CONSISTENCY_MODEL"))?
                .as_str()
            {
                "LINEARIZABLE" => ConsistencyMode::Linearizable,
                "EVENTUAL" => ConsistencyMode::Eventual,
                other => return Err(ConfigError::BadConsistencyModel(other.to_string())),
            };
            let raw_replication_factor = required("REPLICATION_FACTOR")
                .map_err(|_| ConfigError::MissingForBootstrap("REPLICATION_FACTOR"))?;
            let replication_factor = raw_replication_factor
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::NotAPositiveInt("REPLICATION_FACTOR", raw_replication_factor))?;
            builder.consistency(Some(consistency)).replication_factor(Some(replication_factor));
        }

        builder.build().map_err(|e| ConfigError::Builder(e.to_string()))
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse_bool(s: &str) -> Result<bool, ConfigError> {
    match s {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::BadBool(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_only_true_or_false() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("yes").is_err());
    }
}
