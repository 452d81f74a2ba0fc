// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

pub mod app;
pub mod config;
pub mod core;

pub mod prelude {
    pub use super::{
        app::{
            correlator::Correlator,
            lock::{LocalLock, TopologyLock},
            message::*,
            node::{handle::{NodeHandle, NodeHandleExt}, Bootstrap, Node, NodeEvent},
            transport::{LoopbackTransport, PeerTransport},
        },
        config::NodeConfig,
        core::*,
    };
    pub use backstage::core::*;
}
