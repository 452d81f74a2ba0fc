// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Brings up a small in-process ring over `LoopbackTransport`, joins a
//! handful of nodes onto it, and drives a few client operations against it.
//! No network, no manager process: a stand-in for the `scylla.rs`
//! `examples/scylla.rs` walkthrough, minus the websocket control plane this
//! crate does not implement.

use chordify::prelude::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let transport: Arc<dyn PeerTransport> = Arc::new(LoopbackTransport::new());
    let lock: Arc<dyn TopologyLock> = LocalLock::new();

    let genesis = spawn_node(
        "http://node-0".to_string(),
        Bootstrap::Genesis { max_replication_factor: 2, consistency: ConsistencyMode::Linearizable },
        transport.clone(),
        lock.clone(),
    )
    .await?;

    let mut members = vec![genesis];
    for i in 1..4 {
        let handle = spawn_node(
            format!("http://node-{}", i),
            Bootstrap::Join { bootstrap_url: members[0].url.clone() },
            transport.clone(),
            lock.clone(),
        )
        .await?;
        members.push(handle);
    }
    // let the join/finger-rebuild cascade settle before driving operations.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let entry = &members[0];
    entry.insert("hello".to_string(), "world".to_string()).await;
    match entry.query("hello".to_string()).await {
        OperationResponse::Value(Some(v)) => log::info!("query(hello) = {}", v),
        other => log::warn!("unexpected query response: {:?}", other),
    }

    match entry.overlay().await {
        OperationResponse::Overlay(nodes) => {
            for node in nodes {
                log::info!("{} owns ({}, {}], succ={}", node.url, node.pred, node.succ, node.succ);
            }
        }
        other => log::warn!("unexpected overlay response: {:?}", other),
    }

    if let Some(last) = members.pop() {
        last.depart().await.map_err(|e| anyhow::anyhow!(e))?;
    }

    Ok(())
}

/// Spawns one `Node` actor in its own backstage runtime and returns a
/// client handle for it, mirroring the `Runtime::new` / `.handle()` /
/// background `block_on` pattern the teacher uses to stand up `Scylla` in
/// its own integration tests.
async fn spawn_node(
    url: String,
    bootstrap: Bootstrap,
    transport: Arc<dyn PeerTransport>,
    lock: Arc<dyn TopologyLock>,
) -> anyhow::Result<NodeHandle> {
    let correlator = Arc::new(Correlator::new());
    let node = Node::new(url.clone(), bootstrap, transport.clone(), lock, correlator.clone());
    let runtime = backstage::core::Runtime::new(None, node)
        .await
        .map_err(|e| anyhow::anyhow!("{} failed to start: {:?}", url, e))?;
    let admin = runtime.handle().clone();
    tokio::spawn(async move {
        if let Err(e) = runtime.block_on().await {
            log::error!("node runtime exited with error: {:?}", e);
        }
    });
    Ok(NodeHandle { url, transport, correlator, admin })
}
