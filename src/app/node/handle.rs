// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! `NodeHandleExt`: ergonomic async client methods backed by the
//! correlator's oneshot wait handles, mirroring the teacher's
//! `ClusterHandleExt` (`UnboundedHandle<ClusterEvent>` plus a oneshot
//! responder per call).

use super::NodeEvent;
use crate::app::correlator::Correlator;
use crate::app::message::{OperationResponse, OverlayNode, PeerMessage};
use crate::app::transport::PeerTransport;
use crate::core::pipeline::ModifyOp;
use async_trait::async_trait;
use backstage::core::UnboundedHandle;
use std::sync::Arc;

/// Everything a client-facing caller needs to drive one node:
/// `operation_driver`'s three ingredients (transport, correlator, this
/// node's own url) plus the administrative channel for depart.
#[derive(Clone)]
pub struct NodeHandle {
    pub url: String,
    pub transport: Arc<dyn PeerTransport>,
    pub correlator: Arc<Correlator>,
    pub admin: UnboundedHandle<NodeEvent>,
}

/// The client API surface (`/api/modify`, `/api/query`, `/api/overlay`,
/// `/api/depart`), each built on `operation_driver`: allocate a uid,
/// register a wait handle, hand the request to the node's own inbox, block
/// on the reply.
#[async_trait]
pub trait NodeHandleExt {
    async fn insert(&self, key: String, value: String) -> OperationResponse;
    async fn delete(&self, key: String) -> OperationResponse;
    async fn query(&self, key: String) -> OperationResponse;
    async fn query_all(&self) -> OperationResponse;
    async fn overlay(&self) -> OperationResponse;
    /// `Ok(())` on success; `Err` carries the structured refusal message
    /// (e.g. "Bootstrap node cannot depart.").
    async fn depart(&self) -> Result<(), String>;
    /// Test/ops introspection: this node's own replica stack, level 0 first.
    async fn debug_replicas(&self) -> OperationResponse;
}

#[async_trait]
impl NodeHandleExt for NodeHandle {
    async fn insert(&self, key: String, value: String) -> OperationResponse {
        self.modify(ModifyOp::Insert, key, Some(value)).await
    }

    async fn delete(&self, key: String) -> OperationResponse {
        self.modify(ModifyOp::Delete, key, None).await
    }

    async fn query(&self, key: String) -> OperationResponse {
        let (uid, rx) = self.correlator.begin().await;
        if let Err(e) = self
            .transport
            .send(
                &self.url,
                PeerMessage::Query { uid, origin_url: self.url.clone(), distance: 0, seq: None, key },
            )
            .await
        {
            return OperationResponse::Error(e.to_string());
        }
        rx.await.unwrap_or(OperationResponse::Error("caller out of scope".to_string()))
    }

    async fn query_all(&self) -> OperationResponse {
        let (uid, rx) = self.correlator.begin().await;
        if let Err(e) = self
            .transport
            .send(&self.url, PeerMessage::QueryStar { uid, origin_url: self.url.clone(), accumulator: Vec::new() })
            .await
        {
            return OperationResponse::Error(e.to_string());
        }
        rx.await.unwrap_or(OperationResponse::Error("caller out of scope".to_string()))
    }

    async fn overlay(&self) -> OperationResponse {
        let (uid, rx) = self.correlator.begin().await;
        let entries: Vec<OverlayNode> = Vec::new();
        if let Err(e) = self
            .transport
            .send(&self.url, PeerMessage::Overlay { uid, origin_url: self.url.clone(), entries })
            .await
        {
            return OperationResponse::Error(e.to_string());
        }
        rx.await.unwrap_or(OperationResponse::Error("caller out of scope".to_string()))
    }

    async fn depart(&self) -> Result<(), String> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.admin
            .send(NodeEvent::Depart(tx))
            .map_err(|_| "node actor is no longer running".to_string())?;
        rx.await.map_err(|_| "node actor dropped the depart reply".to_string())?
    }

    async fn debug_replicas(&self) -> OperationResponse {
        let (uid, rx) = self.correlator.begin().await;
        if let Err(e) = self.transport.send(&self.url, PeerMessage::DebugReplicas { uid }).await {
            return OperationResponse::Error(e.to_string());
        }
        rx.await.unwrap_or(OperationResponse::Error("caller out of scope".to_string()))
    }
}

impl NodeHandle {
    async fn modify(&self, op: ModifyOp, key: String, value: Option<String>) -> OperationResponse {
        let (uid, rx) = self.correlator.begin().await;
        if let Err(e) = self
            .transport
            .send(
                &self.url,
                PeerMessage::Modify { uid, origin_url: self.url.clone(), distance: 0, seq: None, op, key, value },
            )
            .await
        {
            return OperationResponse::Error(e.to_string());
        }
        rx.await.unwrap_or(OperationResponse::Error("caller out of scope".to_string()))
    }
}
