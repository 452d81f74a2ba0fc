// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Wire schemas for the peer-to-peer RPC surface and the client-facing JSON
//! API. Both are plain `serde`-derived structs/enums; the actual HTTP
//! binding that (de)serializes them is an out-of-tree concern (see
//! `transport::PeerTransport`).

use crate::core::{ConsistencyMode, Id, ReplicaMap};
use crate::core::pipeline::ModifyOp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A peer-to-peer RPC, as routed by `transport::PeerTransport`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PeerMessage {
    Modify {
        uid: Uuid,
        origin_url: String,
        distance: usize,
        seq: Option<u64>,
        op: ModifyOp,
        key: String,
        value: Option<String>,
    },
    Query {
        uid: Uuid,
        origin_url: String,
        distance: usize,
        seq: Option<u64>,
        key: String,
    },
    QueryStar {
        uid: Uuid,
        origin_url: String,
        accumulator: Vec<(String, String)>,
    },
    Join {
        new_node_url: String,
    },
    JoinResponse {
        pred: String,
        succ: String,
        keys_start: Id,
        keys_end: Id,
        replication_factor: usize,
        max_replication_factor: usize,
        consistency: ConsistencyMode,
        new_replicas: Vec<ReplicaMap>,
    },
    UpdateSuccInfo {
        new_node_url: String,
    },
    DepartPred {
        keys_start: Id,
        predecessor_url: String,
        maxdistance_replica: ReplicaMap,
    },
    ShiftUpReplicas {
        distance: usize,
        exclude_start: Id,
        exclude_end: Id,
    },
    ShiftDownReplicas {
        origin_url: String,
        distance: usize,
        maxdist_replica: ReplicaMap,
    },
    IncReplicationFactor {
        distance: usize,
        new_node_start: Id,
        new_node_end: Id,
        initiator_url: String,
    },
    DecReplicationFactor {
        initiator_url: String,
    },
    Overlay {
        uid: Uuid,
        origin_url: String,
        entries: Vec<OverlayNode>,
    },
    UpdateFingerTablePhase1 {
        initiator_url: String,
        ring: Vec<String>,
    },
    UpdateFingerTablePhase2 {
        initiator_url: String,
        ring: Vec<String>,
    },
    OperationResp {
        uid: Uuid,
        response: OperationResponse,
    },
    /// Test/ops introspection: dump this node's replica stack, one level per
    /// entry, answered locally without forwarding.
    DebugReplicas {
        uid: Uuid,
    },
}

/// The terminal reply `operation_driver` blocks on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OperationResponse {
    Modified,
    Value(Option<String>),
    Dump(Vec<(String, String)>),
    Overlay(Vec<OverlayNode>),
    ReplicaLevels(Vec<Vec<(String, String)>>),
    Error(String),
}

/// One row of an `overlay` walk, as exposed to API clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayNode {
    pub url: String,
    pub pred: String,
    pub succ: String,
    pub keys_start: Id,
    pub keys_end: Id,
}

/// `POST /api/modify` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientModifyRequest {
    pub operation: ModifyOp,
    pub key: String,
    pub value: Option<String>,
}

/// `POST /api/modify` / `/api/query` / `/api/overlay` response envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientResponse {
    pub response: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// `POST /api/query` request body; `key == "*"` requests a full dump.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientQueryRequest {
    pub key: String,
}
