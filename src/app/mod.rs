// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The actor-model half of the ring: the `Node` actor itself, the
//! request/response correlator that bridges blocking client calls to
//! asynchronous `operation_resp` arrivals, the peer transport and topology
//! lock boundaries, and the wire schemas carried over both.

/// Correlates client-originated operations with their eventual `operation_resp`.
pub mod correlator;
/// The cluster-wide advisory topology lock, acquired around depart.
pub mod lock;
/// Peer RPC and client API wire schemas.
pub mod message;
/// The `Node` actor and its client-facing handle.
pub mod node;
/// The peer-to-peer RPC boundary.
pub mod transport;
