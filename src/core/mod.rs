// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The pure, transport-independent Chord core: identifier space, replica
//! stack, routing, chain-replication sequencing, the operation pipeline,
//! and the membership protocol. Nothing in this module performs I/O or
//! depends on the actor runtime — the `app` module wires it up to peers.

pub mod error;
pub mod finger;
pub mod id;
pub mod membership;
pub mod pipeline;
pub mod replica;
pub mod sequencer;
pub mod state;

pub use error::CoreError;
pub use finger::{Finger, FingerTable};
pub use id::Id;
pub use replica::{ReplicaMap, ReplicaStack};
pub use sequencer::{Admit, Sequencer};
pub use state::{ChainPayload, ConsistencyMode, NodeState};
