// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the core ring/replication logic, independent of any
//! transport or actor-runtime concern.

use thiserror::Error;

/// Errors the pure core can raise. Transport and actor-runtime failures are
/// modeled separately at the `app` layer, mirroring the split between a
/// leaf `thiserror` enum here and `anyhow` at the handler boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("bootstrap node cannot depart")]
    BootstrapCannotDepart,

    #[error("insert requires a value")]
    InsertMissingValue,

    #[error("operation_resp for unknown or already-resolved uid {uid}")]
    UnknownCorrelationId { uid: uuid::Uuid },
}
