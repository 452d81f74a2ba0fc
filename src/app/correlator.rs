// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Ties an originator's blocking client call to the asynchronous
//! `operation_resp` that arrives after the request has traversed the ring.

use super::message::OperationResponse;
use crate::core::CoreError;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// The `pending` map: one wait handle per in-flight client-originated
/// operation, guarded by its own mutex (kept separate from the topology and
/// sequencer locks, per the concurrency model).
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<Uuid, oneshot::Sender<OperationResponse>>>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a UUID and register a wait handle for it, returning both the
    /// id to stamp on the outgoing request and the receiver to block on.
    pub async fn begin(&self) -> (Uuid, oneshot::Receiver<OperationResponse>) {
        let uid = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(uid, tx);
        (uid, rx)
    }

    /// `operation_resp(uid, response)`: deliver the first reply for `uid`
    /// and ignore any further one. Absent or already-resolved ids are
    /// reported rather than silently dropped, since a reliable-single-reply
    /// transport should never produce one.
    pub async fn resolve(&self, uid: Uuid, response: OperationResponse) -> Result<(), CoreError> {
        let sender = self.pending.lock().await.remove(&uid).ok_or(CoreError::UnknownCorrelationId { uid })?;
        // the receiver may already be gone if the caller's wait timed out or
        // was dropped; that's the caller's problem, not ours.
        let _ = sender.send(response);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_the_first_reply() {
        let correlator = Correlator::new();
        let (uid, rx) = correlator.begin().await;
        correlator.resolve(uid, OperationResponse::Modified).await.unwrap();
        assert!(matches!(rx.await.unwrap(), OperationResponse::Modified));
    }

    #[tokio::test]
    async fn resolve_of_unknown_uid_is_reported() {
        let correlator = Correlator::new();
        let err = correlator.resolve(Uuid::new_v4(), OperationResponse::Modified).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownCorrelationId { .. }));
    }

    #[tokio::test]
    async fn second_resolve_of_the_same_uid_is_reported_not_delivered_twice() {
        let correlator = Correlator::new();
        let (uid, rx) = correlator.begin().await;
        correlator.resolve(uid, OperationResponse::Modified).await.unwrap();
        let err = correlator.resolve(uid, OperationResponse::Value(None)).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownCorrelationId { .. }));
        assert!(matches!(rx.await.unwrap(), OperationResponse::Modified));
    }
}
