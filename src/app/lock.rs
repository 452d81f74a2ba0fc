// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The cluster-wide advisory lock that serializes depart (and, in a full
//! deployment, join) across the ring. A real deployment binds this to the
//! `lock-acquire`/`lock-release` HTTP service; this crate ships an
//! in-process mutex as the reference implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A single cluster-wide mutual-exclusion primitive, acquired around a
/// depart's entire sequence (see the membership protocol).
#[async_trait]
pub trait TopologyLock: Send + Sync {
    async fn acquire(&self);
    async fn release(&self);
}

/// An in-process stand-in for the external lock service. `acquire`/
/// `release` are modeled as two separate calls rather than an RAII guard,
/// matching the acquire/release pair the real HTTP endpoints expose.
pub struct LocalLock {
    inner: Arc<Mutex<()>>,
    held: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl LocalLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(())),
            held: Mutex::new(None),
        })
    }
}

#[async_trait]
impl TopologyLock for LocalLock {
    async fn acquire(&self) {
        let guard = self.inner.clone().lock_owned().await;
        *self.held.lock().await = Some(guard);
    }

    async fn release(&self) {
        self.held.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_then_release_round_trips() {
        let lock = LocalLock::new();
        lock.acquire().await;
        lock.release().await;
    }

    #[tokio::test]
    async fn second_acquire_blocks_until_release() {
        let lock = LocalLock::new();
        lock.acquire().await;

        let lock2 = lock.clone();
        let handle = tokio::spawn(async move {
            lock2.acquire().await;
            "acquired"
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        lock.release().await;
        assert_eq!(handle.await.unwrap(), "acquired");
    }
}
