// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Routes decoded deposit messages from source listeners to the writer
//! owning the destination chain.
//!
//! The router is an explicit registry object created at startup and
//! handed to every listener. Each destination registers exactly once and
//! gets back the receiving half of a bounded channel; the bound is what
//! gives the pipeline backpressure, since a listener awaiting a full
//! queue stops scanning new blocks without losing its checkpoint.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::types::{ChainId, Message};

/// A cheaply clonable registry of per-destination message queues.
#[derive(Clone)]
pub struct Router {
    capacity: usize,
    routes: Arc<RwLock<HashMap<ChainId, mpsc::Sender<Message>>>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("capacity", &self.capacity)
            .field("routes", &self.routes.read().keys().copied().collect::<Vec<_>>())
            .finish()
    }
}

impl Router {
    /// Creates an empty router whose queues buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers `chain_id` as a reachable destination and returns the
    /// receiver its writer will drain. Registering the same chain twice
    /// is a wiring bug and is rejected.
    pub fn register(&self, chain_id: ChainId) -> Result<mpsc::Receiver<Message>> {
        let mut routes = self.routes.write();
        if routes.contains_key(&chain_id) {
            return Err(Error::DuplicateRoute { chain_id });
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        routes.insert(chain_id, tx);
        tracing::debug!(chain_id = %chain_id, "destination registered");
        Ok(rx)
    }

    /// Delivers a message to its destination queue, waiting if the queue
    /// is full. Unknown destinations and destinations whose writer has
    /// gone away are reported to the caller, which decides whether to
    /// skip or abort.
    pub async fn send(&self, message: Message) -> Result<()> {
        let chain_id = message.destination;
        // clone the sender out of the lock; the guard must not be held
        // across the await below.
        let sender = self
            .routes
            .read()
            .get(&chain_id)
            .cloned()
            .ok_or(Error::UnknownDestination { chain_id })?;
        sender
            .send(message)
            .await
            .map_err(|_| Error::RouteClosed { chain_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositNonce, Payload, ResourceId};

    fn message(destination: u8, deposit_nonce: u64) -> Message {
        Message {
            source: ChainId(0),
            destination: ChainId(destination),
            deposit_nonce: DepositNonce(deposit_nonce),
            resource_id: ResourceId::from([1u8; 32]),
            payload: Payload::Generic {
                data: vec![0xAB],
            },
        }
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let router = Router::new(4);
        let _rx = router.register(ChainId(1)).unwrap();
        let err = router.register(ChainId(1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute { chain_id } if chain_id == ChainId(1)));
    }

    #[tokio::test]
    async fn unknown_destination_is_an_error() {
        let router = Router::new(4);
        let err = router.send(message(9, 1)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDestination { chain_id } if chain_id == ChainId(9)));
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let router = Router::new(4);
        let mut rx = router.register(ChainId(1)).unwrap();
        for deposit_nonce in 1..=3 {
            router.send(message(1, deposit_nonce)).await.unwrap();
        }
        for expected in 1..=3 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.deposit_nonce, DepositNonce(expected));
        }
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let router = Router::new(1);
        let mut rx = router.register(ChainId(1)).unwrap();
        router.send(message(1, 1)).await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            router.send(message(1, 2)),
        )
        .await;
        assert!(blocked.is_err(), "send should wait on a full queue");

        // draining one slot unblocks the sender.
        let got = rx.recv().await.unwrap();
        assert_eq!(got.deposit_nonce, DepositNonce(1));
        router.send(message(1, 2)).await.unwrap();
    }

    #[tokio::test]
    async fn closed_route_is_reported() {
        let router = Router::new(4);
        let rx = router.register(ChainId(1)).unwrap();
        drop(rx);
        let err = router.send(message(1, 1)).await.unwrap_err();
        assert!(matches!(err, Error::RouteClosed { chain_id } if chain_id == ChainId(1)));
    }
}
