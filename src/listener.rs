// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The source-side half of the relay.
//!
//! A listener owns one chain's scan cursor. It walks finalized block
//! ranges in bounded chunks, translates every deposit it can interpret
//! into a [`Message`] and hands it to the router. The checkpoint is only
//! advanced once the router has accepted every message of a chunk, so a
//! crash between fetch and hand-off redelivers instead of losing
//! deposits.

use std::cmp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ChainConfig;
use crate::connection::{Connection, DepositEvent};
use crate::error::{Error, Result};
use crate::probe;
use crate::router::Router;
use crate::store::CheckpointStore;
use crate::types::{Message, Payload, ResourceId, TransferKind};

/// Scan policy for one chain, lifted out of the chain config.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// First block worth scanning, usually the bridge deployment block.
    pub start_block: u64,
    /// Blocks that must follow a block before its deposits are relayed.
    pub block_confirmations: u64,
    /// Upper bound on the blocks fetched in one request.
    pub max_blocks_per_step: u64,
    /// Cooldown between polls once the cursor has caught up with the
    /// confirmed head.
    pub polling_interval: Duration,
}

impl From<&ChainConfig> for ListenerConfig {
    fn from(cfg: &ChainConfig) -> Self {
        Self {
            start_block: cfg.start_block,
            block_confirmations: cfg.block_confirmations,
            max_blocks_per_step: cfg.events_watcher.max_blocks_per_step,
            polling_interval: Duration::from_millis(cfg.events_watcher.polling_interval),
        }
    }
}

/// Watches one source chain and feeds the router.
pub struct Listener<C, S> {
    conn: Arc<C>,
    store: S,
    router: Router,
    resources: HashMap<ResourceId, TransferKind>,
    cfg: ListenerConfig,
}

impl<C: Connection, S: CheckpointStore> Listener<C, S> {
    /// Creates a listener for one source chain. `resources` maps the
    /// resource ids this relayer serves to how their payloads decode.
    pub fn new(
        conn: Arc<C>,
        store: S,
        router: Router,
        resources: HashMap<ResourceId, TransferKind>,
        cfg: ListenerConfig,
    ) -> Self {
        Self {
            conn,
            store,
            router,
            resources,
            cfg,
        }
    }

    /// Runs the scan loop until the surrounding task is cancelled.
    ///
    /// RPC and store hiccups are retried with exponential backoff,
    /// indefinitely; the cursor never advances past an unscanned range.
    pub async fn run(&self) -> Result<()> {
        let chain_id = self.conn.chain_id();
        let key = (chain_id, self.conn.relayer_address());
        // the cursor is the last processed block, so the first scanned
        // block is start_block itself.
        let default_cursor = self.cfg.start_block.saturating_sub(1);
        // the retried operation is an endless loop, so an elapsed-time
        // budget would be spent by healthy uptime; retry forever and let
        // the backoff interval bound the reconnect pressure.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: None,
            ..Default::default()
        };
        let task = || async {
            loop {
                // a raised start block wins over a stale stored cursor.
                let cursor = self
                    .store
                    .get_latest_block(key, default_cursor)
                    .map_err(backoff::Error::transient)?
                    .max(default_cursor);
                let head = self
                    .conn
                    .current_height()
                    .await
                    .map_err(backoff::Error::transient)?;
                let target = head.saturating_sub(self.cfg.block_confirmations);
                if target <= cursor {
                    tokio::time::sleep(self.cfg.polling_interval).await;
                    continue;
                }
                let from = cursor + 1;
                let to = cmp::min(
                    cursor.saturating_add(self.cfg.max_blocks_per_step),
                    target,
                );
                let mut deposits = self
                    .conn
                    .fetch_deposits(from, to)
                    .await
                    .map_err(backoff::Error::transient)?;
                deposits.sort_by_key(|d| (d.block_number, d.log_index));
                tracing::trace!(
                    chain_id = %chain_id,
                    from,
                    to,
                    found = deposits.len(),
                    "scanned block range"
                );
                for deposit in deposits {
                    let Some(message) = self.translate(deposit) else {
                        continue;
                    };
                    match self.router.send(message).await {
                        Ok(()) => {}
                        Err(Error::UnknownDestination { chain_id }) => {
                            // a deposit aimed at a chain this relayer does
                            // not serve; dropping it must not stall the
                            // rest of the chunk.
                            tracing::warn!(
                                destination = %chain_id,
                                "dropping deposit for unserved destination"
                            );
                        }
                        Err(e) => return Err(backoff::Error::transient(e)),
                    }
                }
                // only now is the chunk safe to skip on restart.
                self.store
                    .set_latest_block(key, to)
                    .map_err(backoff::Error::transient)?;
                tracing::event!(
                    target: probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %probe::Kind::Sync,
                    chain_id = %chain_id,
                    block = to,
                );
                if to == target {
                    tokio::time::sleep(self.cfg.polling_interval).await;
                }
            }
        };
        backoff::future::retry(backoff, task).await?;
        Ok(())
    }

    /// Turns a raw deposit into a routable message, or logs why it cannot.
    fn translate(&self, deposit: DepositEvent) -> Option<Message> {
        let kind = match self.resources.get(&deposit.resource_id) {
            Some(kind) => *kind,
            None => {
                tracing::warn!(
                    resource_id = %deposit.resource_id,
                    deposit_nonce = %deposit.deposit_nonce,
                    "skipping deposit for unconfigured resource"
                );
                return None;
            }
        };
        let payload = match Payload::decode(kind, &deposit.data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    resource_id = %deposit.resource_id,
                    deposit_nonce = %deposit.deposit_nonce,
                    error = %e,
                    "skipping deposit with undecodable payload"
                );
                return None;
            }
        };
        Some(Message {
            source: self.conn.chain_id(),
            destination: deposit.destination,
            deposit_nonce: deposit.deposit_nonce,
            resource_id: deposit.resource_id,
            payload,
        })
    }
}
