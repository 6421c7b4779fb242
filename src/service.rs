// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Wires configured chains into running listener and writer tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::connection::{evm::EvmConnection, Connection};
use crate::context::RelayerContext;
use crate::error::Result;
use crate::listener::{Listener, ListenerConfig};
use crate::probe;
use crate::router::Router;
use crate::store::CheckpointStore;
use crate::types::Message;
use crate::writer::{Writer, WriterConfig};

/// Connects every configured chain, registers its route and spawns its
/// listener and writer tasks.
///
/// Connection and registration failures are configuration errors and
/// abort startup; once this returns the pipeline is live and only the
/// context's shutdown signal stops it. The returned handles complete
/// after shutdown, once every writer has drained the messages its queue
/// had already accepted; the process waits on them before exiting.
pub async fn ignite<S: CheckpointStore>(
    ctx: &RelayerContext,
    store: S,
    router: Router,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let mut tasks = Vec::new();
    for (chain_name, chain_config) in &ctx.config.chains {
        tracing::debug!(
            "Starting background services for ({}) chain.",
            chain_name
        );
        let conn = Arc::new(EvmConnection::connect(chain_config).await?);
        if chain_config.fresh_start {
            // forget whatever cursor a previous run left behind.
            let key = (chain_config.chain_id, conn.relayer_address());
            let old = store.set_latest_block(
                key,
                chain_config.start_block.saturating_sub(1),
            )?;
            tracing::debug!(
                chain_id = %chain_config.chain_id,
                old,
                "fresh start, checkpoint reset to the configured start block"
            );
        }
        let queue = router.register(chain_config.chain_id)?;
        if let Some(handle) = start_listener(
            ctx,
            chain_config,
            conn.clone(),
            store.clone(),
            router.clone(),
        )? {
            tasks.push(handle);
        }
        tasks.push(start_writer(ctx, chain_config, conn, queue)?);
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            chain = %chain_name,
            chain_id = %chain_config.chain_id,
            started = true,
        );
    }
    Ok(tasks)
}

fn start_listener<S: CheckpointStore>(
    ctx: &RelayerContext,
    chain_config: &ChainConfig,
    conn: Arc<EvmConnection>,
    store: S,
    router: Router,
) -> Result<Option<tokio::task::JoinHandle<()>>> {
    // check first if we should scan this chain at all.
    if !chain_config.events_watcher.enabled {
        tracing::warn!(
            "Deposit listener is disabled for chain {}.",
            chain_config.chain_id,
        );
        return Ok(None);
    }
    let resources = chain_config
        .resources
        .iter()
        .map(|r| (r.resource_id, r.kind))
        .collect::<HashMap<_, _>>();
    let listener = Listener::new(
        conn,
        store,
        router,
        resources,
        ListenerConfig::from(chain_config),
    );
    let mut shutdown_signal = ctx.shutdown_signal();
    let chain_id = chain_config.chain_id;
    tracing::debug!("Deposit listener for chain {} started.", chain_id);
    let task = async move {
        tokio::select! {
            result = listener.run() => {
                tracing::warn!(
                    "Deposit listener stopped for chain {} ({:?})",
                    chain_id,
                    result,
                );
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!(
                    "Stopping deposit listener for chain {}",
                    chain_id,
                );
            },
        }
    };
    // kick off the listener.
    Ok(Some(tokio::task::spawn(task)))
}

fn start_writer(
    ctx: &RelayerContext,
    chain_config: &ChainConfig,
    conn: Arc<EvmConnection>,
    queue: tokio::sync::mpsc::Receiver<Message>,
) -> Result<tokio::task::JoinHandle<()>> {
    let resources = chain_config
        .resources
        .iter()
        .map(|r| r.resource_id)
        .collect::<HashSet<_>>();
    let writer = Writer::new(
        conn,
        resources,
        WriterConfig::from(&chain_config.proposals),
    );
    let shutdown_signal = ctx.shutdown_signal();
    let chain_id = chain_config.chain_id;
    tracing::debug!("Proposal writer for chain {} started.", chain_id);
    // the writer observes shutdown itself so it can drain the messages
    // its queue already accepted before exiting.
    let task = async move {
        match writer.run(queue, shutdown_signal).await {
            Ok(()) => {
                tracing::trace!(
                    "Proposal writer for chain {} exited",
                    chain_id,
                );
            }
            Err(e) => {
                tracing::warn!(
                    "Proposal writer stopped for chain {} ({})",
                    chain_id,
                    e,
                );
            }
        }
    };
    // kick off the writer.
    Ok(tokio::task::spawn(task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DepositEvent, TxStatus};
    use crate::context::Shutdown;
    use crate::store::mem::InMemoryStore;
    use crate::test_utils::MockConnection;
    use crate::types::{
        ChainId, DepositNonce, Payload, ResourceId, TransferKind,
    };
    use ethers::types::U256;
    use std::time::Duration;
    use tokio::sync::broadcast;

    const RESOURCE: [u8; 32] = [7u8; 32];

    struct Pipeline {
        notify: broadcast::Sender<()>,
        writer_task: tokio::task::JoinHandle<crate::Result<()>>,
    }

    fn spawn_pipeline(
        source: Arc<MockConnection>,
        dest: Arc<MockConnection>,
        store: InMemoryStore,
    ) -> Pipeline {
        let (notify, _) = broadcast::channel(2);
        let router = Router::new(8);
        let queue = router.register(dest.chain_id()).unwrap();

        let resources =
            HashMap::from([(ResourceId::from(RESOURCE), TransferKind::FungibleTransfer)]);
        let listener = Listener::new(
            source,
            store,
            router.clone(),
            resources,
            ListenerConfig {
                start_block: 1,
                block_confirmations: 10,
                max_blocks_per_step: 100,
                polling_interval: Duration::from_millis(10),
            },
        );
        let mut listener_shutdown = Shutdown::new(notify.subscribe());
        tokio::spawn(async move {
            tokio::select! {
                _ = listener.run() => {},
                _ = listener_shutdown.recv() => {},
            }
        });

        let writer = Writer::new(
            dest,
            HashSet::from([ResourceId::from(RESOURCE)]),
            WriterConfig {
                max_attempts: 3,
                confirmation_timeout: Duration::from_millis(100),
                receipt_poll_interval: Duration::from_millis(10),
            },
        );
        let writer_shutdown = Shutdown::new(notify.subscribe());
        let writer_task =
            tokio::spawn(async move { writer.run(queue, writer_shutdown).await });

        Pipeline {
            notify,
            writer_task,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    #[tokio::test]
    async fn a_deposit_crosses_the_whole_pipeline() {
        let source = Arc::new(MockConnection::new(0));
        let dest = Arc::new(MockConnection::new(1));
        source.push_deposit(DepositEvent {
            block_number: 3,
            log_index: 0,
            destination: dest.chain_id(),
            resource_id: ResourceId::from(RESOURCE),
            deposit_nonce: DepositNonce(1),
            data: Payload::Fungible {
                recipient: vec![0xF0; 20],
                amount: U256::from(1_000),
            }
            .encode(),
        });
        source.set_height(20);

        let _pipeline =
            spawn_pipeline(source, dest.clone(), InMemoryStore::default());

        wait_until(|| dest.is_executed(ChainId(0), DepositNonce(1))).await;
        let submissions = dest.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(
            submissions[0].proposal.deposit_nonce,
            DepositNonce(1)
        );
    }

    #[tokio::test]
    async fn redelivered_deposits_are_not_executed_twice() {
        let source = Arc::new(MockConnection::new(0));
        let dest = Arc::new(MockConnection::new(1));
        let deposit = DepositEvent {
            block_number: 3,
            log_index: 0,
            destination: dest.chain_id(),
            resource_id: ResourceId::from(RESOURCE),
            deposit_nonce: DepositNonce(1),
            data: Payload::Fungible {
                recipient: vec![0xF0; 20],
                amount: U256::from(1_000),
            }
            .encode(),
        };
        source.push_deposit(deposit);
        source.set_height(20);

        let _pipeline = spawn_pipeline(
            source.clone(),
            dest.clone(),
            InMemoryStore::default(),
        );
        wait_until(|| dest.is_executed(ChainId(0), DepositNonce(1))).await;

        // a second pipeline with a blank checkpoint store rescans the same
        // deposit; the destination guard suppresses the duplicate.
        let _pipeline2 = spawn_pipeline(
            source,
            dest.clone(),
            InMemoryStore::default(),
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dest.submissions().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_executes_every_accepted_message() {
        let source = Arc::new(MockConnection::new(0));
        let dest = Arc::new(MockConnection::new(1));
        for (block, deposit_nonce) in [(3u64, 1u64), (4, 2)] {
            source.push_deposit(DepositEvent {
                block_number: block,
                log_index: 0,
                destination: dest.chain_id(),
                resource_id: ResourceId::from(RESOURCE),
                deposit_nonce: DepositNonce(deposit_nonce),
                data: Payload::Fungible {
                    recipient: vec![0xF0; 20],
                    amount: U256::from(1_000),
                }
                .encode(),
            });
        }
        source.set_height(20);
        // the first message stalls past the confirmation timeout once, so
        // the second is still queued when shutdown arrives.
        dest.plan_statuses([
            TxStatus::Pending,
            TxStatus::Confirmed,
            TxStatus::Confirmed,
        ]);

        let store = InMemoryStore::default();
        let pipeline =
            spawn_pipeline(source.clone(), dest.clone(), store.clone());

        // the listener has checkpointed past both deposits; they now only
        // exist inside the writer's queue.
        let key = (ChainId(0), source.relayer_address());
        wait_until(|| store.get_latest_block(key, 0).unwrap() >= 10).await;
        pipeline.notify.send(()).unwrap();

        pipeline.writer_task.await.unwrap().unwrap();
        assert!(dest.is_executed(ChainId(0), DepositNonce(1)));
        assert!(dest.is_executed(ChainId(0), DepositNonce(2)));
    }
}
