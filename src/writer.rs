// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The destination-side half of the relay.
//!
//! A writer drains its chain's router queue one message at a time. For
//! each message it checks the bridge's executed-proposal guard, submits
//! an `executeProposal` transaction under a scoped nonce reservation and
//! babysits it to finality, resubmitting with a bumped fee when the
//! transaction stalls. A message that cannot be landed within the
//! configured attempt budget is surfaced as an operator-visible error
//! without taking the queue down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::H256;
use tokio::sync::mpsc;

use crate::config::ProposalConfig;
use crate::connection::{Connection, TxStatus};
use crate::context::Shutdown;
use crate::error::{Error, Result};
use crate::probe;
use crate::types::{Message, Proposal, ResourceId};

/// Submission and retry policy for one chain.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Submissions per proposal before it is abandoned.
    pub max_attempts: u32,
    /// How long a submission may stay pending before it is replaced.
    pub confirmation_timeout: Duration,
    /// Receipt polling cadence.
    pub receipt_poll_interval: Duration,
}

impl From<&ProposalConfig> for WriterConfig {
    fn from(cfg: &ProposalConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            confirmation_timeout: Duration::from_millis(cfg.confirmation_timeout),
            receipt_poll_interval: Duration::from_millis(cfg.receipt_poll_interval),
        }
    }
}

/// A submission the writer is waiting on.
#[derive(Debug, Copy, Clone)]
struct PendingProposal {
    tx_hash: H256,
    nonce: u64,
}

/// What polling a submission to its deadline concluded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxOutcome {
    Confirmed,
    Reverted,
    /// Gone from the pool without a receipt.
    Dropped,
    /// Still pending when the confirmation deadline passed.
    TimedOut,
}

/// Executes routed messages against one destination chain.
pub struct Writer<C> {
    conn: Arc<C>,
    resources: HashSet<ResourceId>,
    cfg: WriterConfig,
}

impl<C: Connection> Writer<C> {
    /// Creates a writer for one destination chain. `resources` is the set
    /// of resource ids this relayer is willing to execute there.
    pub fn new(conn: Arc<C>, resources: HashSet<ResourceId>, cfg: WriterConfig) -> Self {
        Self {
            conn,
            resources,
            cfg,
        }
    }

    /// Drains the queue until every sender is gone or shutdown is
    /// signalled. A message that fails to resolve is logged and does not
    /// poison the ones behind it.
    ///
    /// On shutdown the intake is closed and every message already accepted
    /// into the queue is still resolved before the writer exits; the
    /// listeners that produced them have checkpointed past those blocks,
    /// so dropping them here would lose the deposits permanently. The
    /// queue bound keeps the drain finite.
    pub async fn run(
        &self,
        mut queue: mpsc::Receiver<Message>,
        mut shutdown: Shutdown,
    ) -> Result<()> {
        let chain_id = self.conn.chain_id();
        loop {
            tokio::select! {
                maybe_message = queue.recv() => match maybe_message {
                    Some(message) => self.resolve_and_report(&message).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::trace!(
                        chain_id = %chain_id,
                        "shutdown signalled, draining accepted messages"
                    );
                    queue.close();
                    while let Some(message) = queue.recv().await {
                        self.resolve_and_report(&message).await;
                    }
                    break;
                },
            }
        }
        tracing::debug!(chain_id = %chain_id, "message queue closed, writer exiting");
        Ok(())
    }

    async fn resolve_and_report(&self, message: &Message) {
        if let Err(e) = self.resolve_message(message).await {
            tracing::error!(
                chain_id = %self.conn.chain_id(),
                source = %message.source,
                deposit_nonce = %message.deposit_nonce,
                error = %e,
                "failed to resolve message"
            );
        }
    }

    /// Lands one message on the destination bridge, or says why it could
    /// not be landed.
    #[tracing::instrument(
        skip(self, message),
        fields(
            source = %message.source,
            destination = %message.destination,
            deposit_nonce = %message.deposit_nonce,
        )
    )]
    async fn resolve_message(&self, message: &Message) -> Result<()> {
        if !self.resources.contains(&message.resource_id) {
            return Err(Error::UnsupportedResource {
                resource_id: message.resource_id,
            });
        }
        if self.already_executed(message).await? {
            tracing::info!("deposit already executed, nothing to submit");
            return Ok(());
        }

        let proposal = Proposal::from_message(message);
        let mut attempt: u32 = 1;
        let mut pending = self.submit_fresh(&proposal, attempt).await?;
        loop {
            let outcome = self.await_confirmation(pending.tx_hash).await?;
            match outcome {
                TxOutcome::Confirmed => {
                    tracing::event!(
                        target: probe::TARGET,
                        tracing::Level::INFO,
                        kind = %probe::Kind::Relay,
                        chain_id = %self.conn.chain_id(),
                        source = %message.source,
                        deposit_nonce = %message.deposit_nonce,
                        tx_hash = ?pending.tx_hash,
                        finalized = true,
                    );
                    return Ok(());
                }
                TxOutcome::Reverted => {
                    // the nonce is burned either way; another relayer may
                    // have executed the proposal first and made ours revert.
                    if self.already_executed(message).await? {
                        tracing::info!("proposal executed by another relayer");
                        return Ok(());
                    }
                    attempt = self.next_attempt(message, attempt)?;
                    pending = self.submit_fresh(&proposal, attempt).await?;
                }
                TxOutcome::TimedOut | TxOutcome::Dropped => {
                    let chain_next = self.conn.chain_nonce().await?;
                    if chain_next <= pending.nonce {
                        // our nonce is still open; replace the stuck
                        // transaction in place with a higher fee.
                        attempt = self.next_attempt(message, attempt)?;
                        tracing::debug!(
                            nonce = pending.nonce,
                            attempt,
                            ?outcome,
                            "resubmitting with the same nonce"
                        );
                        pending.tx_hash = self
                            .conn
                            .submit_proposal(&proposal, pending.nonce, attempt)
                            .await?;
                    } else {
                        // something else consumed our nonce; realign the
                        // allocator and start over unless the work is done.
                        self.conn.nonces().resync(chain_next).await;
                        if self.already_executed(message).await? {
                            tracing::info!("proposal executed by another relayer");
                            return Ok(());
                        }
                        attempt = self.next_attempt(message, attempt)?;
                        pending = self.submit_fresh(&proposal, attempt).await?;
                    }
                }
            }
        }
    }

    async fn already_executed(&self, message: &Message) -> Result<bool> {
        self.conn
            .proposal_executed(message.source, message.deposit_nonce)
            .await
    }

    fn next_attempt(&self, message: &Message, attempt: u32) -> Result<u32> {
        if attempt >= self.cfg.max_attempts {
            return Err(Error::ProposalAbandoned {
                source_chain: message.source,
                destination: message.destination,
                deposit_nonce: message.deposit_nonce,
                attempts: attempt,
            });
        }
        Ok(attempt + 1)
    }

    /// Reserves the next nonce, submits under it and commits the
    /// reservation. An error while submitting drops the guard and rolls
    /// the reservation back.
    async fn submit_fresh(
        &self,
        proposal: &Proposal,
        attempt: u32,
    ) -> Result<PendingProposal> {
        let guard = self.conn.nonces().reserve().await;
        let nonce = guard.nonce();
        let tx_hash = self.conn.submit_proposal(proposal, nonce, attempt).await?;
        guard.commit();
        Ok(PendingProposal { tx_hash, nonce })
    }

    /// Polls a submitted transaction until it settles or the confirmation
    /// deadline passes.
    async fn await_confirmation(&self, tx_hash: H256) -> Result<TxOutcome> {
        let deadline = tokio::time::Instant::now() + self.cfg.confirmation_timeout;
        loop {
            match self.conn.transaction_status(tx_hash).await? {
                TxStatus::Confirmed => return Ok(TxOutcome::Confirmed),
                TxStatus::Reverted => return Ok(TxOutcome::Reverted),
                TxStatus::Dropped => return Ok(TxOutcome::Dropped),
                TxStatus::Pending => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(TxOutcome::TimedOut);
            }
            tokio::time::sleep(self.cfg.receipt_poll_interval).await;
        }
    }
}
