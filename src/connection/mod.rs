// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Chain access.
//!
//! A [`Connection`] is the single point of access to one chain's RPC
//! endpoint: height queries, deposit-event fetches, proposal submission and
//! receipt polling. It also owns the [`NonceAllocator`] for the relayer's
//! signing identity on that chain, so every submitter sharing the
//! connection draws nonces from one serialized counter.

use ethers::types::{Address, H256};

use crate::error::Result;
use crate::types::{ChainId, DepositNonce, Proposal, ResourceId};

pub mod evm;

/// A deposit event as decoded by the chain's contract bindings.
///
/// The payload bytes stay raw here; interpreting them against the resource
/// registry is the listener's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositEvent {
    /// The block the deposit was included in.
    pub block_number: u64,
    /// The log index of the deposit within its block.
    pub log_index: u64,
    /// The chain the deposit must be executed on.
    pub destination: ChainId,
    /// The resource the deposit refers to.
    pub resource_id: ResourceId,
    /// The source chain's sequence number for this deposit.
    pub deposit_nonce: DepositNonce,
    /// The raw payload bytes, in the bridge wire format.
    pub data: Vec<u8>,
}

/// Where a submitted transaction currently stands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Known to the node but not yet mined deep enough.
    Pending,
    /// Mined, non-reverted, with enough confirmations behind it.
    Confirmed,
    /// Mined but reverted; its nonce is consumed.
    Reverted,
    /// Unknown to the node, likely evicted from the mempool.
    Dropped,
}

/// A single chain's RPC access, as the relay core sees it.
///
/// Implementations retry nothing themselves; transient failures surface as
/// errors so callers apply their own backoff policy.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The bridge-level id of the chain this connection talks to.
    fn chain_id(&self) -> ChainId;

    /// The relayer account address on this chain.
    fn relayer_address(&self) -> Address;

    /// The nonce allocator for the relayer identity on this chain.
    fn nonces(&self) -> &NonceAllocator;

    /// The chain's current head height.
    async fn current_height(&self) -> Result<u64>;

    /// All deposit events in the inclusive block range `[from, to]`.
    async fn fetch_deposits(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<DepositEvent>>;

    /// Signs and submits a proposal execution with an explicit nonce.
    ///
    /// `attempt` starts at 1; resubmissions pass higher values so the
    /// implementation can bump the fee for replacement transactions.
    async fn submit_proposal(
        &self,
        proposal: &Proposal,
        nonce: u64,
        attempt: u32,
    ) -> Result<H256>;

    /// The current status of a previously submitted transaction.
    async fn transaction_status(&self, tx_hash: H256) -> Result<TxStatus>;

    /// Whether the destination bridge already executed this deposit.
    async fn proposal_executed(
        &self,
        source: ChainId,
        deposit_nonce: DepositNonce,
    ) -> Result<bool>;

    /// The next account nonce the chain expects from the relayer identity,
    /// including pending transactions.
    async fn chain_nonce(&self) -> Result<u64>;
}

/// Serializes nonce issuance for one signing identity.
///
/// `reserve()` hands out the next nonce inside a guard; the lock is held
/// until the guard is committed (submission succeeded, counter advances) or
/// dropped (build/submit failed, counter untouched, nonce reused). A nonce
/// is never both committed and reused, and an error path can never leave
/// the counter locked.
#[derive(Debug)]
pub struct NonceAllocator {
    next: tokio::sync::Mutex<u64>,
}

impl NonceAllocator {
    /// Creates an allocator starting at the given account nonce.
    pub fn new(base: u64) -> Self {
        Self {
            next: tokio::sync::Mutex::new(base),
        }
    }

    /// Reserves the next nonce, waiting for any in-progress reservation.
    pub async fn reserve(&self) -> NonceGuard<'_> {
        NonceGuard {
            slot: self.next.lock().await,
            committed: false,
        }
    }

    /// Fast-forwards the counter to the chain's view, never backwards.
    ///
    /// Used after the chain consumed a nonce behind the allocator's back,
    /// e.g. a replacement transaction landing under a different hash.
    pub async fn resync(&self, chain_next: u64) {
        let mut slot = self.next.lock().await;
        if chain_next > *slot {
            tracing::debug!(
                from = *slot,
                to = chain_next,
                "resyncing nonce counter to chain"
            );
            *slot = chain_next;
        }
    }
}

/// A scoped nonce reservation. Dropping it without [`NonceGuard::commit`]
/// rolls the reservation back.
#[derive(Debug)]
pub struct NonceGuard<'a> {
    slot: tokio::sync::MutexGuard<'a, u64>,
    committed: bool,
}

impl NonceGuard<'_> {
    /// The reserved nonce value.
    pub fn nonce(&self) -> u64 {
        *self.slot
    }

    /// Marks the nonce as used and advances the counter.
    pub fn commit(mut self) {
        *self.slot += 1;
        self.committed = true;
    }
}

impl Drop for NonceGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::trace!(nonce = *self.slot, "nonce reservation rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn concurrent_reservations_are_gapless() {
        let allocator = Arc::new(NonceAllocator::new(7));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                let guard = allocator.reserve().await;
                let nonce = guard.nonce();
                guard.commit();
                nonce
            }));
        }
        let mut nonces = HashSet::new();
        for handle in handles {
            nonces.insert(handle.await.unwrap());
        }
        let expected: HashSet<u64> = (7..7 + 16).collect();
        assert_eq!(nonces, expected);
    }

    #[tokio::test]
    async fn dropped_reservation_is_reused() {
        let allocator = NonceAllocator::new(1);
        {
            let guard = allocator.reserve().await;
            assert_eq!(guard.nonce(), 1);
            // dropped without commit.
        }
        let guard = allocator.reserve().await;
        assert_eq!(guard.nonce(), 1);
        guard.commit();
        let guard = allocator.reserve().await;
        assert_eq!(guard.nonce(), 2);
    }

    #[tokio::test]
    async fn resync_never_moves_backwards() {
        let allocator = NonceAllocator::new(10);
        allocator.resync(5).await;
        assert_eq!(allocator.reserve().await.nonce(), 10);
        allocator.resync(12).await;
        assert_eq!(allocator.reserve().await.nonce(), 12);
    }
}
