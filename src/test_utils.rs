// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared test doubles. The mock connection behaves like a small chain:
//! deposits live at fixed block positions, submissions consume nonces when
//! they land, and the executed-proposal set mirrors what a bridge contract
//! would report.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use ethers::types::{Address, H256};
use parking_lot::Mutex;

use crate::connection::{Connection, DepositEvent, NonceAllocator, TxStatus};
use crate::error::Result;
use crate::types::{ChainId, DepositNonce, Proposal};

/// One call to `submit_proposal`, recorded for assertions.
#[derive(Debug, Clone)]
pub struct SubmittedTx {
    /// The proposal as submitted.
    pub proposal: Proposal,
    /// The account nonce the submission reserved.
    pub nonce: u64,
    /// Which attempt at landing the proposal this was, starting at 1.
    pub attempt: u32,
    /// The hash the submission resolved to.
    pub tx_hash: H256,
}

/// An in-memory [`Connection`] with scriptable heights, deposits and
/// transaction outcomes.
pub struct MockConnection {
    chain_id: ChainId,
    address: Address,
    nonces: NonceAllocator,
    height: AtomicU64,
    chain_next: AtomicU64,
    tx_counter: AtomicU64,
    deposits: Mutex<Vec<DepositEvent>>,
    executed: Mutex<HashSet<(ChainId, DepositNonce)>>,
    submissions: Mutex<Vec<SubmittedTx>>,
    statuses: Mutex<HashMap<H256, TxStatus>>,
    /// Statuses handed out to submissions in order; once the plan is
    /// drained, every further submission confirms.
    planned_statuses: Mutex<Vec<TxStatus>>,
    /// How many upcoming `current_height` calls fail with a transient
    /// RPC error.
    height_failures: AtomicU64,
}

impl MockConnection {
    /// Creates a chain at height 0 with no deposits and a free nonce space.
    pub fn new(chain_id: u8) -> Self {
        Self {
            chain_id: ChainId(chain_id),
            address: Address::from_low_u64_be(u64::from(chain_id) + 0xAA),
            nonces: NonceAllocator::new(0),
            height: AtomicU64::new(0),
            chain_next: AtomicU64::new(0),
            tx_counter: AtomicU64::new(0),
            deposits: Mutex::new(Vec::new()),
            executed: Mutex::new(HashSet::new()),
            submissions: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            planned_statuses: Mutex::new(Vec::new()),
            height_failures: AtomicU64::new(0),
        }
    }

    /// Sets the current chain height.
    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Makes the next `n` height queries fail as if the RPC endpoint
    /// dropped the connection.
    pub fn fail_next_height_calls(&self, n: u64) {
        self.height_failures.store(n, Ordering::SeqCst);
    }

    /// Places a deposit on the mock chain at its block position.
    pub fn push_deposit(&self, deposit: DepositEvent) {
        self.deposits.lock().push(deposit);
    }

    /// Marks a proposal as already executed on the bridge.
    pub fn mark_executed(&self, source: ChainId, deposit_nonce: DepositNonce) {
        self.executed.lock().insert((source, deposit_nonce));
    }

    /// Queues the statuses the next submissions will resolve to.
    pub fn plan_statuses(&self, statuses: impl IntoIterator<Item = TxStatus>) {
        self.planned_statuses.lock().extend(statuses);
    }

    /// Every submission seen so far, in order.
    pub fn submissions(&self) -> Vec<SubmittedTx> {
        self.submissions.lock().clone()
    }

    /// Whether the bridge records this proposal as executed.
    pub fn is_executed(&self, source: ChainId, deposit_nonce: DepositNonce) -> bool {
        self.executed.lock().contains(&(source, deposit_nonce))
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn relayer_address(&self) -> Address {
        self.address
    }

    fn nonces(&self) -> &NonceAllocator {
        &self.nonces
    }

    async fn current_height(&self) -> Result<u64> {
        let remaining = self.height_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.height_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ethers::providers::ProviderError::CustomError(
                "connection reset".into(),
            )
            .into());
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn fetch_deposits(&self, from: u64, to: u64) -> Result<Vec<DepositEvent>> {
        let deposits = self
            .deposits
            .lock()
            .iter()
            .filter(|d| d.block_number >= from && d.block_number <= to)
            .cloned()
            .collect();
        Ok(deposits)
    }

    async fn submit_proposal(
        &self,
        proposal: &Proposal,
        nonce: u64,
        attempt: u32,
    ) -> Result<H256> {
        let tx_hash =
            H256::from_low_u64_be(self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1);
        let status = {
            let mut plan = self.planned_statuses.lock();
            if plan.is_empty() {
                TxStatus::Confirmed
            } else {
                plan.remove(0)
            }
        };
        match status {
            TxStatus::Confirmed => {
                // landing consumes the nonce and flips the on-chain guard.
                self.chain_next.fetch_max(nonce + 1, Ordering::SeqCst);
                self.executed
                    .lock()
                    .insert((proposal.source, proposal.deposit_nonce));
            }
            TxStatus::Reverted => {
                self.chain_next.fetch_max(nonce + 1, Ordering::SeqCst);
            }
            TxStatus::Pending | TxStatus::Dropped => {}
        }
        self.statuses.lock().insert(tx_hash, status);
        self.submissions.lock().push(SubmittedTx {
            proposal: proposal.clone(),
            nonce,
            attempt,
            tx_hash,
        });
        Ok(tx_hash)
    }

    async fn transaction_status(&self, tx_hash: H256) -> Result<TxStatus> {
        Ok(self
            .statuses
            .lock()
            .get(&tx_hash)
            .copied()
            .unwrap_or(TxStatus::Dropped))
    }

    async fn proposal_executed(
        &self,
        source: ChainId,
        deposit_nonce: DepositNonce,
    ) -> Result<bool> {
        Ok(self.executed.lock().contains(&(source, deposit_nonce)))
    }

    async fn chain_nonce(&self) -> Result<u64> {
        Ok(self.chain_next.load(Ordering::SeqCst))
    }
}
