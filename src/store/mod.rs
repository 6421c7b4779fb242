// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

//! Durable checkpoint storage.
//!
//! A checkpoint is the last block height fully processed by a listener for
//! one `(chain, relayer identity)` pair. It is read once at startup to seed
//! the scan cursor and written after each successfully handed-off block
//! range, so distinct relayer identities sharing one database never collide.

use std::fmt::{Debug, Display};

use ethers::types::Address;

use crate::error::Result;
use crate::types::ChainId;

pub mod mem;
pub mod sled;

/// The key a checkpoint is stored under: the chain plus the relayer
/// identity scanning it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CheckpointKey {
    /// The chain the checkpoint belongs to.
    pub chain_id: ChainId,
    /// The relayer account the checkpoint belongs to.
    pub relayer: Address,
}

impl CheckpointKey {
    /// Creates a checkpoint key.
    pub fn new(chain_id: ChainId, relayer: Address) -> Self {
        Self { chain_id, relayer }
    }

    /// A stable byte encoding, usable as a database key.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(1 + 20);
        vec.push(self.chain_id.0);
        vec.extend_from_slice(self.relayer.as_bytes());
        vec
    }
}

impl Display for CheckpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain_id {}, relayer {:?}", self.chain_id, self.relayer)
    }
}

impl From<(ChainId, Address)> for CheckpointKey {
    fn from((chain_id, relayer): (ChainId, Address)) -> Self {
        Self::new(chain_id, relayer)
    }
}

/// CheckpointStore is a simple trait for storing and retrieving the last
/// fully processed block height per chain and relayer identity.
///
/// Implementations must make `set_latest_block` durable before returning
/// success; it is the single source of truth for the resume position.
pub trait CheckpointStore: Clone + Send + Sync + 'static {
    /// Sets the new block number for that key and returns the old one.
    fn set_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64>;

    /// Get the last processed block number for that key.
    /// if not found, returns the `default_block_number`.
    fn get_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64>;
}
