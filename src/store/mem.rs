// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CheckpointKey, CheckpointStore};
use crate::error::Result;

/// A checkpoint store held entirely in memory.
///
/// Used in tests and ephemeral runs; provides no durability across process
/// restarts.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    latest_blocks: Arc<RwLock<HashMap<CheckpointKey, u64>>>,
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").finish()
    }
}

impl CheckpointStore for InMemoryStore {
    #[tracing::instrument(skip(self))]
    fn set_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64> {
        let mut guard = self.latest_blocks.write();
        let val = guard.entry(key.into()).or_insert(block_number);
        let old = *val;
        *val = block_number;
        Ok(old)
    }

    #[tracing::instrument(skip(self))]
    fn get_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64> {
        let guard = self.latest_blocks.read();
        let val = guard
            .get(&key.into())
            .copied()
            .unwrap_or(default_block_number);
        Ok(val)
    }
}

#[cfg(test)]
mod tests {
    use ethers::types::Address;

    use super::*;
    use crate::types::ChainId;

    #[test]
    fn returns_default_when_unset() {
        let store = InMemoryStore::default();
        let key = (ChainId(0), Address::zero());
        assert_eq!(store.get_latest_block(key, 42).unwrap(), 42);
    }

    #[test]
    fn distinct_relayers_do_not_collide() {
        let store = InMemoryStore::default();
        let a = (ChainId(0), Address::zero());
        let b = (ChainId(0), Address::repeat_byte(1));
        store.set_latest_block(a, 10).unwrap();
        store.set_latest_block(b, 20).unwrap();
        assert_eq!(store.get_latest_block(a, 0).unwrap(), 10);
        assert_eq!(store.get_latest_block(b, 0).unwrap(), 20);
    }
}
