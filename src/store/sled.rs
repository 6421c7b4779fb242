// Copyright 2024 Bridge Relay Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::path::Path;

use super::{CheckpointKey, CheckpointStore};
use crate::error::Result;

/// A durable, sled-backed checkpoint store.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens (or creates) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::Config::new()
            .path(path)
            .temporary(cfg!(test))
            .use_compression(true)
            .compression_factor(18)
            .open()?;
        Ok(Self { db })
    }

    /// Opens a store backed by a temporary directory, deleted on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl CheckpointStore for SledStore {
    #[tracing::instrument(skip(self))]
    fn set_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        block_number: u64,
    ) -> Result<u64> {
        let tree = self.db.open_tree("checkpoints")?;
        let bytes = block_number.to_le_bytes();
        let old = tree.insert(key.into().to_bytes(), &bytes)?;
        // the checkpoint is the resume position; it must hit disk before
        // the cursor advances past it.
        tree.flush()?;
        match old {
            Some(v) => Ok(le_bytes_to_u64(&v)),
            None => Ok(block_number),
        }
    }

    #[tracing::instrument(skip(self))]
    fn get_latest_block<K: Into<CheckpointKey> + Debug>(
        &self,
        key: K,
        default_block_number: u64,
    ) -> Result<u64> {
        let tree = self.db.open_tree("checkpoints")?;
        let val = tree.get(key.into().to_bytes())?;
        match val {
            Some(v) => Ok(le_bytes_to_u64(&v)),
            None => Ok(default_block_number),
        }
    }
}

fn le_bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use ethers::types::Address;

    use super::*;
    use crate::types::ChainId;

    #[test]
    fn checkpoint_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SledStore::open(tmp.path()).unwrap();
        let key = (ChainId(1), Address::zero());
        // it is empty now.
        assert_eq!(store.get_latest_block(key, 1).unwrap(), 1);
        store.set_latest_block(key, 100).unwrap();
        assert_eq!(store.get_latest_block(key, 1).unwrap(), 100);
        // overwriting returns the previous value.
        assert_eq!(store.set_latest_block(key, 120).unwrap(), 100);
        assert_eq!(store.get_latest_block(key, 1).unwrap(), 120);
    }

    #[test]
    fn keys_are_scoped_by_chain_and_relayer() {
        let store = SledStore::temporary().unwrap();
        let same_relayer_other_chain = (ChainId(2), Address::zero());
        let same_chain_other_relayer = (ChainId(1), Address::repeat_byte(9));
        store.set_latest_block((ChainId(1), Address::zero()), 50).unwrap();
        assert_eq!(
            store.get_latest_block(same_relayer_other_chain, 0).unwrap(),
            0
        );
        assert_eq!(
            store.get_latest_block(same_chain_other_relayer, 0).unwrap(),
            0
        );
    }
}
