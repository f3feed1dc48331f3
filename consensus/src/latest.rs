// Copyright (C) 2020-2023 The Strata Team
// This file is part of the strata library.

// The strata library is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// The strata library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with the strata library. If not, see <https://www.gnu.org/licenses/>.

use strata_objects::Block;
use strata_storage::Storage;

use parking_lot::RwLock;
use tokio::sync::watch;

/// The cached chain tip, with change notification for subscribers such as the
/// mining pool.
pub struct LatestBlock {
    block: RwLock<Option<Block>>,
    notifier: watch::Sender<u64>,
}

impl Default for LatestBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestBlock {
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(0);
        Self {
            block: RwLock::new(None),
            notifier,
        }
    }

    pub fn get(&self) -> Option<Block> {
        self.block.read().clone()
    }

    pub fn height(&self) -> u32 {
        self.block.read().as_ref().map(|b| b.index).unwrap_or(0)
    }

    /// A receiver that wakes whenever the tip changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }

    pub fn set(&self, block: Block) {
        let height = block.index as u64;
        *self.block.write() = Some(block);
        self.notifier.send_replace(height);
    }

    /// Re-reads the tip from storage; returns whether the cache changed.
    pub fn block_checker(&self, storage: &Storage) -> bool {
        let stored = storage.latest_block();
        let cached_hash = self.block.read().as_ref().map(|b| b.hash.clone());
        match stored {
            Some(block) if cached_hash.as_deref() != Some(block.hash.as_str()) => {
                debug!("latest block cache updated to height {}", block.index);
                self.set(block);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::crypto::KeyPair;

    fn block_at(keys: &KeyPair, index: u32) -> Block {
        let mut block = Block::generate(vec![], &keys.public_key, 1, index, "00", 0);
        block.target = primitive_types::U256::MAX;
        block.seal("1", &keys.secret_key).unwrap();
        block
    }

    #[test]
    fn block_checker_tracks_storage() {
        let keys = KeyPair::generate();
        let storage = Storage::new();
        let latest = LatestBlock::new();

        assert!(!latest.block_checker(&storage));

        storage.insert_block(block_at(&keys, 0));
        assert!(latest.block_checker(&storage));
        assert_eq!(latest.height(), 0);

        // unchanged tip is a no-op
        assert!(!latest.block_checker(&storage));

        storage.insert_block(block_at(&keys, 1));
        assert!(latest.block_checker(&storage));
        assert_eq!(latest.height(), 1);
    }

    #[tokio::test]
    async fn subscribers_wake_on_change() {
        let keys = KeyPair::generate();
        let latest = LatestBlock::new();
        let mut receiver = latest.subscribe();

        latest.set(block_at(&keys, 5));
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), 5);
    }
}
