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

//! The bounded queue between RPC handlers and the consensus engine.
//!
//! A single consumer drains it, which serializes chain integration; items are
//! deduplicated on the `(first hash, final hash)` window key, including
//! against the most recently popped item.

use crate::blockchain::Blockchain;

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

const QUEUE_CAPACITY: usize = 64;

/// A candidate window awaiting integration, with the peer that supplied it.
#[derive(Clone, Debug)]
pub struct ProcessingItem {
    pub blockchain: Blockchain,
    pub peer_rid: Option<String>,
}

type WindowKey = (String, String);

#[derive(Default)]
struct QueueState {
    pending: Mutex<HashSet<WindowKey>>,
    last_popped: Mutex<Option<WindowKey>>,
}

#[derive(Clone)]
pub struct BlockQueue {
    sender: mpsc::Sender<ProcessingItem>,
    state: Arc<QueueState>,
}

pub struct BlockQueueReceiver {
    receiver: mpsc::Receiver<ProcessingItem>,
    state: Arc<QueueState>,
}

pub fn block_queue() -> (BlockQueue, BlockQueueReceiver) {
    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let state = Arc::new(QueueState::default());
    (
        BlockQueue {
            sender,
            state: state.clone(),
        },
        BlockQueueReceiver { receiver, state },
    )
}

fn window_key(item: &ProcessingItem) -> Option<WindowKey> {
    Some((
        item.blockchain.first_block()?.hash.clone(),
        item.blockchain.final_block()?.hash.clone(),
    ))
}

impl BlockQueue {
    /// Enqueues an item unless the same window is already queued or was just
    /// processed. Returns whether the item was accepted.
    pub async fn add(&self, item: ProcessingItem) -> bool {
        let key = match window_key(&item) {
            Some(key) => key,
            None => return false,
        };

        if self.state.last_popped.lock().as_ref() == Some(&key) {
            return false;
        }
        if !self.state.pending.lock().insert(key.clone()) {
            return false;
        }

        if self.sender.send(item).await.is_err() {
            self.state.pending.lock().remove(&key);
            return false;
        }
        true
    }
}

impl BlockQueueReceiver {
    pub async fn recv(&mut self) -> Option<ProcessingItem> {
        let item = self.receiver.recv().await?;
        if let Some(key) = window_key(&item) {
            self.state.pending.lock().remove(&key);
            *self.state.last_popped.lock() = Some(key);
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::{crypto::KeyPair, Block};

    fn item(keys: &KeyPair, index: u32) -> ProcessingItem {
        let mut block = Block::generate(vec![], &keys.public_key, 1, index, "00", 0);
        block.target = primitive_types::U256::MAX;
        block.seal("1", &keys.secret_key).unwrap();
        ProcessingItem {
            blockchain: Blockchain::from_block(block),
            peer_rid: None,
        }
    }

    #[tokio::test]
    async fn duplicate_windows_are_dropped() {
        let (queue, mut receiver) = block_queue();
        let keys = KeyPair::generate();
        let first = item(&keys, 1);

        assert!(queue.add(first.clone()).await);
        assert!(!queue.add(first.clone()).await);

        let popped = receiver.recv().await.unwrap();
        assert_eq!(
            popped.blockchain.final_block().unwrap().hash,
            first.blockchain.final_block().unwrap().hash
        );

        // the just-popped window is also refused
        assert!(!queue.add(first).await);
        assert!(queue.add(item(&keys, 2)).await);
    }
}
