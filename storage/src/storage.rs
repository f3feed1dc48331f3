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

use strata_objects::{Block, Transaction};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A mempool entry: the transaction plus the peers already informed of it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub transaction: Transaction,
    #[serde(default)]
    pub sent_to: HashSet<String>,
}

/// A candidate block held in consensus staging, keyed by who supplied it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagedBlock {
    pub block: Block,
    pub peer_rid: String,
}

/// A miner share: a nonce that met the pool target but not the network target.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Share {
    pub address: String,
    pub index: u32,
    pub hash: String,
    pub nonce: String,
    pub time: i64,
    #[serde(default)]
    pub paid: bool,
}

/// An append-only diagnostic record of an evicted or rejected transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedTransaction {
    pub reason: String,
    pub transaction: Transaction,
}

/// The persistent collections: blocks, miner transactions (mempool),
/// consensus staging, shares and the failed-transaction sink.
#[derive(Default)]
pub struct Storage {
    blocks: RwLock<BTreeMap<u32, Block>>,
    mempool: RwLock<HashMap<String, MempoolEntry>>,
    staging: RwLock<HashMap<(String, String), StagedBlock>>,
    shares: RwLock<HashMap<String, Share>>,
    failed: RwLock<Vec<FailedTransaction>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    // -- blocks --------------------------------------------------------------

    /// Upserts a block at its index; the previous occupant, if any, is replaced.
    pub fn insert_block(&self, block: Block) {
        self.blocks.write().insert(block.index, block);
    }

    pub fn get_block_by_index(&self, index: u32) -> Option<Block> {
        self.blocks.read().get(&index).cloned()
    }

    pub fn get_block_by_hash(&self, hash: &str) -> Option<Block> {
        self.blocks
            .read()
            .values()
            .find(|block| block.hash == hash)
            .cloned()
    }

    /// The block whose `prev_hash` links to the given hash.
    pub fn get_child_block(&self, hash: &str) -> Option<Block> {
        self.blocks
            .read()
            .values()
            .find(|block| block.prev_hash == hash)
            .cloned()
    }

    pub fn latest_block(&self) -> Option<Block> {
        self.blocks.read().values().next_back().cloned()
    }

    pub fn block_height(&self) -> Option<u32> {
        self.blocks.read().keys().next_back().copied()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// All main-chain blocks with `index >= start`, ascending.
    pub fn blocks_from(&self, start: u32) -> Vec<Block> {
        self.blocks.read().range(start..).map(|(_, b)| b.clone()).collect()
    }

    /// Main-chain blocks in the inclusive index range, ascending.
    pub fn blocks_in_range(&self, start: u32, end: u32) -> Vec<Block> {
        self.blocks
            .read()
            .range(start..=end)
            .map(|(_, b)| b.clone())
            .collect()
    }

    /// Deletes every main-chain block with `index >= start`.
    pub fn delete_blocks_from(&self, start: u32) -> usize {
        let mut blocks = self.blocks.write();
        let doomed: Vec<u32> = blocks.range(start..).map(|(i, _)| *i).collect();
        for index in &doomed {
            blocks.remove(index);
        }
        doomed.len()
    }

    /// Finds a transaction on the main chain together with its block height.
    pub fn get_transaction_by_id(&self, id: &str) -> Option<(Transaction, u32)> {
        for block in self.blocks.read().values() {
            for transaction in &block.transactions {
                if transaction.transaction_signature == id {
                    return Some((transaction.clone(), block.index));
                }
            }
        }
        None
    }

    pub fn transaction_in_chain(&self, id: &str) -> bool {
        self.get_transaction_by_id(id).is_some()
    }

    /// Whether any main-chain transaction by this key already spends the input.
    pub fn is_input_spent(&self, input_id: &str, public_key: &str) -> bool {
        self.blocks.read().values().any(|block| {
            block.transactions.iter().any(|transaction| {
                transaction.public_key == public_key
                    && transaction.inputs.iter().any(|input| input.id == input_id)
            })
        })
    }

    /// Chain transaction ids paying the address, with the value paid, that the
    /// key has not yet spent. Used to fund pool payouts.
    pub fn unspent_outputs(&self, address: &str, public_key: &str) -> Vec<(String, u64)> {
        let blocks = self.blocks.read();
        blocks
            .values()
            .flat_map(|block| block.transactions.iter())
            .filter(|transaction| transaction.value_to_address(address) > 0)
            .map(|transaction| {
                (
                    transaction.transaction_signature.clone(),
                    transaction.value_to_address(address),
                )
            })
            .filter(|(id, _)| {
                !blocks.values().any(|block| {
                    block.transactions.iter().any(|transaction| {
                        transaction.public_key == public_key
                            && transaction.inputs.iter().any(|input| input.id == *id)
                    })
                })
            })
            .collect()
    }

    // -- consensus staging ---------------------------------------------------

    /// Upserts a candidate block keyed by `(signature, supplying peer rid)`.
    pub fn upsert_staged(&self, block: Block, peer_rid: &str) {
        self.staging.write().insert(
            (block.signature.clone(), peer_rid.to_string()),
            StagedBlock {
                block,
                peer_rid: peer_rid.to_string(),
            },
        );
    }

    pub fn staged_by_hash(&self, hash: &str) -> Option<StagedBlock> {
        self.staging
            .read()
            .values()
            .find(|staged| staged.block.hash == hash)
            .cloned()
    }

    /// A staged block whose `prev_hash` links to the given hash.
    pub fn staged_child_of(&self, hash: &str) -> Option<StagedBlock> {
        self.staging
            .read()
            .values()
            .find(|staged| staged.block.prev_hash == hash)
            .cloned()
    }

    pub fn staged_count(&self) -> usize {
        self.staging.read().len()
    }

    /// Drops staging entries below the given height; they can never win a fork.
    pub fn prune_staged_below(&self, index: u32) -> usize {
        let mut staging = self.staging.write();
        let before = staging.len();
        staging.retain(|_, staged| staged.block.index >= index);
        before - staging.len()
    }

    // -- mempool (miner transactions) ----------------------------------------

    /// Upserts a mempool entry by transaction id, merging the sent-to set.
    pub fn upsert_mempool(&self, transaction: Transaction, sent_to: Vec<String>) {
        let mut mempool = self.mempool.write();
        let entry = mempool
            .entry(transaction.transaction_signature.clone())
            .or_insert_with(|| MempoolEntry {
                transaction: transaction.clone(),
                sent_to: HashSet::new(),
            });
        entry.transaction = transaction;
        entry.sent_to.extend(sent_to);
    }

    pub fn mempool_contains(&self, id: &str) -> bool {
        self.mempool.read().contains_key(id)
    }

    pub fn mempool_get(&self, id: &str) -> Option<MempoolEntry> {
        self.mempool.read().get(id).cloned()
    }

    pub fn remove_mempool(&self, id: &str) -> Option<MempoolEntry> {
        self.mempool.write().remove(id)
    }

    pub fn remove_mempool_ids(&self, ids: &[String]) {
        let mut mempool = self.mempool.write();
        for id in ids {
            mempool.remove(id);
        }
    }

    /// Mempool transactions ordered by descending fee.
    pub fn mempool_by_fee(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = self
            .mempool
            .read()
            .values()
            .map(|entry| entry.transaction.clone())
            .collect();
        transactions.sort_by(|a, b| b.fee.cmp(&a.fee));
        transactions
    }

    pub fn mempool_mark_sent(&self, id: &str, peer_rid: &str) {
        if let Some(entry) = self.mempool.write().get_mut(id) {
            entry.sent_to.insert(peer_rid.to_string());
        }
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.read().len()
    }

    // -- shares --------------------------------------------------------------

    /// Upserts a share by block hash; a re-submitted share keeps its paid flag.
    pub fn upsert_share(&self, share: Share) {
        let mut shares = self.shares.write();
        let paid = shares.get(&share.hash).map(|s| s.paid).unwrap_or(false);
        shares.insert(share.hash.clone(), Share { paid, ..share });
    }

    pub fn unpaid_shares(&self) -> Vec<Share> {
        self.shares
            .read()
            .values()
            .filter(|share| !share.paid)
            .cloned()
            .collect()
    }

    pub fn mark_shares_paid(&self, hashes: &[String]) {
        let mut shares = self.shares.write();
        for hash in hashes {
            if let Some(share) = shares.get_mut(hash) {
                share.paid = true;
            }
        }
    }

    pub fn share_count(&self) -> usize {
        self.shares.read().len()
    }

    // -- failed transactions -------------------------------------------------

    pub fn record_failed(&self, reason: &str, transaction: Transaction) {
        self.failed.write().push(FailedTransaction {
            reason: reason.to_string(),
            transaction,
        });
    }

    pub fn failed_transactions(&self) -> Vec<FailedTransaction> {
        self.failed.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::crypto::KeyPair;
    use strata_objects::{Input, Output};

    fn block_at(keys: &KeyPair, index: u32, prev_hash: &str) -> Block {
        let mut block =
            Block::generate(vec![], &keys.public_key, 1, index, prev_hash, 1_700_000_000);
        block.target = primitive_types_max();
        block.seal("1", &keys.secret_key).unwrap();
        block
    }

    fn primitive_types_max() -> primitive_types::U256 {
        primitive_types::U256::MAX
    }

    fn transaction(keys: &KeyPair, input: &str) -> Transaction {
        Transaction::generate(
            &keys.public_key,
            &keys.secret_key,
            vec![Input { id: input.into() }],
            vec![Output {
                to: "addr".into(),
                value: 1,
            }],
            0,
            0,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn blocks_upsert_by_index() {
        let storage = Storage::new();
        let keys = KeyPair::generate();
        let first = block_at(&keys, 3, "aa");
        let second = block_at(&keys, 3, "bb");
        storage.insert_block(first);
        storage.insert_block(second.clone());
        assert_eq!(storage.block_count(), 1);
        assert_eq!(storage.get_block_by_index(3).unwrap().prev_hash, "bb");
        assert_eq!(storage.latest_block().unwrap().hash, second.hash);
    }

    #[test]
    fn delete_from_truncates_suffix() {
        let storage = Storage::new();
        let keys = KeyPair::generate();
        for index in 0..5 {
            storage.insert_block(block_at(&keys, index, "00"));
        }
        assert_eq!(storage.delete_blocks_from(3), 2);
        assert_eq!(storage.block_height(), Some(2));
    }

    #[test]
    fn staging_is_keyed_by_signature_and_peer() {
        let storage = Storage::new();
        let keys = KeyPair::generate();
        let block = block_at(&keys, 1, "00");
        storage.upsert_staged(block.clone(), "peer-a");
        storage.upsert_staged(block.clone(), "peer-a");
        storage.upsert_staged(block, "peer-b");
        assert_eq!(storage.staged_count(), 2);
    }

    #[test]
    fn mempool_upsert_merges_sent_to() {
        let storage = Storage::new();
        let keys = KeyPair::generate();
        let txn = transaction(&keys, "input-1");
        storage.upsert_mempool(txn.clone(), vec!["peer-a".into()]);
        storage.upsert_mempool(txn.clone(), vec!["peer-b".into()]);
        assert_eq!(storage.mempool_len(), 1);
        let entry = storage.mempool_get(&txn.transaction_signature).unwrap();
        assert_eq!(entry.sent_to.len(), 2);
    }

    #[test]
    fn shares_unique_by_hash_and_keep_paid() {
        let storage = Storage::new();
        let share = Share {
            address: "addr".into(),
            index: 1,
            hash: "h1".into(),
            nonce: "n".into(),
            time: 0,
            paid: false,
        };
        storage.upsert_share(share.clone());
        storage.mark_shares_paid(&["h1".into()]);
        storage.upsert_share(share);
        assert_eq!(storage.share_count(), 1);
        assert!(storage.unpaid_shares().is_empty());
    }
}
