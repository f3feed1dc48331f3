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

//! Fork resolution and chain integration.
//!
//! Blocks from peers land in consensus staging first. An inbound candidate is
//! walked backward to a main-chain ancestor (requesting the missing parent if
//! the walk dead-ends), extended forward through store and staging, and the
//! assembled window replaces the local suffix only when it proves strictly
//! heavier. Only one integration sequence runs at a time.

use crate::{
    blockchain::Blockchain,
    error::ConsensusError,
    latest::LatestBlock,
    params::{
        self, block_reward, version_for_height, Network, CHECK_TIME_FROM, MAX_BLOCKS_PER_MESSAGE,
        MAX_TARGET, SPECIAL_MIN_FORK, SPECIAL_MIN_GRACE_END,
    },
};

use strata_objects::{Block, Output, Transaction, TransactionError};
use strata_storage::Storage;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The result of walking an inbound block backward toward the main chain.
#[derive(Clone, Debug)]
pub enum BackwardResult {
    /// Staged ancestors (oldest first, excluding the walked block) down to a
    /// parent that is on the main chain.
    AtFork(Vec<Block>),
    /// The walk dead-ended; the supplier should be asked for this block.
    Missing { hash: String, index: u32 },
}

/// What became of an inbound block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Already on the main chain; re-delivery is a no-op.
    AlreadyKnown,
    /// The block (with any staged relatives) now heads the main chain.
    Integrated,
    /// Verified and staged, but its chain did not beat the local one.
    StagedOnly,
    /// An ancestor is neither stored nor staged; request it from the peer.
    MissingAncestor { hash: String, index: u32 },
    /// Failed verification; refused outright.
    Rejected,
}

pub struct Consensus {
    pub storage: Arc<Storage>,
    pub latest: Arc<LatestBlock>,
    pub network: Network,
    /// Set while a bottom-up sync is outstanding.
    pub syncing: AtomicBool,
    /// Guards the single in-flight chain-swap sequence.
    busy: AtomicBool,
}

impl Consensus {
    pub fn new(storage: Arc<Storage>, latest: Arc<LatestBlock>, network: Network) -> Arc<Self> {
        Arc::new(Self {
            storage,
            latest,
            network,
            syncing: AtomicBool::new(false),
            busy: AtomicBool::new(false),
        })
    }

    /// Creates and stores the height-zero block when the store is empty.
    pub fn insert_genesis(
        &self,
        public_key: &str,
        secret_key: &str,
    ) -> Result<Block, ConsensusError> {
        let now = chrono::Utc::now().timestamp();
        let address = strata_objects::crypto::address_from_public_key(public_key)?;
        let coinbase = Transaction::generate(
            public_key,
            secret_key,
            vec![],
            vec![Output {
                to: address,
                value: block_reward(0),
            }],
            0,
            now,
            None,
            None,
        )?;

        let mut block = Block::generate(
            vec![coinbase],
            public_key,
            version_for_height(0),
            0,
            "",
            now,
        );
        block.target = MAX_TARGET;
        block.special_target = MAX_TARGET;
        block.seal("0", secret_key)?;

        info!("inserting genesis block {}", block.hash);
        self.storage.insert_block(block.clone());
        self.latest.block_checker(&self.storage);
        Ok(block)
    }

    /// Verifies a peer-supplied block and upserts it into staging, keyed by
    /// `(signature, peer rid)`. Returns whether it was accepted.
    pub fn insert_consensus_block(&self, block: &Block, peer_rid: &str) -> bool {
        if let Err(error) = block.verify() {
            warn!("consensus block did not verify, rejecting: {}", error);
            return false;
        }
        self.storage.upsert_staged(block.clone(), peer_rid);
        true
    }

    /// The only place a block enters the block collection: upserts at its
    /// index, purges included transactions from the mempool, refreshes the
    /// latest-block cache.
    pub fn integrate_block_with_existing_chain(&self, block: &Block) {
        let included: Vec<String> = block
            .transactions
            .iter()
            .map(|txn| txn.transaction_signature.clone())
            .collect();
        self.storage.insert_block(block.clone());
        self.storage.remove_mempool_ids(&included);
        info!("new block inserted for height: {}", block.index);
        self.latest.block_checker(&self.storage);
    }

    /// Walks `block.prev_hash` links backward through staging until a parent
    /// on the main chain (or genesis) is found.
    pub fn build_backward_from_block_to_fork(&self, block: &Block) -> BackwardResult {
        let mut ancestors: Vec<Block> = Vec::new();
        let mut current = block.clone();
        loop {
            if current.index == 0
                || self.storage.get_block_by_hash(&current.prev_hash).is_some()
            {
                return BackwardResult::AtFork(ancestors);
            }
            match self.storage.staged_by_hash(&current.prev_hash) {
                Some(staged) => {
                    ancestors.insert(0, staged.block.clone());
                    current = staged.block;
                }
                None => {
                    return BackwardResult::Missing {
                        hash: current.prev_hash.clone(),
                        index: current.index.saturating_sub(1),
                    }
                }
            }
        }
    }

    /// Extends a block forward through store and staging for as long as a
    /// child links to the running tip. Ascending by height.
    pub fn build_remote_chain(&self, block: Block) -> Blockchain {
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(block.hash.clone());
        let mut blocks = vec![block];
        loop {
            let tip_hash = blocks.last().map(|b| b.hash.clone()).unwrap_or_default();
            let next = self
                .storage
                .get_child_block(&tip_hash)
                .or_else(|| self.storage.staged_child_of(&tip_hash).map(|s| s.block));
            match next {
                Some(child) => {
                    if !seen.insert(child.hash.clone()) {
                        break;
                    }
                    blocks.push(child);
                }
                None => break,
            }
        }
        blocks.sort_by_key(|b| b.index);
        Blockchain::new(blocks)
    }

    /// The block acceptance rules for a remote block extending a local one.
    pub fn test_block_insertable(&self, local: &Block, remote: &Block) -> bool {
        if remote.index == 0 {
            return false;
        }
        if let Err(error) = remote.verify() {
            warn!("consensus block did not verify, rejecting: {}", error);
            return false;
        }
        if self.check_block_transactions(remote).is_err() {
            return false;
        }

        if remote.index > CHECK_TIME_FROM && remote.time < local.time {
            warn!("block earlier than its parent, rejecting");
            return false;
        }

        let delta_t = remote.time - local.time;
        let target_block_time = params::target_block_time(self.network);
        if remote.index > CHECK_TIME_FROM && remote.special_min && delta_t < target_block_time {
            warn!("block should not yet be special min, rejecting");
            return false;
        }

        let consecutive =
            local.index + 1 == remote.index && local.hash == remote.prev_hash;

        let hash_int = remote.hash_as_target();
        let mut passed = hash_int < local.target;
        if remote.special_min && hash_int < local.special_target {
            passed = true;
        }
        if remote.special_min && remote.index < SPECIAL_MIN_FORK {
            passed = true;
        }
        if remote.index >= SPECIAL_MIN_FORK
            && remote.index < SPECIAL_MIN_GRACE_END
            && remote.special_min
            && delta_t > target_block_time
        {
            passed = true;
        }

        passed && consecutive
    }

    /// Chain-level transaction checks: per-transaction verification, input
    /// existence and value conservation, and coinbase accounting.
    pub fn check_block_transactions(&self, block: &Block) -> Result<(), ConsensusError> {
        let mut coinbase_count = 0u32;
        let mut coinbase_value = 0u64;
        let mut total_fees = 0u64;

        for transaction in &block.transactions {
            transaction.verify()?;

            if transaction.is_coinbase() {
                coinbase_count += 1;
                coinbase_value = transaction.total_output_value();
                continue;
            }
            total_fees = total_fees.saturating_add(transaction.fee);

            let address = transaction.address()?;
            let mut total_input_value = 0u64;
            for input in &transaction.inputs {
                let (source, _) = self
                    .storage
                    .get_transaction_by_id(&input.id)
                    .ok_or_else(|| TransactionError::MissingInputTransaction(input.id.clone()))?;
                total_input_value =
                    total_input_value.saturating_add(source.value_to_address(&address));
            }
            transaction.check_totals(total_input_value)?;
        }

        if coinbase_count > 1 {
            return Err(ConsensusError::InvalidBlock(
                block.hash.clone(),
                "multiple coinbase transactions".into(),
            ));
        }
        if coinbase_count == 1 && coinbase_value != block_reward(block.index) + total_fees {
            return Err(ConsensusError::InvalidBlock(
                block.hash.clone(),
                format!(
                    "coinbase pays {} but reward plus fees is {}",
                    coinbase_value,
                    block_reward(block.index) + total_fees
                ),
            ));
        }
        Ok(())
    }

    /// Replaces the local suffix with an inbound window when it proves
    /// strictly heavier. Verification runs in full before any mutation; a
    /// failing window leaves the chain untouched.
    pub fn integrate_blockchain_with_existing_chain(
        &self,
        inbound: &Blockchain,
    ) -> Result<bool, ConsensusError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("chain integration already in flight, deferring");
            return Ok(false);
        }
        let result = self.integrate_inner(inbound);
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    fn integrate_inner(&self, inbound: &Blockchain) -> Result<bool, ConsensusError> {
        let first = match inbound.first_block() {
            Some(first) => first.clone(),
            None => return Ok(false),
        };

        let parent = if first.index == 0 {
            None
        } else {
            match self.storage.get_block_by_hash(&first.prev_hash) {
                Some(parent) => Some(parent),
                None => {
                    debug!("inbound chain has no known fork parent, keeping local chain");
                    return Ok(false);
                }
            }
        };

        // every link must pass the acceptance rules before anything mutates
        let mut previous = parent;
        for block in inbound.blocks() {
            match &previous {
                Some(local) => {
                    if !self.test_block_insertable(local, block) {
                        return Ok(false);
                    }
                }
                None => {
                    if block.verify().is_err() {
                        return Ok(false);
                    }
                }
            }
            previous = Some(block.clone());
        }

        let existing = Blockchain::new(self.storage.blocks_from(first.index));
        if !existing.test_inbound_blockchain(inbound) {
            return Ok(false);
        }

        let removed = self.storage.delete_blocks_from(first.index);
        if removed > 0 {
            info!(
                "retrace: removed {} block(s) from height {}",
                removed, first.index
            );
        }
        for block in inbound.blocks() {
            self.integrate_block_with_existing_chain(block);
        }
        Ok(true)
    }

    /// The full inbound path shared by `newblock` and `blockresponse`:
    /// stage, walk backward, extend forward, and attempt the swap.
    pub fn process_inbound_block(&self, block: Block, peer_rid: &str) -> InboundOutcome {
        if self.storage.get_block_by_hash(&block.hash).is_some() {
            return InboundOutcome::AlreadyKnown;
        }
        if !self.insert_consensus_block(&block, peer_rid) {
            return InboundOutcome::Rejected;
        }

        match self.build_backward_from_block_to_fork(&block) {
            BackwardResult::Missing { hash, index } => {
                InboundOutcome::MissingAncestor { hash, index }
            }
            BackwardResult::AtFork(mut blocks) => {
                let forward = self.build_remote_chain(block);
                blocks.extend(forward.blocks().iter().cloned());
                let inbound = Blockchain::new(blocks);
                match self.integrate_blockchain_with_existing_chain(&inbound) {
                    Ok(true) => InboundOutcome::Integrated,
                    Ok(false) => InboundOutcome::StagedOnly,
                    Err(error) => {
                        warn!("chain integration failed: {}", error);
                        InboundOutcome::StagedOnly
                    }
                }
            }
        }
    }

    /// The next `getblocks` window for bottom-up sync.
    pub fn next_sync_range(&self) -> Option<(u32, u32)> {
        let tip = self.latest.get()?;
        Some((tip.index + 1, tip.index + MAX_BLOCKS_PER_MESSAGE))
    }
}
