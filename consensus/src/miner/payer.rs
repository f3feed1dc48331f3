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

//! Periodic share settlement.
//!
//! Groups unpaid shares by miner address and submits one payout transaction
//! through the normal mempool path, funded from the pool's own unspent
//! outputs. Runs only when pool payout is configured.

use crate::{error::ConsensusError, memory_pool::MemoryPool, params::COIN};

use strata_objects::{crypto, Input, Output, Transaction};
use strata_storage::Storage;

use std::collections::HashMap;
use std::sync::Arc;

/// Flat payout per accepted share, in atomic units.
pub const PAYOUT_PER_SHARE: u64 = COIN / 100;

pub struct PoolPayer {
    storage: Arc<Storage>,
    mempool: Arc<MemoryPool>,
    public_key: String,
    secret_key: String,
    address: String,
}

impl PoolPayer {
    pub fn new(
        storage: Arc<Storage>,
        mempool: Arc<MemoryPool>,
        public_key: &str,
        secret_key: &str,
    ) -> Result<Self, ConsensusError> {
        let address = crypto::address_from_public_key(public_key)?;
        Ok(Self {
            storage,
            mempool,
            public_key: public_key.to_string(),
            secret_key: secret_key.to_string(),
            address,
        })
    }

    /// Settles the current unpaid share batch. Returns how many shares were
    /// paid; zero when there is nothing to pay or the pool cannot fund it yet.
    pub fn pay_out(&self) -> Result<usize, ConsensusError> {
        let shares = self.storage.unpaid_shares();
        if shares.is_empty() {
            return Ok(0);
        }

        let mut owed: HashMap<String, u64> = HashMap::new();
        let mut paid_hashes: Vec<String> = Vec::with_capacity(shares.len());
        for share in &shares {
            *owed.entry(share.address.clone()).or_default() += PAYOUT_PER_SHARE;
            paid_hashes.push(share.hash.clone());
        }
        let total_owed: u64 = owed.values().sum();

        // gather pool outputs until the batch is covered
        let mut inputs = Vec::new();
        let mut gathered = 0u64;
        for (id, value) in self.storage.unspent_outputs(&self.address, &self.public_key) {
            if gathered >= total_owed {
                break;
            }
            gathered += value;
            inputs.push(Input { id });
        }
        if gathered < total_owed {
            debug!(
                "pool payout deferred: owed {} but only {} spendable",
                total_owed, gathered
            );
            return Ok(0);
        }

        let mut outputs: Vec<Output> = owed
            .into_iter()
            .map(|(to, value)| Output { to, value })
            .collect();
        outputs.sort_by(|a, b| a.to.cmp(&b.to));
        if gathered > total_owed {
            outputs.push(Output {
                to: self.address.clone(),
                value: gathered - total_owed,
            });
        }

        let payout = Transaction::generate(
            &self.public_key,
            &self.secret_key,
            inputs,
            outputs,
            0,
            chrono::Utc::now().timestamp(),
            None,
            None,
        )?;
        self.mempool.receive_transaction(payout, None)?;
        self.storage.mark_shares_paid(&paid_hashes);

        info!("pool payout submitted for {} share(s)", shares.len());
        Ok(shares.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::crypto::KeyPair;
    use strata_objects::Block;
    use strata_storage::Share;

    #[test]
    fn pays_each_address_and_marks_shares() {
        let keys = KeyPair::generate();
        let storage = Arc::new(Storage::new());
        let mempool = Arc::new(MemoryPool::new(storage.clone()));

        // fund the pool with a chain output larger than the batch
        let funding = Transaction::generate(
            &keys.public_key,
            &keys.secret_key,
            vec![],
            vec![Output {
                to: keys.address().unwrap(),
                value: PAYOUT_PER_SHARE * 10,
            }],
            0,
            0,
            None,
            None,
        )
        .unwrap();
        let mut block = Block::generate(vec![funding], &keys.public_key, 1, 0, "", 0);
        block.target = primitive_types::U256::MAX;
        block.seal("1", &keys.secret_key).unwrap();
        storage.insert_block(block);

        for (i, address) in ["miner-a", "miner-a", "miner-b"].iter().enumerate() {
            storage.upsert_share(Share {
                address: address.to_string(),
                index: 1,
                hash: format!("hash-{i}"),
                nonce: "0".into(),
                time: 0,
                paid: false,
            });
        }

        let payer =
            PoolPayer::new(storage.clone(), mempool, &keys.public_key, &keys.secret_key).unwrap();
        assert_eq!(payer.pay_out().unwrap(), 3);
        assert!(storage.unpaid_shares().is_empty());
        assert_eq!(storage.mempool_len(), 1);

        let payout = &storage.mempool_by_fee()[0];
        assert_eq!(payout.value_to_address("miner-a"), PAYOUT_PER_SHARE * 2);
        assert_eq!(payout.value_to_address("miner-b"), PAYOUT_PER_SHARE);
        // change returns to the pool
        assert_eq!(
            payout.value_to_address(&keys.address().unwrap()),
            PAYOUT_PER_SHARE * 7
        );

        // nothing further to pay
        assert_eq!(payer.pay_out().unwrap(), 0);
    }
}
