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

//! Transaction admission and eviction.
//!
//! Admission is deliberately light: signature validity, dedup by id, and a
//! chain-spentness check. The expensive cross-transaction filtering runs at
//! block-construction time, where losers are evicted into the
//! failed-transactions sink with a reason.

use crate::error::ConsensusError;

use strata_objects::{Transaction, TransactionError};
use strata_storage::Storage;

use std::collections::HashSet;
use std::sync::Arc;

pub const REASON_INPUT_SPENT: &str = "input presumably spent already";
pub const REASON_INPUT_REUSED: &str =
    "using an input used by another transaction in this block";

pub struct MemoryPool {
    storage: Arc<Storage>,
}

impl MemoryPool {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Admits a verified transaction. Returns `false` when the transaction is
    /// already known (in the pool or on chain), which makes re-delivery a
    /// no-op.
    pub fn receive_transaction(
        &self,
        transaction: Transaction,
        source_peer_rid: Option<&str>,
    ) -> Result<bool, ConsensusError> {
        transaction.verify()?;

        let id = transaction.transaction_signature.clone();
        if self.storage.mempool_contains(&id) {
            if let Some(rid) = source_peer_rid {
                self.storage.mempool_mark_sent(&id, rid);
            }
            return Ok(false);
        }
        if self.storage.transaction_in_chain(&id) {
            return Ok(false);
        }

        for input in &transaction.inputs {
            if self.storage.is_input_spent(&input.id, &transaction.public_key) {
                self.storage.record_failed(REASON_INPUT_SPENT, transaction.clone());
                return Err(TransactionError::InvalidTransaction(format!(
                    "input {} already spent on chain",
                    input.id
                ))
                .into());
            }
        }

        let sent_to = source_peer_rid.map(|rid| vec![rid.to_string()]).unwrap_or_default();
        self.storage.upsert_mempool(transaction, sent_to);
        Ok(true)
    }

    /// Returns block-construction candidates in descending fee order, evicting
    /// anything that no longer verifies against the chain.
    pub fn get_candidates(&self) -> Vec<Transaction> {
        let mut candidates = Vec::new();
        let mut used_signatures: HashSet<String> = HashSet::new();
        let mut used_inputs: HashSet<String> = HashSet::new();

        'outer: for transaction in self.storage.mempool_by_fee() {
            let id = transaction.transaction_signature.clone();

            if let Err(error) = transaction.verify() {
                warn!("transaction removed: {}", error);
                self.storage.remove_mempool(&id);
                self.storage.record_failed(&error.to_string(), transaction);
                continue;
            }

            if used_signatures.contains(&id) {
                warn!("duplicate transaction found and removed");
                continue;
            }

            for input in &transaction.inputs {
                match self.storage.get_transaction_by_id(&input.id) {
                    Some((source, _)) => {
                        let address = match transaction.address() {
                            Ok(address) => address,
                            Err(error) => {
                                self.storage.remove_mempool(&id);
                                self.storage
                                    .record_failed(&error.to_string(), transaction.clone());
                                continue 'outer;
                            }
                        };
                        if source.value_to_address(&address) == 0 {
                            self.storage.remove_mempool(&id);
                            self.storage.record_failed(
                                &TransactionError::MissingInputTransaction(input.id.clone())
                                    .to_string(),
                                transaction.clone(),
                            );
                            continue 'outer;
                        }
                    }
                    None => {
                        self.storage.remove_mempool(&id);
                        self.storage.record_failed(
                            &TransactionError::MissingInputTransaction(input.id.clone())
                                .to_string(),
                            transaction.clone(),
                        );
                        continue 'outer;
                    }
                }

                if self.storage.is_input_spent(&input.id, &transaction.public_key) {
                    warn!("transaction removed: {} {}", REASON_INPUT_SPENT, id);
                    self.storage.remove_mempool(&id);
                    self.storage.record_failed(REASON_INPUT_SPENT, transaction.clone());
                    continue 'outer;
                }

                if used_inputs.contains(&input.id) {
                    warn!("transaction removed: {} {}", REASON_INPUT_REUSED, id);
                    self.storage.remove_mempool(&id);
                    self.storage.record_failed(REASON_INPUT_REUSED, transaction.clone());
                    continue 'outer;
                }
            }

            if let Err(error) = self.check_totals(&transaction) {
                warn!("transaction removed: {}", error);
                self.storage.remove_mempool(&id);
                self.storage.record_failed(&error.to_string(), transaction);
                continue;
            }

            for input in &transaction.inputs {
                used_inputs.insert(input.id.clone());
            }
            used_signatures.insert(id);
            candidates.push(transaction);
        }

        candidates
    }

    /// Value conservation against the referenced chain outputs.
    fn check_totals(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        if transaction.is_coinbase() {
            return Ok(());
        }
        let address = transaction.address()?;
        let mut total_input_value: u64 = 0;
        for input in &transaction.inputs {
            let (source, _) = self
                .storage
                .get_transaction_by_id(&input.id)
                .ok_or_else(|| TransactionError::MissingInputTransaction(input.id.clone()))?;
            total_input_value = total_input_value.saturating_add(source.value_to_address(&address));
        }
        transaction.check_totals(total_input_value)
    }

    /// Drops every mempool entry included in the given transaction id set.
    pub fn remove_included(&self, transaction_ids: &[String]) {
        self.storage.remove_mempool_ids(transaction_ids);
    }
}
