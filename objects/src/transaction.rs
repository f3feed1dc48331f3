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

use crate::{crypto, errors::TransactionError};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A reference to the prior transaction whose outputs are being spent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Input {
    pub id: String,
}

/// A value transfer to a single address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub to: String,
    pub value: u64,
}

/// A fixed-schema value transfer, optionally carrying relationship metadata.
///
/// The `id` on the wire is the signature over the deterministic body hash;
/// value amounts are integer atomic units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "id")]
    pub transaction_signature: String,
    pub public_key: String,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub fee: u64,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_rid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dh_public_key: Option<String>,
    /// Opaque relationship ciphertext; never interpreted by the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
}

impl Transaction {
    /// Builds and signs a transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn generate(
        public_key: &str,
        secret_key: &str,
        inputs: Vec<Input>,
        outputs: Vec<Output>,
        fee: u64,
        time: i64,
        rid: Option<String>,
        relationship: Option<String>,
    ) -> Result<Self, TransactionError> {
        let mut transaction = Self {
            transaction_signature: String::new(),
            public_key: public_key.to_string(),
            inputs,
            outputs,
            fee,
            time,
            rid,
            requester_rid: None,
            requested_rid: None,
            dh_public_key: None,
            relationship,
        };
        transaction.transaction_signature =
            crypto::sign(&transaction.signature_hash(), secret_key)?;
        Ok(transaction)
    }

    /// The canonical signing payload: a deterministic ordering of every field
    /// covered by the signature.
    pub fn signing_payload(&self) -> String {
        let mut payload = String::new();
        payload.push_str(&self.public_key);
        payload.push_str(&self.time.to_string());
        payload.push_str(self.rid.as_deref().unwrap_or(""));
        payload.push_str(self.requester_rid.as_deref().unwrap_or(""));
        payload.push_str(self.requested_rid.as_deref().unwrap_or(""));
        payload.push_str(self.dh_public_key.as_deref().unwrap_or(""));
        payload.push_str(self.relationship.as_deref().unwrap_or(""));
        payload.push_str(&self.fee.to_string());
        for input in &self.inputs {
            payload.push_str(&input.id);
        }
        for output in &self.outputs {
            payload.push_str(&output.to);
            payload.push_str(&output.value.to_string());
        }
        payload
    }

    /// The sha256 body hash the signature covers.
    pub fn signature_hash(&self) -> String {
        crypto::hash(&self.signing_payload())
    }

    /// Checks the signature and that no input is referenced twice.
    ///
    /// Spentness of the referenced inputs is a chain query and is checked by
    /// the consensus engine, not here.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let mut seen = HashSet::with_capacity(self.inputs.len());
        for input in &self.inputs {
            if !seen.insert(input.id.as_str()) {
                return Err(TransactionError::TransactionInputOutputMismatch(
                    input.id.clone(),
                ));
            }
        }

        crypto::verify(
            &self.signature_hash(),
            &self.transaction_signature,
            &self.public_key,
        )
        .map_err(|_| TransactionError::InvalidTransactionSignature)
    }

    /// Checks value conservation against the summed value of the referenced inputs.
    pub fn check_totals(&self, total_input_value: u64) -> Result<(), TransactionError> {
        let total_output_value = self.total_output_value();
        let required = total_output_value
            .checked_add(self.fee)
            .ok_or(TransactionError::TotalValueMismatch(
                total_input_value,
                total_output_value,
                self.fee,
            ))?;
        if total_input_value < required {
            return Err(TransactionError::NotEnoughMoney(
                total_input_value,
                total_output_value,
                self.fee,
            ));
        }
        if total_input_value > required {
            return Err(TransactionError::TotalValueMismatch(
                total_input_value,
                total_output_value,
                self.fee,
            ));
        }
        Ok(())
    }

    /// A coinbase-style transaction spends nothing.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|output| output.value).sum()
    }

    /// The summed value this transaction pays to the given address.
    pub fn value_to_address(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|output| output.to == address)
            .map(|output| output.value)
            .sum()
    }

    pub fn address(&self) -> Result<String, TransactionError> {
        Ok(crypto::address_from_public_key(&self.public_key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn test_transaction(keys: &KeyPair) -> Transaction {
        Transaction::generate(
            &keys.public_key,
            &keys.secret_key,
            vec![Input { id: "prior-txn".into() }],
            vec![Output {
                to: "recipient".into(),
                value: 90,
            }],
            10,
            1_700_000_000,
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn sign_then_verify() {
        let keys = KeyPair::generate();
        let transaction = test_transaction(&keys);
        assert!(transaction.verify().is_ok());
    }

    #[test]
    fn verify_fails_on_tampered_output() {
        let keys = KeyPair::generate();
        let mut transaction = test_transaction(&keys);
        transaction.outputs[0].value = 9_000;
        assert!(matches!(
            transaction.verify(),
            Err(TransactionError::InvalidTransactionSignature)
        ));
    }

    #[test]
    fn verify_rejects_duplicate_inputs() {
        let keys = KeyPair::generate();
        let mut transaction = test_transaction(&keys);
        transaction.inputs.push(Input { id: "prior-txn".into() });
        assert!(matches!(
            transaction.verify(),
            Err(TransactionError::TransactionInputOutputMismatch(_))
        ));
    }

    #[test]
    fn serde_round_trip_preserves_signature_validity() {
        let keys = KeyPair::generate();
        let transaction = test_transaction(&keys);
        let json = serde_json::to_string(&transaction).unwrap();
        let decoded: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(transaction, decoded);
        assert!(decoded.verify().is_ok());
    }

    #[test]
    fn totals_must_balance_exactly() {
        let keys = KeyPair::generate();
        let transaction = test_transaction(&keys);
        assert!(transaction.check_totals(100).is_ok());
        assert!(matches!(
            transaction.check_totals(99),
            Err(TransactionError::NotEnoughMoney(..))
        ));
        assert!(matches!(
            transaction.check_totals(101),
            Err(TransactionError::TotalValueMismatch(..))
        ));
    }
}
