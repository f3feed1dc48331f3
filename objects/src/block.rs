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

use crate::{crypto, errors::BlockError, Transaction};

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The placeholder substituted with the winning nonce before hashing.
pub const NONCE_PLACEHOLDER: &str = "{nonce}";

/// A hash-linked, signed proof-of-work block.
///
/// The header is a canonical string carrying a `{nonce}` placeholder; the
/// block hash is the sha256 of the header with the nonce substituted, and the
/// miner signature covers that hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u32,
    pub index: u32,
    pub prev_hash: String,
    pub hash: String,
    pub time: i64,
    pub nonce: String,
    pub target: U256,
    pub special_target: U256,
    pub special_min: bool,
    pub public_key: String,
    pub signature: String,
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub header: String,
}

impl Block {
    /// Assembles an unhashed, unsigned candidate at the given height.
    pub fn generate(
        transactions: Vec<Transaction>,
        public_key: &str,
        version: u32,
        index: u32,
        prev_hash: &str,
        time: i64,
    ) -> Self {
        let mut block = Self {
            version,
            index,
            prev_hash: prev_hash.to_string(),
            hash: String::new(),
            time,
            nonce: String::new(),
            target: U256::zero(),
            special_target: U256::zero(),
            special_min: false,
            public_key: public_key.to_string(),
            signature: String::new(),
            transactions,
            header: String::new(),
        };
        block.header = block.generate_header();
        block
    }

    /// The canonical header string, with the nonce left as a placeholder.
    pub fn generate_header(&self) -> String {
        format!(
            "{}{}{}{}{}{}{}{}{}",
            self.version,
            self.time,
            self.public_key,
            self.index,
            self.prev_hash,
            NONCE_PLACEHOLDER,
            u8::from(self.special_min),
            target_to_hex(&self.target),
            merkle_root(
                &self
                    .transactions
                    .iter()
                    .map(|txn| txn.transaction_signature.clone())
                    .collect::<Vec<_>>()
            ),
        )
    }

    /// Hashes a header template with the given nonce substituted.
    pub fn hash_from_header(header: &str, nonce: &str) -> String {
        crypto::hash(&header.replace(NONCE_PLACEHOLDER, nonce))
    }

    /// Seals the block under the given nonce and signs the resulting hash.
    pub fn seal(&mut self, nonce: &str, secret_key: &str) -> Result<(), BlockError> {
        self.header = self.generate_header();
        self.nonce = nonce.to_string();
        self.hash = Self::hash_from_header(&self.header, nonce);
        self.sign(secret_key)
    }

    pub fn sign(&mut self, secret_key: &str) -> Result<(), BlockError> {
        self.signature = crypto::sign(&self.hash, secret_key)?;
        Ok(())
    }

    /// Self-verification: header hash, miner signature and every transaction.
    pub fn verify(&self) -> Result<(), BlockError> {
        let expected = Self::hash_from_header(&self.generate_header(), &self.nonce);
        if expected != self.hash {
            return Err(BlockError::HashMismatch(self.hash.clone()));
        }

        if crypto::verify(&self.hash, &self.signature, &self.public_key).is_err() {
            return Err(BlockError::InvalidBlockSignature(self.public_key.clone()));
        }

        let mut spent = HashSet::new();
        for transaction in &self.transactions {
            transaction.verify()?;
            for input in &transaction.inputs {
                if !spent.insert(input.id.as_str()) {
                    return Err(BlockError::DuplicateInput(input.id.clone()));
                }
            }
        }

        Ok(())
    }

    /// The byte-reversed hex form of the block hash, compared against targets
    /// from the v5 fork onward.
    pub fn little_hash(&self) -> String {
        little_hash(&self.hash)
    }

    /// The block hash as a 256-bit integer.
    pub fn hash_as_target(&self) -> U256 {
        hash_to_u256(&self.hash)
    }
}

/// Byte-reverses a hex digest.
pub fn little_hash(block_hash: &str) -> String {
    let mut bytes = hex::decode(block_hash).unwrap_or_default();
    bytes.reverse();
    hex::encode(bytes)
}

/// Parses a hex digest as a 256-bit integer; unparseable input saturates,
/// which can never pass a target comparison.
pub fn hash_to_u256(hash: &str) -> U256 {
    U256::from_str_radix(hash, 16).unwrap_or(U256::MAX)
}

/// Formats a target as the zero-padded 64-character hex used in headers.
pub fn target_to_hex(target: &U256) -> String {
    let mut bytes = [0u8; 32];
    target.to_big_endian(&mut bytes);
    hex::encode(bytes)
}

/// The iterated pairwise sha256 root of the transaction ids.
pub fn merkle_root(transaction_ids: &[String]) -> String {
    if transaction_ids.is_empty() {
        return crypto::hash("");
    }
    let mut layer: Vec<String> = transaction_ids.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity((layer.len() + 1) / 2);
        for pair in layer.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(crypto::hash(&format!("{}{}", pair[0], right)));
        }
        layer = next;
    }
    layer.pop().unwrap_or_default()
}
