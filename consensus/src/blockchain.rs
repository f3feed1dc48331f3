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

use crate::params::MAX_TARGET;

use strata_objects::Block;

use primitive_types::U256;

/// An ordered window of blocks: a suffix of the main chain or a candidate
/// fork under comparison.
#[derive(Clone, Debug, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
}

impl Blockchain {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn from_block(block: Block) -> Self {
        Self {
            blocks: vec![block],
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn first_block(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn final_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Every adjacent pair must link by hash and advance the height by one.
    pub fn is_consecutive(&self) -> bool {
        self.blocks.windows(2).all(|pair| {
            pair[1].prev_hash == pair[0].hash && pair[1].index == pair[0].index + 1
        })
    }

    /// The cumulative difficulty: the summed `MAX_TARGET / target` of the
    /// window, in 256-bit integer division.
    pub fn get_difficulty(&self) -> U256 {
        self.blocks
            .iter()
            .map(|block| {
                if block.target.is_zero() {
                    MAX_TARGET
                } else {
                    MAX_TARGET / block.target
                }
            })
            .fold(U256::zero(), |sum, d| sum.saturating_add(d))
    }

    /// The fork-selection weight: cumulative difficulty, with ties broken by
    /// the higher final height and then the lexicographic final hash.
    fn weight(&self) -> (U256, u32, String) {
        (
            self.get_difficulty(),
            self.final_block().map(|b| b.index).unwrap_or(0),
            self.final_block().map(|b| b.hash.clone()).unwrap_or_default(),
        )
    }

    /// Whether an inbound window beats this one: it must start at the same
    /// height, both must be consecutive, and the inbound weight must be
    /// strictly greater. An empty local window concedes to any consecutive
    /// inbound extension.
    pub fn test_inbound_blockchain(&self, inbound: &Blockchain) -> bool {
        if inbound.is_empty() || !inbound.is_consecutive() {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        if !self.is_consecutive() {
            return false;
        }

        let (local_first, inbound_first) = match (self.first_block(), inbound.first_block()) {
            (Some(local), Some(inbound)) => (local, inbound),
            _ => return false,
        };
        if local_first.index != inbound_first.index {
            return false;
        }

        inbound.weight() > self.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::crypto::KeyPair;

    fn block(keys: &KeyPair, index: u32, prev_hash: &str, target: U256) -> Block {
        let mut block =
            Block::generate(vec![], &keys.public_key, 1, index, prev_hash, 1_700_000_000);
        block.target = target;
        block.seal("1", &keys.secret_key).unwrap();
        block
    }

    fn chain(keys: &KeyPair, start: u32, len: u32, target: U256) -> Blockchain {
        let mut blocks = Vec::new();
        let mut prev_hash = "genesis".to_string();
        for index in start..start + len {
            let b = block(keys, index, &prev_hash, target);
            prev_hash = b.hash.clone();
            blocks.push(b);
        }
        Blockchain::new(blocks)
    }

    #[test]
    fn consecutive_detects_broken_links() {
        let keys = KeyPair::generate();
        let good = chain(&keys, 5, 3, MAX_TARGET);
        assert!(good.is_consecutive());

        let mut blocks = good.blocks().to_vec();
        blocks[2].prev_hash = "tampered".to_string();
        assert!(!Blockchain::new(blocks).is_consecutive());
    }

    #[test]
    fn difficulty_sums_inverse_targets() {
        let keys = KeyPair::generate();
        let easy = chain(&keys, 1, 2, MAX_TARGET);
        let hard = chain(&keys, 1, 2, MAX_TARGET / U256::from(4u64));
        assert_eq!(easy.get_difficulty(), U256::from(2u64));
        assert!(hard.get_difficulty() > easy.get_difficulty());
    }

    #[test]
    fn heavier_inbound_wins() {
        let keys = KeyPair::generate();
        let local = chain(&keys, 10, 1, MAX_TARGET);
        let remote = chain(&keys, 10, 2, MAX_TARGET);
        assert!(local.test_inbound_blockchain(&remote));
        assert!(!remote.test_inbound_blockchain(&local));
    }

    #[test]
    fn equal_weight_is_not_enough() {
        let keys = KeyPair::generate();
        let local = chain(&keys, 10, 2, MAX_TARGET);
        // identical blocks: identical difficulty, index and hash
        let remote = Blockchain::new(local.blocks().to_vec());
        assert!(!local.test_inbound_blockchain(&remote));
    }

    #[test]
    fn mismatched_start_height_is_rejected() {
        let keys = KeyPair::generate();
        let local = chain(&keys, 10, 2, MAX_TARGET);
        let remote = chain(&keys, 11, 3, MAX_TARGET);
        assert!(!local.test_inbound_blockchain(&remote));
    }
}
