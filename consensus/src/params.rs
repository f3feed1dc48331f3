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

//! Height- and network-indexed chain constants.
//!
//! These are the exact hooks the consensus engine and mining pool read; the
//! fork heights gate which validation regime applies to a block.

use strata_objects::Block;
use strata_storage::Storage;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The widest possible target: every hash passes.
pub const MAX_TARGET: U256 = U256::MAX;

/// Upper bound on blocks carried by a single `blocksresponse`.
pub const MAX_BLOCKS_PER_MESSAGE: u32 = 100;

/// Height from which block times are compared against the local tip.
pub const CHECK_TIME_FROM: u32 = 35_200;

/// Height from which the relaxed special-min regime applies; the legacy
/// allowance below this height accepts any special-min block.
pub const SPECIAL_MIN_FORK: u32 = 35_200;

/// End of the transitional window in which elapsed time alone can justify a
/// special-min block.
pub const SPECIAL_MIN_GRACE_END: u32 = 38_600;

/// Height at which the target block interval moved to ten minutes.
pub const FORK_10_MIN_BLOCK: u32 = 116_600;

/// Height from which block hashes are compared to targets in byte-reversed
/// (little-hash) form.
pub const BLOCK_V5_FORK: u32 = 1_309_000;

/// Difficulty retarget window, in blocks.
pub const RETARGET_PERIOD: u32 = 2016;

/// Coin subdivision and reward schedule.
pub const COIN: u64 = 100_000_000;
pub const HALVING_INTERVAL: u32 = 210_000;

/// Pool share ceilings added on top of the network target: any hash under
/// `block target + prefix` earns a share.
pub const POOL_TARGET_MAINNET: U256 = U256([u64::MAX, u64::MAX, u64::MAX, 0x0000_FFFF_FFFF_FFFF]);
pub const POOL_TARGET_REGNET: U256 = U256([u64::MAX, u64::MAX, u64::MAX, 0x00FF_FFFF_FFFF_FFFF]);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Regnet => write!(f, "regnet"),
        }
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "regnet" => Ok(Network::Regnet),
            other => Err(format!("unknown network '{other}'")),
        }
    }
}

/// The pool share ceiling prefix for a network.
pub fn pool_target(network: Network) -> U256 {
    match network {
        Network::Regnet => POOL_TARGET_REGNET,
        _ => POOL_TARGET_MAINNET,
    }
}

/// The nominal inter-block interval, in seconds.
pub fn target_block_time(network: Network) -> i64 {
    match network {
        Network::Mainnet => 600,
        Network::Testnet => 60,
        Network::Regnet => 10,
    }
}

/// The interval a block was expected to take at the given height; mainnet ran
/// two-minute blocks before the ten-minute fork.
pub fn expected_block_time(network: Network, index: u32) -> i64 {
    if network == Network::Mainnet && index < FORK_10_MIN_BLOCK {
        120
    } else {
        target_block_time(network)
    }
}

/// Seconds since the tip after which the candidate flips to special-min.
/// Regnet mines against relaxed targets and never needs the relaxation.
pub fn special_min_trigger(network: Network, index: u32) -> i64 {
    match network {
        Network::Regnet => i64::MAX,
        _ => expected_block_time(network, index),
    }
}

/// The relaxed ceiling used when a block is mined in special-min mode.
/// Widens monotonically with the time elapsed since the tip.
pub fn special_target(index: u32, base_target: U256, delta_t: i64, network: Network) -> U256 {
    if index < SPECIAL_MIN_FORK {
        return MAX_TARGET;
    }
    let intervals = (delta_t / expected_block_time(network, index)).max(1) as u64;
    let factor = U256::from(intervals.saturating_mul(4));
    base_target.checked_mul(factor).unwrap_or(MAX_TARGET)
}

/// The block version in force at a height.
pub fn version_for_height(index: u32) -> u32 {
    if index >= BLOCK_V5_FORK {
        5
    } else if index >= FORK_10_MIN_BLOCK {
        4
    } else if index >= SPECIAL_MIN_FORK {
        3
    } else {
        1
    }
}

/// The coinbase reward at a height.
pub fn block_reward(index: u32) -> u64 {
    let halvings = index / HALVING_INTERVAL;
    if halvings >= 64 {
        return 0;
    }
    (50 * COIN) >> halvings
}

/// The network target for the block at `index`, derived from recent headers.
///
/// Outside a retarget boundary this inherits the last non-special-min target;
/// at a boundary it is scaled by the clamped actual/expected timespan ratio.
pub fn get_target(index: u32, latest_block: &Block, storage: &Storage, network: Network) -> U256 {
    if index < SPECIAL_MIN_FORK || network == Network::Regnet {
        return MAX_TARGET;
    }

    let base = last_non_special_target(latest_block, storage);

    if index % RETARGET_PERIOD != 0 {
        return base;
    }

    let window_start = match storage.get_block_by_index(index.saturating_sub(RETARGET_PERIOD)) {
        Some(block) => block,
        None => return base,
    };

    let expected = expected_block_time(network, index) * RETARGET_PERIOD as i64;
    let actual = (latest_block.time - window_start.time).clamp(expected / 4, expected * 4);

    base.checked_mul(U256::from(actual as u64))
        .map(|scaled| scaled / U256::from(expected as u64))
        .unwrap_or(MAX_TARGET)
        .min(MAX_TARGET)
}

/// Walks back from the tip to the most recent target not set under special-min.
fn last_non_special_target(latest_block: &Block, storage: &Storage) -> U256 {
    let mut current = latest_block.clone();
    loop {
        if !current.special_min && !current.target.is_zero() {
            return current.target;
        }
        match current
            .index
            .checked_sub(1)
            .and_then(|i| storage.get_block_by_index(i))
        {
            Some(parent) => current = parent,
            None => return MAX_TARGET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_targets_have_expected_prefixes() {
        let mut bytes = [0u8; 32];
        POOL_TARGET_MAINNET.to_big_endian(&mut bytes);
        assert_eq!(&bytes[..2], &[0x00, 0x00]);
        assert!(bytes[2..].iter().all(|b| *b == 0xFF));

        POOL_TARGET_REGNET.to_big_endian(&mut bytes);
        assert_eq!(bytes[0], 0x00);
        assert!(bytes[1..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn special_target_widens_with_elapsed_time() {
        let base = U256::from(1_000_000u64);
        let early = special_target(FORK_10_MIN_BLOCK, base, 700, Network::Mainnet);
        let late = special_target(FORK_10_MIN_BLOCK, base, 7_000, Network::Mainnet);
        assert!(early >= base);
        assert!(late > early);
    }

    #[test]
    fn special_target_is_max_before_the_fork() {
        let base = U256::from(1_000u64);
        assert_eq!(
            special_target(SPECIAL_MIN_FORK - 1, base, 10_000, Network::Mainnet),
            MAX_TARGET
        );
    }

    #[test]
    fn versions_follow_the_fork_schedule() {
        assert_eq!(version_for_height(0), 1);
        assert_eq!(version_for_height(SPECIAL_MIN_FORK), 3);
        assert_eq!(version_for_height(FORK_10_MIN_BLOCK), 4);
        assert_eq!(version_for_height(BLOCK_V5_FORK), 5);
    }

    #[test]
    fn reward_halves_on_schedule() {
        assert_eq!(block_reward(0), 50 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL), 25 * COIN);
        assert_eq!(block_reward(HALVING_INTERVAL * 2), 50 * COIN / 4);
    }

    #[test]
    fn regnet_never_triggers_special_min() {
        assert_eq!(special_min_trigger(Network::Regnet, 1), i64::MAX);
        assert_eq!(
            special_min_trigger(Network::Mainnet, FORK_10_MIN_BLOCK),
            600
        );
    }
}
