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

//! Deterministic gateway selection.
//!
//! A ServiceProvider (or group identity) maps to a SeedGateway through a
//! time-rotated hash bucket: both ends of a route derive the same gateway
//! from the identity alone, with no coordination.

use crate::peer::Peer;

use strata_objects::Identity;

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// The rotation epoch shared across the network.
pub const OVERLAY_EPOCH: i64 = 1_602_914_018;

/// How long a bucket assignment holds, in seconds (three days).
pub const GATEWAY_ROTATION_TTL: i64 = 259_200;

/// Picks the SeedGateway slot for an identity at a point in time, skipping
/// entries in the outbound-ignore set. `None` when every slot is ignored or
/// no gateways are known.
pub fn calculate_seed_gateway<'a>(
    identity: &Identity,
    seed_gateways: &'a [Peer],
    ignored: &HashSet<String>,
    now: i64,
) -> Option<&'a Peer> {
    if seed_gateways.is_empty() {
        return None;
    }

    let n = seed_gateways.len() as u128;
    let rotation = ((now - OVERLAY_EPOCH) / GATEWAY_ROTATION_TTL + 1) as u128;

    // (int(sha256(signature), 16) * rotation) mod n, folded byte-wise so the
    // 256-bit digest never needs widening
    let digest = Sha256::digest(identity.username_signature.as_bytes());
    let mut bucket: u128 = 0;
    for byte in digest {
        bucket = (bucket * 256 + byte as u128) % n;
    }
    let start = ((bucket * (rotation % n)) % n) as usize;

    let mut slot = start;
    loop {
        let gateway = &seed_gateways[slot];
        if !ignored.contains(&gateway.identity.username_signature) {
            return Some(gateway);
        }
        slot = (slot + 1) % seed_gateways.len();
        if slot == start {
            return None;
        }
    }
}
