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

use strata_objects::Identity;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The current RPC protocol generation; versions above 1 use the params form
/// of `authenticate` and require explicit confirm acks.
pub const PROTOCOL_VERSION: u32 = 3;

fn default_protocol_version() -> u32 {
    1
}

/// The closed set of overlay roles. Each tier connects outward to the tier
/// above it and accepts the tier below: Seed ↔ SeedGateway ↔ ServiceProvider
/// ↔ User.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Seed,
    SeedGateway,
    ServiceProvider,
    User,
}

impl PeerRole {
    pub const COUNT: usize = 4;
    pub const ALL: [PeerRole; Self::COUNT] = [
        PeerRole::Seed,
        PeerRole::SeedGateway,
        PeerRole::ServiceProvider,
        PeerRole::User,
    ];

    /// The slot for this role in the role-indexed stream tables.
    pub fn index(self) -> usize {
        match self {
            PeerRole::Seed => 0,
            PeerRole::SeedGateway => 1,
            PeerRole::ServiceProvider => 2,
            PeerRole::User => 3,
        }
    }

    /// The role this tier dials outward to.
    pub fn outbound_class(self) -> PeerRole {
        match self {
            PeerRole::Seed => PeerRole::Seed,
            PeerRole::SeedGateway => PeerRole::Seed,
            PeerRole::ServiceProvider => PeerRole::SeedGateway,
            PeerRole::User => PeerRole::ServiceProvider,
        }
    }

    /// The role this tier expects to accept.
    pub fn inbound_class(self) -> PeerRole {
        match self {
            PeerRole::Seed => PeerRole::SeedGateway,
            PeerRole::SeedGateway => PeerRole::ServiceProvider,
            PeerRole::ServiceProvider => PeerRole::User,
            PeerRole::User => PeerRole::User,
        }
    }

    /// The connection cap this role grants peers of another role.
    pub fn type_limit(self, other: PeerRole, max_peers: usize) -> usize {
        let many = if max_peers == 0 { 100_000 } else { max_peers };
        match (self, other) {
            (PeerRole::Seed, PeerRole::Seed) => many,
            (PeerRole::Seed, PeerRole::SeedGateway) => 1,
            (PeerRole::SeedGateway, PeerRole::Seed) => 1,
            (PeerRole::SeedGateway, PeerRole::ServiceProvider) => many,
            (PeerRole::ServiceProvider, PeerRole::SeedGateway) => 1,
            (PeerRole::ServiceProvider, PeerRole::User) => many,
            (PeerRole::User, PeerRole::ServiceProvider) => 1,
            (PeerRole::User, PeerRole::User) => many,
            _ => 0,
        }
    }

    /// The payload marker this role stamps when bridging, to prevent loops.
    pub fn source_property(self) -> &'static str {
        match self {
            PeerRole::Seed => "source_seed",
            PeerRole::SeedGateway => "source_seed_gateway",
            PeerRole::ServiceProvider => "source_service_provider",
            PeerRole::User => "source_user",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Seed => write!(f, "seed"),
            PeerRole::SeedGateway => write!(f, "seed_gateway"),
            PeerRole::ServiceProvider => write!(f, "service_provider"),
            PeerRole::User => write!(f, "user"),
        }
    }
}

/// A peer in the overlay: where to reach it, who it is, and which tier it
/// occupies. `seed` / `seed_gateway` carry the username signatures of the
/// nodes it is linked to one tier up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub identity: Identity,
    #[serde(rename = "peer_type")]
    pub role: PeerRole,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub seed_gateway: Option<String>,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
}

impl Peer {
    pub fn new(host: &str, port: u16, identity: Identity, role: PeerRole) -> Self {
        Self {
            host: host.to_string(),
            port,
            identity,
            role,
            seed: None,
            seed_gateway: None,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// The relationship id between this peer and our own identity; the key
    /// into every stream table.
    pub fn rid(&self, own_identity: &Identity) -> String {
        own_identity.generate_rid(&self.identity.username_signature)
    }

    /// Whether the declared identity is self-consistent.
    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_objects::crypto::KeyPair;

    #[test]
    fn hierarchy_is_closed() {
        assert_eq!(PeerRole::Seed.outbound_class(), PeerRole::Seed);
        assert_eq!(PeerRole::SeedGateway.outbound_class(), PeerRole::Seed);
        assert_eq!(
            PeerRole::ServiceProvider.outbound_class(),
            PeerRole::SeedGateway
        );
        assert_eq!(PeerRole::User.outbound_class(), PeerRole::ServiceProvider);

        assert_eq!(PeerRole::Seed.inbound_class(), PeerRole::SeedGateway);
        assert_eq!(PeerRole::SeedGateway.inbound_class(), PeerRole::ServiceProvider);
        assert_eq!(PeerRole::ServiceProvider.inbound_class(), PeerRole::User);
    }

    #[test]
    fn single_slot_limits() {
        assert_eq!(PeerRole::SeedGateway.type_limit(PeerRole::Seed, 8), 1);
        assert_eq!(PeerRole::ServiceProvider.type_limit(PeerRole::SeedGateway, 8), 1);
        assert_eq!(PeerRole::User.type_limit(PeerRole::ServiceProvider, 8), 1);
        assert_eq!(PeerRole::Seed.type_limit(PeerRole::User, 8), 0);
        assert_eq!(PeerRole::Seed.type_limit(PeerRole::SeedGateway, 8), 1);
        assert_eq!(PeerRole::ServiceProvider.type_limit(PeerRole::User, 8), 8);
        // zero means unlimited in practice
        assert_eq!(PeerRole::Seed.type_limit(PeerRole::Seed, 0), 100_000);
    }

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PeerRole::SeedGateway).unwrap(),
            "\"seed_gateway\""
        );
    }

    #[test]
    fn rid_is_shared_between_both_ends() {
        let ours = Identity::generate("us", &KeyPair::generate()).unwrap();
        let theirs = Identity::generate("them", &KeyPair::generate()).unwrap();
        let peer = Peer::new("127.0.0.1", 8000, theirs.clone(), PeerRole::User);
        assert_eq!(peer.rid(&ours), theirs.generate_rid(&ours.username_signature));
    }
}
