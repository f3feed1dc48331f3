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

use crate::peer::{Peer, PeerRole};

use strata_consensus::Network;
use strata_objects::Identity;

use serde::{Deserialize, Serialize};

/// The pre-configured parameters the node runs with, including the declared
/// overlay tables for each tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    pub peer_type: PeerRole,
    pub peer_host: String,
    pub peer_port: u16,
    pub public_key: String,
    pub private_key: String,
    pub username: String,
    pub username_signature: String,
    #[serde(default)]
    pub max_peers: usize,
    #[serde(default)]
    pub max_miners: usize,
    #[serde(default)]
    pub pool_payout: bool,
    #[serde(default)]
    pub pool_diff: u64,
    /// Declared seeds, in rotation order.
    #[serde(default)]
    pub seeds: Vec<Peer>,
    /// Declared seed gateways, in rotation order.
    #[serde(default)]
    pub seed_gateways: Vec<Peer>,
    #[serde(default)]
    pub service_providers: Vec<Peer>,
}

impl Config {
    pub fn identity(&self) -> Identity {
        Identity::new(
            self.public_key.clone(),
            self.username.clone(),
            self.username_signature.clone(),
        )
    }

    /// Our own peer record, linked into the overlay tables where declared.
    pub fn me(&self) -> Peer {
        let mut me = Peer::new(
            &self.peer_host,
            self.peer_port,
            self.identity(),
            self.peer_type,
        );
        match self.peer_type {
            PeerRole::Seed => {
                me.seed_gateway = self
                    .declared(&self.seeds)
                    .and_then(|declared| declared.seed_gateway.clone());
            }
            PeerRole::SeedGateway => {
                me.seed = self
                    .declared(&self.seed_gateways)
                    .and_then(|declared| declared.seed.clone());
            }
            PeerRole::ServiceProvider => {
                let declared = self.declared(&self.service_providers);
                me.seed = declared.and_then(|d| d.seed.clone());
                me.seed_gateway = declared.and_then(|d| d.seed_gateway.clone());
            }
            PeerRole::User => {}
        }
        me
    }

    fn declared<'a>(&self, table: &'a [Peer]) -> Option<&'a Peer> {
        table
            .iter()
            .find(|peer| peer.identity.username_signature == self.username_signature)
    }

    /// The declared overlay table for a role, in rotation order.
    pub fn peers_of(&self, role: PeerRole) -> &[Peer] {
        match role {
            PeerRole::Seed => &self.seeds,
            PeerRole::SeedGateway => &self.seed_gateways,
            PeerRole::ServiceProvider => &self.service_providers,
            PeerRole::User => &[],
        }
    }

    pub fn seed_by_signature(&self, username_signature: &str) -> Option<&Peer> {
        self.seeds
            .iter()
            .find(|peer| peer.identity.username_signature == username_signature)
    }

    pub fn seed_gateway_by_signature(&self, username_signature: &str) -> Option<&Peer> {
        self.seed_gateways
            .iter()
            .find(|peer| peer.identity.username_signature == username_signature)
    }
}
