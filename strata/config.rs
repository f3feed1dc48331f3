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

use strata_consensus::Network;
use strata_network::{Peer, PeerRole};
use strata_objects::Identity;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "strata", about = "A tiered peer-to-peer cryptocurrency node")]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Force mainnet, testnet or regnet, overriding the config file.
    #[arg(long)]
    pub network: Option<String>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Optional TLS material for the outward-facing surfaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SslConfig {
    pub certfile: String,
    pub keyfile: String,
    #[serde(default)]
    pub cafile: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// The node's file configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: Network,
    pub peer_type: PeerRole,
    pub peer_host: String,
    pub peer_port: u16,
    #[serde(default)]
    pub mongodb_host: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub site_database: Option<String>,
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
    #[serde(default)]
    pub ssl: Option<SslConfig>,
    #[serde(default)]
    pub seeds: Vec<Peer>,
    #[serde(default)]
    pub seed_gateways: Vec<Peer>,
    #[serde(default)]
    pub service_providers: Vec<Peer>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Sanity checks that would otherwise surface as confusing runtime
    /// failures: key material must parse and the identity must verify.
    pub fn check(&self) -> anyhow::Result<()> {
        let identity = Identity::new(
            self.public_key.clone(),
            self.username.clone(),
            self.username_signature.clone(),
        );
        anyhow::ensure!(
            identity.is_valid(),
            "username_signature does not verify under public_key"
        );
        let probe = strata_objects::crypto::sign("config-check", &self.private_key)
            .context("private_key does not parse")?;
        anyhow::ensure!(
            strata_objects::crypto::verify("config-check", &probe, &self.public_key).is_ok(),
            "private_key does not match public_key"
        );
        Ok(())
    }

    /// The subset of configuration the network stack runs on.
    pub fn network_config(&self) -> strata_network::Config {
        strata_network::Config {
            network: self.network,
            peer_type: self.peer_type,
            peer_host: self.peer_host.clone(),
            peer_port: self.peer_port,
            public_key: self.public_key.clone(),
            private_key: self.private_key.clone(),
            username: self.username.clone(),
            username_signature: self.username_signature.clone(),
            max_peers: self.max_peers,
            max_miners: self.max_miners,
            pool_payout: self.pool_payout,
            pool_diff: self.pool_diff,
            seeds: self.seeds.clone(),
            seed_gateways: self.seed_gateways.clone(),
            service_providers: self.service_providers.clone(),
        }
    }
}
