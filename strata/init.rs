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

use crate::config::NodeConfig;

use strata_consensus::{block_queue, Consensus, LatestBlock, MemoryPool, MiningPool, PoolPayer};
use strata_network::Node;
use strata_storage::Storage;

use std::sync::Arc;
use tracing::info;

pub fn initialize_logger(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Boots the node: storage, genesis if the store is empty, the chain
/// subsystems, the listener, and the background services.
///
/// The only fatal paths are storage initialization and binding the listening
/// socket; everything after that is survived and logged.
pub async fn start(config: NodeConfig) -> anyhow::Result<Node> {
    let storage = Arc::new(Storage::new());
    let latest = Arc::new(LatestBlock::new());
    let consensus = Consensus::new(storage.clone(), latest.clone(), config.network);

    if storage.is_empty() {
        consensus.insert_genesis(&config.public_key, &config.private_key)?;
    } else {
        latest.block_checker(&storage);
    }

    let mempool = Arc::new(MemoryPool::new(storage.clone()));
    let pool = MiningPool::new(
        storage.clone(),
        latest.clone(),
        mempool.clone(),
        config.network,
        &config.public_key,
        &config.private_key,
    )?;
    let payer = if config.pool_payout {
        Some(PoolPayer::new(
            storage.clone(),
            mempool.clone(),
            &config.public_key,
            &config.private_key,
        )?)
    } else {
        None
    };

    let (queue, queue_receiver) = block_queue();
    let node = Node::new(
        config.network_config(),
        storage,
        consensus,
        mempool,
        pool.clone(),
        payer,
        queue,
        queue_receiver,
    );

    let local_address = strata_network::listen(node.clone()).await?;
    node.start_services();
    let _ = pool.refresh();

    info!(
        "strata {} node up on {} ({})",
        config.peer_type, local_address, config.network
    );
    Ok(node)
}
