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

//! The periodic background tasks and the consensus queue consumer.

use crate::{health::HEALTH_TIMEOUT, node::Node};

use strata_consensus::Network;

use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::sleep;

const CONSENSUS_SYNC_INTERVAL: Duration = Duration::from_secs(30);
const PEER_DISCOVERY_INTERVAL: Duration = Duration::from_secs(3);
const STATUS_INTERVAL: Duration = Duration::from_secs(30);
const BLOCK_CHECKER_INTERVAL: Duration = Duration::from_secs(1);
const CACHE_VALIDATOR_INTERVAL: Duration = Duration::from_secs(30);
const POOL_PAYER_INTERVAL: Duration = Duration::from_secs(120);
const RETRY_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

impl Node {
    /// Spawns the queue consumer, the tip subscriber, and the periodic tasks.
    pub fn start_services(&self) {
        self.start_queue_consumer();
        self.start_tip_subscriber();
        self.start_consensus_sync();
        if self.config.network != Network::Regnet {
            self.start_peer_discovery();
        }
        self.start_status();
        self.start_block_checker();
        self.start_cache_validator();
        if self.config.pool_payout && self.payer.is_some() {
            self.start_pool_payer();
        }
        self.start_retry_sweep();
    }

    /// Serial consumer of the consensus block queue: the only place a staged
    /// window is integrated, so chain swaps never interleave.
    fn start_queue_consumer(&self) {
        let Some(mut receiver) = self.queue_receiver.lock().take() else {
            return;
        };
        let node = self.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                match node
                    .consensus
                    .integrate_blockchain_with_existing_chain(&item.blockchain)
                {
                    Ok(true) => node.health.consensus.touch(),
                    Ok(false) => {}
                    Err(error) => warn!("queued chain integration failed: {}", error),
                }
            }
        });
        self.register_task(task);
    }

    /// Refreshes the mining pool candidate whenever the tip changes.
    fn start_tip_subscriber(&self) {
        let node = self.clone();
        let mut tip_changes = self.consensus.latest.subscribe();
        let task = tokio::spawn(async move {
            while tip_changes.changed().await.is_ok() {
                if let Err(error) = node.pool.refresh() {
                    warn!("pool refresh on tip change failed: {}", error);
                }
            }
        });
        self.register_task(task);
    }

    /// Bottom-up chain sync against one live sync peer.
    fn start_consensus_sync(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                node.health.consensus.touch();
                if !node.consensus.syncing.load(Ordering::SeqCst) {
                    if let Some((start_index, end_index)) = node.consensus.next_sync_range() {
                        let sync_peer = node
                            .sync_peer_streams()
                            .into_iter()
                            .find(|stream| stream.authenticated.load(Ordering::SeqCst));
                        if let Some(stream) = sync_peer {
                            let _ = stream.write_params(
                                "getblocks",
                                json!({ "start_index": start_index, "end_index": end_index }),
                            );
                        }
                    }
                }
                sleep(CONSENSUS_SYNC_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    /// Keeps the outbound side of the overlay dialed up. Off on regnet.
    fn start_peer_discovery(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                node.connect_to_peers().await;
                node.health.peer.touch();
                sleep(PEER_DISCOVERY_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    /// Status log plus idle-stream reaping.
    fn start_status(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let now = chrono::Utc::now().timestamp();
                for stream in node.all_streams() {
                    if now - stream.last_activity() > HEALTH_TIMEOUT {
                        warn!("stale stream detected, peer removed: {}", stream.addr);
                        node.remove_stream(&stream);
                    }
                }
                node.health.check(now);

                let (height, jobs, shares) = node.pool.status();
                info!(
                    "status: height {} | peers {} | mempool {} | pool height {} jobs {} shares {} | {}",
                    node.consensus.latest.height(),
                    node.all_streams().len(),
                    node.storage.mempool_len(),
                    height,
                    jobs,
                    shares,
                    node.health.status_line()
                );
                sleep(STATUS_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    /// Re-evaluates the tip cache against storage every second.
    fn start_block_checker(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                node.consensus.latest.block_checker(&node.storage);
                node.health.block_checker.touch();
                sleep(BLOCK_CHECKER_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    /// Validates that the cached tip still links into the stored chain.
    fn start_cache_validator(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                if let Some(tip) = node.consensus.latest.get() {
                    let linked = tip.index == 0
                        || node
                            .storage
                            .get_block_by_index(tip.index - 1)
                            .map(|parent| parent.hash == tip.prev_hash)
                            .unwrap_or(false);
                    if !linked {
                        error!("cached tip no longer links into the stored chain");
                        node.consensus.latest.block_checker(&node.storage);
                    }
                }
                node.health.cache_validator.touch();
                sleep(CACHE_VALIDATOR_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    fn start_pool_payer(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                if let Some(payer) = &node.payer {
                    match payer.pay_out() {
                        Ok(0) => {}
                        Ok(paid) => debug!("paid out {} share(s)", paid),
                        Err(error) => warn!("pool payout failed: {}", error),
                    }
                }
                node.health.pool_payer.touch();
                sleep(POOL_PAYER_INTERVAL).await;
            }
        });
        self.register_task(task);
    }

    /// At-least-once redelivery for confirmed methods on protocol > 1.
    fn start_retry_sweep(&self) {
        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let resent = node.retry_sweep();
                if resent > 0 {
                    debug!("re-sent {} unconfirmed message(s)", resent);
                }
                node.health.message_sender.touch();
                sleep(RETRY_SWEEP_INTERVAL).await;
            }
        });
        self.register_task(task);
    }
}
