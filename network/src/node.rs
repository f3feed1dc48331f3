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

use crate::{
    config::Config,
    health::Health,
    message::NewBlockParams,
    overlay,
    peer::{Peer, PeerRole},
    stream::{Direction, PeerStream},
};

use strata_consensus::{BlockQueue, BlockQueueReceiver, Consensus, MemoryPool, MiningPool, PoolPayer};
use strata_objects::{Block, Identity};
use strata_storage::Storage;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// How long a capacity-refused peer stays in the outbound-ignore set.
pub const OUTBOUND_IGNORE_WINDOW: i64 = 30;

/// Unconfirmed retry entries older than this are re-sent, up to the cap.
pub const RETRY_AFTER: i64 = 15;
pub const RETRY_CAP: u32 = 3;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

pub type StreamTable = [RwLock<HashMap<String, Arc<PeerStream>>>; PeerRole::COUNT];

/// (peer rid, method, discriminator)
pub type RetryKey = (String, String, String);

pub struct RetryEntry {
    pub method: String,
    pub payload: Value,
    /// Responses are re-sent under their original request id.
    pub request_id: Option<String>,
    pub inserted: i64,
    pub attempts: u32,
}

fn stream_table() -> StreamTable {
    std::array::from_fn(|_| RwLock::new(HashMap::new()))
}

/// The internal state of a node: configuration, chain subsystems, and the
/// role-indexed stream tables owned by the transport.
pub struct InnerNode {
    pub config: Config,
    pub me: Peer,
    pub identity: Identity,
    pub storage: Arc<Storage>,
    pub consensus: Arc<Consensus>,
    pub mempool: Arc<MemoryPool>,
    pub pool: Arc<MiningPool>,
    pub payer: Option<PoolPayer>,
    pub queue: BlockQueue,
    pub(crate) queue_receiver: Mutex<Option<BlockQueueReceiver>>,
    pub inbound_streams: StreamTable,
    pub inbound_pending: StreamTable,
    pub outbound_streams: StreamTable,
    pub outbound_pending: StreamTable,
    /// Peers refused for capacity, by username signature, with refusal time.
    pub outbound_ignore: [RwLock<HashMap<String, i64>>; PeerRole::COUNT],
    dialing: Mutex<HashSet<String>>,
    pub retry: Mutex<HashMap<RetryKey, RetryEntry>>,
    pub health: Health,
    pub local_address: OnceCell<SocketAddr>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

/// A cloneable handle over the node state, in the teacher pattern of an
/// `Arc`-wrapped inner with `Deref`.
#[derive(Clone)]
pub struct Node(Arc<InnerNode>);

impl Deref for Node {
    type Target = Arc<InnerNode>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Node {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        storage: Arc<Storage>,
        consensus: Arc<Consensus>,
        mempool: Arc<MemoryPool>,
        pool: Arc<MiningPool>,
        payer: Option<PoolPayer>,
        queue: BlockQueue,
        queue_receiver: BlockQueueReceiver,
    ) -> Self {
        let me = config.me();
        let identity = config.identity();
        Self(Arc::new(InnerNode {
            config,
            me,
            identity,
            storage,
            consensus,
            mempool,
            pool,
            payer,
            queue,
            queue_receiver: Mutex::new(Some(queue_receiver)),
            inbound_streams: stream_table(),
            inbound_pending: stream_table(),
            outbound_streams: stream_table(),
            outbound_pending: stream_table(),
            outbound_ignore: std::array::from_fn(|_| RwLock::new(HashMap::new())),
            dialing: Mutex::new(HashSet::new()),
            retry: Mutex::new(HashMap::new()),
            health: Health::new(),
            local_address: OnceCell::new(),
            tasks: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn register_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    pub fn shut_down(&self) {
        debug!("shutting down");
        self.shutting_down.store(true, Ordering::Relaxed);
        for stream in self.all_streams() {
            self.remove_stream(&stream);
        }
        for handle in self.tasks.lock().drain(..).rev() {
            handle.abort();
        }
    }

    // -- stream tables -------------------------------------------------------

    fn collect(table: &StreamTable, role: PeerRole) -> Vec<Arc<PeerStream>> {
        table[role.index()].read().values().cloned().collect()
    }

    pub fn all_streams(&self) -> Vec<Arc<PeerStream>> {
        let mut streams = Vec::new();
        for role in PeerRole::ALL {
            streams.extend(Self::collect(&self.inbound_streams, role));
            streams.extend(Self::collect(&self.inbound_pending, role));
            streams.extend(Self::collect(&self.outbound_streams, role));
            streams.extend(Self::collect(&self.outbound_pending, role));
        }
        streams
    }

    /// Pending plus established inbound connections for a role; the capacity
    /// check counts both.
    pub fn inbound_count(&self, role: PeerRole) -> usize {
        self.inbound_pending[role.index()].read().len()
            + self.inbound_streams[role.index()].read().len()
    }

    pub fn register_inbound_pending(&self, role: PeerRole, rid: &str, stream: Arc<PeerStream>) {
        self.inbound_pending[role.index()]
            .write()
            .insert(rid.to_string(), stream);
    }

    /// Moves an inbound stream from pending to established on authentication.
    pub fn promote_inbound(&self, role: PeerRole, rid: &str) {
        if let Some(stream) = self.inbound_pending[role.index()].write().remove(rid) {
            self.inbound_streams[role.index()]
                .write()
                .insert(rid.to_string(), stream);
        }
    }

    pub fn register_outbound(&self, role: PeerRole, rid: &str, stream: Arc<PeerStream>) {
        self.outbound_streams[role.index()]
            .write()
            .insert(rid.to_string(), stream);
    }

    pub fn find_stream(&self, rid: &str) -> Option<Arc<PeerStream>> {
        for role in PeerRole::ALL {
            let i = role.index();
            if let Some(stream) = self.inbound_streams[i].read().get(rid) {
                return Some(stream.clone());
            }
            if let Some(stream) = self.outbound_streams[i].read().get(rid) {
                return Some(stream.clone());
            }
        }
        None
    }

    pub fn knows_rid(&self, rid: &str) -> bool {
        PeerRole::ALL.iter().any(|role| {
            let i = role.index();
            self.inbound_streams[i].read().contains_key(rid)
                || self.inbound_pending[i].read().contains_key(rid)
                || self.outbound_streams[i].read().contains_key(rid)
                || self.outbound_pending[i].read().contains_key(rid)
        })
    }

    /// Removes a stream from every role table and closes it. Idempotent.
    pub fn remove_stream(&self, stream: &Arc<PeerStream>) {
        if let Some(rid) = stream.rid() {
            for role in PeerRole::ALL {
                let i = role.index();
                self.inbound_streams[i].write().remove(&rid);
                self.inbound_pending[i].write().remove(&rid);
                self.outbound_streams[i].write().remove(&rid);
                self.outbound_pending[i].write().remove(&rid);
            }
        }
        stream.close();
    }

    // -- outbound ignore -----------------------------------------------------

    pub fn ignore_outbound(&self, role: PeerRole, username_signature: &str) {
        self.outbound_ignore[role.index()].write().insert(
            username_signature.to_string(),
            chrono::Utc::now().timestamp(),
        );
    }

    pub fn is_ignored(&self, role: PeerRole, username_signature: &str, now: i64) -> bool {
        self.outbound_ignore[role.index()]
            .read()
            .get(username_signature)
            .map(|refused| now - refused < OUTBOUND_IGNORE_WINDOW)
            .unwrap_or(false)
    }

    /// Signatures currently under the ignore cool-down for a role.
    pub fn ignored_signatures(&self, role: PeerRole) -> HashSet<String> {
        let now = chrono::Utc::now().timestamp();
        self.outbound_ignore[role.index()]
            .read()
            .iter()
            .filter(|(_, refused)| now - **refused < OUTBOUND_IGNORE_WINDOW)
            .map(|(signature, _)| signature.clone())
            .collect()
    }

    // -- peer selection ------------------------------------------------------

    /// The streams a newly accepted block or transaction is relayed to.
    pub fn sync_peer_streams(&self) -> Vec<Arc<PeerStream>> {
        let mut streams = Vec::new();
        match self.me.role {
            PeerRole::Seed => {
                streams.extend(Self::collect(&self.inbound_streams, PeerRole::SeedGateway));
                streams.extend(Self::collect(&self.inbound_streams, PeerRole::Seed));
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::Seed));
            }
            PeerRole::SeedGateway => {
                streams.extend(Self::collect(&self.inbound_streams, PeerRole::ServiceProvider));
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::Seed));
            }
            PeerRole::ServiceProvider => {
                streams.extend(Self::collect(&self.inbound_streams, PeerRole::User));
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::SeedGateway));
            }
            PeerRole::User => {
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::ServiceProvider));
            }
        }
        streams
    }

    /// Routed forwarding for relationship traffic, per `(self role, origin
    /// role)`. Cross-seed legs stamp `source_seed` so the destination seed
    /// can answer without re-bridging.
    pub fn get_route_peers(&self, origin: &Peer, payload: &mut Value) -> Vec<Arc<PeerStream>> {
        match (self.me.role, origin.role) {
            (PeerRole::Seed, PeerRole::SeedGateway) => {
                let source_key = PeerRole::Seed.source_property();
                let bridge_signature = if let Some(source) =
                    payload.get(source_key).and_then(|v| v.as_str())
                {
                    // response leg: return through the seed that stamped it
                    Some(source.to_string())
                } else {
                    // forward leg: derive the destination's gateway and cross
                    // to its seed, stamping ourselves as the way back
                    let derived = payload
                        .get("dest_service_provider")
                        .cloned()
                        .and_then(|dest| serde_json::from_value::<Peer>(dest).ok())
                        .and_then(|dest| {
                            let ignored = self.ignored_signatures(PeerRole::SeedGateway);
                            overlay::calculate_seed_gateway(
                                &dest.identity,
                                &self.config.seed_gateways,
                                &ignored,
                                chrono::Utc::now().timestamp(),
                            )
                            .and_then(|gateway| gateway.seed.clone())
                        });
                    if derived.is_some() {
                        if let Some(object) = payload.as_object_mut() {
                            object.insert(
                                source_key.to_string(),
                                Value::String(self.me.identity.username_signature.clone()),
                            );
                        }
                    }
                    derived
                };

                let Some(signature) = bridge_signature else {
                    error!("no bridge seed found, cannot route");
                    return Vec::new();
                };
                let Some(bridge) = self.config.seed_by_signature(&signature) else {
                    error!("bridge seed {} is not declared, cannot route", signature);
                    return Vec::new();
                };
                let rid = bridge.rid(&self.identity);
                self.find_stream(&rid).into_iter().collect()
            }
            (PeerRole::Seed, PeerRole::Seed) => {
                let mut streams = Self::collect(&self.inbound_streams, PeerRole::SeedGateway);
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::Seed));
                streams
            }
            (PeerRole::SeedGateway, PeerRole::Seed) => {
                Self::collect(&self.inbound_streams, PeerRole::ServiceProvider)
            }
            (PeerRole::SeedGateway, PeerRole::ServiceProvider) => {
                Self::collect(&self.outbound_streams, PeerRole::Seed)
            }
            (PeerRole::ServiceProvider, PeerRole::User) => {
                Self::collect(&self.outbound_streams, PeerRole::SeedGateway)
            }
            (PeerRole::ServiceProvider, PeerRole::SeedGateway) => {
                let transaction = payload
                    .get("transaction")
                    .cloned()
                    .and_then(|txn| {
                        serde_json::from_value::<strata_objects::Transaction>(txn).ok()
                    });
                match transaction {
                    Some(txn) if txn.total_output_value() > 0 => {
                        // value transfers fan out to every connected user
                        Self::collect(&self.inbound_streams, PeerRole::User)
                    }
                    Some(txn) => {
                        // pure relationship traffic goes only to its endpoints
                        let users = self.inbound_streams[PeerRole::User.index()].read();
                        [&txn.requester_rid, &txn.requested_rid]
                            .into_iter()
                            .flatten()
                            .filter_map(|rid| users.get(rid).cloned())
                            .collect()
                    }
                    None => Vec::new(),
                }
            }
            (PeerRole::User, _) => {
                let mut streams = Self::collect(&self.inbound_streams, PeerRole::User);
                streams.extend(Self::collect(&self.outbound_streams, PeerRole::User));
                streams
            }
            _ => Vec::new(),
        }
    }

    // -- dialing -------------------------------------------------------------

    /// Reconnect sweep: dials the declared peers of our outbound class up to
    /// the role limit.
    pub async fn connect_to_peers(&self) {
        let outbound_class = self.me.role.outbound_class();
        let now = chrono::Utc::now().timestamp();

        let candidates: Vec<Peer> = match self.me.role {
            PeerRole::Seed => self
                .config
                .seeds
                .iter()
                .filter(|peer| {
                    peer.identity.username_signature != self.me.identity.username_signature
                })
                .cloned()
                .collect(),
            PeerRole::SeedGateway => self
                .me
                .seed
                .as_deref()
                .and_then(|signature| self.config.seed_by_signature(signature))
                .cloned()
                .into_iter()
                .collect(),
            PeerRole::ServiceProvider => {
                let ignored = self.ignored_signatures(PeerRole::SeedGateway);
                overlay::calculate_seed_gateway(
                    &self.me.identity,
                    &self.config.seed_gateways,
                    &ignored,
                    now,
                )
                .cloned()
                .into_iter()
                .collect()
            }
            PeerRole::User => self.config.service_providers.clone(),
        };

        let limit = self.me.role.type_limit(outbound_class, self.config.max_peers);
        let index = outbound_class.index();
        for peer in candidates {
            let connected = self.outbound_streams[index].read().len()
                + self.outbound_pending[index].read().len();
            if connected >= limit {
                break;
            }
            self.connect(peer).await;
        }
    }

    /// Dials a single peer, registering the stream and opening the handshake.
    pub async fn connect(&self, peer: Peer) {
        let role = peer.role;
        let rid = peer.rid(&self.identity);
        let now = chrono::Utc::now().timestamp();

        if self.me.identity.username_signature == peer.identity.username_signature {
            return;
        }
        if self.is_ignored(role, &peer.identity.username_signature, now) {
            return;
        }
        if self.knows_rid(&rid) {
            return;
        }
        if !self.dialing.lock().insert(rid.clone()) {
            return;
        }
        if !peer.is_valid() {
            warn!("new {} peer signature is invalid", role);
            self.dialing.lock().remove(&rid);
            return;
        }

        let address = format!("{}:{}", peer.host, peer.port);
        let socket = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(error)) => {
                warn!("cannot connect to {} {}: {}", role, address, error);
                self.dialing.lock().remove(&rid);
                return;
            }
            Err(_) => {
                warn!("timeout connecting to {} {}", role, address);
                self.dialing.lock().remove(&rid);
                return;
            }
        };

        let addr = socket
            .peer_addr()
            .unwrap_or_else(|_| "0.0.0.0:0".parse().unwrap());
        let stream = crate::server::spawn_connection(self.clone(), socket, addr, Direction::Outbound);
        stream.set_peer(peer.clone());
        stream.set_rid(rid.clone());
        self.register_outbound(role, &rid, stream.clone());
        self.dialing.lock().remove(&rid);
        info!("connected to {}: {}", role, peer);

        let my_peer = serde_json::to_value(&self.me).unwrap_or(Value::Null);
        let _ = stream.write_params("connect", serde_json::json!({ "peer": my_peer.clone() }));
        let token = stream.issue_token();
        let _ = stream.write_params(
            "challenge",
            serde_json::json!({ "peer": my_peer, "token": token }),
        );
    }

    // -- gossip --------------------------------------------------------------

    /// Relays a block to every sync peer, minus the one it came from. Peers
    /// on protocol version > 1 get a retry entry until they confirm.
    pub fn send_block_to_peers(&self, block: &Block, except_rid: Option<&str>) {
        let payload = NewBlockParams::wrap(block);
        for stream in self.sync_peer_streams() {
            let Some(rid) = stream.rid() else { continue };
            if Some(rid.as_str()) == except_rid {
                continue;
            }
            if stream.write_params("newblock", payload.clone()).is_err() {
                continue;
            }
            if stream.protocol_version() > 1 {
                self.retry_insert(&rid, "newblock", &block.hash, payload.clone(), None);
            }
        }
    }

    /// Announces our tip and probes for the next block; runs right after a
    /// stream authenticates.
    pub fn announce_tip(&self, stream: &Arc<PeerStream>) {
        if let Some(tip) = self.consensus.latest.get() {
            let _ = stream.write_params("newblock", NewBlockParams::wrap(&tip));
            let _ = stream.write_params(
                "getblock",
                serde_json::json!({ "index": tip.index + 1 }),
            );
        }
    }

    // -- retry table ---------------------------------------------------------

    pub fn retry_insert(
        &self,
        rid: &str,
        method: &str,
        discriminator: &str,
        payload: Value,
        request_id: Option<String>,
    ) {
        self.retry.lock().insert(
            (rid.to_string(), method.to_string(), discriminator.to_string()),
            RetryEntry {
                method: method.to_string(),
                payload,
                request_id,
                inserted: chrono::Utc::now().timestamp(),
                attempts: 0,
            },
        );
    }

    pub fn retry_remove(&self, rid: &str, method: &str, discriminator: &str) -> bool {
        self.retry
            .lock()
            .remove(&(rid.to_string(), method.to_string(), discriminator.to_string()))
            .is_some()
    }

    pub fn retry_len(&self) -> usize {
        self.retry.lock().len()
    }

    /// Re-sends unconfirmed entries older than the threshold; entries that
    /// exhaust the cap, or whose peer is gone, are dropped.
    pub fn retry_sweep(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let mut resent = 0;
        let mut doomed: Vec<RetryKey> = Vec::new();

        let mut retry = self.retry.lock();
        for (key, entry) in retry.iter_mut() {
            if now - entry.inserted < RETRY_AFTER {
                continue;
            }
            let Some(stream) = self.find_stream(&key.0) else {
                doomed.push(key.clone());
                continue;
            };
            if entry.attempts >= RETRY_CAP {
                doomed.push(key.clone());
                continue;
            }

            let sent = match entry.request_id.as_deref() {
                Some(id) => stream.write_result(&entry.method, entry.payload.clone(), id),
                None => stream.write_params(&entry.method, entry.payload.clone()).map(|_| ()),
            };
            if sent.is_ok() {
                entry.attempts += 1;
                entry.inserted = now;
                resent += 1;
            } else {
                doomed.push(key.clone());
            }
        }
        for key in doomed {
            retry.remove(&key);
        }
        resent
    }
}
