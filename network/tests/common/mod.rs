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

use strata_consensus::{block_queue, Consensus, LatestBlock, MemoryPool, MiningPool, Network};
use strata_network::{codec, listen, Config, Envelope, Node, PeerRole};
use strata_objects::{crypto, crypto::KeyPair, Identity};
use strata_storage::Storage;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_util::codec::{Framed, LinesCodec};

pub struct TestNode {
    pub node: Node,
    pub addr: SocketAddr,
    pub keys: KeyPair,
    pub identity: Identity,
}

/// Boots a full node with a genesis block on an ephemeral port.
pub async fn start_node(peer_type: PeerRole, max_peers: usize) -> TestNode {
    let keys = KeyPair::generate();
    let identity = Identity::generate("server", &keys).unwrap();
    let config = Config {
        network: Network::Regnet,
        peer_type,
        peer_host: "127.0.0.1".to_string(),
        peer_port: 0,
        public_key: keys.public_key.clone(),
        private_key: keys.secret_key.clone(),
        username: identity.username.clone(),
        username_signature: identity.username_signature.clone(),
        max_peers,
        max_miners: 0,
        pool_payout: false,
        pool_diff: 0,
        seeds: Vec::new(),
        seed_gateways: Vec::new(),
        service_providers: Vec::new(),
    };

    let storage = Arc::new(Storage::new());
    let latest = Arc::new(LatestBlock::new());
    let consensus = Consensus::new(storage.clone(), latest.clone(), Network::Regnet);
    consensus
        .insert_genesis(&keys.public_key, &keys.secret_key)
        .unwrap();
    let mempool = Arc::new(MemoryPool::new(storage.clone()));
    let pool = MiningPool::new(
        storage.clone(),
        latest,
        mempool.clone(),
        Network::Regnet,
        &keys.public_key,
        &keys.secret_key,
    )
    .unwrap();
    let (queue, queue_receiver) = block_queue();

    let node = Node::new(
        config,
        storage,
        consensus,
        mempool,
        pool,
        None,
        queue,
        queue_receiver,
    );
    let addr = listen(node.clone()).await.unwrap();
    TestNode {
        node,
        addr,
        keys,
        identity,
    }
}

/// A bare scripted peer speaking the line protocol over a raw socket.
pub struct TestPeer {
    framed: Framed<TcpStream, LinesCodec>,
    pub keys: KeyPair,
    pub identity: Identity,
}

impl TestPeer {
    pub async fn connect(port: u16, username: &str) -> Self {
        let socket = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let framed = Framed::new(socket, codec());
        let keys = KeyPair::generate();
        let identity = Identity::generate(username, &keys).unwrap();
        Self {
            framed,
            keys,
            identity,
        }
    }

    pub fn peer_record(&self) -> Value {
        json!({
            "host": "127.0.0.1",
            "port": 9999,
            "identity": self.identity.clone(),
            "peer_type": "user",
            "protocol_version": 3,
        })
    }

    pub fn sign(&self, message: &str) -> String {
        crypto::sign(message, &self.keys.secret_key).unwrap()
    }

    pub async fn send_params(&mut self, method: &str, params: Value) {
        let envelope = Envelope::request(method, params);
        self.framed
            .send(serde_json::to_string(&envelope).unwrap())
            .await
            .unwrap();
    }

    /// Reads envelopes until the named method arrives.
    pub async fn recv_method(&mut self, method: &str) -> Envelope {
        timeout(Duration::from_secs(5), async {
            while let Some(line) = self.framed.next().await {
                let envelope: Envelope = serde_json::from_str(&line.unwrap()).unwrap();
                if envelope.method == method {
                    return envelope;
                }
            }
            panic!("stream ended while waiting for '{method}'");
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for '{method}'"))
    }

    /// True when the server has closed the connection.
    pub async fn closed(&mut self) -> bool {
        matches!(
            timeout(Duration::from_secs(5), self.framed.next()).await,
            Ok(None)
        )
    }
}
