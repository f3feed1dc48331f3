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
    errors::NetworkError,
    message::{random_id, response_to_request, Envelope},
    peer::{Peer, PeerRole},
};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A live connection to a peer.
///
/// Writing goes through an unbounded outbox drained by the connection's
/// writer task, so handlers never block on the socket. The pending table
/// tracks requests awaiting a paired response, keyed `(method, id)`.
pub struct PeerStream {
    pub direction: Direction,
    pub addr: SocketAddr,
    peer: RwLock<Option<Peer>>,
    rid: RwLock<Option<String>>,
    pub authenticated: AtomicBool,
    pub synced: AtomicBool,
    token: Mutex<Option<String>>,
    last_activity: AtomicI64,
    pending: Mutex<HashMap<(String, String), Value>>,
    outbox: mpsc::UnboundedSender<String>,
    closed: AtomicBool,
    close_signal: Notify,
}

impl PeerStream {
    pub fn new(
        direction: Direction,
        addr: SocketAddr,
        outbox: mpsc::UnboundedSender<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            direction,
            addr,
            peer: RwLock::new(None),
            rid: RwLock::new(None),
            authenticated: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            token: Mutex::new(None),
            last_activity: AtomicI64::new(chrono::Utc::now().timestamp()),
            pending: Mutex::new(HashMap::new()),
            outbox,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        })
    }

    pub fn peer(&self) -> Option<Peer> {
        self.peer.read().clone()
    }

    pub fn set_peer(&self, peer: Peer) {
        *self.peer.write() = Some(peer);
    }

    pub fn peer_role(&self) -> Option<PeerRole> {
        self.peer.read().as_ref().map(|peer| peer.role)
    }

    pub fn protocol_version(&self) -> u32 {
        self.peer.read().as_ref().map(|p| p.protocol_version).unwrap_or(1)
    }

    pub fn set_protocol_version(&self, version: u32) {
        if let Some(peer) = self.peer.write().as_mut() {
            peer.protocol_version = version;
        }
    }

    pub fn rid(&self) -> Option<String> {
        self.rid.read().clone()
    }

    pub fn set_rid(&self, rid: String) {
        *self.rid.write() = Some(rid);
    }

    pub fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    pub fn issue_token(&self) -> String {
        let token = random_id();
        *self.token.lock() = Some(token.clone());
        token
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    pub fn touch(&self) {
        self.last_activity
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    /// Sends a request. When the method expects a response, the payload is
    /// parked in the pending table until the response arrives.
    pub fn write_params(&self, method: &str, params: Value) -> Result<String, NetworkError> {
        let envelope = Envelope::request(method, params.clone());
        if crate::message::expects_response(method) {
            self.pending
                .lock()
                .insert((method.to_string(), envelope.id.clone()), params);
        }
        let id = envelope.id.clone();
        self.send(&envelope)?;
        Ok(id)
    }

    /// Sends a response paired to a request id.
    pub fn write_result(&self, method: &str, result: Value, id: &str) -> Result<(), NetworkError> {
        self.send(&Envelope::response(method, result, id))
    }

    fn send(&self, envelope: &Envelope) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::StreamClosed);
        }
        let line = serde_json::to_string(envelope)?;
        trace!("SENT {} {} to {}", envelope.method, envelope.id, self.addr);
        self.outbox
            .send(line)
            .map_err(|_| NetworkError::StreamClosed)
    }

    /// Clears the pending entry satisfied by an arriving response.
    pub fn clear_pending(&self, response_method: &str, id: &str) -> bool {
        if let Some(request_method) = response_to_request(response_method) {
            return self
                .pending
                .lock()
                .remove(&(request_method.to_string(), id.to_string()))
                .is_some();
        }
        false
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Purges every in-flight request; closing a stream cancels them all.
    pub fn purge_pending(&self) {
        self.pending.lock().clear();
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.purge_pending();
            self.close_signal.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn closed_signal(&self) {
        self.close_signal.notified().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_stream() -> (Arc<PeerStream>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = PeerStream::new(Direction::Outbound, "127.0.0.1:9000".parse().unwrap(), tx);
        (stream, rx)
    }

    #[test]
    fn requests_with_responses_are_parked_until_paired() {
        let (stream, mut rx) = test_stream();
        let id = stream
            .write_params("getblock", serde_json::json!({"index": 9}))
            .unwrap();
        assert_eq!(stream.pending_count(), 1);

        // the paired response clears it; an unrelated one does not
        assert!(!stream.clear_pending("blocksresponse", &id));
        assert!(stream.clear_pending("blockresponse", &id));
        assert_eq!(stream.pending_count(), 0);

        let line = rx.try_recv().unwrap();
        assert!(line.contains("\"method\":\"getblock\""));
    }

    #[test]
    fn fire_and_forget_methods_are_not_parked() {
        let (stream, _rx) = test_stream();
        stream
            .write_params("newblock", serde_json::json!({"payload": {}}))
            .unwrap();
        assert_eq!(stream.pending_count(), 0);
    }

    #[test]
    fn closed_streams_refuse_writes_and_purge_pending() {
        let (stream, _rx) = test_stream();
        stream
            .write_params("getblocks", serde_json::json!({"start_index": 0, "end_index": 5}))
            .unwrap();
        stream.close();
        assert_eq!(stream.pending_count(), 0);
        assert!(matches!(
            stream.write_params("getblock", Value::Null),
            Err(NetworkError::StreamClosed)
        ));
    }
}
