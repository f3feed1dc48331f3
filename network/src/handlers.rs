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

//! The node-to-node RPC method set.

use crate::{
    errors::NetworkError,
    message::{
        AuthenticateParams, BlockResponse, BlocksResponse, ChallengeParams, ConnectParams,
        Envelope, GetBlockParams, GetBlocksParams, NewBlockParams, NewTxnParams,
    },
    node::Node,
    peer::PeerRole,
    stream::{Direction, PeerStream},
};

use strata_consensus::{InboundOutcome, MAX_BLOCKS_PER_MESSAGE};
use strata_objects::crypto;

use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::atomic::Ordering;

impl Node {
    pub async fn handle_message(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        trace!(
            "RECEIVED {} {} from {}",
            envelope.method,
            envelope.id,
            stream.addr
        );
        match envelope.method.as_str() {
            "connect" => self.on_connect(stream, envelope),
            "challenge" => self.on_challenge(stream, envelope),
            "authenticate" => self.on_authenticate(stream, envelope),
            "capacity" => self.on_capacity(stream),
            "getblocks" => self.on_getblocks(stream, envelope),
            "blocksresponse" => self.on_blocksresponse(stream, envelope),
            "blocksresponse_confirmed" => self.on_blocksresponse_confirmed(stream, envelope),
            "getblock" => self.on_getblock(stream, envelope),
            "blockresponse" => self.on_blockresponse(stream, envelope),
            "blockresponse_confirmed" => self.on_blockresponse_confirmed(stream, envelope),
            "newblock" => self.on_newblock(stream, envelope),
            "newblock_confirmed" => self.on_newblock_confirmed(stream, envelope),
            "newtxn" => self.on_newtxn(stream, envelope),
            "newtxn_confirmed" => self.on_newtxn_confirmed(stream, envelope),
            "block_template" => self.on_block_template(stream, envelope),
            "submit" => self.on_submit(stream, envelope).await,
            "disconnect" => {
                self.remove_stream(stream);
                Ok(())
            }
            other => {
                debug!("ignoring unknown method '{}' from {}", other, stream.addr);
                Ok(())
            }
        }
    }

    /// Peer introduction: classify the caller, enforce capacity before any
    /// mutation, validate the identity, and park the stream as pending.
    fn on_connect(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let params: ConnectParams = serde_json::from_value(envelope.body())?;
        let mut peer = params.peer;
        let signature = peer.identity.username_signature.clone();

        let role = match self.me.role {
            PeerRole::Seed => {
                if self.config.seed_by_signature(&signature).is_some() {
                    PeerRole::Seed
                } else if self.config.seed_gateway_by_signature(&signature).is_some() {
                    PeerRole::SeedGateway
                } else {
                    error!("inbound peer fits no class for a seed, disconnecting");
                    stream.close();
                    return Ok(());
                }
            }
            PeerRole::SeedGateway => {
                if self.config.seed_by_signature(&signature).is_some() {
                    PeerRole::Seed
                } else {
                    PeerRole::ServiceProvider
                }
            }
            PeerRole::ServiceProvider => {
                if self.config.seed_gateway_by_signature(&signature).is_some() {
                    PeerRole::SeedGateway
                } else {
                    PeerRole::User
                }
            }
            PeerRole::User => PeerRole::User,
        };
        peer.role = role;

        let limit = self.me.role.type_limit(role, self.config.max_peers);
        if self.inbound_count(role) >= limit {
            stream.write_result("capacity", json!({}), &envelope.id)?;
            stream.close();
            return Ok(());
        }

        let rid = peer.rid(&self.identity);
        if self.knows_rid(&rid) {
            stream.close();
            return Ok(());
        }
        let now = chrono::Utc::now().timestamp();
        if self.is_ignored(role, &signature, now) {
            stream.close();
            return Ok(());
        }
        if !peer.is_valid() {
            error!("invalid peer identity signature");
            stream.close();
            return Ok(());
        }
        info!("new {} peer is valid", role);

        stream.set_peer(peer);
        stream.set_rid(rid.clone());
        self.register_inbound_pending(role, &rid, stream.clone());
        Ok(())
    }

    /// Answer a challenge with a signed token; issue our own challenge if we
    /// have not yet.
    fn on_challenge(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let params: ChallengeParams = serde_json::from_value(envelope.body())?;
        if let Some(peer) = &params.peer {
            stream.set_protocol_version(peer.protocol_version);
        }

        let signed_challenge = crypto::sign(&params.token, &self.config.private_key)?;
        let me = serde_json::to_value(&self.me)?;
        let authenticate = json!({ "peer": me.clone(), "signed_challenge": signed_challenge });
        if stream.protocol_version() > 1 {
            stream.write_params("authenticate", authenticate)?;
        } else {
            stream.write_result("authenticate", authenticate, &envelope.id)?;
        }

        if stream.token().is_none() {
            let token = stream.issue_token();
            stream.write_params("challenge", json!({ "peer": me, "token": token }))?;
        }
        Ok(())
    }

    /// Verify the peer's signature over the token we issued; on success the
    /// stream becomes a live sync peer and we announce our tip.
    fn on_authenticate(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let params: AuthenticateParams = serde_json::from_value(envelope.body())?;
        if let Some(peer) = &params.peer {
            stream.set_protocol_version(peer.protocol_version);
        }

        let (Some(token), Some(peer)) = (stream.token(), stream.peer()) else {
            stream.close();
            return Ok(());
        };

        if crypto::verify(&token, &params.signed_challenge, &peer.identity.public_key).is_ok() {
            stream.authenticated.store(true, Ordering::SeqCst);
            if stream.direction == Direction::Inbound {
                if let Some(rid) = stream.rid() {
                    self.promote_inbound(peer.role, &rid);
                }
            }
            info!("authenticated {}: {}", peer.role, peer);
            self.announce_tip(stream);
        } else {
            warn!("challenge signature did not verify for {}", peer);
            self.remove_stream(stream);
        }
        Ok(())
    }

    /// The peer refused us for capacity: back off for the cool-down window.
    fn on_capacity(&self, stream: &Arc<PeerStream>) -> Result<(), NetworkError> {
        if let Some(peer) = stream.peer() {
            warn!("{} at full capacity: {}", peer.role, peer);
            self.ignore_outbound(peer.role, &peer.identity.username_signature);
        }
        self.remove_stream(stream);
        Ok(())
    }

    /// Bulk pull, capped at `MAX_BLOCKS_PER_MESSAGE` per response.
    fn on_getblocks(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let params: GetBlocksParams = serde_json::from_value(envelope.body())?;
        let start_index = params.start_index;
        let end_index = params.end_index.min(start_index + MAX_BLOCKS_PER_MESSAGE);

        let blocks = if start_index > self.consensus.latest.height() {
            Vec::new()
        } else {
            self.storage.blocks_in_range(start_index, end_index)
        };

        let result = json!({ "blocks": blocks, "start_index": start_index });
        stream.write_result("blocksresponse", result.clone(), &envelope.id)?;
        if stream.protocol_version() > 1 {
            if let Some(rid) = stream.rid() {
                self.retry_insert(
                    &rid,
                    "blocksresponse",
                    &start_index.to_string(),
                    result,
                    Some(envelope.id.clone()),
                );
            }
        }
        Ok(())
    }

    /// A batch of sync blocks: stage them all, then run the final block
    /// through the regular inbound path. An unknown parent triggers a gap
    /// fill instead.
    fn on_blocksresponse(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let response: BlocksResponse = serde_json::from_value(envelope.body())?;
        if stream.protocol_version() > 1 {
            stream.write_result(
                "blocksresponse_confirmed",
                envelope.result.clone().unwrap_or(Value::Null),
                &envelope.id,
            )?;
        }

        if response.blocks.is_empty() {
            self.consensus.syncing.store(false, Ordering::SeqCst);
            stream.synced.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.consensus.syncing.store(true, Ordering::SeqCst);

        let rid = stream.rid().unwrap_or_default();
        let first = &response.blocks[0];
        let parent_known = first.index == 0
            || self.storage.get_block_by_hash(&first.prev_hash).is_some()
            || self.storage.staged_by_hash(&first.prev_hash).is_some();
        if !parent_known {
            self.fill_gap(stream, first.index)?;
            stream.synced.store(true, Ordering::SeqCst);
            self.consensus.syncing.store(false, Ordering::SeqCst);
            return Ok(());
        }

        for block in &response.blocks {
            self.consensus.insert_consensus_block(block, &rid);
        }
        let Some(last) = response.blocks.last().cloned() else {
            return Ok(());
        };
        let outcome = self.consensus.process_inbound_block(last, &rid);
        self.consensus.syncing.store(false, Ordering::SeqCst);

        // keep pulling while responses keep extending the chain
        if outcome == InboundOutcome::Integrated {
            if let Some((start_index, end_index)) = self.consensus.next_sync_range() {
                stream.write_params(
                    "getblocks",
                    json!({ "start_index": start_index, "end_index": end_index }),
                )?;
            }
        }
        Ok(())
    }

    fn on_blocksresponse_confirmed(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let response: BlocksResponse = serde_json::from_value(envelope.body())?;
        if let Some(rid) = stream.rid() {
            self.retry_remove(&rid, "blocksresponse", &response.start_index.to_string());
        }
        Ok(())
    }

    /// Requests the span between our highest block below the gap and the gap
    /// itself.
    fn fill_gap(&self, stream: &Arc<PeerStream>, end_index: u32) -> Result<(), NetworkError> {
        let below = self
            .storage
            .blocks_in_range(0, end_index.saturating_sub(1));
        let start_index = below.last().map(|block| block.index + 1).unwrap_or(0);
        stream.write_params(
            "getblocks",
            json!({ "start_index": start_index, "end_index": end_index.saturating_sub(1) }),
        )?;
        Ok(())
    }

    /// Single block lookup: main chain by hash, then staging, then by index.
    fn on_getblock(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let params: GetBlockParams = serde_json::from_value(envelope.body())?;
        let block = params
            .hash
            .as_deref()
            .and_then(|hash| self.storage.get_block_by_hash(hash))
            .or_else(|| {
                params
                    .hash
                    .as_deref()
                    .and_then(|hash| self.storage.staged_by_hash(hash).map(|staged| staged.block))
            })
            .or_else(|| {
                params
                    .index
                    .and_then(|index| self.storage.get_block_by_index(index))
            });

        if let Some(block) = block {
            let hash = block.hash.clone();
            let result = json!({ "block": block });
            stream.write_result("blockresponse", result.clone(), &envelope.id)?;
            if stream.protocol_version() > 1 {
                if let Some(rid) = stream.rid() {
                    self.retry_insert(&rid, "blockresponse", &hash, result, Some(envelope.id.clone()));
                }
            }
        }
        Ok(())
    }

    fn on_blockresponse(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let response: BlockResponse = serde_json::from_value(envelope.body())?;
        if stream.protocol_version() > 1 {
            stream.write_result(
                "blockresponse_confirmed",
                envelope.result.clone().unwrap_or(Value::Null),
                &envelope.id,
            )?;
        }
        let Some(block) = response.block else {
            return Ok(());
        };
        if block.index > self.consensus.latest.height() + MAX_BLOCKS_PER_MESSAGE {
            return Ok(());
        }

        let rid = stream.rid().unwrap_or_default();
        if let InboundOutcome::MissingAncestor { hash, index } =
            self.consensus.process_inbound_block(block, &rid)
        {
            stream.write_params("getblock", json!({ "hash": hash, "index": index }))?;
        }
        Ok(())
    }

    fn on_blockresponse_confirmed(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let response: BlockResponse = serde_json::from_value(envelope.body())?;
        if let (Some(rid), Some(block)) = (stream.rid(), response.block) {
            self.retry_remove(&rid, "blockresponse", &block.hash);
        }
        Ok(())
    }

    /// Tip gossip: integrate or stage, request a missing ancestor, and relay
    /// onward to every sync peer except the sender.
    fn on_newblock(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let params: NewBlockParams = serde_json::from_value(envelope.body())?;
        if stream.protocol_version() > 1 {
            stream.write_result(
                "newblock_confirmed",
                envelope.params.clone().unwrap_or(Value::Null),
                &envelope.id,
            )?;
        }
        let Some(block) = params.payload.block else {
            return Ok(());
        };

        let tip_height = self.consensus.latest.height();
        if block.index > tip_height + MAX_BLOCKS_PER_MESSAGE || block.index < tip_height {
            return Ok(());
        }

        let rid = stream.rid().unwrap_or_default();
        match self.consensus.process_inbound_block(block.clone(), &rid) {
            InboundOutcome::MissingAncestor { hash, index } => {
                stream.write_params("getblock", json!({ "hash": hash, "index": index }))?;
            }
            InboundOutcome::Integrated | InboundOutcome::StagedOnly => {
                self.send_block_to_peers(&block, Some(&rid));
            }
            InboundOutcome::AlreadyKnown | InboundOutcome::Rejected => {}
        }
        Ok(())
    }

    fn on_newblock_confirmed(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let params: NewBlockParams = serde_json::from_value(envelope.body())?;
        if let (Some(rid), Some(block)) = (stream.rid(), params.payload.block) {
            self.retry_remove(&rid, "newblock", &block.hash);
        }
        Ok(())
    }

    /// Mempool gossip. Value transfers fan out to sync peers; relationship
    /// traffic follows the routed path with cross-seed bridging.
    fn on_newtxn(&self, stream: &Arc<PeerStream>, envelope: Envelope) -> Result<(), NetworkError> {
        let mut body = envelope.body();
        let params: NewTxnParams = serde_json::from_value(body.clone())?;
        if stream.protocol_version() > 1 {
            stream.write_result("newtxn_confirmed", body.clone(), &envelope.id)?;
        }

        let rid = stream.rid().unwrap_or_default();
        let transaction = params.transaction;
        match self.mempool.receive_transaction(transaction.clone(), Some(&rid)) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(error) => {
                debug!("rejected transaction from {}: {}", stream.addr, error);
                return Ok(());
            }
        }

        let routed = transaction.relationship.is_some()
            || transaction.requester_rid.is_some()
            || transaction.requested_rid.is_some();
        let targets = if routed {
            match stream.peer() {
                Some(origin) => self.get_route_peers(&origin, &mut body),
                None => Vec::new(),
            }
        } else {
            self.sync_peer_streams()
        };

        for peer_stream in targets {
            let Some(peer_rid) = peer_stream.rid() else {
                continue;
            };
            if peer_rid == rid {
                continue;
            }
            if peer_stream.write_params("newtxn", body.clone()).is_ok() {
                self.storage
                    .mempool_mark_sent(&transaction.transaction_signature, &peer_rid);
                if peer_stream.protocol_version() > 1 {
                    self.retry_insert(
                        &peer_rid,
                        "newtxn",
                        &transaction.transaction_signature,
                        body.clone(),
                        None,
                    );
                }
            }
        }
        Ok(())
    }

    fn on_newtxn_confirmed(
        &self,
        stream: &Arc<PeerStream>,
        envelope: Envelope,
    ) -> Result<(), NetworkError> {
        let params: NewTxnParams = serde_json::from_value(envelope.body())?;
        if let Some(rid) = stream.rid() {
            self.retry_remove(&rid, "newtxn", &params.transaction.transaction_signature);
        }
        Ok(())
    }
}
