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

//! The wire format: one JSON-RPC envelope per line over TCP.

use crate::peer::Peer;

use strata_objects::{Block, Transaction};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LinesCodec;

/// Hard ceiling on a single line; a full `blocksresponse` must fit.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Whether a request method expects a paired response.
pub fn expects_response(method: &str) -> bool {
    matches!(method, "getblock" | "getblocks")
}

/// Methods that expect a paired response, keyed by the response method.
pub fn response_to_request(method: &str) -> Option<&'static str> {
    match method {
        "blockresponse" => Some("getblock"),
        "blocksresponse" => Some("getblocks"),
        _ => None,
    }
}

/// One message on the wire. Requests carry `params`, replies carry `result`;
/// both sides share the method namespace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub method: String,
    pub jsonrpc: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Envelope {
    pub fn request(method: &str, params: Value) -> Self {
        Self {
            id: random_id(),
            method: method.to_string(),
            jsonrpc: 2.0,
            params: Some(params),
            result: None,
        }
    }

    pub fn response(method: &str, result: Value, id: &str) -> Self {
        Self {
            id: id.to_string(),
            method: method.to_string(),
            jsonrpc: 2.0,
            params: None,
            result: Some(result),
        }
    }

    /// The payload, whichever side of the envelope carries it.
    pub fn body(&self) -> Value {
        self.params
            .clone()
            .or_else(|| self.result.clone())
            .unwrap_or(Value::Null)
    }
}

pub fn random_id() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

pub fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE)
}

// -- typed payloads ----------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectParams {
    pub peer: Peer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeParams {
    #[serde(default)]
    pub peer: Option<Peer>,
    pub token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticateParams {
    #[serde(default)]
    pub peer: Option<Peer>,
    pub signed_challenge: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetBlocksParams {
    pub start_index: u32,
    pub end_index: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlocksResponse {
    pub blocks: Vec<Block>,
    pub start_index: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetBlockParams {
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(default)]
    pub block: Option<Block>,
}

/// `newblock` wraps its block one level down, mirroring the gossip payload
/// shape relayed between tiers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewBlockParams {
    pub payload: NewBlockPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewBlockPayload {
    #[serde(default)]
    pub block: Option<Block>,
}

impl NewBlockParams {
    pub fn wrap(block: &Block) -> Value {
        serde_json::json!({ "payload": { "block": block } })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTxnParams {
    pub transaction: Transaction,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockTemplateParams {
    #[serde(default)]
    pub agent: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitParams {
    pub job_id: String,
    pub nonce: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub result: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_on_a_line() {
        let envelope = Envelope::request("getblocks", serde_json::json!({"start_index": 1, "end_index": 5}));
        let line = serde_json::to_string(&envelope).unwrap();
        assert!(!line.contains('\n'));
        let decoded: Envelope = serde_json::from_str(&line).unwrap();
        assert_eq!(decoded.method, "getblocks");
        assert_eq!(decoded.id, envelope.id);
        let params: GetBlocksParams = serde_json::from_value(decoded.body()).unwrap();
        assert_eq!((params.start_index, params.end_index), (1, 5));
    }

    #[test]
    fn responses_pair_with_their_requests() {
        assert_eq!(response_to_request("blockresponse"), Some("getblock"));
        assert_eq!(response_to_request("blocksresponse"), Some("getblocks"));
        assert_eq!(response_to_request("newblock"), None);
    }

    #[test]
    fn requests_omit_the_result_field() {
        let envelope = Envelope::request("connect", Value::Null);
        let line = serde_json::to_string(&envelope).unwrap();
        assert!(!line.contains("result"));
        assert!(line.contains("\"jsonrpc\":2.0"));
    }
}
