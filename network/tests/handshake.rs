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

mod common;

use common::{start_node, TestPeer};

use strata_network::PeerRole;
use strata_objects::crypto;

use serde_json::json;

#[tokio::test]
async fn handshake_authenticates_both_directions_and_announces_the_tip() {
    let server = start_node(PeerRole::User, 8).await;
    let mut peer = TestPeer::connect(server.addr.port(), "alice").await;

    peer.send_params("connect", json!({ "peer": peer.peer_record() }))
        .await;
    peer.send_params(
        "challenge",
        json!({ "peer": peer.peer_record(), "token": "token-from-alice" }),
    )
    .await;

    // the server proves itself over our token (params form on protocol 3)
    let authenticate = peer.recv_method("authenticate").await;
    let signed = authenticate
        .body()
        .get("signed_challenge")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    assert!(crypto::verify("token-from-alice", &signed, &server.keys.public_key).is_ok());

    // then challenges us in turn
    let challenge = peer.recv_method("challenge").await;
    let token = challenge
        .body()
        .get("token")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    peer.send_params(
        "authenticate",
        json!({ "peer": peer.peer_record(), "signed_challenge": peer.sign(&token) }),
    )
    .await;

    // a fresh authentication is greeted with the tip and a probe for the next
    let newblock = peer.recv_method("newblock").await;
    let announced = newblock.body()["payload"]["block"]["index"].as_u64().unwrap();
    assert_eq!(announced, 0);

    let getblock = peer.recv_method("getblock").await;
    assert_eq!(getblock.body()["index"].as_u64().unwrap(), 1);

    // and the stream is registered as an established inbound user
    let registered = server
        .node
        .inbound_streams[PeerRole::User.index()]
        .read()
        .len();
    assert_eq!(registered, 1);
}

#[tokio::test]
async fn bad_challenge_signature_is_disconnected() {
    let server = start_node(PeerRole::User, 8).await;
    let mut peer = TestPeer::connect(server.addr.port(), "mallory").await;

    peer.send_params("connect", json!({ "peer": peer.peer_record() }))
        .await;
    peer.send_params(
        "challenge",
        json!({ "peer": peer.peer_record(), "token": "token-from-mallory" }),
    )
    .await;
    let challenge = peer.recv_method("challenge").await;
    let _token = challenge.body()["token"].as_str().unwrap().to_string();

    // sign the wrong message
    peer.send_params(
        "authenticate",
        json!({ "peer": peer.peer_record(), "signed_challenge": peer.sign("not-the-token") }),
    )
    .await;

    assert!(peer.closed().await);
}
