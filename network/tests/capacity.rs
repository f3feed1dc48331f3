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

use serde_json::json;

#[tokio::test]
async fn over_capacity_inbound_is_refused_before_registration() {
    // a user node granting a single inbound user slot
    let server = start_node(PeerRole::User, 1).await;

    let mut first = TestPeer::connect(server.addr.port(), "first").await;
    first
        .send_params("connect", json!({ "peer": first.peer_record() }))
        .await;
    // complete the handshake so the slot is held
    first
        .send_params(
            "challenge",
            json!({ "peer": first.peer_record(), "token": "t1" }),
        )
        .await;
    let challenge = first.recv_method("challenge").await;
    let token = challenge.body()["token"].as_str().unwrap().to_string();
    first
        .send_params(
            "authenticate",
            json!({ "peer": first.peer_record(), "signed_challenge": first.sign(&token) }),
        )
        .await;
    first.recv_method("newblock").await;

    // the (N+1)-th connect is answered `capacity` and closed, with nothing
    // registered for it
    let mut second = TestPeer::connect(server.addr.port(), "second").await;
    second
        .send_params("connect", json!({ "peer": second.peer_record() }))
        .await;
    let reply = second.recv_method("capacity").await;
    assert!(reply.result.is_some());
    assert!(second.closed().await);

    let user_index = PeerRole::User.index();
    assert_eq!(server.node.inbound_streams[user_index].read().len(), 1);
    assert_eq!(server.node.inbound_pending[user_index].read().len(), 0);
}

#[tokio::test]
async fn duplicate_connect_for_a_known_rid_is_dropped() {
    let server = start_node(PeerRole::User, 8).await;

    let mut first = TestPeer::connect(server.addr.port(), "dup").await;
    first
        .send_params("connect", json!({ "peer": first.peer_record() }))
        .await;

    // wait until the first introduction has been registered
    let user_index = PeerRole::User.index();
    for _ in 0..50 {
        if server.node.inbound_pending[user_index].read().len() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(server.node.inbound_pending[user_index].read().len(), 1);

    // second socket introducing the same identity
    let mut second = TestPeer::connect(server.addr.port(), "dup-2").await;
    let record = first.peer_record();
    second.send_params("connect", json!({ "peer": record })).await;
    assert!(second.closed().await);
}
