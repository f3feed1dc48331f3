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

use strata_consensus::{
    Blockchain, Consensus, InboundOutcome, LatestBlock, Network, CHECK_TIME_FROM, MAX_TARGET,
};
use strata_objects::{crypto::KeyPair, Block};
use strata_storage::Storage;

use std::sync::Arc;

struct Fixture {
    keys: KeyPair,
    storage: Arc<Storage>,
    consensus: Arc<Consensus>,
}

fn fixture() -> Fixture {
    let keys = KeyPair::generate();
    let storage = Arc::new(Storage::new());
    let latest = Arc::new(LatestBlock::new());
    let consensus = Consensus::new(storage.clone(), latest, Network::Mainnet);
    consensus
        .insert_genesis(&keys.public_key, &keys.secret_key)
        .unwrap();
    Fixture {
        keys,
        storage,
        consensus,
    }
}

fn make_block(keys: &KeyPair, index: u32, parent: &Block, nonce: &str) -> Block {
    let mut block = Block::generate(
        vec![],
        &keys.public_key,
        1,
        index,
        &parent.hash,
        parent.time + 1,
    );
    block.target = MAX_TARGET;
    block.special_target = MAX_TARGET;
    block.seal(nonce, &keys.secret_key).unwrap();
    block
}

/// Extends the main chain up to the given height with empty blocks.
fn extend_chain(fixture: &Fixture, to_height: u32) {
    let mut parent = fixture.storage.latest_block().unwrap();
    for index in parent.index + 1..=to_height {
        let block = make_block(&fixture.keys, index, &parent, "1");
        fixture.consensus.integrate_block_with_existing_chain(&block);
        parent = block;
    }
}

fn chain_hashes(storage: &Storage) -> Vec<String> {
    storage.blocks_from(0).iter().map(|b| b.hash.clone()).collect()
}

#[test]
fn linear_extension_appends_to_the_tip() {
    let fixture = fixture();
    extend_chain(&fixture, 10);
    let tip = fixture.storage.latest_block().unwrap();

    let next = make_block(&fixture.keys, 11, &tip, "7");
    let outcome = fixture.consensus.process_inbound_block(next.clone(), "peer-1");

    assert_eq!(outcome, InboundOutcome::Integrated);
    let hashes = chain_hashes(&fixture.storage);
    assert_eq!(hashes.len(), 12);
    assert_eq!(hashes[10], tip.hash);
    assert_eq!(hashes[11], next.hash);
    assert_eq!(fixture.consensus.latest.height(), 11);
    assert_eq!(fixture.storage.mempool_len(), 0);
}

#[test]
fn redelivered_block_is_a_no_op() {
    let fixture = fixture();
    extend_chain(&fixture, 5);
    let tip = fixture.storage.latest_block().unwrap();

    let outcome = fixture.consensus.process_inbound_block(tip, "peer-1");
    assert_eq!(outcome, InboundOutcome::AlreadyKnown);
    assert_eq!(fixture.storage.block_count(), 6);
}

#[test]
fn heavier_remote_fork_replaces_the_local_branch() {
    let fixture = fixture();
    extend_chain(&fixture, 10);
    let fork_parent = fixture.storage.latest_block().unwrap();

    // local branch: one block on top of the fork point
    let local_11 = make_block(&fixture.keys, 11, &fork_parent, "local");
    fixture.consensus.integrate_block_with_existing_chain(&local_11);

    // remote branch: two blocks from the same fork point
    let remote_11 = make_block(&fixture.keys, 11, &fork_parent, "remote-a");
    let remote_12 = make_block(&fixture.keys, 12, &remote_11, "remote-b");

    fixture.consensus.process_inbound_block(remote_11.clone(), "peer-2");
    let outcome = fixture.consensus.process_inbound_block(remote_12.clone(), "peer-2");
    assert_eq!(outcome, InboundOutcome::Integrated);

    let hashes = chain_hashes(&fixture.storage);
    assert_eq!(hashes.len(), 13);
    assert_eq!(hashes[11], remote_11.hash);
    assert_eq!(hashes[12], remote_12.hash);
    assert!(!hashes.contains(&local_11.hash));
}

#[test]
fn lighter_remote_fork_stays_in_staging() {
    let fixture = fixture();
    extend_chain(&fixture, 12);
    let local_11 = fixture.storage.get_block_by_index(11).unwrap();
    let fork_parent = fixture.storage.get_block_by_index(10).unwrap();

    let remote_11 = make_block(&fixture.keys, 11, &fork_parent, "remote");
    let outcome = fixture.consensus.process_inbound_block(remote_11.clone(), "peer-3");

    assert_eq!(outcome, InboundOutcome::StagedOnly);
    assert_eq!(fixture.storage.get_block_by_index(11).unwrap().hash, local_11.hash);
    assert!(fixture.storage.staged_by_hash(&remote_11.hash).is_some());
    assert_eq!(fixture.consensus.latest.height(), 12);
}

#[test]
fn missing_ancestor_requests_the_gap_and_leaves_the_chain_alone() {
    let fixture = fixture();
    extend_chain(&fixture, 10);

    // an orphan two heights ahead whose parent we have never seen
    let keys = &fixture.keys;
    let mut orphan = Block::generate(vec![], &keys.public_key, 1, 12, "unseen-parent", 100);
    orphan.target = MAX_TARGET;
    orphan.seal("9", &keys.secret_key).unwrap();

    let outcome = fixture.consensus.process_inbound_block(orphan.clone(), "peer-4");
    assert_eq!(
        outcome,
        InboundOutcome::MissingAncestor {
            hash: "unseen-parent".to_string(),
            index: 11,
        }
    );
    assert_eq!(fixture.consensus.latest.height(), 10);
    // the orphan itself is retained as a candidate
    assert!(fixture.storage.staged_by_hash(&orphan.hash).is_some());
}

#[test]
fn ancestor_arriving_later_completes_the_fork() {
    let fixture = fixture();
    extend_chain(&fixture, 10);
    let fork_parent = fixture.storage.get_block_by_index(10).unwrap();

    let remote_11 = make_block(&fixture.keys, 11, &fork_parent, "late-a");
    let remote_12 = make_block(&fixture.keys, 12, &remote_11, "late-b");

    // the child arrives first and dead-ends
    let outcome = fixture.consensus.process_inbound_block(remote_12.clone(), "peer-5");
    assert_eq!(
        outcome,
        InboundOutcome::MissingAncestor {
            hash: remote_11.hash.clone(),
            index: 11,
        }
    );

    // the requested parent arrives; the forward walk picks the child back up
    let outcome = fixture.consensus.process_inbound_block(remote_11.clone(), "peer-5");
    assert_eq!(outcome, InboundOutcome::Integrated);
    assert_eq!(fixture.consensus.latest.height(), 12);
    assert_eq!(fixture.storage.get_block_by_index(12).unwrap().hash, remote_12.hash);
}

#[test]
fn special_min_before_target_block_time_is_rejected() {
    let fixture = fixture();
    let keys = &fixture.keys;

    let mut local = Block::generate(
        vec![],
        &keys.public_key,
        3,
        CHECK_TIME_FROM + 1,
        "parent",
        1_700_000_000,
    );
    local.target = MAX_TARGET;
    local.special_target = MAX_TARGET;
    local.seal("1", &keys.secret_key).unwrap();

    let build_remote = |time: i64| {
        let mut remote = Block::generate(
            vec![],
            &keys.public_key,
            3,
            CHECK_TIME_FROM + 2,
            &local.hash,
            time,
        );
        remote.target = MAX_TARGET;
        remote.special_target = MAX_TARGET;
        remote.special_min = true;
        remote.seal("2", &keys.secret_key).unwrap();
        remote
    };

    // too soon: under the ten-minute block time
    let early = build_remote(local.time + 5);
    assert!(!fixture.consensus.test_block_insertable(&local, &early));

    // after the full block time has elapsed it is acceptable
    let late = build_remote(local.time + 700);
    assert!(fixture.consensus.test_block_insertable(&local, &late));
}

#[test]
fn remote_genesis_is_never_insertable() {
    let fixture = fixture();
    let genesis = fixture.storage.get_block_by_index(0).unwrap();
    assert!(!fixture.consensus.test_block_insertable(&genesis, &genesis));
}

#[test]
fn cumulative_difficulty_never_decreases_on_extension() {
    let fixture = fixture();
    extend_chain(&fixture, 3);
    let before = Blockchain::new(fixture.storage.blocks_from(0)).get_difficulty();

    let tip = fixture.storage.latest_block().unwrap();
    let next = make_block(&fixture.keys, 4, &tip, "x");
    fixture.consensus.integrate_block_with_existing_chain(&next);

    let after = Blockchain::new(fixture.storage.blocks_from(0)).get_difficulty();
    assert!(after >= before);
}

#[test]
fn sync_range_pages_from_the_tip() {
    let fixture = fixture();
    extend_chain(&fixture, 10);
    assert_eq!(fixture.consensus.next_sync_range(), Some((11, 110)));
}
