//! Peer replication scenarios: inventory-driven pull, transfer apply,
//! idempotent replay, and eager push.

mod common;

use common::{gateway_with, packet};

const PEER: u32 = 0x11111111;
const ALICE: u32 = 0xaaaaaaaa;
const STRANGER: u32 = 0x22222222;

fn peered() -> common::Fixture {
    gateway_with(|c| c.sync.peers = vec!["!11111111".to_string()])
}

#[test]
fn inventory_triggers_get_for_missing_ids() {
    let mut fx = peered();
    fx.gateway
        .handle_packet(packet(PEER, "#SYNC INV ids=5"));
    let sent = fx.take_sent();
    assert_eq!(
        sent,
        vec![("!11111111".to_string(), "#SYNC GET id=5".to_string())]
    );
}

#[test]
fn inventory_pull_is_capped_at_three() {
    let mut fx = peered();
    fx.gateway
        .handle_packet(packet(PEER, "#SYNC INV ids=1,2,3,4,5,6"));
    let sent = fx.take_sent();
    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|(d, f)| d == "!11111111" && f.starts_with("#SYNC GET id=")));
}

#[test]
fn transfer_applies_and_replay_is_noop() {
    let mut fx = peered();
    let frames = [
        "#SYNC POST uid=q1w2e3r4t5 id=5 ts=1723345678 by=!a1b2c3d4 r=- n=1",
        "#SYNC PART uid=q1w2e3r4t5 1/1 hello from the far gateway",
        "#SYNC END uid=q1w2e3r4t5",
    ];
    for f in frames {
        fx.gateway.handle_packet(packet(PEER, f));
    }
    let posts = fx.store.recent_posts(10).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].author, "[peer]!11111111");
    assert_eq!(posts[0].body, "hello from the far gateway");
    assert!(fx.store.applied_uid_contains("q1w2e3r4t5").unwrap());

    // replaying the whole transfer changes nothing
    for f in frames {
        fx.gateway.handle_packet(packet(PEER, f));
    }
    assert_eq!(fx.store.recent_posts(10).unwrap().len(), 1);
    assert_eq!(fx.store.post_count().unwrap(), 1);
}

#[test]
fn sync_frames_from_non_peers_are_ignored() {
    let mut fx = peered();
    fx.gateway
        .handle_packet(packet(STRANGER, "#SYNC INV ids=5"));
    assert!(fx.take_sent().is_empty());
    fx.gateway.handle_packet(packet(
        STRANGER,
        "#SYNC POST uid=zzzzzzzzzz id=1 ts=1 by=!22222222 r=- n=1",
    ));
    assert!(fx.store.rxparts_get("zzzzzzzzzz").unwrap().is_none());
}

#[test]
fn local_post_is_pushed_to_peers() {
    let mut fx = peered();
    fx.gateway.handle_packet(packet(ALICE, "p hello mesh"));
    let sent = fx.take_sent();
    // reply to alice, then POST/PART/END to the peer
    assert_eq!(sent[0], ("!aaaaaaaa".to_string(), "posted #1".to_string()));
    let to_peer: Vec<&String> = sent
        .iter()
        .filter(|(d, _)| d == "!11111111")
        .map(|(_, f)| f)
        .collect();
    assert_eq!(to_peer.len(), 3);
    assert!(to_peer[0].starts_with("#SYNC POST uid="));
    assert!(to_peer[0].contains("by=!aaaaaaaa"));
    assert!(to_peer[0].contains("n=1"));
    assert!(to_peer[1].contains("1/1 hello mesh"));
    assert!(to_peer[2].starts_with("#SYNC END uid="));
}

#[test]
fn replicated_posts_are_not_pushed_again() {
    let mut fx = peered();
    fx.gateway.handle_packet(packet(
        PEER,
        "#SYNC POST uid=a1b2c3d4e5 id=9 ts=100 by=!33333333 r=- n=1",
    ));
    fx.gateway
        .handle_packet(packet(PEER, "#SYNC PART uid=a1b2c3d4e5 1/1 gossip"));
    fx.gateway
        .handle_packet(packet(PEER, "#SYNC END uid=a1b2c3d4e5"));
    let outbound = fx.take_sent();
    assert!(
        outbound.iter().all(|(_, f)| !f.starts_with("#SYNC POST")),
        "apply must not re-replicate"
    );
}

#[test]
fn sync_off_stops_eager_push() {
    let mut fx = peered();
    fx.gateway.handle_packet(packet(ALICE, "sync off"));
    fx.take_sent();
    fx.gateway.handle_packet(packet(ALICE, "p quiet post"));
    let sent = fx.take_sent();
    assert_eq!(sent, vec![("!aaaaaaaa".to_string(), "posted #1".to_string())]);
}

#[test]
fn sync_now_broadcasts_inventory() {
    let mut fx = peered();
    fx.gateway.handle_packet(packet(ALICE, "p seed"));
    fx.take_sent();
    fx.gateway.handle_packet(packet(ALICE, "sync now"));
    let sent = fx.take_sent();
    assert!(sent
        .iter()
        .any(|(d, f)| d == "!11111111" && f == "#SYNC INV ids=1"));
}

#[test]
fn sync_bypasses_rate_limit() {
    let mut fx = gateway_with(|c| {
        c.sync.peers = vec!["!11111111".to_string()];
        c.board.rate_secs = 120;
    });
    fx.gateway.handle_packet(packet(PEER, "r"));
    fx.take_sent();
    // a second command would be rate limited, but sync frames are not
    fx.gateway
        .handle_packet(packet(PEER, "#SYNC INV ids=7"));
    let sent = fx.take_sent();
    assert_eq!(
        sent,
        vec![("!11111111".to_string(), "#SYNC GET id=7".to_string())]
    );
}

#[test]
fn two_gateways_converge_over_a_wire() {
    // G1 has a post; G2 pulls it via INV -> GET -> transfer.
    let mut g1 = gateway_with(|c| c.sync.peers = vec!["!22222222".to_string()]);
    let mut g2 = gateway_with(|c| c.sync.peers = vec!["!11111111".to_string()]);

    g1.gateway.handle_packet(packet(ALICE, "p shared knowledge"));
    g1.take_sent(); // eager push dropped: pretend it was lost in the air

    // G1's ticker would send INV; simulate it arriving at G2 from G1
    g2.gateway
        .handle_packet(packet(0x11111111, "#SYNC INV ids=1"));
    let gets = g2.take_sent();
    assert_eq!(gets.len(), 1);

    // carry the GET back to G1, as if sent by G2 (!22222222)
    g1.gateway.handle_packet(packet(0x22222222, &gets[0].1));
    let transfer = g1.take_sent();
    assert_eq!(transfer.len(), 3);

    // deliver the transfer to G2
    for (_, frame) in &transfer {
        g2.gateway.handle_packet(packet(0x11111111, frame));
    }
    let posts = g2.store.recent_posts(10).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].body, "shared knowledge");
    assert_eq!(posts[0].author, "[peer]!11111111");
}
