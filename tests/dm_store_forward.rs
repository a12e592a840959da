//! Store-and-forward DM scenarios: resolution failure, queueing, and flush
//! on next sighting.

mod common;

use common::{gateway, packet};

const ALICE: u32 = 0xaaaaaaaa;
const BOB: u32 = 0xdeadbeef;

#[test]
fn dm_to_unknown_short_name_is_an_error() {
    let mut fx = gateway();
    fx.gateway.handle_packet(packet(ALICE, "dm bob hello"));
    let sent = fx.take_sent();
    assert_eq!(
        sent,
        vec![(
            "!aaaaaaaa".to_string(),
            "no node with short 'bob'".to_string()
        )]
    );
    assert_eq!(fx.store.dm_pending_count().unwrap(), 0);
}

#[test]
fn dm_flushes_on_next_sighting() {
    let mut fx = gateway();
    fx.add_node(BOB, "BOB", "Bob's Node", Some(0));

    fx.gateway.handle_packet(packet(ALICE, "dm bob hello"));
    let sent = fx.take_sent();
    assert_eq!(
        sent,
        vec![("!aaaaaaaa".to_string(), "queued dm to BOB (1)".to_string())]
    );
    assert_eq!(fx.store.dm_pending_count().unwrap(), 1);

    // any packet from bob triggers the flush, before his command runs
    fx.gateway.handle_packet(packet(BOB, "?"));
    let sent = fx.take_sent();
    assert_eq!(sent[0], ("!deadbeef".to_string(), "[DM] hello".to_string()));
    assert!(sent.len() >= 2, "menu reply should follow the DM");
    assert_eq!(fx.store.dm_pending_count().unwrap(), 0);

    // delivered rows never redeliver
    fx.gateway.handle_packet(packet(BOB, "?"));
    let sent = fx.take_sent();
    assert!(sent.iter().all(|(_, f)| !f.starts_with("[DM]")));
}

#[test]
fn flush_caps_at_three_per_sighting() {
    let mut fx = gateway();
    fx.add_node(BOB, "BOB", "Bob's Node", Some(0));
    for i in 0..5 {
        fx.gateway
            .handle_packet(packet(ALICE, &format!("dm bob note {i}")));
    }
    fx.take_sent();

    fx.gateway.handle_packet(packet(BOB, "?"));
    let dms: Vec<_> = fx
        .take_sent()
        .into_iter()
        .filter(|(_, f)| f.starts_with("[DM]"))
        .collect();
    assert_eq!(dms.len(), 3);
    assert_eq!(fx.store.dm_pending_count().unwrap(), 2);

    fx.gateway.handle_packet(packet(BOB, "?"));
    let dms: Vec<_> = fx
        .take_sent()
        .into_iter()
        .filter(|(_, f)| f.starts_with("[DM]"))
        .collect();
    assert_eq!(dms.len(), 2);
    assert_eq!(fx.store.dm_pending_count().unwrap(), 0);
}

#[test]
fn blacklisted_sender_still_drains_queue_but_gets_no_reply() {
    let mut fx = gateway();
    fx.add_node(BOB, "BOB", "Bob's Node", Some(0));
    fx.gateway.handle_packet(packet(ALICE, "dm bob psst"));
    fx.gateway.handle_packet(packet(ALICE, "bl add !deadbeef"));
    fx.take_sent();

    fx.gateway.handle_packet(packet(BOB, "r"));
    let sent = fx.take_sent();
    // the flush runs before the blacklist check
    assert_eq!(sent, vec![("!deadbeef".to_string(), "[DM] psst".to_string())]);
}

#[test]
fn ambiguous_short_name_is_reported() {
    let mut fx = gateway();
    fx.add_node(0x00000010, "KIWI", "Kiwi One", None);
    fx.add_node(0x00000011, "KIWI", "Kiwi Two", None);
    fx.gateway.handle_packet(packet(ALICE, "dm kiwi hello"));
    let sent = fx.take_sent();
    assert!(sent[0].1.starts_with("ambiguous 'kiwi':"));
    assert_eq!(fx.store.dm_pending_count().unwrap(), 0);
}
