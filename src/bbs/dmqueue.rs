//! Store-and-forward DM queue.
//!
//! `dm <short> <text>` resolves the short name against the live node
//! directory and queues the body for the resolved node id. Delivery happens
//! on sighting: whenever intake canonicalizes a sender, up to
//! [`FLUSH_BATCH`] undelivered rows for that id are sent as `[DM] <body>`
//! and marked delivered. A body that does not fit one frame goes out
//! chunked with `(i/N)` prefixes like any other oversized reply. The batch
//! cap keeps a returning node from eating the duty cycle; the rest drain on
//! its next packet.
//!
//! There is no retry counter: a row is marked delivered on its first
//! best-effort send. Undelivered rows older than the TTL are expired before
//! each flush.

use anyhow::Result;
use log::{debug, info};

use super::pager;
use crate::link::LinkAdapter;
use crate::storage::Store;

/// Maximum DMs delivered per sighting.
pub const FLUSH_BATCH: usize = 3;

/// Expire stale rows, then drain up to [`FLUSH_BATCH`] queued DMs for a
/// node that was just heard. Returns how many were sent.
pub fn flush_for(
    store: &Store,
    link: &dyn LinkAdapter,
    node_id: &str,
    ttl_hours: u64,
    mtu: usize,
    now: i64,
) -> Result<usize> {
    let cutoff = now - (ttl_hours as i64) * 3600;
    let expired = store.dm_expire(cutoff)?;
    if expired > 0 {
        info!("expired {} undelivered DMs older than {}h", expired, ttl_hours);
    }

    let batch = store.dm_pending_for(node_id, FLUSH_BATCH)?;
    if batch.is_empty() {
        return Ok(0);
    }
    let mut sent = 0;
    for dm in batch {
        for frame in pager::chunk_text(&format!("[DM] {}", dm.body), mtu) {
            link.send(node_id, &frame);
        }
        store.dm_mark_delivered(dm.id, now)?;
        debug!("delivered queued DM #{} to {}", dm.id, node_id);
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{NodeEntry, NodeInfo};
    use std::sync::{Arc, Mutex};

    const MTU: usize = 140;

    struct RecordingLink {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl LinkAdapter for RecordingLink {
        fn send(&self, dest: &str, text: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((dest.to_string(), text.to_string()));
        }
        fn nodes(&self) -> Vec<NodeEntry> {
            Vec::new()
        }
        fn my_node(&self) -> Option<NodeInfo> {
            None
        }
        fn reopen(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn link() -> (RecordingLink, Arc<Mutex<Vec<(String, String)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            RecordingLink {
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }

    #[test]
    fn flush_caps_at_three_per_sighting() {
        let store = Store::open_memory().unwrap();
        for i in 0..5 {
            store.dm_enqueue("!deadbeef", &format!("m{i}"), 100).unwrap();
        }
        let (l, sent) = link();
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 200).unwrap(), 3);
        assert_eq!(sent.lock().unwrap().len(), 3);
        assert_eq!(sent.lock().unwrap()[0].1, "[DM] m0");
        // next sighting drains the rest
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 300).unwrap(), 2);
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 400).unwrap(), 0);
    }

    #[test]
    fn delivered_rows_never_resend() {
        let store = Store::open_memory().unwrap();
        store.dm_enqueue("!deadbeef", "hello", 100).unwrap();
        let (l, sent) = link();
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 200).unwrap(), 1);
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 201).unwrap(), 0);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(sent.lock().unwrap()[0], ("!deadbeef".to_string(), "[DM] hello".to_string()));
    }

    #[test]
    fn oversized_body_goes_out_in_numbered_frames() {
        let store = Store::open_memory().unwrap();
        let body = "a rather long message ".repeat(12);
        store.dm_enqueue("!deadbeef", body.trim(), 100).unwrap();
        let (l, sent) = link();
        // one DM delivered, several frames on the air
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, 64, 200).unwrap(), 1);
        let sent = sent.lock().unwrap();
        assert!(sent.len() > 1);
        for (i, (_, frame)) in sent.iter().enumerate() {
            assert!(frame.len() <= 64, "frame {i} is {} bytes", frame.len());
            assert!(frame.starts_with(&format!("({}/{})", i + 1, sent.len())));
        }
        assert!(sent[0].1.contains("[DM]"));
        assert_eq!(store.dm_pending_count().unwrap(), 0);
    }

    #[test]
    fn stale_rows_expire_instead_of_sending() {
        let store = Store::open_memory().unwrap();
        store.dm_enqueue("!deadbeef", "ancient", 0).unwrap();
        let (l, sent) = link();
        let now = 73 * 3600;
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, now).unwrap(), 0);
        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(store.dm_pending_count().unwrap(), 0);
    }

    #[test]
    fn flush_only_touches_target_node() {
        let store = Store::open_memory().unwrap();
        store.dm_enqueue("!deadbeef", "for bob", 100).unwrap();
        store.dm_enqueue("!cafef00d", "for hill", 100).unwrap();
        let (l, sent) = link();
        assert_eq!(flush_for(&store, &l, "!deadbeef", 72, MTU, 200).unwrap(), 1);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "!deadbeef");
        assert_eq!(store.dm_pending_count().unwrap(), 1);
    }
}
