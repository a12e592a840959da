//! Packet intake: sender canonicalization, text extraction, and dual-path
//! deduplication.
//!
//! The transport can deliver the same packet on both of its receive paths,
//! and identifies senders in three shapes (integer node number, bare hex,
//! `!`-prefixed hex). Everything downstream works with the canonical
//! `!hhhhhhhh` form produced here.

use std::collections::{HashSet, VecDeque};

use crate::link::{NodeKey, RawPacket};

/// Canonical rendering of an integer node number.
pub fn canon_num(n: u32) -> String {
    format!("!{:08x}", n)
}

/// Normalize a textual node id to `!hhhhhhhh`. Accepts bare hex or a
/// `!`-prefixed string in any case; anything else is rejected.
pub fn normalize_id(s: &str) -> Option<String> {
    let x = s.trim().to_ascii_lowercase();
    let x = if x.starts_with('!') { x } else { format!("!{x}") };
    let hex = &x[1..];
    if hex.len() == 8 && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(x)
    } else {
        None
    }
}

/// Canonical sender of a packet: prefer the `!`-string, fall back to the
/// integer node number.
pub fn packet_sender(pkt: &RawPacket) -> Option<String> {
    if let Some(ref id) = pkt.from_id {
        if let Some(norm) = normalize_id(id) {
            return Some(norm);
        }
    }
    pkt.from.map(canon_num)
}

/// Canonicalize a node directory key.
pub fn key_to_id(key: &NodeKey) -> Option<String> {
    match key {
        NodeKey::Num(n) => Some(canon_num(*n)),
        NodeKey::Hex(s) | NodeKey::Bang(s) => normalize_id(s),
    }
}

/// Extract the text of a packet: decoded text when present and non-empty,
/// otherwise the raw payload decoded as UTF-8 with replacement.
pub fn packet_text(pkt: &RawPacket) -> Option<String> {
    if let Some(ref t) = pkt.text {
        let t = t.trim();
        if !t.is_empty() {
            return Some(t.to_string());
        }
    }
    if let Some(ref payload) = pkt.payload {
        let t = String::from_utf8_lossy(payload);
        let t = t.trim();
        if !t.is_empty() {
            return Some(t.to_string());
        }
    }
    None
}

/// Discriminator for one delivered packet, used to skip the duplicate copy
/// arriving on the second receive path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PacketFp {
    Id(u32),
    FromRx(String, u64),
}

/// Fingerprint of a packet, if it carries enough identity to dedup on.
pub fn packet_fp(pkt: &RawPacket, sender: &str) -> Option<PacketFp> {
    if let Some(id) = pkt.id {
        return Some(PacketFp::Id(id));
    }
    pkt.rx_time
        .map(|rx| PacketFp::FromRx(sender.to_string(), rx))
}

/// Bounded FIFO of recently seen packet fingerprints.
pub struct DedupFifo {
    seen: HashSet<PacketFp>,
    order: VecDeque<PacketFp>,
    capacity: usize,
}

impl DedupFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a fingerprint; returns true when it was already present.
    pub fn check_and_insert(&mut self, fp: PacketFp) -> bool {
        if self.seen.contains(&fp) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(fp.clone());
        self.order.push_back(fp);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canon_masks_to_lower_hex8() {
        assert_eq!(canon_num(0xdeadbeef), "!deadbeef");
        assert_eq!(canon_num(0x1), "!00000001");
    }

    #[test]
    fn normalize_accepts_all_shapes() {
        assert_eq!(normalize_id("!A1B2C3D4").as_deref(), Some("!a1b2c3d4"));
        assert_eq!(normalize_id("a1b2c3d4").as_deref(), Some("!a1b2c3d4"));
        assert_eq!(normalize_id(" !a1b2c3d4 ").as_deref(), Some("!a1b2c3d4"));
        assert_eq!(normalize_id("xyz"), None);
        assert_eq!(normalize_id("!a1b2c3"), None);
    }

    #[test]
    fn canonicalization_round_trips() {
        for n in [0u32, 1, 0xdeadbeef, u32::MAX] {
            let c = canon_num(n);
            let parsed = u32::from_str_radix(&c[1..], 16).unwrap();
            assert_eq!(canon_num(parsed), c);
        }
    }

    #[test]
    fn sender_prefers_bang_string() {
        let pkt = RawPacket {
            from: Some(1),
            from_id: Some("!DEADBEEF".to_string()),
            ..Default::default()
        };
        assert_eq!(packet_sender(&pkt).as_deref(), Some("!deadbeef"));

        let pkt = RawPacket {
            from: Some(0xdeadbeef),
            ..Default::default()
        };
        assert_eq!(packet_sender(&pkt).as_deref(), Some("!deadbeef"));
    }

    #[test]
    fn text_falls_back_to_payload() {
        let pkt = RawPacket {
            text: Some("  hello  ".to_string()),
            ..Default::default()
        };
        assert_eq!(packet_text(&pkt).as_deref(), Some("hello"));

        let pkt = RawPacket {
            payload: Some(b"p from bytes".to_vec()),
            ..Default::default()
        };
        assert_eq!(packet_text(&pkt).as_deref(), Some("p from bytes"));

        let pkt = RawPacket::default();
        assert_eq!(packet_text(&pkt), None);
    }

    #[test]
    fn key_to_id_handles_directory_shapes() {
        assert_eq!(
            key_to_id(&NodeKey::Num(0xdeadbeef)).as_deref(),
            Some("!deadbeef")
        );
        assert_eq!(
            key_to_id(&NodeKey::Hex("DEADBEEF".to_string())).as_deref(),
            Some("!deadbeef")
        );
        assert_eq!(
            key_to_id(&NodeKey::Bang("!deadbeef".to_string())).as_deref(),
            Some("!deadbeef")
        );
    }

    #[test]
    fn dedup_fifo_skips_second_delivery() {
        let mut fifo = DedupFifo::new(4);
        assert!(!fifo.check_and_insert(PacketFp::Id(1)));
        assert!(fifo.check_and_insert(PacketFp::Id(1)));
        // capacity eviction forgets the oldest
        for i in 2..=5 {
            assert!(!fifo.check_and_insert(PacketFp::Id(i)));
        }
        assert!(!fifo.check_and_insert(PacketFp::Id(1)));
    }

    #[test]
    fn fp_prefers_packet_id() {
        let pkt = RawPacket {
            id: Some(42),
            rx_time: Some(100),
            ..Default::default()
        };
        assert_eq!(packet_fp(&pkt, "!aaaaaaaa"), Some(PacketFp::Id(42)));

        let pkt = RawPacket {
            rx_time: Some(100),
            ..Default::default()
        };
        assert_eq!(
            packet_fp(&pkt, "!aaaaaaaa"),
            Some(PacketFp::FromRx("!aaaaaaaa".to_string(), 100))
        );
    }
}
