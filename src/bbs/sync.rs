//! Peer replication: gossip recent posts between cooperating gateways over
//! the normal mesh text channel.
//!
//! All frames are ASCII text starting with `#SYNC`, sent direct to each
//! peer (never broadcast):
//!
//! ```text
//! #SYNC INV ids=3,4,7
//! #SYNC GET id=7
//! #SYNC POST uid=k3v9x2m1qa id=7 ts=1723345678 by=!a1b2c3d4 r=- n=2
//! #SYNC PART uid=k3v9x2m1qa 1/2 <chunk>
//! #SYNC END uid=k3v9x2m1qa
//! ```
//!
//! Frames are only accepted from configured peers. A transfer is identified
//! by a fresh 10-char UID; `applied_uids` gates application so replaying a
//! whole transfer is a no-op. Chunks are concatenated in arrival order and
//! each PART refreshes the expected total, which tolerates a lost header
//! update but means reordered PARTs assemble in arrival order (see release
//! notes). Replicated posts are applied without triggering a further push.

use anyhow::Result;
use log::{debug, info};
use rand::Rng;

use crate::storage::{Post, Store};

/// Frame sentinel.
pub const SENTINEL: &str = "#SYNC";

/// Missing ids requested per received inventory.
const GET_CAP: usize = 3;

/// Incomplete reassembly buffers older than this are dropped.
const RXPARTS_TTL_SECS: i64 = 24 * 3600;

/// UID alphabet: lowercase alphanumeric, 10 chars.
const UID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const UID_LEN: usize = 10;

/// Generate a transfer UID.
pub fn new_uid() -> String {
    let mut rng = rand::thread_rng();
    (0..UID_LEN)
        .map(|_| UID_CHARS[rng.gen_range(0..UID_CHARS.len())] as char)
        .collect()
}

/// A parsed `#SYNC` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Inv {
        ids: Vec<i64>,
    },
    Get {
        id: i64,
    },
    Post {
        uid: String,
        id: i64,
        ts: i64,
        by: String,
        reply_to: Option<i64>,
        total: u32,
    },
    Part {
        uid: String,
        index: u32,
        total: u32,
        chunk: String,
    },
    End {
        uid: String,
    },
}

/// Split off the first `n` whitespace tokens; the remainder keeps its exact
/// bytes after a single separator space (PART chunks may begin with spaces).
fn tokens_then_rest(text: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut tokens = Vec::with_capacity(n);
    let mut rest = text;
    for _ in 0..n {
        rest = rest.trim_start();
        let end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        tokens.push(&rest[..end]);
        rest = &rest[end..];
    }
    Some((tokens, rest.strip_prefix(' ').unwrap_or(rest)))
}

fn kv_tokens<'a>(tokens: &[&'a str]) -> std::collections::HashMap<&'a str, &'a str> {
    tokens
        .iter()
        .filter_map(|t| t.split_once('='))
        .collect()
}

/// Parse one frame. Anything malformed yields `None` and is dropped
/// silently upstream. Unknown trailing `k=v` tokens are tolerated.
pub fn parse_frame(text: &str) -> Option<Frame> {
    let (head, _) = tokens_then_rest(text, 2)?;
    if head[0] != SENTINEL {
        return None;
    }
    match head[1] {
        "INV" => {
            let tokens: Vec<&str> = text.split_whitespace().skip(2).collect();
            let kv = kv_tokens(&tokens);
            let ids = kv
                .get("ids")?
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<i64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .ok()?;
            Some(Frame::Inv { ids })
        }
        "GET" => {
            let tokens: Vec<&str> = text.split_whitespace().skip(2).collect();
            let kv = kv_tokens(&tokens);
            Some(Frame::Get {
                id: kv.get("id")?.parse().ok()?,
            })
        }
        "POST" => {
            let tokens: Vec<&str> = text.split_whitespace().skip(2).collect();
            let kv = kv_tokens(&tokens);
            let uid = kv.get("uid")?.to_string();
            let reply_to = match kv.get("r") {
                Some(&"-") | None => None,
                Some(r) => r.parse::<i64>().ok(),
            };
            Some(Frame::Post {
                uid,
                id: kv.get("id")?.parse().ok()?,
                ts: kv.get("ts")?.parse().ok()?,
                by: kv.get("by").unwrap_or(&"?").to_string(),
                reply_to,
                total: kv.get("n")?.parse().ok()?,
            })
        }
        "PART" => {
            // #SYNC PART uid=<U> <i>/<T> <chunk...>
            let (tokens, chunk) = tokens_then_rest(text, 4)?;
            let uid = tokens[2].strip_prefix("uid=")?.to_string();
            let (index, total) = tokens[3].split_once('/')?;
            Some(Frame::Part {
                uid,
                index: index.parse().ok()?,
                total: total.parse().ok()?,
                chunk: chunk.to_string(),
            })
        }
        "END" => {
            let tokens: Vec<&str> = text.split_whitespace().skip(2).collect();
            let kv = kv_tokens(&tokens);
            Some(Frame::End {
                uid: kv.get("uid")?.to_string(),
            })
        }
        _ => None,
    }
}

/// Split a body into PART chunks of at most `limit` bytes, on char
/// boundaries, preserving every byte.
fn split_chunks(body: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut cur = String::new();
    for ch in body.chars() {
        if cur.len() + ch.len_utf8() > limit {
            chunks.push(std::mem::take(&mut cur));
        }
        cur.push(ch);
    }
    chunks.push(cur);
    chunks
}

/// The replication engine. Holds only tuning; all state is in the store.
pub struct SyncEngine {
    inv_window: usize,
    chunk: usize,
}

/// Outbound frames produced while handling sync traffic: `(dest, text)`.
pub type Outbound = Vec<(String, String)>;

impl SyncEngine {
    pub fn new(inv_window: usize, chunk: usize) -> Self {
        Self { inv_window, chunk }
    }

    /// Inventory frames for every peer, or none when the board is empty.
    pub fn inventory(&self, store: &Store) -> Result<Outbound> {
        let ids = store.recent_post_ids(self.inv_window)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let list = ids
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let frame = format!("{SENTINEL} INV ids={list}");
        Ok(store
            .peers()?
            .into_iter()
            .map(|peer| (peer, frame.clone()))
            .collect())
    }

    /// Frames for one full transfer of a post to one destination.
    fn transfer(&self, uid: &str, post: &Post, dest: &str) -> Outbound {
        let chunks = split_chunks(&post.body, self.chunk);
        let total = chunks.len();
        let r = post
            .reply_to
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let mut out = Vec::with_capacity(total + 2);
        out.push((
            dest.to_string(),
            format!(
                "{SENTINEL} POST uid={uid} id={} ts={} by={} r={r} n={total}",
                post.id, post.ts, post.author
            ),
        ));
        for (i, chunk) in chunks.iter().enumerate() {
            out.push((
                dest.to_string(),
                format!("{SENTINEL} PART uid={uid} {}/{total} {chunk}", i + 1),
            ));
        }
        out.push((dest.to_string(), format!("{SENTINEL} END uid={uid}")));
        out
    }

    /// Eagerly push a locally created post to every peer. Receivers dedup
    /// by UID, so pushing ahead of the next inventory is safe.
    pub fn push_post(&self, store: &Store, post: &Post) -> Result<Outbound> {
        let uid = new_uid();
        let mut out = Vec::new();
        for peer in store.peers()? {
            out.extend(self.transfer(&uid, post, &peer));
        }
        if !out.is_empty() {
            debug!("pushing post #{} to peers as uid={}", post.id, uid);
        }
        Ok(out)
    }

    /// Handle one inbound `#SYNC` frame. Non-peers are ignored. Returns any
    /// frames to send back (GETs for an inventory, a transfer for a GET).
    pub fn handle_frame(
        &self,
        store: &Store,
        from: &str,
        text: &str,
        now: i64,
    ) -> Result<Outbound> {
        if !store.peer_contains(from)? {
            debug!("ignoring sync frame from non-peer {}", from);
            return Ok(Vec::new());
        }
        let Some(frame) = parse_frame(text) else {
            debug!("malformed sync frame from {}", from);
            return Ok(Vec::new());
        };
        store.peer_touch(from, now)?;

        match frame {
            Frame::Inv { ids } => {
                let mut out = Vec::new();
                for id in ids {
                    if out.len() >= GET_CAP {
                        break;
                    }
                    if !store.has_post(id)? {
                        out.push((from.to_string(), format!("{SENTINEL} GET id={id}")));
                    }
                }
                Ok(out)
            }
            Frame::Get { id } => match store.post(id)? {
                Some(post) => {
                    let uid = new_uid();
                    Ok(self.transfer(&uid, &post, from))
                }
                None => Ok(Vec::new()),
            },
            Frame::Post { uid, total, .. } => {
                store.seen_uid_add(&uid, now)?;
                if !store.applied_uid_contains(&uid)? {
                    store.rxparts_begin(&uid, total, from, now)?;
                }
                Ok(Vec::new())
            }
            Frame::Part {
                uid, total, chunk, ..
            } => {
                if !store.applied_uid_contains(&uid)? {
                    // No buffer means the header was lost; drop the chunk.
                    let _ = store.rxparts_append(&uid, &chunk, total)?;
                }
                Ok(Vec::new())
            }
            Frame::End { uid } => {
                if store.applied_uid_contains(&uid)? {
                    store.rxparts_delete(&uid)?;
                    return Ok(Vec::new());
                }
                if let Some(rx) = store.rxparts_get(&uid)? {
                    let author = format!("[peer]{from}");
                    let id = store.create_post(now, &author, &rx.data, None)?;
                    store.applied_uid_add(&uid, now)?;
                    store.rxparts_delete(&uid)?;
                    info!("applied replicated post #{} (uid={}) from {}", id, uid, from);
                }
                Ok(Vec::new())
            }
        }
    }

    /// Drop reassembly buffers that never saw their END.
    pub fn gc(&self, store: &Store, now: i64) -> Result<usize> {
        let dropped = store.rxparts_gc(now - RXPARTS_TTL_SECS)?;
        if dropped > 0 {
            info!("dropped {} stale reassembly buffers", dropped);
        }
        Ok(dropped)
    }
}
