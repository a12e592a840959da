//! # Storage - SQLite Persistence Layer
//!
//! Single SQLite database owning every durable table: posts, key/value
//! settings, admins, blacklist, peers, replication UID sets, reassembly
//! buffers, and the store-and-forward DM queue. All other components go
//! through [`Store`]; nothing else persists state.
//!
//! WAL mode is enabled so the packet consumer, ticker, and watchdog tasks can
//! interleave reads and writes on the shared connection without stalling the
//! data plane. Mutations that back admin commands are idempotent
//! (`INSERT OR IGNORE` / `DELETE WHERE`) so repeated frames are harmless.
//!
//! Post ids are gateway-local: the autoincrement sequence is never reused and
//! peer replication identifies transfers by UID, not by id.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// Storage error kinds.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS posts(
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts INTEGER NOT NULL,
  author TEXT NOT NULL,
  body TEXT NOT NULL,
  reply_to INTEGER
);
CREATE TABLE IF NOT EXISTS kv(k TEXT PRIMARY KEY, v TEXT);
CREATE TABLE IF NOT EXISTS admins(id TEXT PRIMARY KEY);
CREATE TABLE IF NOT EXISTS blacklist(id TEXT PRIMARY KEY);
CREATE TABLE IF NOT EXISTS peers(id TEXT PRIMARY KEY, last_seen INTEGER);
CREATE TABLE IF NOT EXISTS seen_uids(uid TEXT PRIMARY KEY, ts INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS applied_uids(uid TEXT PRIMARY KEY, ts INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS rxparts(
  uid TEXT PRIMARY KEY,
  total INTEGER NOT NULL,
  got INTEGER NOT NULL,
  data TEXT NOT NULL,
  from_id TEXT NOT NULL,
  created_ts INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS dm_out(
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  to_id TEXT NOT NULL,
  body TEXT NOT NULL,
  created_ts INTEGER NOT NULL,
  delivered_ts INTEGER
);
CREATE INDEX IF NOT EXISTS x_posts_reply ON posts(reply_to);
CREATE INDEX IF NOT EXISTS x_dm_out_to ON dm_out(to_id, delivered_ts);
";

/// A board post. Immutable once created; `author` is a node id, or
/// `[peer]<node id>` when the post arrived through replication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub ts: i64,
    pub author: String,
    pub body: String,
    pub reply_to: Option<i64>,
}

/// A queued store-and-forward DM. Rows with `delivered_ts` set are final.
#[derive(Debug, Clone)]
pub struct QueuedDm {
    pub id: i64,
    pub to_id: String,
    pub body: String,
    pub created_ts: i64,
    pub delivered_ts: Option<i64>,
}

/// Reassembly buffer for one in-flight replication transfer.
#[derive(Debug, Clone)]
pub struct RxParts {
    pub uid: String,
    pub total: u32,
    pub got: u32,
    pub data: String,
    pub from_id: String,
    pub created_ts: i64,
}

/// Main storage interface. One writer-safe connection shared by every task.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn with<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    // ---- posts ----

    /// Insert a post and return its id.
    pub fn create_post(
        &self,
        ts: i64,
        author: &str,
        body: &str,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        self.with(|c| {
            c.execute(
                "INSERT INTO posts(ts, author, body, reply_to) VALUES(?1, ?2, ?3, ?4)",
                params![ts, author, body, reply_to],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    pub fn post(&self, id: i64) -> Result<Option<Post>> {
        self.with(|c| {
            c.query_row(
                "SELECT id, ts, author, body, reply_to FROM posts WHERE id = ?1",
                [id],
                row_to_post,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Most recent posts, newest first.
    pub fn recent_posts(&self, limit: usize) -> Result<Vec<Post>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, ts, author, body, reply_to FROM posts
                 WHERE reply_to IS NULL ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit as i64], row_to_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Ids of the most recent posts, ascending, for the sync inventory.
    pub fn recent_post_ids(&self, limit: usize) -> Result<Vec<i64>> {
        self.with(|c| {
            let mut stmt =
                c.prepare("SELECT id FROM posts ORDER BY id DESC LIMIT ?1")?;
            let mut ids = stmt
                .query_map([limit as i64], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids.reverse();
            Ok(ids)
        })
    }

    /// Replies to a post, ordered by id.
    pub fn replies_to(&self, id: i64) -> Result<Vec<Post>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, ts, author, body, reply_to FROM posts
                 WHERE reply_to = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([id], row_to_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn has_post(&self, id: i64) -> Result<bool> {
        self.with(|c| {
            let n: i64 = c.query_row(
                "SELECT COUNT(1) FROM posts WHERE id = ?1",
                [id],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn post_count(&self) -> Result<i64> {
        self.count("posts")
    }

    // ---- key/value ----

    pub fn kv_get(&self, k: &str) -> Result<Option<String>> {
        self.with(|c| {
            c.query_row("SELECT v FROM kv WHERE k = ?1", [k], |row| row.get(0))
                .optional()
                .map_err(StoreError::from)
        })
    }

    pub fn kv_set(&self, k: &str, v: &str) -> Result<()> {
        self.with(|c| {
            c.execute(
                "INSERT INTO kv(k, v) VALUES(?1, ?2)
                 ON CONFLICT(k) DO UPDATE SET v = excluded.v",
                params![k, v],
            )?;
            Ok(())
        })
    }

    pub fn kv_delete(&self, k: &str) -> Result<()> {
        self.with(|c| {
            c.execute("DELETE FROM kv WHERE k = ?1", [k])?;
            Ok(())
        })
    }

    // ---- id sets: admins / blacklist / peers ----

    /// Idempotent insert; returns true if the row was new.
    pub fn admin_add(&self, id: &str) -> Result<bool> {
        self.set_add("admins", id)
    }

    pub fn admin_remove(&self, id: &str) -> Result<bool> {
        self.set_remove("admins", id)
    }

    pub fn admin_contains(&self, id: &str) -> Result<bool> {
        self.set_contains("admins", id)
    }

    pub fn admins(&self) -> Result<Vec<String>> {
        self.set_list("admins")
    }

    pub fn admins_empty(&self) -> Result<bool> {
        Ok(self.count("admins")? == 0)
    }

    pub fn blacklist_add(&self, id: &str) -> Result<bool> {
        self.set_add("blacklist", id)
    }

    pub fn blacklist_remove(&self, id: &str) -> Result<bool> {
        self.set_remove("blacklist", id)
    }

    pub fn blacklist_contains(&self, id: &str) -> Result<bool> {
        self.set_contains("blacklist", id)
    }

    pub fn blacklist(&self) -> Result<Vec<String>> {
        self.set_list("blacklist")
    }

    pub fn peer_add(&self, id: &str) -> Result<bool> {
        self.with(|c| {
            let n = c.execute(
                "INSERT OR IGNORE INTO peers(id, last_seen) VALUES(?1, NULL)",
                [id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn peer_remove(&self, id: &str) -> Result<bool> {
        self.set_remove("peers", id)
    }

    pub fn peer_contains(&self, id: &str) -> Result<bool> {
        self.set_contains("peers", id)
    }

    pub fn peers(&self) -> Result<Vec<String>> {
        self.set_list("peers")
    }

    pub fn peer_touch(&self, id: &str, ts: i64) -> Result<()> {
        self.with(|c| {
            c.execute(
                "UPDATE peers SET last_seen = ?2 WHERE id = ?1",
                params![id, ts],
            )?;
            Ok(())
        })
    }

    fn set_add(&self, table: &str, id: &str) -> Result<bool> {
        self.with(|c| {
            let n = c.execute(
                &format!("INSERT OR IGNORE INTO {table}(id) VALUES(?1)"),
                [id],
            )?;
            Ok(n > 0)
        })
    }

    fn set_remove(&self, table: &str, id: &str) -> Result<bool> {
        self.with(|c| {
            let n = c.execute(&format!("DELETE FROM {table} WHERE id = ?1"), [id])?;
            Ok(n > 0)
        })
    }

    fn set_contains(&self, table: &str, id: &str) -> Result<bool> {
        self.with(|c| {
            let n: i64 = c.query_row(
                &format!("SELECT COUNT(1) FROM {table} WHERE id = ?1"),
                [id],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    fn set_list(&self, table: &str) -> Result<Vec<String>> {
        self.with(|c| {
            let mut stmt = c.prepare(&format!("SELECT id FROM {table} ORDER BY id"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn count(&self, table: &str) -> Result<i64> {
        self.with(|c| {
            let n: i64 =
                c.query_row(&format!("SELECT COUNT(1) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n)
        })
    }

    // ---- replication UID sets ----

    /// Record that a transfer has been seen. Idempotent.
    pub fn seen_uid_add(&self, uid: &str, ts: i64) -> Result<()> {
        self.with(|c| {
            c.execute(
                "INSERT OR IGNORE INTO seen_uids(uid, ts) VALUES(?1, ?2)",
                params![uid, ts],
            )?;
            Ok(())
        })
    }

    /// Record that a transfer body has been applied. Idempotent.
    pub fn applied_uid_add(&self, uid: &str, ts: i64) -> Result<()> {
        self.with(|c| {
            c.execute(
                "INSERT OR IGNORE INTO applied_uids(uid, ts) VALUES(?1, ?2)",
                params![uid, ts],
            )?;
            Ok(())
        })
    }

    pub fn applied_uid_contains(&self, uid: &str) -> Result<bool> {
        self.with(|c| {
            let n: i64 = c.query_row(
                "SELECT COUNT(1) FROM applied_uids WHERE uid = ?1",
                [uid],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn seen_uid_count(&self) -> Result<i64> {
        self.count("seen_uids")
    }

    pub fn applied_uid_count(&self) -> Result<i64> {
        self.count("applied_uids")
    }

    // ---- reassembly buffers ----

    /// Create the buffer for a transfer header. Idempotent: a duplicate
    /// header leaves the existing buffer untouched.
    pub fn rxparts_begin(&self, uid: &str, total: u32, from_id: &str, ts: i64) -> Result<()> {
        self.with(|c| {
            c.execute(
                "INSERT OR IGNORE INTO rxparts(uid, total, got, data, from_id, created_ts)
                 VALUES(?1, ?2, 0, '', ?3, ?4)",
                params![uid, total, from_id, ts],
            )?;
            Ok(())
        })
    }

    /// Append a chunk in arrival order and refresh `total` from the frame.
    /// Returns false when no buffer exists (header was lost).
    pub fn rxparts_append(&self, uid: &str, chunk: &str, total: u32) -> Result<bool> {
        self.with(|c| {
            let n = c.execute(
                "UPDATE rxparts SET data = data || ?2, got = got + 1, total = ?3
                 WHERE uid = ?1",
                params![uid, chunk, total],
            )?;
            Ok(n > 0)
        })
    }

    pub fn rxparts_get(&self, uid: &str) -> Result<Option<RxParts>> {
        self.with(|c| {
            c.query_row(
                "SELECT uid, total, got, data, from_id, created_ts
                 FROM rxparts WHERE uid = ?1",
                [uid],
                |row| {
                    Ok(RxParts {
                        uid: row.get(0)?,
                        total: row.get(1)?,
                        got: row.get(2)?,
                        data: row.get(3)?,
                        from_id: row.get(4)?,
                        created_ts: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    pub fn rxparts_delete(&self, uid: &str) -> Result<()> {
        self.with(|c| {
            c.execute("DELETE FROM rxparts WHERE uid = ?1", [uid])?;
            Ok(())
        })
    }

    /// Drop incomplete buffers created before `cutoff_ts`. Returns how many.
    pub fn rxparts_gc(&self, cutoff_ts: i64) -> Result<usize> {
        self.with(|c| {
            let n = c.execute("DELETE FROM rxparts WHERE created_ts < ?1", [cutoff_ts])?;
            Ok(n)
        })
    }

    pub fn rxparts_count(&self) -> Result<i64> {
        self.count("rxparts")
    }

    // ---- DM queue ----

    pub fn dm_enqueue(&self, to_id: &str, body: &str, ts: i64) -> Result<i64> {
        self.with(|c| {
            c.execute(
                "INSERT INTO dm_out(to_id, body, created_ts, delivered_ts)
                 VALUES(?1, ?2, ?3, NULL)",
                params![to_id, body, ts],
            )?;
            Ok(c.last_insert_rowid())
        })
    }

    /// Undelivered rows for one destination, oldest first.
    pub fn dm_pending_for(&self, to_id: &str, limit: usize) -> Result<Vec<QueuedDm>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, to_id, body, created_ts, delivered_ts FROM dm_out
                 WHERE to_id = ?1 AND delivered_ts IS NULL ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![to_id, limit as i64], row_to_dm)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All undelivered rows, oldest first, for the admin queue listing.
    pub fn dm_pending_all(&self, limit: usize) -> Result<Vec<QueuedDm>> {
        self.with(|c| {
            let mut stmt = c.prepare(
                "SELECT id, to_id, body, created_ts, delivered_ts FROM dm_out
                 WHERE delivered_ts IS NULL ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit as i64], row_to_dm)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark a row delivered. Never unmarks: delivered rows are final.
    pub fn dm_mark_delivered(&self, id: i64, ts: i64) -> Result<()> {
        self.with(|c| {
            c.execute(
                "UPDATE dm_out SET delivered_ts = ?2
                 WHERE id = ?1 AND delivered_ts IS NULL",
                params![id, ts],
            )?;
            Ok(())
        })
    }

    /// Drop undelivered rows older than `cutoff_ts`. Returns how many.
    pub fn dm_expire(&self, cutoff_ts: i64) -> Result<usize> {
        self.with(|c| {
            let n = c.execute(
                "DELETE FROM dm_out WHERE delivered_ts IS NULL AND created_ts < ?1",
                [cutoff_ts],
            )?;
            Ok(n)
        })
    }

    pub fn dm_delete(&self, id: i64) -> Result<bool> {
        self.with(|c| {
            let n = c.execute("DELETE FROM dm_out WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn dm_pending_count(&self) -> Result<i64> {
        self.with(|c| {
            let n: i64 = c.query_row(
                "SELECT COUNT(1) FROM dm_out WHERE delivered_ts IS NULL",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        })
    }
}

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        ts: row.get(1)?,
        author: row.get(2)?,
        body: row.get(3)?,
        reply_to: row.get(4)?,
    })
}

fn row_to_dm(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedDm> {
    Ok(QueuedDm {
        id: row.get(0)?,
        to_id: row.get(1)?,
        body: row.get(2)?,
        created_ts: row.get(3)?,
        delivered_ts: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_memory().expect("open in-memory store")
    }

    #[test]
    fn post_ids_are_strictly_increasing() {
        let s = store();
        let a = s.create_post(100, "!aaaaaaaa", "first", None).unwrap();
        let b = s.create_post(101, "!aaaaaaaa", "second", None).unwrap();
        assert!(b > a);
        assert_eq!(s.post(a).unwrap().unwrap().body, "first");
    }

    #[test]
    fn recent_posts_excludes_replies_and_orders_desc() {
        let s = store();
        let root = s.create_post(100, "!aaaaaaaa", "root", None).unwrap();
        s.create_post(101, "!bbbbbbbb", "reply", Some(root)).unwrap();
        let other = s.create_post(102, "!aaaaaaaa", "later", None).unwrap();
        let recent = s.recent_posts(10).unwrap();
        assert_eq!(
            recent.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![other, root]
        );
        let replies = s.replies_to(root).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].body, "reply");
    }

    #[test]
    fn recent_post_ids_ascending_window() {
        let s = store();
        for i in 0..5 {
            s.create_post(100 + i, "!aaaaaaaa", "x", None).unwrap();
        }
        assert_eq!(s.recent_post_ids(3).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn kv_upserts() {
        let s = store();
        assert_eq!(s.kv_get("notice").unwrap(), None);
        s.kv_set("notice", "hello").unwrap();
        s.kv_set("notice", "hello again").unwrap();
        assert_eq!(s.kv_get("notice").unwrap().as_deref(), Some("hello again"));
        s.kv_delete("notice").unwrap();
        assert_eq!(s.kv_get("notice").unwrap(), None);
    }

    #[test]
    fn admin_set_is_idempotent() {
        let s = store();
        assert!(s.admins_empty().unwrap());
        assert!(s.admin_add("!a1b2c3d4").unwrap());
        assert!(!s.admin_add("!a1b2c3d4").unwrap());
        assert!(s.admin_contains("!a1b2c3d4").unwrap());
        assert!(s.admin_remove("!a1b2c3d4").unwrap());
        assert!(!s.admin_remove("!a1b2c3d4").unwrap());
        assert!(s.admins_empty().unwrap());
    }

    #[test]
    fn peer_touch_updates_last_seen() {
        let s = store();
        s.peer_add("!deadbeef").unwrap();
        s.peer_touch("!deadbeef", 1234).unwrap();
        assert!(s.peer_contains("!deadbeef").unwrap());
        assert_eq!(s.peers().unwrap(), vec!["!deadbeef".to_string()]);
    }

    #[test]
    fn applied_uid_gates_reapplication() {
        let s = store();
        assert!(!s.applied_uid_contains("abc123defg").unwrap());
        s.applied_uid_add("abc123defg", 100).unwrap();
        s.applied_uid_add("abc123defg", 200).unwrap();
        assert!(s.applied_uid_contains("abc123defg").unwrap());
        assert_eq!(s.applied_uid_count().unwrap(), 1);
    }

    #[test]
    fn rxparts_accumulates_in_arrival_order() {
        let s = store();
        s.rxparts_begin("uid0000001", 2, "!deadbeef", 100).unwrap();
        // duplicate header is ignored
        s.rxparts_begin("uid0000001", 9, "!deadbeef", 100).unwrap();
        assert!(s.rxparts_append("uid0000001", "hello ", 2).unwrap());
        assert!(s.rxparts_append("uid0000001", "world", 2).unwrap());
        let rx = s.rxparts_get("uid0000001").unwrap().unwrap();
        assert_eq!(rx.data, "hello world");
        assert_eq!(rx.got, 2);
        assert_eq!(rx.total, 2);
        s.rxparts_delete("uid0000001").unwrap();
        assert!(s.rxparts_get("uid0000001").unwrap().is_none());
    }

    #[test]
    fn rxparts_append_without_header_is_rejected() {
        let s = store();
        assert!(!s.rxparts_append("nosuchuid0", "chunk", 1).unwrap());
    }

    #[test]
    fn rxparts_gc_drops_stale_buffers() {
        let s = store();
        s.rxparts_begin("olduid0000", 3, "!deadbeef", 100).unwrap();
        s.rxparts_begin("newuid0000", 3, "!deadbeef", 900).unwrap();
        assert_eq!(s.rxparts_gc(500).unwrap(), 1);
        assert!(s.rxparts_get("olduid0000").unwrap().is_none());
        assert!(s.rxparts_get("newuid0000").unwrap().is_some());
    }

    #[test]
    fn dm_queue_lifecycle() {
        let s = store();
        let id = s.dm_enqueue("!deadbeef", "hello", 100).unwrap();
        assert_eq!(s.dm_pending_count().unwrap(), 1);
        let pending = s.dm_pending_for("!deadbeef", 3).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "hello");
        s.dm_mark_delivered(id, 200).unwrap();
        assert!(s.dm_pending_for("!deadbeef", 3).unwrap().is_empty());
        // delivered rows never come back
        s.dm_mark_delivered(id, 999).unwrap();
        assert_eq!(s.dm_pending_count().unwrap(), 0);
    }

    #[test]
    fn dm_pending_respects_batch_limit_and_order() {
        let s = store();
        for i in 0..5 {
            s.dm_enqueue("!deadbeef", &format!("m{i}"), 100 + i).unwrap();
        }
        let batch = s.dm_pending_for("!deadbeef", 3).unwrap();
        assert_eq!(
            batch.iter().map(|d| d.body.as_str()).collect::<Vec<_>>(),
            vec!["m0", "m1", "m2"]
        );
    }

    #[test]
    fn dm_expire_only_touches_undelivered() {
        let s = store();
        let old = s.dm_enqueue("!deadbeef", "old", 100).unwrap();
        let done = s.dm_enqueue("!deadbeef", "done", 100).unwrap();
        s.dm_mark_delivered(done, 150).unwrap();
        assert_eq!(s.dm_expire(500).unwrap(), 1);
        assert!(s.dm_pending_for("!deadbeef", 10).unwrap().is_empty());
        let _ = old;
    }
}
