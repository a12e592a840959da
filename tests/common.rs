//! Test fixtures: an in-process fake link and a gateway builder.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use meshmini::bbs::Gateway;
use meshmini::config::Config;
use meshmini::link::{LinkAdapter, NodeEntry, NodeInfo, NodeKey, RawPacket};
use meshmini::storage::Store;

/// Link stand-in: records sends, serves a mutable node directory, counts
/// reopens.
pub struct FakeLink {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub nodes: Arc<Mutex<Vec<NodeEntry>>>,
    pub me: Option<NodeInfo>,
    pub reopens: Arc<AtomicUsize>,
}

impl LinkAdapter for FakeLink {
    fn send(&self, dest: &str, text: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((dest.to_string(), text.to_string()));
    }

    fn nodes(&self) -> Vec<NodeEntry> {
        self.nodes.lock().unwrap().clone()
    }

    fn my_node(&self) -> Option<NodeInfo> {
        self.me.clone()
    }

    fn reopen(&mut self) -> anyhow::Result<()> {
        self.reopens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {}
}

/// A gateway wired to an in-memory store and a [`FakeLink`], with handles
/// to everything a test wants to poke.
pub struct Fixture {
    pub gateway: Gateway,
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub nodes: Arc<Mutex<Vec<NodeEntry>>>,
    pub reopens: Arc<AtomicUsize>,
    pub store: Arc<Store>,
}

impl Fixture {
    /// Frames sent so far, draining the record.
    pub fn take_sent(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Add a directory entry keyed by integer node number.
    pub fn add_node(&self, num: u32, short: &str, long: &str, last_heard: Option<u64>) {
        self.nodes.lock().unwrap().push(NodeEntry {
            key: NodeKey::Num(num),
            long_name: Some(long.to_string()),
            short_name: Some(short.to_string()),
            last_heard,
        });
    }
}

static PACKET_ID: AtomicU32 = AtomicU32::new(1);

/// A text packet from `from`, with a unique packet id so dedup stays out of
/// the way unless a test reuses ids on purpose.
pub fn packet(from: u32, text: &str) -> RawPacket {
    RawPacket {
        from: Some(from),
        from_id: None,
        id: Some(PACKET_ID.fetch_add(1, Ordering::SeqCst)),
        rx_time: None,
        text: Some(text.to_string()),
        payload: None,
    }
}

/// Build a gateway; the closure customizes the config before construction.
/// The default test config disables the rate limiter so scripted command
/// sequences run unimpeded.
pub fn gateway_with(tweak: impl FnOnce(&mut Config)) -> Fixture {
    let mut config = Config::default();
    config.board.rate_secs = 0;
    tweak(&mut config);

    let sent = Arc::new(Mutex::new(Vec::new()));
    let nodes = Arc::new(Mutex::new(Vec::new()));
    let reopens = Arc::new(AtomicUsize::new(0));
    let link = FakeLink {
        sent: Arc::clone(&sent),
        nodes: Arc::clone(&nodes),
        me: Some(NodeInfo {
            id: "!00000001".to_string(),
            long_name: "Gateway Node".to_string(),
            short_name: "GW".to_string(),
        }),
        reopens: Arc::clone(&reopens),
    };
    let store = Store::open_memory().expect("in-memory store");
    let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let gateway = Gateway::new(config, store, Box::new(link), rx).expect("gateway");
    let store = gateway.store();
    Fixture {
        gateway,
        sent,
        nodes,
        reopens,
        store,
    }
}

pub fn gateway() -> Fixture {
    gateway_with(|_| {})
}
