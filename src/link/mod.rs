//! # Link - Radio Link Adapter
//!
//! Communication with the attached radio node over a serial connection. The
//! node side runs the stock text bridge, which emits one JSON object per line
//! for every received packet, node-directory update, and own-node record, and
//! accepts `{"type":"send",...}` lines for transmission.
//!
//! The gateway core only sees the [`LinkAdapter`] trait: best-effort
//! `send`, a snapshot of the node directory, the radio's own identity, and
//! `reopen` for the watchdog. Received packets arrive on a channel handed out
//! by [`SerialLink::open`]; the reader merges the bridge's event stream and
//! its raw text fallback path onto that one channel, so the same packet can
//! be delivered twice and intake deduplicates downstream.
//!
//! Sends are serialized by a writer thread that enforces the configured
//! minimum inter-transmit gap. A failed send is logged and the frame dropped;
//! there is no delivery guarantee on a mesh text channel.

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::LinkConfig;
use crate::logutil::escape_log;

/// Destination token for channel-wide frames.
pub const BROADCAST: &str = "^all";

/// One inbound packet as the transport delivered it. Fields mirror the
/// bridge records: either `from` (integer node number) or `from_id`
/// (`!hex` string) identifies the sender, and text may arrive decoded or as
/// raw payload bytes. Canonicalization happens in intake, not here.
#[derive(Debug, Clone, Default)]
pub struct RawPacket {
    pub from: Option<u32>,
    pub from_id: Option<String>,
    pub id: Option<u32>,
    pub rx_time: Option<u64>,
    pub text: Option<String>,
    pub payload: Option<Vec<u8>>,
}

/// Node directory keys come in every shape the radio firmware uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKey {
    Num(u32),
    Hex(String),
    Bang(String),
}

/// One node directory entry, surfaced verbatim for helpers to canonicalize.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub key: NodeKey,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub last_heard: Option<u64>,
}

/// The radio's own identity.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
}

/// Contract between the gateway core and the transport.
pub trait LinkAdapter: Send {
    /// Best-effort send. Errors are logged inside the adapter; the frame is
    /// simply dropped on failure.
    fn send(&self, dest: &str, text: &str);
    /// Snapshot of the radio's node directory.
    fn nodes(&self) -> Vec<NodeEntry>;
    /// The radio's own identity, once known.
    fn my_node(&self) -> Option<NodeInfo>;
    /// Close and re-open the transport (watchdog recovery path).
    fn reopen(&mut self) -> Result<()>;
    /// Close the transport for shutdown.
    fn close(&mut self);
}

// ---- bridge wire records ----

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BridgeEvent {
    Packet(BridgePacket),
    Node(BridgeNode),
    MyInfo(BridgeMyInfo),
}

#[derive(Debug, Deserialize)]
struct BridgePacket {
    from: Option<u32>,
    #[serde(rename = "fromId")]
    from_id: Option<String>,
    id: Option<u32>,
    #[serde(rename = "rxTime")]
    rx_time: Option<u64>,
    text: Option<String>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct BridgeNode {
    key: serde_json::Value,
    #[serde(rename = "longName")]
    long_name: Option<String>,
    #[serde(rename = "shortName")]
    short_name: Option<String>,
    #[serde(rename = "lastHeard")]
    last_heard: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BridgeMyInfo {
    id: String,
    #[serde(rename = "longName", default)]
    long_name: String,
    #[serde(rename = "shortName", default)]
    short_name: String,
}

fn node_key_from_value(v: &serde_json::Value) -> Option<NodeKey> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().map(|n| NodeKey::Num(n as u32)),
        serde_json::Value::String(s) if s.starts_with('!') => {
            Some(NodeKey::Bang(s.clone()))
        }
        serde_json::Value::String(s) => Some(NodeKey::Hex(s.clone())),
        _ => None,
    }
}

// ---- serial implementation ----

/// Candidate serial devices for `device = "auto"`, in probe order:
/// stable by-id symlinks first, then ACM, then USB.
pub fn serial_candidates() -> Vec<String> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/dev/serial/by-id") {
        let mut byid: Vec<String> = entries
            .flatten()
            .map(|e| e.path().display().to_string())
            .collect();
        byid.sort();
        out.extend(byid);
    }
    if let Ok(entries) = std::fs::read_dir("/dev") {
        let mut acm = Vec::new();
        let mut usb = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("ttyACM") {
                acm.push(format!("/dev/{name}"));
            } else if name.starts_with("ttyUSB") {
                usb.push(format!("/dev/{name}"));
            }
        }
        acm.sort();
        usb.sort();
        out.extend(acm);
        out.extend(usb);
    }
    out
}

struct LinkShared {
    nodes: Mutex<std::collections::HashMap<String, NodeEntry>>,
    my_node: Mutex<Option<NodeInfo>>,
    stop: AtomicBool,
}

/// Serial transport speaking the node's JSON line bridge.
pub struct SerialLink {
    device: String,
    config: LinkConfig,
    shared: Arc<LinkShared>,
    packet_tx: mpsc::UnboundedSender<RawPacket>,
    outbound_tx: Option<std_mpsc::Sender<(String, String)>>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl SerialLink {
    /// Open the configured device (probing when `auto`) and return the link
    /// plus the inbound packet stream. Fails only when no candidate opens.
    pub fn open(config: &LinkConfig) -> Result<(Self, mpsc::UnboundedReceiver<RawPacket>)> {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let mut link = SerialLink {
            device: config.device.clone(),
            config: config.clone(),
            shared: Arc::new(LinkShared {
                nodes: Mutex::new(std::collections::HashMap::new()),
                my_node: Mutex::new(None),
                stop: AtomicBool::new(false),
            }),
            packet_tx,
            outbound_tx: None,
            threads: Vec::new(),
        };
        link.connect()?;
        Ok((link, packet_rx))
    }

    fn connect(&mut self) -> Result<()> {
        let mut wants = Vec::new();
        let want = self.config.device.trim();
        if !want.is_empty() && !want.eq_ignore_ascii_case("auto") {
            wants.push(want.to_string());
        }
        wants.extend(serial_candidates());

        let mut last_err: Option<anyhow::Error> = None;
        for candidate in &wants {
            match self.open_port(candidate) {
                Ok(()) => {
                    info!("link connected on {}", candidate);
                    self.device = candidate.clone();
                    return Ok(());
                }
                Err(e) => {
                    debug!("candidate {} failed: {}", candidate, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no serial candidates found")))
    }

    fn open_port(&mut self, path: &str) -> Result<()> {
        let mut builder = serialport::new(path, 115_200).timeout(Duration::from_millis(500));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("failed to open serial port {}: {}", path, e))?;
        // ESP32-class boards want DTR/RTS asserted before they talk.
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);

        let reader_port = port
            .try_clone()
            .map_err(|e| anyhow!("failed to clone serial port {}: {}", path, e))?;

        self.shared.stop.store(false, Ordering::SeqCst);

        // Reader thread: one JSON object per line from the bridge.
        let shared = self.shared.clone();
        let packet_tx = self.packet_tx.clone();
        let reader = thread::spawn(move || {
            let mut lines = BufReader::new(reader_port);
            let mut buf = String::new();
            while !shared.stop.load(Ordering::SeqCst) {
                buf.clear();
                match lines.read_line(&mut buf) {
                    Ok(0) => thread::sleep(Duration::from_millis(50)),
                    Ok(_) => handle_bridge_line(&shared, &packet_tx, buf.trim()),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => {
                        debug!("serial read error: {}", e);
                        thread::sleep(Duration::from_millis(200));
                    }
                }
            }
        });

        // Writer thread: serializes sends and enforces the TX gap.
        let (outbound_tx, outbound_rx) = std_mpsc::channel::<(String, String)>();
        let shared = self.shared.clone();
        let gap = Duration::from_secs_f64(self.config.tx_gap_secs.max(0.0));
        let writer = thread::spawn(move || {
            let mut port = port;
            while !shared.stop.load(Ordering::SeqCst) {
                let (dest, text) = match outbound_rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(pair) => pair,
                    Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
                };
                let frame = serde_json::json!({"type": "send", "to": dest, "text": text});
                let mut line = frame.to_string();
                line.push('\n');
                if let Err(e) = port.write_all(line.as_bytes()).and_then(|_| port.flush()) {
                    warn!("send failed, dropping frame to {}: {}", dest, e);
                }
                thread::sleep(gap);
            }
        });

        self.outbound_tx = Some(outbound_tx);
        self.threads.push(reader);
        self.threads.push(writer);
        Ok(())
    }

    fn stop_threads(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.outbound_tx = None;
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn handle_bridge_line(
    shared: &Arc<LinkShared>,
    packet_tx: &mpsc::UnboundedSender<RawPacket>,
    line: &str,
) {
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<BridgeEvent>(line) {
        Ok(BridgeEvent::Packet(p)) => {
            let _ = packet_tx.send(RawPacket {
                from: p.from,
                from_id: p.from_id,
                id: p.id,
                rx_time: p.rx_time,
                text: p.text,
                payload: p.payload,
            });
        }
        Ok(BridgeEvent::Node(n)) => {
            if let Some(key) = node_key_from_value(&n.key) {
                let dir_key = format!("{key:?}");
                if let Ok(mut nodes) = shared.nodes.lock() {
                    nodes.insert(
                        dir_key,
                        NodeEntry {
                            key,
                            long_name: n.long_name,
                            short_name: n.short_name,
                            last_heard: n.last_heard,
                        },
                    );
                }
            }
        }
        Ok(BridgeEvent::MyInfo(mi)) => {
            if let Ok(mut me) = shared.my_node.lock() {
                *me = Some(NodeInfo {
                    id: mi.id,
                    long_name: mi.long_name,
                    short_name: mi.short_name,
                });
            }
        }
        Err(e) => {
            debug!("unparseable bridge line '{}': {}", escape_log(line), e);
        }
    }
}

impl LinkAdapter for SerialLink {
    fn send(&self, dest: &str, text: &str) {
        match &self.outbound_tx {
            Some(tx) => {
                if tx.send((dest.to_string(), text.to_string())).is_err() {
                    warn!("writer gone, dropping frame to {}", dest);
                }
            }
            None => warn!("link closed, dropping frame to {}", dest),
        }
    }

    fn nodes(&self) -> Vec<NodeEntry> {
        self.shared
            .nodes
            .lock()
            .map(|n| n.values().cloned().collect())
            .unwrap_or_default()
    }

    fn my_node(&self) -> Option<NodeInfo> {
        self.shared.my_node.lock().ok().and_then(|m| m.clone())
    }

    fn reopen(&mut self) -> Result<()> {
        info!("reopening link on {}", self.device);
        self.stop_threads();
        thread::sleep(Duration::from_millis(500));
        self.connect()
    }

    fn close(&mut self) {
        self.stop_threads();
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.close();
    }
}
