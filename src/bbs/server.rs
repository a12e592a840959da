//! # Gateway - Core Controller
//!
//! The [`Gateway`] owns the link, the store, and all in-memory session
//! state, and drives three concerns concurrently from one `tokio::select!`
//! loop: the inbound packet pipeline, the periodic sync ticker, and the RX
//! watchdog. Handlers never hold store locks across a send, and the link
//! serializes outbound frames with the configured TX gap.
//!
//! Per-packet pipeline, in contract order:
//!
//! 1. update the last-RX clock and canonicalize the sender
//! 2. dual-path dedup
//! 3. flush queued DMs for the sender (before any drop decision, so a node
//!    recovering from an outage drains even when blacklisted or limited)
//! 4. `#SYNC` frames go to the replication engine (peer-gated there)
//! 5. blacklist: silent drop
//! 6. bypass commands run; everything else passes the rate limiter
//! 7. dispatch, page, send

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::commands::{self, CommandContext};
use super::dmqueue;
use super::intake::{self, DedupFifo};
use super::limiter::{self, RateLimiter};
use super::sync::{SyncEngine, SENTINEL};
use crate::config::Config;
use crate::link::{LinkAdapter, RawPacket};
use crate::logutil::escape_log;
use crate::storage::Store;

/// Dual-path dedup window.
const DEDUP_CAPACITY: usize = 256;

pub struct Gateway {
    config: Config,
    store: Arc<Store>,
    link: Box<dyn LinkAdapter>,
    packets: mpsc::UnboundedReceiver<RawPacket>,
    dedup: DedupFifo,
    limiter: RateLimiter,
    engine: SyncEngine,
    sync_enabled: Arc<AtomicBool>,
    last_rx: Option<Instant>,
    started: Instant,
}

impl Gateway {
    pub fn new(
        config: Config,
        store: Store,
        link: Box<dyn LinkAdapter>,
        packets: mpsc::UnboundedReceiver<RawPacket>,
    ) -> Result<Self> {
        // Seed configured admins and peers; both idempotent.
        for id in &config.board.admins {
            match intake::normalize_id(id) {
                Some(id) => {
                    store.admin_add(&id)?;
                }
                None => warn!("ignoring malformed admin id '{}' in config", id),
            }
        }
        for id in &config.sync.peers {
            match intake::normalize_id(id) {
                Some(id) => {
                    store.peer_add(&id)?;
                }
                None => warn!("ignoring malformed peer id '{}' in config", id),
            }
        }
        if store.admins_empty()? {
            warn!("admin set is empty: bootstrap mode treats every sender as admin");
        }

        let engine = SyncEngine::new(config.sync.inventory, config.sync.chunk);
        let sync_enabled = Arc::new(AtomicBool::new(config.sync.enabled));
        let limiter = RateLimiter::new(Duration::from_secs(config.board.rate_secs));
        Ok(Gateway {
            config,
            store: Arc::new(store),
            link,
            packets,
            dedup: DedupFifo::new(DEDUP_CAPACITY),
            limiter,
            engine,
            sync_enabled,
            last_rx: None,
            started: Instant::now(),
        })
    }

    /// Shared sync flag, for tests and health reporting.
    pub fn sync_enabled(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.sync_enabled)
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    fn now_ts(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Process one inbound packet through the full pipeline.
    pub fn handle_packet(&mut self, pkt: RawPacket) {
        self.last_rx = Some(Instant::now());

        let Some(sender) = intake::packet_sender(&pkt) else {
            debug!("packet without usable sender, dropped");
            return;
        };
        let Some(text) = intake::packet_text(&pkt) else {
            return;
        };
        if let Some(fp) = intake::packet_fp(&pkt, &sender) {
            if self.dedup.check_and_insert(fp) {
                debug!("duplicate delivery from {}, skipped", sender);
                return;
            }
        }
        let now = self.now_ts();

        // Sighting: drain queued DMs before anything can drop this sender.
        match dmqueue::flush_for(
            &self.store,
            self.link.as_ref(),
            &sender,
            self.config.dm.ttl_hours,
            self.config.board.max_text,
            now,
        ) {
            Ok(n) if n > 0 => info!("flushed {} queued DMs to {}", n, sender),
            Ok(_) => {}
            Err(e) => warn!("dm flush for {} failed: {}", sender, e),
        }

        if text.starts_with(SENTINEL) {
            match self.engine.handle_frame(&self.store, &sender, &text, now) {
                Ok(out) => self.send_all(out),
                Err(e) => warn!("sync frame from {} failed: {}", sender, e),
            }
            return;
        }

        if limiter::is_blacklisted(&self.store, &sender) {
            debug!("dropping frame from blacklisted {}", sender);
            return;
        }

        let lower = text.trim().to_lowercase();
        if !limiter::is_bypass(&lower) && !self.limiter.allow(&sender) {
            debug!("rate limited {}", sender);
            return;
        }

        debug!("{} -> {}", sender, escape_log(&text));
        let outcome = {
            let ctx = CommandContext {
                store: self.store.as_ref(),
                sender: &sender,
                name: &self.config.board.name,
                mtu: self.config.board.max_text,
                unknown_reply: self.config.board.unknown_reply,
                health_public: self.config.board.health_public,
                nodes: commands::node_views(&self.link.nodes()),
                me: self.link.my_node(),
                device: &self.config.link.device,
                uptime_secs: self.started.elapsed().as_secs(),
                last_rx_age: self.last_rx.map(|t| t.elapsed().as_secs()),
                sync_enabled: &self.sync_enabled,
                now,
            };
            match commands::dispatch(&ctx, &text) {
                Ok(outcome) => outcome,
                Err(e) => {
                    // A failing handler never takes down the data plane.
                    warn!("handler error for '{}' from {}: {}", escape_log(&text), sender, e);
                    return;
                }
            }
        };

        for frame in &outcome.frames {
            self.link.send(&sender, frame);
        }

        if let Some(post) = outcome.new_post {
            if self.sync_enabled.load(Ordering::SeqCst) {
                match self.engine.push_post(&self.store, &post) {
                    Ok(out) => self.send_all(out),
                    Err(e) => warn!("push of post #{} failed: {}", post.id, e),
                }
            }
        }
        if outcome.sync_now {
            self.broadcast_inventory();
        }
    }

    fn send_all(&self, frames: Vec<(String, String)>) {
        for (dest, frame) in frames {
            self.link.send(&dest, &frame);
        }
    }

    fn broadcast_inventory(&self) {
        match self.engine.inventory(&self.store) {
            Ok(out) => {
                if !out.is_empty() {
                    debug!("broadcasting inventory to {} peers", out.len());
                }
                self.send_all(out);
            }
            Err(e) => warn!("inventory failed: {}", e),
        }
    }

    /// Periodic replication housekeeping: inventory broadcast when enabled,
    /// reassembly GC, limiter pruning.
    pub fn sync_tick(&mut self) {
        if self.sync_enabled.load(Ordering::SeqCst) {
            self.broadcast_inventory();
        }
        if let Err(e) = self.engine.gc(&self.store, self.now_ts()) {
            warn!("rxparts gc failed: {}", e);
        }
        self.limiter.prune();
    }

    /// RX watchdog: reconnect the link when the channel has been silent too
    /// long. Never fires before the first packet.
    pub fn watchdog_tick(&mut self) {
        let Some(last_rx) = self.last_rx else {
            return;
        };
        let stale = Duration::from_secs(self.config.watchdog.rx_stale_secs);
        if last_rx.elapsed() <= stale {
            return;
        }
        warn!(
            "no RX for {}s, reconnecting link",
            last_rx.elapsed().as_secs()
        );
        match self.link.reopen() {
            Ok(()) => {
                self.last_rx = Some(Instant::now());
                info!("link reconnected");
            }
            Err(e) => warn!("reconnect failed: {}", e),
        }
    }

    /// Whether the watchdog considers the link stale. Exposed for tests.
    pub fn rx_stale(&self) -> bool {
        self.last_rx
            .map(|t| t.elapsed() > Duration::from_secs(self.config.watchdog.rx_stale_secs))
            .unwrap_or(false)
    }

    /// Main loop: runs until ctrl-c, then closes the link last.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "gateway '{}' up, device {}, mtu {}",
            self.config.board.name, self.config.link.device, self.config.board.max_text
        );

        let mut sync_timer =
            tokio::time::interval(Duration::from_secs(self.config.sync.period_secs.max(1)));
        sync_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First interval tick fires immediately; skip it so startup stays quiet.
        sync_timer.tick().await;

        let mut watchdog_timer =
            tokio::time::interval(Duration::from_secs(self.config.watchdog.tick_secs));
        watchdog_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        watchdog_timer.tick().await;

        loop {
            tokio::select! {
                pkt = self.packets.recv() => {
                    match pkt {
                        Some(pkt) => self.handle_packet(pkt),
                        None => {
                            warn!("packet channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = sync_timer.tick() => self.sync_tick(),
                _ = watchdog_timer.tick() => self.watchdog_tick(),
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.link.close();
        info!("gateway stopped");
        Ok(())
    }
}
