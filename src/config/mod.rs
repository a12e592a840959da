//! # Configuration
//!
//! MeshMini reads a TOML configuration file and then applies `MMB_*`
//! environment overrides, so a deployment can be tuned either way. Every
//! option has a default chosen for a stock Meshtastic text channel, and the
//! whole file can be regenerated with `meshmini init`.
//!
//! Precedence: environment > config file > defaults.
//!
//! ```toml
//! [board]
//! name = "MeshLink BBS"
//! admins = ["!a1b2c3d4"]
//! max_text = 140
//!
//! [link]
//! device = "auto"
//!
//! [sync]
//! peers = ["!deadbeef"]
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tokio::fs;

/// Board-facing settings: display name, authorization seeds, reply shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Display name used in the menu and health report.
    #[serde(default = "default_name")]
    pub name: String,
    /// Node ids granted admin on first start. While the admin set is empty
    /// every sender is treated as admin (bootstrap mode).
    #[serde(default)]
    pub admins: Vec<String>,
    /// Per-sender cooldown between processed commands, seconds.
    #[serde(default = "default_rate_secs")]
    pub rate_secs: u64,
    /// Maximum payload length of one outbound frame.
    #[serde(default = "default_max_text")]
    pub max_text: usize,
    /// Reply to unrecognized commands. When false, unknown text is dropped.
    #[serde(default = "default_true")]
    pub unknown_reply: bool,
    /// Allow `health` without admin rights.
    #[serde(default)]
    pub health_public: bool,
    /// Timezone used when formatting notice and post timestamps.
    #[serde(default = "default_tz")]
    pub tz: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path.
    #[serde(default = "default_db")]
    pub db: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path, or `auto` to probe the usual candidates.
    #[serde(default = "default_device")]
    pub device: String,
    /// Minimum seconds between transmissions (duty-cycle guard).
    #[serde(default = "default_tx_gap")]
    pub tx_gap_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Enable peer replication at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Peer gateway node ids seeded into the store on first start.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Inventory window: how many recent post ids to advertise.
    #[serde(default = "default_sync_inv")]
    pub inventory: usize,
    /// Seconds between inventory broadcasts.
    #[serde(default = "default_sync_period")]
    pub period_secs: u64,
    /// Maximum chunk size in a PART frame, bytes.
    #[serde(default = "default_sync_chunk")]
    pub chunk: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Reconnect when this many seconds pass without a received packet.
    #[serde(default = "default_rx_stale")]
    pub rx_stale_secs: u64,
    /// Watchdog poll interval, seconds.
    #[serde(default = "default_watch_tick")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmConfig {
    /// Undelivered queued DMs older than this many hours are expired.
    #[serde(default = "default_dm_ttl")]
    pub ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub dm: DmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_name() -> String {
    "MeshLink BBS".to_string()
}
fn default_rate_secs() -> u64 {
    2
}
fn default_max_text() -> usize {
    140
}
fn default_true() -> bool {
    true
}
fn default_tz() -> String {
    "Pacific/Auckland".to_string()
}
fn default_db() -> String {
    "board.db".to_string()
}
fn default_device() -> String {
    "auto".to_string()
}
fn default_tx_gap() -> f64 {
    1.0
}
fn default_sync_inv() -> usize {
    15
}
fn default_sync_period() -> u64 {
    300
}
fn default_sync_chunk() -> usize {
    160
}
fn default_rx_stale() -> u64 {
    240
}
fn default_watch_tick() -> u64 {
    10
}
fn default_dm_ttl() -> u64 {
    72
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            admins: Vec::new(),
            rate_secs: default_rate_secs(),
            max_text: default_max_text(),
            unknown_reply: true,
            health_public: false,
            tz: default_tz(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db: default_db() }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            tx_gap_secs: default_tx_gap(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            peers: Vec::new(),
            inventory: default_sync_inv(),
            period_secs: default_sync_period(),
            chunk: default_sync_chunk(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            rx_stale_secs: default_rx_stale(),
            tick_secs: default_watch_tick(),
        }
    }
}

impl Default for DmConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_dm_ttl(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            board: BoardConfig::default(),
            storage: StorageConfig::default(),
            link: LinkConfig::default(),
            sync: SyncConfig::default(),
            watchdog: WatchdogConfig::default(),
            dm: DmConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides.
    /// A missing file yields the defaults so a bare `meshmini start` works.
    pub async fn load(path: &str) -> Result<Self> {
        let mut config = match fs::read_to_string(path).await {
            Ok(content) => toml::from_str(&content)
                .map_err(|e| anyhow!("failed to parse config file {}: {}", path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(anyhow!("failed to read config file {}: {}", path, e)),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("failed to serialize default config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Apply `MMB_*` environment overrides. Option names follow the
    /// configuration surface table in the README.
    pub fn apply_env(&mut self) {
        if let Ok(v) = env::var("MMB_DB") {
            self.storage.db = v;
        }
        if let Ok(v) = env::var("MMB_DEVICE") {
            self.link.device = v;
        }
        if let Ok(v) = env::var("MMB_NAME") {
            self.board.name = v;
        }
        if let Ok(v) = env::var("MMB_ADMINS") {
            self.board.admins = csv_ids(&v);
        }
        if let Ok(v) = env::var("MMB_PEERS") {
            self.sync.peers = csv_ids(&v);
        }
        if let Ok(v) = env::var("MMB_RATE") {
            if let Ok(n) = v.parse() {
                self.board.rate_secs = n;
            }
        }
        if let Ok(v) = env::var("MMB_MAX_TEXT") {
            if let Ok(n) = v.parse() {
                self.board.max_text = n;
            }
        }
        if let Ok(v) = env::var("MMB_TX_GAP") {
            if let Ok(n) = v.parse() {
                self.link.tx_gap_secs = n;
            }
        }
        if let Ok(v) = env::var("MMB_HEALTH_PUBLIC") {
            self.board.health_public = v == "1";
        }
        if let Ok(v) = env::var("MMB_UNKNOWN_REPLY") {
            self.board.unknown_reply = v != "0";
        }
        if let Ok(v) = env::var("MMB_SYNC") {
            self.sync.enabled = v != "0";
        }
        if let Ok(v) = env::var("MMB_SYNC_INV") {
            if let Ok(n) = v.parse() {
                self.sync.inventory = n;
            }
        }
        if let Ok(v) = env::var("MMB_SYNC_PERIOD") {
            if let Ok(n) = v.parse() {
                self.sync.period_secs = n;
            }
        }
        if let Ok(v) = env::var("MMB_SYNC_CHUNK") {
            if let Ok(n) = v.parse() {
                self.sync.chunk = n;
            }
        }
        if let Ok(v) = env::var("MMB_RX_STALE_SEC") {
            if let Ok(n) = v.parse() {
                self.watchdog.rx_stale_secs = n;
            }
        }
        if let Ok(v) = env::var("MMB_WATCH_TICK") {
            if let Ok(n) = v.parse() {
                self.watchdog.tick_secs = n;
            }
        }
        if let Ok(v) = env::var("MMB_SF_TTL_HOURS") {
            if let Ok(n) = v.parse() {
                self.dm.ttl_hours = n;
            }
        }
        if let Ok(v) = env::var("MMB_TZ") {
            self.board.tz = v;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.board.max_text < 12 {
            return Err(anyhow!(
                "board.max_text must be at least 12 (got {})",
                self.board.max_text
            ));
        }
        if self.sync.chunk < 16 {
            return Err(anyhow!(
                "sync.chunk must be at least 16 (got {})",
                self.sync.chunk
            ));
        }
        if self.watchdog.tick_secs == 0 {
            return Err(anyhow!("watchdog.tick_secs must be non-zero"));
        }
        Ok(())
    }
}

fn csv_ids(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
