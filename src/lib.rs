//! # MeshMini - Community Message Board Gateway for Mesh Networks
//!
//! MeshMini turns a single attached radio node on a low-bandwidth mesh network
//! into a shared, text-commanded message board. Users on the mesh send short
//! commands to the gateway's node address; the gateway interprets them,
//! persists state in SQLite, and replies over the same channel in frames that
//! fit the mesh MTU.
//!
//! ## Features
//!
//! - **Message board**: post, read, and reply with paged listings sized for
//!   ~140-byte frames.
//! - **Store-and-forward DMs**: queue a message for a node by short name and
//!   deliver it the next time that node is heard.
//! - **Peer replication**: gossip recent posts between cooperating gateways
//!   with inventory/pull and chunked transfers, deduplicated by transfer UID.
//! - **Link supervision**: receive watchdog with automatic serial reconnect.
//! - **Remote administration**: admins, blacklist, peers, notice, and sync
//!   control over the same command surface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshmini::bbs::Gateway;
//! use meshmini::config::Config;
//! use meshmini::link::SerialLink;
//! use meshmini::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("meshmini.toml").await?;
//!     let store = Store::open(&config.storage.db)?;
//!     let (link, packets) = SerialLink::open(&config.link)?;
//!     let mut gateway = Gateway::new(config, store, Box::new(link), packets)?;
//!     gateway.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - Gateway core: dispatch, paging, DM queue, peer sync, supervisor
//! - [`link`] - Radio link adapter and serial transport
//! - [`storage`] - SQLite persistence layer
//! - [`config`] - Configuration loading and environment overrides
//! - [`logutil`] - Log sanitization helpers

pub mod bbs;
pub mod config;
pub mod link;
pub mod logutil;
pub mod storage;
