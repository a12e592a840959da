//! Per-sender rate limiting and authorization.
//!
//! The limiter is advisory and in-memory only; it resets on restart. Menu
//! and notice discovery commands bypass it so a new user can always find
//! their way in.

use log::warn;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::storage::Store;

/// Commands exempt from rate limiting: discovery and notice reads must
/// always succeed.
pub fn is_bypass(lower: &str) -> bool {
    matches!(lower, "?" | "??" | "help" | "menu") || lower.starts_with("info")
}

/// Tracks the last accepted non-bypass command per sender.
pub struct RateLimiter {
    last_accepted: HashMap<String, Instant>,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_accepted: HashMap::new(),
            cooldown,
        }
    }

    /// Accept or suppress a non-bypass command. Accepting records the
    /// timestamp; suppressed commands leave it untouched, so the interval
    /// between two processed commands is always >= the cooldown.
    pub fn allow(&mut self, sender: &str) -> bool {
        let now = Instant::now();
        match self.last_accepted.get(sender) {
            Some(last) if now.duration_since(*last) < self.cooldown => false,
            _ => {
                self.last_accepted.insert(sender.to_string(), now);
                true
            }
        }
    }

    /// Drop entries idle long enough that they can never suppress again.
    pub fn prune(&mut self) {
        let now = Instant::now();
        let keep = self.cooldown.max(Duration::from_secs(60));
        self.last_accepted
            .retain(|_, t| now.duration_since(*t) < keep);
    }
}

/// Admin predicate. While the admin set is empty every sender is admin
/// (bootstrap mode) so a fresh install cannot lock the operator out; each
/// acceptance in that mode logs loudly.
pub fn is_admin(store: &Store, sender: &str) -> bool {
    match store.admins_empty() {
        Ok(true) => {
            warn!(
                "bootstrap admin mode: empty admin set, accepting {} as admin; set [board] admins",
                sender
            );
            true
        }
        Ok(false) => store.admin_contains(sender).unwrap_or(false),
        Err(e) => {
            warn!("admin lookup failed: {}", e);
            false
        }
    }
}

/// Blacklist check. A sender in both sets is treated as blacklisted.
pub fn is_blacklisted(store: &Store, sender: &str) -> bool {
    store.blacklist_contains(sender).unwrap_or(false)
}
