//! Command dispatcher and handlers.
//!
//! Every inbound text that survives intake, blacklist, and rate limiting
//! lands here. The dispatcher normalizes the frame, routes on the first
//! token (case-insensitive), and returns ready-to-send frames; paging to the
//! MTU happens in the handlers so each one controls its own titles.
//!
//! Admin mutations are idempotent: adding an existing admin or deleting a
//! missing peer is reported as success.

use anyhow::Result;
use chrono::{Local, TimeZone};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{intake, limiter, pager};
use crate::link::{NodeEntry, NodeInfo};
use crate::storage::{Post, Store};

/// One node directory entry after canonicalization.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub last_heard: Option<u64>,
}

/// Canonicalize a directory snapshot, deduplicating by node id.
pub fn node_views(entries: &[NodeEntry]) -> Vec<NodeView> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entry in entries {
        if let Some(id) = intake::key_to_id(&entry.key) {
            if seen.insert(id.clone()) {
                out.push(NodeView {
                    id,
                    long_name: entry.long_name.clone().unwrap_or_else(|| "-".to_string()),
                    short_name: entry.short_name.clone().unwrap_or_else(|| "-".to_string()),
                    last_heard: entry.last_heard,
                });
            }
        }
    }
    out
}

/// Short-name resolution ladder: exact match first, then a unique prefix
/// match, then substring against short or long names.
pub fn resolve_short<'a>(nodes: &'a [NodeView], query: &str) -> Vec<&'a NodeView> {
    let want = query.trim().to_lowercase();
    if want.is_empty() {
        return Vec::new();
    }
    let exact: Vec<&NodeView> = nodes
        .iter()
        .filter(|n| n.short_name.to_lowercase() == want)
        .collect();
    if !exact.is_empty() {
        return exact;
    }
    let prefix: Vec<&NodeView> = nodes
        .iter()
        .filter(|n| n.short_name.to_lowercase().starts_with(&want))
        .collect();
    if prefix.len() == 1 {
        return prefix;
    }
    nodes
        .iter()
        .filter(|n| {
            n.short_name.to_lowercase().contains(&want)
                || n.long_name.to_lowercase().contains(&want)
        })
        .collect()
}

/// Compact "time ago" rendering: `45s`, `12m`, `3h05m`, `2d04h`.
pub fn fmt_ago(seconds: Option<u64>) -> String {
    let Some(s) = seconds else {
        return "unknown".to_string();
    };
    if s < 60 {
        return format!("{s}s");
    }
    let m = s / 60;
    if m < 60 {
        return format!("{m}m");
    }
    let h = m / 60;
    if h < 24 {
        return format!("{}h{:02}m", h, m % 60);
    }
    format!("{}d{:02}h", h / 24, h % 24)
}

/// Short local-time stamp for post listings.
fn fmt_ts(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%m-%d %H:%M").to_string(),
        _ => "??-?? ??:??".to_string(),
    }
}

/// Longer stamp for the notice title.
fn fmt_ts_long(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        _ => "unknown".to_string(),
    }
}

/// Everything a handler may need for one command.
pub struct CommandContext<'a> {
    pub store: &'a Store,
    pub sender: &'a str,
    pub name: &'a str,
    pub mtu: usize,
    pub unknown_reply: bool,
    pub health_public: bool,
    pub nodes: Vec<NodeView>,
    pub me: Option<NodeInfo>,
    pub device: &'a str,
    pub uptime_secs: u64,
    pub last_rx_age: Option<u64>,
    pub sync_enabled: &'a AtomicBool,
    pub now: i64,
}

/// Result of dispatching one command.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Frames to send back to the sender, already sized to the MTU.
    pub frames: Vec<String>,
    /// A post created by this command, for eager replication.
    pub new_post: Option<Post>,
    /// `sync now` was requested: broadcast an inventory immediately.
    pub sync_now: bool,
}

impl Outcome {
    fn say(frame: impl Into<String>) -> Self {
        Outcome {
            frames: vec![frame.into()],
            ..Default::default()
        }
    }

    fn pages(frames: Vec<String>) -> Self {
        Outcome {
            frames,
            ..Default::default()
        }
    }

    fn silent() -> Self {
        Outcome::default()
    }
}

/// Dispatch one normalized inbound text. The sync sentinel, blacklist, and
/// rate limiting are handled by the caller; this routes everything else.
pub fn dispatch(ctx: &CommandContext<'_>, text: &str) -> Result<Outcome> {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let mut words = trimmed.split_whitespace();
    let head = words.next().unwrap_or("").to_lowercase();

    let outcome = match head.as_str() {
        "?" | "menu" | "help" => menu_reply(ctx),
        "??" => help_reply(ctx),
        "r" | "read" => match words.next() {
            None => list_posts(ctx),
            Some(arg) => match arg.parse::<i64>() {
                Ok(id) => read_post(ctx, id),
                Err(_) => Ok(Outcome::say("usage: r or r <id>")),
            },
        },
        "p" | "post" => post(ctx, rest_after(trimmed, 1)),
        "reply" => reply(ctx, rest_after(trimmed, 1)),
        "info" => {
            if lower == "info set" || lower.starts_with("info set ") {
                info_set(ctx, rest_after(trimmed, 2))
            } else {
                info_reply(ctx)
            }
        }
        "status" => status(ctx),
        "whoami" => whoami(ctx),
        "whois" => whois(ctx, rest_after(trimmed, 1)),
        "lastseen" => lastseen(ctx, rest_after(trimmed, 1)),
        "nodes" => nodes_list(ctx),
        "dm" | "msg" => dm(ctx, rest_after(trimmed, 1)),
        "admins" => admins_cmd(ctx, rest_after(trimmed, 1)),
        "bl" => blacklist_cmd(ctx, rest_after(trimmed, 1)),
        "peer" => peer_cmd(ctx, rest_after(trimmed, 1)),
        "sync" => sync_cmd(ctx, rest_after(trimmed, 1)),
        "sf" => sf_cmd(ctx, rest_after(trimmed, 1)),
        "health" => health(ctx, rest_after(trimmed, 1)),
        _ => {
            if ctx.unknown_reply {
                Ok(Outcome::say("unknown. send ? for menu"))
            } else {
                Ok(Outcome::silent())
            }
        }
    }?;
    Ok(outcome)
}

/// The text after the first `skip` whitespace-separated tokens, original
/// spacing preserved.
fn rest_after(text: &str, skip: usize) -> &str {
    let mut rest = text;
    for _ in 0..skip {
        match rest.find(char::is_whitespace) {
            Some(pos) => rest = rest[pos..].trim_start(),
            None => return "",
        }
    }
    rest
}

// ---- user commands ----

fn notice_pages(ctx: &CommandContext<'_>) -> Result<Option<Vec<String>>> {
    let Some(text) = ctx.store.kv_get("notice")? else {
        return Ok(None);
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    if let Some(exp) = ctx.store.kv_get("notice_expires_ts")? {
        if let Ok(exp) = exp.parse::<i64>() {
            if ctx.now >= exp {
                return Ok(None);
            }
        }
    }
    let ts = ctx
        .store
        .kv_get("notice_ts")?
        .and_then(|v| v.parse::<i64>().ok());
    let title = match ts {
        Some(ts) => format!("[Notice {}]", fmt_ts_long(ts)),
        None => "[Notice]".to_string(),
    };
    let lines: Vec<String> = text.lines().map(|l| l.to_string()).collect();
    Ok(Some(pager::paginate(Some(&title), &lines, ctx.mtu)))
}

fn menu_reply(ctx: &CommandContext<'_>) -> Result<Outcome> {
    let mut frames = notice_pages(ctx)?.unwrap_or_default();
    frames.push(pager::menu(ctx.name, ctx.mtu));
    Ok(Outcome::pages(frames))
}

fn help_reply(ctx: &CommandContext<'_>) -> Result<Outcome> {
    let mut frames = notice_pages(ctx)?.unwrap_or_default();
    let lines: Vec<String> = [
        "r            recent posts",
        "r <id>       one post + replies",
        "p <text>     post a message",
        "reply <id> <text>",
        "dm <short> <text>  queued DM",
        "whois <short> / lastseen <q>",
        "nodes        known nodes",
        "info         current notice",
        "status / whoami",
        "? menu  ?? this help",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let title = format!("[{}] help", ctx.name);
    frames.extend(pager::paginate(Some(&title), &lines, ctx.mtu));
    Ok(Outcome::pages(frames))
}

fn list_posts(ctx: &CommandContext<'_>) -> Result<Outcome> {
    let posts = ctx.store.recent_posts(10)?;
    if posts.is_empty() {
        return Ok(Outcome::say("no posts yet. send p <text> to post"));
    }
    let lines: Vec<String> = posts
        .iter()
        .map(|p| format!("#{} {} {}: {}", p.id, fmt_ts(p.ts), p.author, p.body))
        .collect();
    Ok(Outcome::pages(pager::paginate(None, &lines, ctx.mtu)))
}

fn read_post(ctx: &CommandContext<'_>, id: i64) -> Result<Outcome> {
    let Some(post) = ctx.store.post(id)? else {
        return Ok(Outcome::say(format!("no post #{id}")));
    };
    let mut lines = vec![
        format!("#{} {} {}", post.id, fmt_ts(post.ts), post.author),
        post.body.clone(),
    ];
    for r in ctx.store.replies_to(id)? {
        lines.push(format!(
            "\u{21b3} #{} {} {}: {}",
            r.id,
            fmt_ts(r.ts),
            r.author,
            r.body
        ));
    }
    Ok(Outcome::pages(pager::paginate(None, &lines, ctx.mtu)))
}

fn post(ctx: &CommandContext<'_>, body: &str) -> Result<Outcome> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Outcome::say("usage: p <text>"));
    }
    let id = ctx.store.create_post(ctx.now, ctx.sender, body, None)?;
    let mut out = Outcome::say(format!("posted #{id}"));
    out.new_post = ctx.store.post(id)?;
    Ok(out)
}

fn reply(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    let mut it = args.splitn(2, char::is_whitespace);
    let id: i64 = match it.next().and_then(|s| s.parse().ok()) {
        Some(id) => id,
        None => return Ok(Outcome::say("usage: reply <id> <text>")),
    };
    let body = it.next().unwrap_or("").trim();
    if body.is_empty() {
        return Ok(Outcome::say("usage: reply <id> <text>"));
    }
    if !ctx.store.has_post(id)? {
        return Ok(Outcome::say(format!("no post #{id}")));
    }
    let rid = ctx.store.create_post(ctx.now, ctx.sender, body, Some(id))?;
    let mut out = Outcome::say(format!("reply #{rid} -> #{id}"));
    out.new_post = ctx.store.post(rid)?;
    Ok(out)
}

fn info_reply(ctx: &CommandContext<'_>) -> Result<Outcome> {
    match notice_pages(ctx)? {
        Some(frames) => Ok(Outcome::pages(frames)),
        None => Ok(Outcome::say("no notice set")),
    }
}

fn info_set(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    if !limiter::is_admin(ctx.store, ctx.sender) {
        return Ok(Outcome::say("admin only"));
    }
    let args = args.trim();
    if args.is_empty() {
        return Ok(Outcome::say("usage: info set [hours] <text>"));
    }
    // Optional leading expiry horizon in hours.
    let mut it = args.splitn(2, char::is_whitespace);
    let first = it.next().unwrap_or("");
    let rest = it.next().unwrap_or("").trim();
    let (hours, body) = match first.parse::<u64>() {
        Ok(h) if h > 0 && !rest.is_empty() => (Some(h), rest),
        _ => (None, args),
    };
    ctx.store.kv_set("notice", body)?;
    ctx.store.kv_set("notice_ts", &ctx.now.to_string())?;
    match hours {
        Some(h) => {
            let exp = ctx.now + (h * 3600) as i64;
            ctx.store.kv_set("notice_expires_ts", &exp.to_string())?;
            Ok(Outcome::say(format!("notice updated (expires in {h}h)")))
        }
        None => {
            ctx.store.kv_delete("notice_expires_ts")?;
            Ok(Outcome::say("notice updated"))
        }
    }
}

fn status(ctx: &CommandContext<'_>) -> Result<Outcome> {
    let (ln, sn) = match &ctx.me {
        Some(me) => (me.long_name.clone(), me.short_name.clone()),
        None => ("-".to_string(), "-".to_string()),
    };
    let h = ctx.uptime_secs / 3600;
    let m = (ctx.uptime_secs % 3600) / 60;
    Ok(Outcome::say(format!("{ln} / {sn} / up {h}h{m:02}m")))
}

fn whoami(ctx: &CommandContext<'_>) -> Result<Outcome> {
    let (ln, sn) = names_for(&ctx.nodes, ctx.sender);
    Ok(Outcome::say(format!("{} ({} / {})", ctx.sender, ln, sn)))
}

fn names_for(nodes: &[NodeView], id: &str) -> (String, String) {
    nodes
        .iter()
        .find(|n| n.id == id)
        .map(|n| (n.long_name.clone(), n.short_name.clone()))
        .unwrap_or_else(|| ("-".to_string(), "-".to_string()))
}

/// Resolve a query that may be a `!id` or a short name. Errors are frames.
fn resolve_target<'a>(
    ctx: &'a CommandContext<'_>,
    query: &str,
) -> std::result::Result<(String, String, String, Option<u64>), String> {
    let query = query.trim();
    if query.starts_with('!') {
        let Some(id) = intake::normalize_id(query) else {
            return Err(format!("bad node id '{query}'"));
        };
        let (ln, sn) = names_for(&ctx.nodes, &id);
        let last = ctx
            .nodes
            .iter()
            .find(|n| n.id == id)
            .and_then(|n| n.last_heard);
        return Ok((id, ln, sn, last));
    }
    let matches = resolve_short(&ctx.nodes, query);
    match matches.len() {
        0 => Err(format!("no node with short '{query}'")),
        1 => {
            let n = matches[0];
            Ok((
                n.id.clone(),
                n.long_name.clone(),
                n.short_name.clone(),
                n.last_heard,
            ))
        }
        _ => {
            let opts: Vec<String> = matches
                .iter()
                .map(|n| format!("{}({})", n.short_name, n.id))
                .collect();
            Err(format!("ambiguous '{}': {}", query, opts.join(", ")))
        }
    }
}

fn whois(ctx: &CommandContext<'_>, query: &str) -> Result<Outcome> {
    if query.trim().is_empty() {
        return Ok(Outcome::say("usage: whois <short|!id>"));
    }
    match resolve_target(ctx, query) {
        Ok((id, ln, sn, last)) => {
            let age = last.map(|epoch| (ctx.now as u64).saturating_sub(epoch));
            Ok(Outcome::pages(pager::paginate(
                None,
                &[
                    format!("{sn} ({id}) - {ln}"),
                    format!("last seen: {}", fmt_ago(age)),
                ],
                ctx.mtu,
            )))
        }
        Err(msg) => Ok(Outcome::say(msg)),
    }
}

fn lastseen(ctx: &CommandContext<'_>, query: &str) -> Result<Outcome> {
    if query.trim().is_empty() {
        return Ok(Outcome::say("usage: lastseen <short|!id>"));
    }
    match resolve_target(ctx, query) {
        Ok((id, _ln, sn, last)) => {
            let label = if sn == "-" { id } else { sn };
            match last {
                Some(epoch) => {
                    let age = (ctx.now as u64).saturating_sub(epoch);
                    Ok(Outcome::say(format!("{label}: {}", fmt_ago(Some(age)))))
                }
                None => Ok(Outcome::say(format!("{label}: last-seen unknown"))),
            }
        }
        Err(msg) => Ok(Outcome::say(msg)),
    }
}

fn nodes_list(ctx: &CommandContext<'_>) -> Result<Outcome> {
    if ctx.nodes.is_empty() {
        return Ok(Outcome::pages(pager::paginate(
            Some("nodes:"),
            &["(no nodes)".to_string()],
            ctx.mtu,
        )));
    }
    let mut sorted: Vec<&NodeView> = ctx.nodes.iter().collect();
    sorted.sort_by(|a, b| {
        a.short_name
            .to_lowercase()
            .cmp(&b.short_name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    });
    let lines: Vec<String> = sorted
        .iter()
        .map(|n| {
            let age = n
                .last_heard
                .map(|epoch| (ctx.now as u64).saturating_sub(epoch));
            format!("{} {} last:{}", n.short_name, n.id, fmt_ago(age))
        })
        .collect();
    Ok(Outcome::pages(pager::paginate(
        Some("nodes:"),
        &lines,
        ctx.mtu,
    )))
}

fn dm(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    let mut it = args.splitn(2, char::is_whitespace);
    let target = it.next().unwrap_or("").trim();
    let body = it.next().unwrap_or("").trim();
    if target.is_empty() || body.is_empty() {
        return Ok(Outcome::say("usage: dm <short> <text>"));
    }
    match resolve_target(ctx, target) {
        Ok((id, _ln, sn, _last)) => {
            if limiter::is_blacklisted(ctx.store, &id) {
                return Ok(Outcome::say(format!("{sn} is blacklisted")));
            }
            let qid = ctx.store.dm_enqueue(&id, body, ctx.now)?;
            let label = if sn == "-" { id } else { sn };
            Ok(Outcome::say(format!("queued dm to {label} ({qid})")))
        }
        Err(msg) => Ok(Outcome::say(msg)),
    }
}

// ---- admin commands ----

fn admin_gate(ctx: &CommandContext<'_>) -> Option<Outcome> {
    if limiter::is_admin(ctx.store, ctx.sender) {
        None
    } else {
        Some(Outcome::say("admin only"))
    }
}

fn id_set_cmd(
    ctx: &CommandContext<'_>,
    args: &str,
    what: &str,
    add: impl Fn(&str) -> crate::storage::Result<bool>,
    del: impl Fn(&str) -> crate::storage::Result<bool>,
    list: impl Fn() -> crate::storage::Result<Vec<String>>,
) -> Result<Outcome> {
    if let Some(denied) = admin_gate(ctx) {
        return Ok(denied);
    }
    let mut it = args.split_whitespace();
    match (it.next(), it.next()) {
        (Some("add"), Some(id)) => match intake::normalize_id(id) {
            Some(id) => {
                add(&id)?;
                Ok(Outcome::say(format!("{what} add {id} ok")))
            }
            None => Ok(Outcome::say(format!("bad node id '{id}'"))),
        },
        (Some("del"), Some(id)) => match intake::normalize_id(id) {
            Some(id) => {
                del(&id)?;
                Ok(Outcome::say(format!("{what} del {id} ok")))
            }
            None => Ok(Outcome::say(format!("bad node id '{id}'"))),
        },
        (Some("list"), None) | (None, None) => {
            let ids = list()?;
            if ids.is_empty() {
                return Ok(Outcome::say(format!("{what}: (none)")));
            }
            let title = format!("{what}:");
            Ok(Outcome::pages(pager::paginate(Some(&title), &ids, ctx.mtu)))
        }
        _ => Ok(Outcome::say(format!("usage: {what} add|del <id> | list"))),
    }
}

fn admins_cmd(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    let out = id_set_cmd(
        ctx,
        args,
        "admins",
        |id| ctx.store.admin_add(id),
        |id| ctx.store.admin_remove(id),
        || ctx.store.admins(),
    )?;
    if args.trim().is_empty() || args.trim() == "list" {
        if ctx.store.admins_empty()? {
            return Ok(Outcome::say("admins: (none) - everyone is admin"));
        }
    }
    Ok(out)
}

fn blacklist_cmd(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    id_set_cmd(
        ctx,
        args,
        "bl",
        |id| ctx.store.blacklist_add(id),
        |id| ctx.store.blacklist_remove(id),
        || ctx.store.blacklist(),
    )
}

fn peer_cmd(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    id_set_cmd(
        ctx,
        args,
        "peer",
        |id| ctx.store.peer_add(id),
        |id| ctx.store.peer_remove(id),
        || ctx.store.peers(),
    )
}

fn sync_cmd(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    if let Some(denied) = admin_gate(ctx) {
        return Ok(denied);
    }
    match args.trim() {
        "now" => {
            let mut out = Outcome::say("sync requested");
            out.sync_now = true;
            Ok(out)
        }
        "on" => {
            ctx.sync_enabled.store(true, Ordering::SeqCst);
            Ok(Outcome::say("sync on"))
        }
        "off" => {
            ctx.sync_enabled.store(false, Ordering::SeqCst);
            Ok(Outcome::say("sync off"))
        }
        _ => Ok(Outcome::say("usage: sync now|on|off")),
    }
}

fn sf_cmd(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    if let Some(denied) = admin_gate(ctx) {
        return Ok(denied);
    }
    let mut it = args.split_whitespace();
    match (it.next(), it.next()) {
        (Some("list"), None) => {
            let rows = ctx.store.dm_pending_all(10)?;
            if rows.is_empty() {
                return Ok(Outcome::say("dm queue: empty"));
            }
            let lines: Vec<String> = rows
                .iter()
                .map(|d| {
                    let preview: String = d.body.chars().take(40).collect();
                    format!("#{} -> {} [{}]: {}", d.id, d.to_id, fmt_ts(d.created_ts), preview)
                })
                .collect();
            Ok(Outcome::pages(pager::paginate(
                Some("dm queue:"),
                &lines,
                ctx.mtu,
            )))
        }
        (Some("purge"), Some(id)) => match id.parse::<i64>() {
            Ok(id) => {
                ctx.store.dm_delete(id)?;
                Ok(Outcome::say(format!("purged #{id}")))
            }
            Err(_) => Ok(Outcome::say("usage: sf purge <id>")),
        },
        _ => Ok(Outcome::say("usage: sf list | sf purge <id>")),
    }
}

fn health(ctx: &CommandContext<'_>, args: &str) -> Result<Outcome> {
    if !ctx.health_public {
        if let Some(denied) = admin_gate(ctx) {
            return Ok(denied);
        }
    }
    let h = ctx.uptime_secs / 3600;
    let m = (ctx.uptime_secs % 3600) / 60;
    let mut lines = vec![
        format!("[{}] up {}h{:02}m", ctx.name, h, m),
        format!("dev {}", ctx.device),
        format!("rx {} ago", fmt_ago(ctx.last_rx_age)),
        format!(
            "posts {} dm {} peers {}",
            ctx.store.post_count()?,
            ctx.store.dm_pending_count()?,
            ctx.store.peers()?.len()
        ),
        format!(
            "sync {}",
            if ctx.sync_enabled.load(Ordering::SeqCst) {
                "on"
            } else {
                "off"
            }
        ),
    ];
    if args.trim() == "full" {
        lines.push(format!(
            "uids seen {} applied {} rxparts {}",
            ctx.store.seen_uid_count()?,
            ctx.store.applied_uid_count()?,
            ctx.store.rxparts_count()?
        ));
    }
    Ok(Outcome::pages(pager::paginate(None, &lines, ctx.mtu)))
}
