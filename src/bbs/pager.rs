//! MTU-sized output shaping: word-wrap chunking, paged listings with a
//! repeated title, and the shrinking menu.
//!
//! Pages carry a `(i/N) ` prefix only when the reply spans more than one
//! frame. Page budgets are computed against byte lengths because the MTU is
//! a payload byte limit; splits always land on char boundaries.

/// Room reserved for the `(i/N) ` prefix when a reply turns out to span
/// multiple frames.
const PREFIX_RESERVE: usize = 8;

/// Greedy word wrap of one string into chunks of at most `limit` bytes.
/// Words longer than the limit are hard-split on char boundaries.
fn wrap_words(msg: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut cur = String::new();
    for word in msg.split_whitespace() {
        for piece in split_oversize(word, limit) {
            let need = if cur.is_empty() {
                piece.len()
            } else {
                cur.len() + 1 + piece.len()
            };
            if need <= limit {
                if !cur.is_empty() {
                    cur.push(' ');
                }
                cur.push_str(&piece);
            } else {
                if !cur.is_empty() {
                    chunks.push(std::mem::take(&mut cur));
                }
                cur = piece;
            }
        }
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// Split a single word into pieces of at most `limit` bytes.
fn split_oversize(word: &str, limit: usize) -> Vec<String> {
    if word.len() <= limit {
        return vec![word.to_string()];
    }
    let mut pieces = Vec::new();
    let mut cur = String::new();
    for ch in word.chars() {
        if cur.len() + ch.len_utf8() > limit {
            pieces.push(std::mem::take(&mut cur));
        }
        cur.push(ch);
    }
    if !cur.is_empty() {
        pieces.push(cur);
    }
    pieces
}

fn number_chunks(chunks: Vec<String>) -> Vec<String> {
    let total = chunks.len();
    if total <= 1 {
        return chunks;
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, c)| format!("({}/{}) {}", i + 1, total, c))
        .collect()
}

/// Split free-form text into at most `limit`-byte frames, numbering them
/// when more than one is needed.
pub fn chunk_text(msg: &str, limit: usize) -> Vec<String> {
    if msg.len() <= limit {
        return vec![msg.to_string()];
    }
    let chunks = wrap_words(msg, limit.saturating_sub(PREFIX_RESERVE).max(1));
    number_chunks(chunks)
}

fn build_pages(title: Option<&str>, lines: &[String], budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    // Pre-wrap lines the budget cannot hold whole.
    let line_room = match title {
        Some(t) => budget.saturating_sub(t.len() + 1).max(1),
        None => budget,
    };
    let mut flat = Vec::new();
    for line in lines {
        if line.len() <= line_room {
            flat.push(line.clone());
        } else {
            flat.extend(wrap_words(line, line_room));
        }
    }

    let mut pages = Vec::new();
    let mut page = title.map(|t| t.to_string()).unwrap_or_default();
    let base_len = page.len();
    for line in flat {
        let need = if page.is_empty() {
            line.len()
        } else {
            page.len() + 1 + line.len()
        };
        if need > budget && page.len() > base_len {
            pages.push(page);
            page = title.map(|t| t.to_string()).unwrap_or_default();
        }
        if !page.is_empty() {
            page.push('\n');
        }
        page.push_str(&line);
    }
    if !page.is_empty() || pages.is_empty() {
        pages.push(page);
    }
    pages
}

/// Assemble lines into pages of at most `limit` bytes. Every page repeats
/// the optional title; the `(i/N) ` prefix appears only when N > 1.
pub fn paginate(title: Option<&str>, lines: &[String], limit: usize) -> Vec<String> {
    let pages = build_pages(title, lines, limit);
    if pages.len() <= 1 {
        return pages;
    }
    let pages = build_pages(title, lines, limit.saturating_sub(PREFIX_RESERVE).max(1));
    number_chunks(pages)
}

/// Menu items in display order, keyed for the removal pass.
const MENU_ITEMS: &[(&str, &str)] = &[
    ("r", "r"),
    ("r <id>", "r <id>"),
    ("p", "p <txt>"),
    ("reply", "reply <id> <txt>"),
    ("info", "info"),
    ("status", "status"),
    ("whoami", "whoami"),
    ("nodes", "nodes"),
    ("whois", "whois <sn>"),
    ("dm", "dm <sn> <txt>"),
    ("??", "??"),
];

/// Fixed removal order, least essential first. Part of the contract so a
/// given MTU always yields the same menu.
const MENU_REMOVAL_ORDER: &[&str] = &[
    "dm", "whois", "nodes", "whoami", "status", "info", "reply", "p", "r <id>",
];

/// Render the menu for the given display name, shrinking until it fits one
/// frame of `mtu` bytes.
pub fn menu(name: &str, mtu: usize) -> String {
    let render = |items: &[(&str, &str)]| {
        let labels: Vec<&str> = items.iter().map(|(_, l)| *l).collect();
        format!("[{}] {}", name, labels.join(" | "))
    };

    let mut items: Vec<(&str, &str)> = MENU_ITEMS.to_vec();
    let mut line = render(&items);
    let mut removals = MENU_REMOVAL_ORDER.iter();
    while line.len() > mtu {
        match removals.next() {
            Some(key) => {
                items.retain(|(k, _)| k != key);
                line = render(&items);
            }
            None => break,
        }
    }
    if line.len() <= mtu {
        return line;
    }
    let fallback = format!("[{}] r list | p | r <id> | ??", name);
    if fallback.len() <= mtu {
        return fallback;
    }
    "[BBS] r|p|r#|??".to_string()
}
