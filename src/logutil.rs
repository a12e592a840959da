//! Helpers for keeping log lines single-line when they embed user text.

/// Longest prefix of user text quoted into a log line.
const MAX_PREVIEW: usize = 200;

/// Render a string safe for single-line logging. Control characters,
/// backslashes and quotes come out in their `escape_debug` spelling
/// (`\n`, `\t`, `\u{9b}`, ...), and anything past the preview cap is
/// dropped behind an ellipsis so a hostile frame cannot flood the log.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 1);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(MAX_PREVIEW) {
        out.extend(ch.escape_debug());
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
