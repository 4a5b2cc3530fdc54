//! Top-level keyword and separator scanning for SOQL text.
//!
//! "Top level" means outside parentheses and outside single-quoted literals,
//! so subqueries and string values never split a clause.

/// Byte span of a keyword match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Walks `text` and calls `visit(index)` for every byte at depth 0 outside quotes.
/// Stops early when `visit` returns `true`.
fn scan_top_level(text: &str, mut visit: impl FnMut(usize) -> bool) {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == b'\'' {
                in_quote = false;
            }
        } else {
            match b {
                b'\'' => in_quote = true,
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                _ if depth == 0 && visit(i) => return,
                _ => {}
            }
        }
        i += 1;
    }
}

/// Finds the first top-level, word-bounded, case-insensitive occurrence of
/// `keyword`. A space inside `keyword` ("ORDER BY") matches any run of whitespace.
pub fn find_keyword(text: &str, keyword: &str) -> Option<Span> {
    let bytes = text.as_bytes();
    let mut found = None;

    scan_top_level(text, |i| {
        if i > 0 && is_ident_byte(bytes[i - 1]) {
            return false;
        }
        if let Some(end) = match_words(bytes, i, keyword) {
            found = Some(Span { start: i, end });
            return true;
        }
        false
    });

    found
}

fn match_words(bytes: &[u8], start: usize, keyword: &str) -> Option<usize> {
    let mut pos = start;
    for (n, word) in keyword.split(' ').enumerate() {
        if n > 0 {
            let ws_start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == ws_start {
                return None;
            }
        }
        let end = pos + word.len();
        if end > bytes.len() || !bytes[pos..end].eq_ignore_ascii_case(word.as_bytes()) {
            return None;
        }
        pos = end;
    }
    if pos < bytes.len() && is_ident_byte(bytes[pos]) {
        return None;
    }
    Some(pos)
}

/// Splits `text` on top-level occurrences of `separator`.
pub fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut last = 0;

    scan_top_level(text, |i| {
        if bytes[i] == separator {
            parts.push(&text[last..i]);
            last = i + 1;
        }
        false
    });
    parts.push(&text[last..]);
    parts
}
