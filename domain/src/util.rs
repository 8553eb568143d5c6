//! Text helpers shared by titles, logs and error snippets.

/// Longest prefix of `s` of at most `max_bytes` that ends on a char boundary.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    &s[..end]
}

/// First line of `s`, trimmed and cut to `max_bytes`, with a trailing `...`
/// when the line was cut.
pub fn ellipsize(s: &str, max_bytes: usize) -> String {
    let first_line = s.trim_start().lines().next().unwrap_or_default().trim();
    let cut = truncate_str(first_line, max_bytes);
    if cut.len() < first_line.len() {
        format!("{}...", cut.trim_end())
    } else {
        cut.to_string()
    }
}
