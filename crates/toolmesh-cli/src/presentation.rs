//! Terminal formatting helpers.

pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Shorten `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate_string(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
