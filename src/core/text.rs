//! Text Sanitizing
//!
//! Player-supplied strings are rendered by browsers, so markup
//! characters are escaped before they are stored or relayed.

/// Escape `&`, `<` and `>` as HTML entities.
///
/// `&` is escaped first so an escaped string never contains a raw
/// `<`/`>` and decoding it yields the original input.
pub fn escape_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Character count (not byte length).
#[inline]
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}
