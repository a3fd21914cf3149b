//! Character-aware text helpers shared by prompt assembly and summarizers.

use std::borrow::Cow;

/// Marker appended to text cut by [`truncate_chars`].
pub const ELLIPSIS: &str = "...";

/// Truncate `text` to at most `max_chars` characters, appending [`ELLIPSIS`]
/// when anything was cut.
///
/// Counts `char`s rather than bytes so multi-byte text never splits inside a
/// code point. Text that already fits is returned borrowed.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + ELLIPSIS.len());
            out.push_str(&text[..cut]);
            out.push_str(ELLIPSIS);
            Cow::Owned(out)
        },
    }
}

/// First non-empty line of `text`, trimmed.
pub fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}
