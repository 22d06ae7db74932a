//! Bracket nesting estimate for text about to be parsed.
//!
//! The JavaScript and JSON parsers recurse once per nested bracket on the
//! native stack, so deeply nested input is refused before it reaches them.

/// Deepest run of unclosed `(`, `[` and `{` in `text`.
///
/// Brackets are counted wherever they appear, including inside strings and
/// comments, so the estimate never comes out lower than the parser's view.
pub fn max_depth(text: &str) -> usize {
    let mut depth = 0usize;
    let mut deepest = 0usize;
    for byte in text.bytes() {
        match byte {
            b'(' | b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}
