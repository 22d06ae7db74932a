//! Bounded, human-readable failure descriptions.
//!
//! Everything that reaches a caller as an error message goes through
//! `Diagnostic` so its length is capped and trace excerpts stay small.

use std::fmt;
use std::path::Path;

/// Maximum characters of the message part.
pub const MAX_MESSAGE_CHARS: usize = 400;

/// Maximum number of trace lines kept.
pub const MAX_TRACE_LINES: usize = 3;

/// Maximum characters per trace line.
pub const MAX_TRACE_LINE_CHARS: usize = 120;

/// Maximum characters of a raw excerpt (channel content, stderr).
pub const MAX_EXCERPT_CHARS: usize = 200;

/// A failure reduced to `kind: message` plus a short trace excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    kind: String,
    message: String,
    trace: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: &str, message: &str) -> Self {
        Self {
            kind: truncate(kind.trim(), 64),
            message: truncate(message.trim(), MAX_MESSAGE_CHARS),
            trace: Vec::new(),
        }
    }

    /// Appends trace lines, keeping at most `MAX_TRACE_LINES` in total.
    pub fn with_trace<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            if self.trace.len() >= MAX_TRACE_LINES {
                break;
            }
            let line = line.as_ref().trim();
            if !line.is_empty() {
                self.trace.push(truncate(line, MAX_TRACE_LINE_CHARS));
            }
        }
        self
    }

    /// Builds a diagnostic from an `anyhow` error: the outermost context is
    /// the message, the cause chain becomes the trace.
    pub fn from_error(kind: &str, err: &anyhow::Error) -> Self {
        let mut chain = err.chain();
        let message = chain.next().map(|c| c.to_string()).unwrap_or_default();
        Self::new(kind, &message).with_trace(chain.map(|c| c.to_string()))
    }

    /// Replaces every occurrence of `dir` with a neutral placeholder so host
    /// layout above the job directory never leaks.
    pub fn scrub_path(mut self, dir: &Path) -> Self {
        let needle = dir.display().to_string();
        if needle.len() > 1 {
            self.message = self.message.replace(&needle, "<jobdir>");
            for line in &mut self.trace {
                *line = line.replace(&needle, "<jobdir>");
            }
        }
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)?;
        } else {
            write!(f, "{}: {}", self.kind, self.message)?;
        }
        for line in &self.trace {
            write!(f, "\n  {line}")?;
        }
        Ok(())
    }
}

/// Truncates at a character boundary, marking the cut with an ellipsis.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Bounded, single-line excerpt of raw bytes (lossy UTF-8, control
/// characters replaced).
pub fn excerpt(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let cleaned: String = text
        .trim()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    truncate(&cleaned, MAX_EXCERPT_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_display_kind_and_message() {
        let d = Diagnostic::new("ImportError", "import of 'socket' is denied");
        assert_eq!(d.to_string(), "ImportError: import of 'socket' is denied");
    }

    #[test]
    fn test_message_is_bounded() {
        let long = "x".repeat(10_000);
        let d = Diagnostic::new("Error", &long);
        assert_eq!(d.message().chars().count(), MAX_MESSAGE_CHARS);
        assert!(d.message().ends_with('…'));
    }

    #[test]
    fn test_trace_is_bounded() {
        let lines: Vec<String> = (0..20).map(|i| format!("frame {i} {}", "y".repeat(500))).collect();
        let d = Diagnostic::new("Error", "boom").with_trace(&lines);
        let rendered = d.to_string();
        assert_eq!(rendered.lines().count(), 1 + MAX_TRACE_LINES);
        for line in rendered.lines().skip(1) {
            assert!(line.trim().chars().count() <= MAX_TRACE_LINE_CHARS);
        }
    }

    #[test]
    fn test_from_error_uses_cause_chain() {
        let err = anyhow::anyhow!("disk full").context("rendering report.pdf");
        let d = Diagnostic::from_error("RenderError", &err);
        assert_eq!(d.message(), "rendering report.pdf");
        assert!(d.to_string().contains("disk full"));
    }

    #[test]
    fn test_scrub_path() {
        let dir = PathBuf::from("/srv/jobs/42_abcd");
        let d = Diagnostic::new("Error", "cannot write /srv/jobs/42_abcd/out.pdf")
            .with_trace(["at /srv/jobs/42_abcd"])
            .scrub_path(&dir);
        assert_eq!(d.message(), "cannot write <jobdir>/out.pdf");
        assert!(!d.to_string().contains("/srv/jobs"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 4), "hél…");
    }

    #[test]
    fn test_excerpt_bounds_and_flattens() {
        let raw = format!("line1\nline2\t{}", "z".repeat(1000));
        let e = excerpt(raw.as_bytes());
        assert!(!e.contains('\n'));
        assert_eq!(e.chars().count(), MAX_EXCERPT_CHARS);
    }

    #[test]
    fn test_excerpt_handles_invalid_utf8() {
        let e = excerpt(&[0x7b, 0xff, 0xfe, 0x7d]);
        assert!(e.starts_with('{'));
        assert!(e.ends_with('}'));
    }
}
