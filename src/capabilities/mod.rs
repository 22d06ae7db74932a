pub mod builtin;
pub mod registry;

use std::path::Path;

use anyhow::{bail, Context};
use serde_json::Value;

/// Upper bound on a single rendered output file.
pub const MAX_OUTPUT_BYTES: usize = 25 * 1024 * 1024;

/// An output-producing capability a script can `require`.
///
/// Capabilities only turn a document model into bytes and write them where
/// they are told. They never choose a destination themselves: the runtime
/// hands them paths that have already been confined to the job directory.
pub trait OutputCapability: Send + Sync {
    /// Name scripts pass to `require()` (e.g. "docx").
    fn name(&self) -> &str;

    /// Extensions this capability knows how to render, lowercase with a
    /// leading dot. The policy may grant a subset of these.
    fn formats(&self) -> &[&'static str];

    /// Renders `model` into the format selected by `extension`.
    fn render(&self, model: &Value, extension: &str) -> anyhow::Result<Vec<u8>>;

    /// Renders and writes the file. The format follows the extension of
    /// `path`.
    fn save_to(&self, model: &Value, path: &Path) -> anyhow::Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        let bytes = self.render(model, &extension)?;
        if bytes.len() > MAX_OUTPUT_BYTES {
            bail!(
                "{} output is too large ({} bytes, max {MAX_OUTPUT_BYTES})",
                self.name(),
                bytes.len()
            );
        }
        std::fs::write(path, &bytes).with_context(|| {
            format!(
                "writing {}",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
            )
        })?;
        Ok(())
    }
}

pub use registry::CapabilityRegistry;
