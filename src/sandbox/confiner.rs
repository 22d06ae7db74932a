//! Output path confinement.
//!
//! Scripts name their output files, but never choose where they go: every
//! requested name is reduced to a sanitized base name inside the job
//! directory before any capability touches the filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::capabilities::OutputCapability;
use crate::policy::{Policy, PolicyViolation};

/// Longest base name kept, in characters.
const MAX_FILE_NAME_CHARS: usize = 128;

/// Maps requested output names to paths inside one job directory.
#[derive(Debug, Clone)]
pub struct OutputConfiner {
    job_dir: PathBuf,
    policy: Arc<Policy>,
}

impl OutputConfiner {
    pub fn new(job_dir: PathBuf, policy: Arc<Policy>) -> Self {
        Self { job_dir, policy }
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Confines `requested` for `capability`.
    ///
    /// Only the last path segment survives (both `/` and `\` count as
    /// separators), unusual characters become `_`, and the extension must
    /// be one the policy grants to the capability.
    pub fn confine(&self, capability: &str, requested: &str) -> Result<PathBuf, PolicyViolation> {
        let base = requested
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        let base = sanitize_filename(base);

        if base.is_empty() || base.chars().all(|c| c == '.') {
            return Err(PolicyViolation::InvalidFileName(base));
        }
        if base.chars().count() > MAX_FILE_NAME_CHARS {
            return Err(PolicyViolation::InvalidFileName(truncated(&base)));
        }
        // ".pdf" alone has no stem
        if Path::new(&base).extension().is_none() {
            return Err(PolicyViolation::InvalidFileName(base));
        }
        if !self.policy.is_output_extension_allowed(capability, &base) {
            warn!("Denied output '{base}' for capability '{capability}'");
            return Err(PolicyViolation::ExtensionDenied {
                capability: capability.to_string(),
                filename: base,
                allowed: self.policy.extensions_for(capability).join(", "),
            });
        }

        if base != requested {
            debug!("Confined output name '{requested}' to '{base}'");
        }
        Ok(self.job_dir.join(base))
    }
}

/// Keeps alphanumerics and `.-_`; everything else becomes `_`.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\0')
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn truncated(name: &str) -> String {
    name.chars().take(32).chain("...".chars()).collect()
}

/// An output capability whose saves are routed through an `OutputConfiner`.
///
/// This is the only handle the script runtime holds on a capability, so a
/// caller-supplied name can never reach `save_to` unconfined.
pub struct ConfinedOutput {
    inner: Arc<dyn OutputCapability>,
    confiner: Arc<OutputConfiner>,
}

impl ConfinedOutput {
    pub fn new(inner: Arc<dyn OutputCapability>, confiner: Arc<OutputConfiner>) -> Self {
        Self { inner, confiner }
    }

    /// Saves `model` under the confined form of `requested` and returns the
    /// path actually written.
    ///
    /// The extension must be granted by the policy and also be one the
    /// capability can render; a policy entry alone never reaches `save_to`.
    pub fn save(&self, requested: &str, model: &Value) -> anyhow::Result<PathBuf> {
        let name = self.inner.name();
        let path = self.confiner.confine(name, requested)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        if !self.inner.formats().iter().any(|f| *f == extension) {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            warn!("Capability '{name}' cannot render '{filename}'");
            return Err(PolicyViolation::ExtensionDenied {
                capability: name.to_string(),
                filename,
                allowed: self.renderable_extensions().join(", "),
            }
            .into());
        }
        self.inner.save_to(model, &path)?;
        debug!("Saved {name} output {}", path.display());
        Ok(path)
    }

    /// Extensions both granted by the policy and rendered by the capability.
    pub fn renderable_extensions(&self) -> Vec<String> {
        let formats = self.inner.formats();
        self.confiner
            .policy
            .extensions_for(self.inner.name())
            .into_iter()
            .filter(|ext| formats.iter().any(|f| f == ext))
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::builtin::{CanvasWriter, DocumentWriter};
    use serde_json::json;

    fn confiner(dir: &Path) -> OutputConfiner {
        OutputConfiner::new(dir.to_path_buf(), Arc::new(Policy::default()))
    }

    // ── confine tests ───────────────────────────────

    #[test]
    fn test_plain_name_joins_job_dir() {
        let c = confiner(Path::new("/jobs/alice_1"));
        assert_eq!(
            c.confine("canvas", "out.pdf").unwrap(),
            PathBuf::from("/jobs/alice_1/out.pdf")
        );
    }

    #[test]
    fn test_traversal_keeps_only_base_name() {
        let c = confiner(Path::new("/jobs/alice_1"));
        assert_eq!(
            c.confine("canvas", "../../etc/evil.pdf").unwrap(),
            PathBuf::from("/jobs/alice_1/evil.pdf")
        );
        assert_eq!(
            c.confine("canvas", "/etc/evil.pdf").unwrap(),
            PathBuf::from("/jobs/alice_1/evil.pdf")
        );
    }

    #[test]
    fn test_backslash_separators_stripped() {
        let c = confiner(Path::new("/jobs/j"));
        assert_eq!(
            c.confine("docx", "..\\..\\Windows\\report.docx").unwrap(),
            PathBuf::from("/jobs/j/report.docx")
        );
    }

    #[test]
    fn test_degenerate_names_rejected() {
        let c = confiner(Path::new("/jobs/j"));
        for name in ["", ".", "..", "dir/", "../..", ".pdf"] {
            assert!(
                matches!(c.confine("canvas", name), Err(PolicyViolation::InvalidFileName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_extension_denied() {
        let c = confiner(Path::new("/jobs/j"));
        let err = c.confine("canvas", "run.sh").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'canvas' may not write 'run.sh' (allowed: .pdf)"
        );
        assert!(c.confine("canvas", "deck.pptx").is_err());
        assert!(c.confine("socket", "out.pdf").is_err());
    }

    #[test]
    fn test_extension_case_insensitive() {
        let c = confiner(Path::new("/jobs/j"));
        assert_eq!(
            c.confine("docx", "Report.DOCX").unwrap(),
            PathBuf::from("/jobs/j/Report.DOCX")
        );
    }

    #[test]
    fn test_unusual_characters_sanitized() {
        let c = confiner(Path::new("/jobs/j"));
        assert_eq!(
            c.confine("canvas", "my report;rm -rf.pdf").unwrap(),
            PathBuf::from("/jobs/j/my_report_rm_-rf.pdf")
        );
    }

    #[test]
    fn test_overlong_name_rejected() {
        let c = confiner(Path::new("/jobs/j"));
        let name = format!("{}.pdf", "a".repeat(200));
        assert!(matches!(
            c.confine("canvas", &name),
            Err(PolicyViolation::InvalidFileName(_))
        ));
    }

    // ── ConfinedOutput tests ────────────────────────

    #[test]
    fn test_confined_save_writes_inside_job_dir() {
        let root = tempfile::tempdir().unwrap();
        let job_dir = root.path().join("job");
        std::fs::create_dir(&job_dir).unwrap();
        let output = ConfinedOutput::new(Arc::new(CanvasWriter), Arc::new(confiner(&job_dir)));

        let path = output
            .save("../escape.pdf", &json!({"pages": [[]]}))
            .unwrap();
        assert_eq!(path, job_dir.join("escape.pdf"));
        assert!(path.exists());
        assert!(!root.path().join("escape.pdf").exists());
    }

    #[test]
    fn test_confined_save_denied_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = ConfinedOutput::new(Arc::new(DocumentWriter), Arc::new(confiner(dir.path())));

        let err = output.save("payload.exe", &json!({"blocks": []})).unwrap_err();
        assert!(err.downcast_ref::<PolicyViolation>().is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_granted_but_unrenderable_extension_denied() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Policy::new(
            ["canvas".to_string()],
            [("canvas".to_string(), vec![".docx".to_string(), ".pdf".to_string()])],
        );
        let confiner = OutputConfiner::new(dir.path().to_path_buf(), Arc::new(policy));
        let output = ConfinedOutput::new(Arc::new(CanvasWriter), Arc::new(confiner));

        assert_eq!(output.renderable_extensions(), vec![".pdf".to_string()]);
        let err = output.save("x.docx", &json!({"pages": [[]]})).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolicyViolation>().unwrap().to_string(),
            "'canvas' may not write 'x.docx' (allowed: .pdf)"
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
