//! Capability policy: which names a script may `require`, and which file
//! extensions each output capability may produce.
//!
//! A `Policy` is built once at startup (from config or defaults) and passed
//! explicitly to the orchestrator and, serialized, to every worker. It is
//! never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Name of the file-system-path pseudo-capability. Requiring it never yields
/// a real filesystem module, only a synthesized `path` namespace.
pub const PATH_HELPER: &str = "os";

/// A script asked for something the policy does not grant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("import of '{0}' is denied")]
    ImportDenied(String),

    #[error("'{capability}' may not write '{filename}' (allowed: {allowed})")]
    ExtensionDenied {
        capability: String,
        filename: String,
        allowed: String,
    },

    #[error("invalid output file name '{0}'")]
    InvalidFileName(String),
}

/// What a `require(name)` call resolves to once the policy admits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportTarget {
    /// A regular capability, identified by its top-level name.
    Capability(String),
    /// The synthesized path-manipulation namespace.
    PathHelper,
}

/// Closed allow-list of capabilities plus per-capability output extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    imports: BTreeSet<String>,
    outputs: BTreeMap<String, BTreeSet<String>>,
}

impl Default for Policy {
    fn default() -> Self {
        let imports = [
            "random", "datetime", "re", "json", "math", "textwrap", "base64", "io", PATH_HELPER,
            "docx", "pptx", "canvas", "image",
        ];
        let outputs = [
            ("docx", vec![".docx", ".pdf"]),
            ("pptx", vec![".pptx", ".pdf"]),
            ("canvas", vec![".pdf"]),
            ("image", vec![".png"]),
        ];
        Self::new(
            imports.iter().map(|s| s.to_string()),
            outputs
                .into_iter()
                .map(|(cap, exts)| (cap.to_string(), exts.into_iter().map(String::from).collect())),
        )
    }
}

impl Policy {
    /// Builds a policy, normalizing extensions to lowercase with a leading dot.
    pub fn new<I, O>(imports: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = String>,
        O: IntoIterator<Item = (String, Vec<String>)>,
    {
        let imports = imports
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        let outputs = outputs
            .into_iter()
            .map(|(cap, exts)| {
                let exts = exts
                    .iter()
                    .map(|e| normalize_extension(e))
                    .filter(|e| e.len() > 1)
                    .collect::<BTreeSet<String>>();
                (cap, exts)
            })
            .collect();
        Self { imports, outputs }
    }

    /// Top-level component of a dotted capability name (`alpha.beta` → `alpha`).
    fn top_level(name: &str) -> &str {
        name.split('.').next().unwrap_or(name)
    }

    /// Checks whether `require(name)` is admitted. Only the top-level
    /// component is considered.
    pub fn is_import_allowed(&self, name: &str) -> bool {
        let top = Self::top_level(name.trim());
        !top.is_empty() && self.imports.contains(top)
    }

    /// Resolves an admitted import to what the runtime should hand out.
    /// Returns `None` when the name is denied.
    pub fn resolve_import(&self, name: &str) -> Option<ImportTarget> {
        if !self.is_import_allowed(name) {
            return None;
        }
        let top = Self::top_level(name.trim());
        if top == PATH_HELPER {
            Some(ImportTarget::PathHelper)
        } else {
            Some(ImportTarget::Capability(top.to_string()))
        }
    }

    /// Case-insensitive suffix match of `filename` against the extensions
    /// configured for `capability`. Unknown capabilities reject everything.
    pub fn is_output_extension_allowed(&self, capability: &str, filename: &str) -> bool {
        let Some(exts) = self.outputs.get(capability) else {
            return false;
        };
        let lower = filename.to_lowercase();
        exts.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    /// True if any output capability may produce `filename`. Used when
    /// collecting results from a job directory.
    pub fn is_permitted_output(&self, filename: &str) -> bool {
        self.outputs
            .keys()
            .any(|cap| self.is_output_extension_allowed(cap, filename))
    }

    /// Output capabilities that are also importable.
    pub fn output_capabilities(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .keys()
            .filter(|cap| self.imports.contains(cap.as_str()))
            .map(String::as_str)
    }

    /// Extensions permitted for a capability, in sorted order.
    pub fn extensions_for(&self, capability: &str) -> Vec<&str> {
        self.outputs
            .get(capability)
            .map(|exts| exts.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn imports(&self) -> impl Iterator<Item = &str> {
        self.imports.iter().map(String::as_str)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_document_capabilities() {
        let policy = Policy::default();
        for name in ["docx", "pptx", "canvas", "image", "random", "json", "os"] {
            assert!(policy.is_import_allowed(name), "{name} should be allowed");
        }
    }

    #[test]
    fn test_denies_unlisted_names() {
        let policy = Policy::default();
        for name in ["socket", "subprocess", "sys", "fs", "child_process", "net", "", "  "] {
            assert!(!policy.is_import_allowed(name), "{name:?} should be denied");
        }
    }

    #[test]
    fn test_dotted_names_use_top_level_only() {
        let policy = Policy::default();
        assert!(policy.is_import_allowed("canvas.pdfgen"));
        assert!(policy.is_import_allowed("os.path"));
        assert!(!policy.is_import_allowed("socket.docx"));
        assert!(!policy.is_import_allowed(".docx"));
    }

    #[test]
    fn test_os_resolves_to_path_helper() {
        let policy = Policy::default();
        assert_eq!(policy.resolve_import("os"), Some(ImportTarget::PathHelper));
        assert_eq!(policy.resolve_import("os.path"), Some(ImportTarget::PathHelper));
        assert_eq!(
            policy.resolve_import("docx.shared"),
            Some(ImportTarget::Capability("docx".to_string()))
        );
        assert_eq!(policy.resolve_import("shutil"), None);
    }

    #[test]
    fn test_os_denied_when_not_listed() {
        let policy = Policy::new(vec!["docx".to_string()], Vec::<(String, Vec<String>)>::new());
        assert_eq!(policy.resolve_import("os.path"), None);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let policy = Policy::default();
        assert!(policy.is_output_extension_allowed("docx", "report.DOCX"));
        assert!(policy.is_output_extension_allowed("docx", "report.Pdf"));
        assert!(policy.is_output_extension_allowed("canvas", "out.pdf"));
        assert!(!policy.is_output_extension_allowed("canvas", "out.docx"));
        assert!(!policy.is_output_extension_allowed("pptx", "run.sh"));
        assert!(!policy.is_output_extension_allowed("pptx", "deck.pptx.exe"));
    }

    #[test]
    fn test_unknown_capability_rejects_all() {
        let policy = Policy::default();
        assert!(!policy.is_output_extension_allowed("image", "a.pdf"));
        assert!(!policy.is_output_extension_allowed("", "a.pdf"));
    }

    #[test]
    fn test_extensions_are_normalized() {
        let policy = Policy::new(
            vec!["canvas".to_string()],
            vec![("canvas".to_string(), vec!["PDF".to_string(), " .Svg ".to_string(), ".".to_string()])],
        );
        assert_eq!(policy.extensions_for("canvas"), vec![".pdf", ".svg"]);
    }

    #[test]
    fn test_permitted_output_union() {
        let policy = Policy::default();
        assert!(policy.is_permitted_output("a.pptx"));
        assert!(policy.is_permitted_output("a.docx"));
        assert!(!policy.is_permitted_output("source.js"));
        assert!(!policy.is_permitted_output("a.png"));
    }

    #[test]
    fn test_output_capabilities_require_import() {
        let policy = Policy::new(
            vec!["docx".to_string()],
            vec![
                ("docx".to_string(), vec![".docx".to_string()]),
                ("pptx".to_string(), vec![".pptx".to_string()]),
            ],
        );
        assert_eq!(policy.output_capabilities().collect::<Vec<_>>(), vec!["docx"]);
    }

    #[test]
    fn test_policy_serde_roundtrip_preserves_decisions() {
        let policy = Policy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
