use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::policy::Policy;
use crate::sandbox::orchestrator::JobLimits;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SandboxConfig {
    /// Parent of all job directories. Supports ${ENV_VAR} substitution
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL once the deadline has passed
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// How long output files stay available after a job finishes
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Executable started for each job; defaults to this binary
    #[serde(default)]
    pub worker_program: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            timeout_secs: default_timeout_secs(),
            grace_secs: default_grace_secs(),
            retention_secs: default_retention_secs(),
            max_source_bytes: default_max_source_bytes(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            worker_program: None,
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./data/jobs")
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_grace_secs() -> u64 {
    2
}

fn default_retention_secs() -> u64 {
    15 * 60
}

fn default_max_source_bytes() -> usize {
    64 * 1024
}

fn default_max_concurrent_jobs() -> usize {
    8
}

/// Capability allow-list. Omitted keys fall back to the built-in policy.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct PolicyConfig {
    #[serde(default)]
    pub imports: Option<Vec<String>>,
    /// Capability name → permitted extensions, e.g. `canvas = [".pdf"]`
    #[serde(default)]
    pub outputs: Option<BTreeMap<String, Vec<String>>>,
}

impl PolicyConfig {
    pub fn to_policy(&self) -> Policy {
        if self.imports.is_none() && self.outputs.is_none() {
            return Policy::default();
        }
        let defaults = Policy::default();
        let imports = match &self.imports {
            Some(imports) => imports.clone(),
            None => defaults.imports().map(String::from).collect(),
        };
        let outputs: Vec<(String, Vec<String>)> = match &self.outputs {
            Some(outputs) => outputs.clone().into_iter().collect(),
            None => defaults
                .output_capabilities()
                .map(|cap| {
                    let exts = defaults.extensions_for(cap).into_iter().map(String::from).collect();
                    (cap.to_string(), exts)
                })
                .collect(),
        };
        Policy::new(imports, outputs)
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> JobLimits {
        JobLimits {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            grace: Duration::from_secs(self.grace_secs),
            retention: Duration::from_secs(self.retention_secs),
            max_source_bytes: self.max_source_bytes,
        }
    }

    /// Concurrency bound for `serve`, never below one.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Like `load`, but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${DOCSANDBOX_ROOT}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }
}
