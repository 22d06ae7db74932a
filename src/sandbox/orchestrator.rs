//! Job orchestration from the caller's side of the isolation boundary.
//!
//! For each job the orchestrator creates a private directory, writes the
//! source next to it, launches one worker process, waits for it under a
//! deadline (SIGTERM, then SIGKILL after a grace period), validates the
//! reported result and schedules removal of the directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cleanup::{remove_job_dir, schedule_cleanup};
use super::diagnostic::{excerpt, truncate, Diagnostic, MAX_MESSAGE_CHARS};
use super::protocol::{ProtocolError, WorkerMessage, MAX_CHANNEL_BYTES};
use crate::policy::Policy;

/// File the source text is written to inside the job directory.
pub const SOURCE_FILE_NAME: &str = "source.js";

/// Longest caller-derived prefix of a job directory name.
const MAX_CALLER_CHARS: usize = 32;

/// Where an `error` outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The script or the worker's own checks.
    Worker,
    /// Launching, waiting for, or talking to the worker.
    Orchestrator,
}

/// Terminal outcome of one job, as handed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success { files: Vec<PathBuf> },
    Error { origin: ErrorOrigin, message: String },
    Timeout { message: String },
}

impl ExecutionResult {
    fn orchestrator_error(message: impl AsRef<str>) -> Self {
        Self::Error {
            origin: ErrorOrigin::Orchestrator,
            message: truncate(message.as_ref(), MAX_MESSAGE_CHARS),
        }
    }

    /// One-line description for logs and terminal output.
    pub fn summary(&self) -> String {
        match self {
            Self::Success { files } if files.is_empty() => {
                "completed without producing any files".to_string()
            }
            Self::Success { files } => format!("produced {} file(s)", files.len()),
            Self::Error { origin, message } => format!("{origin:?} error: {message}"),
            Self::Timeout { message } => format!("timeout: {message}"),
        }
    }
}

/// A finished job: its identifier plus the outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job_id: String,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// Runs jobs to completion. Implementations must return a report for every
/// job, whatever goes wrong.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, source: &str, caller_id: &str) -> JobReport;
}

/// Time and size bounds applied to every job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobLimits {
    pub timeout: Duration,
    pub grace: Duration,
    pub retention: Duration,
    pub max_source_bytes: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            grace: Duration::from_secs(2),
            retention: Duration::from_secs(15 * 60),
            max_source_bytes: 64 * 1024,
        }
    }
}

/// Program and leading arguments used to start a worker. The job directory
/// and source file are appended as the last two arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `<program> worker --policy <json>`, where `program` defaults to the
    /// running executable.
    pub fn for_policy(program: Option<PathBuf>, policy: &Policy) -> anyhow::Result<Self> {
        let program = match program {
            Some(program) => program,
            None => std::env::current_exe().context("cannot locate own executable")?,
        };
        let policy_json = serde_json::to_string(policy).context("serializing policy")?;
        Ok(Self::new(
            program,
            vec!["worker".to_string(), "--policy".to_string(), policy_json],
        ))
    }
}

pub struct JobOrchestrator {
    root: PathBuf,
    limits: JobLimits,
    policy: Arc<Policy>,
    worker: WorkerCommand,
}

impl JobOrchestrator {
    pub fn new(root: PathBuf, limits: JobLimits, policy: Arc<Policy>, worker: WorkerCommand) -> Self {
        Self {
            root,
            limits,
            policy,
            worker,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &JobLimits {
        &self.limits
    }

    /// Creates a fresh job directory and returns its canonical path.
    async fn create_job_dir(&self, job_id: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .context("cannot create job root")?;
        let dir = self.root.join(job_id);
        // create_dir, not create_dir_all: an existing directory is a collision
        tokio::fs::create_dir(&dir)
            .await
            .context("cannot create job directory")?;
        tokio::fs::canonicalize(&dir)
            .await
            .context("cannot resolve job directory")
    }

    /// Launches the worker and waits for its result under the deadline.
    async fn supervise(&self, job_id: &str, job_dir: &Path, source_file: &Path) -> ExecutionResult {
        let mut command = Command::new(&self.worker.program);
        command
            .args(&self.worker.args)
            .arg(job_dir)
            .arg(source_file)
            .current_dir(job_dir)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(filter) = std::env::var("RUST_LOG") {
            command.env("RUST_LOG", filter);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Job {job_id}: cannot launch worker {}: {e}", self.worker.program.display());
                return ExecutionResult::orchestrator_error(format!("cannot launch worker: {e}"));
            }
        };
        debug!("Job {job_id}: worker pid {:?}", child.id());

        let stdout = child.stdout.take().map(|out| tokio::spawn(read_bounded(out, MAX_CHANNEL_BYTES)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_bounded(err, MAX_CHANNEL_BYTES)));

        let started = Instant::now();
        let status = match timeout(self.limits.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Job {job_id}: waiting for worker failed: {e}");
                terminate(job_id, &mut child, self.limits.grace).await;
                abort_readers([stdout, stderr]);
                return ExecutionResult::orchestrator_error(format!("waiting for worker failed: {e}"));
            }
            Err(_) => {
                warn!(
                    "Job {job_id}: deadline of {}s exceeded, terminating worker",
                    self.limits.timeout.as_secs_f64()
                );
                terminate(job_id, &mut child, self.limits.grace).await;
                abort_readers([stdout, stderr]);
                return ExecutionResult::Timeout {
                    message: format!(
                        "execution exceeded the {}s time limit",
                        self.limits.timeout.as_secs_f64()
                    ),
                };
            }
        };
        debug!("Job {job_id}: worker exited with {status} after {:?}", started.elapsed());

        let raw = join_reader(stdout).await;
        let log = join_reader(stderr).await;
        if !log.is_empty() {
            debug!("Job {job_id}: worker stderr: {}", excerpt(&log));
        }

        match (WorkerMessage::parse(&raw), crash_signal(&status)) {
            (Ok(WorkerMessage::Success { files }), _) => self.validate_files(job_id, job_dir, files),
            (Ok(WorkerMessage::Error { message }), _) => ExecutionResult::Error {
                origin: ErrorOrigin::Worker,
                message: Diagnostic::new("", &message)
                    .scrub_path(job_dir)
                    .message()
                    .to_string(),
            },
            (Err(ProtocolError::Empty), Some(signal)) => {
                warn!("Job {job_id}: worker died on signal {signal} without reporting");
                ExecutionResult::Error {
                    origin: ErrorOrigin::Worker,
                    message: format!("worker crashed (signal {signal}) before reporting a result"),
                }
            }
            (Err(e), _) => {
                error!("Job {job_id}: {e} (worker {status})");
                ExecutionResult::orchestrator_error(format!("{e} (worker {status})"))
            }
        }
    }

    /// Accepts a success report only if every file is a regular file
    /// directly inside the job directory with a permitted extension.
    fn validate_files(&self, job_id: &str, job_dir: &Path, files: Vec<String>) -> ExecutionResult {
        let mut accepted = Vec::with_capacity(files.len());
        for file in files {
            let path = PathBuf::from(&file);
            let inside = path.parent() == Some(job_dir);
            let permitted = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n != SOURCE_FILE_NAME && self.policy.is_permitted_output(n));
            let regular = std::fs::symlink_metadata(&path).is_ok_and(|m| m.is_file());
            if !(inside && permitted && regular) {
                error!("Job {job_id}: worker reported unacceptable output {}", excerpt(file.as_bytes()));
                return ExecutionResult::orchestrator_error(
                    "worker reported an output file outside its job directory",
                );
            }
            accepted.push(path);
        }
        ExecutionResult::Success { files: accepted }
    }

    /// Removes the job directory right away if nothing besides the source
    /// is in it, otherwise after the retention window.
    async fn finish(&self, job_dir: PathBuf) {
        if has_outputs(&job_dir).await {
            schedule_cleanup(job_dir, self.limits.retention);
        } else {
            remove_job_dir(&job_dir).await;
        }
    }
}

#[async_trait]
impl JobRunner for JobOrchestrator {
    async fn run_job(&self, source: &str, caller_id: &str) -> JobReport {
        let job_id = job_id_for(caller_id);
        info!("Job {job_id}: submitted ({} bytes)", source.len());

        if source.len() > self.limits.max_source_bytes {
            warn!("Job {job_id}: source rejected, {} bytes", source.len());
            return JobReport {
                job_id,
                result: ExecutionResult::orchestrator_error(format!(
                    "source is {} bytes, limit is {}",
                    source.len(),
                    self.limits.max_source_bytes
                )),
            };
        }

        let job_dir = match self.create_job_dir(&job_id).await {
            Ok(dir) => dir,
            Err(e) => {
                error!("Job {job_id}: {e:#}");
                return JobReport {
                    job_id,
                    result: ExecutionResult::orchestrator_error(format!("{e}")),
                };
            }
        };

        let source_file = job_dir.join(SOURCE_FILE_NAME);
        let result = match tokio::fs::write(&source_file, source).await {
            Ok(()) => self.supervise(&job_id, &job_dir, &source_file).await,
            Err(e) => {
                error!("Job {job_id}: cannot write source: {e}");
                ExecutionResult::orchestrator_error("cannot write source file")
            }
        };

        info!("Job {job_id}: {}", result.summary());
        self.finish(job_dir).await;
        JobReport { job_id, result }
    }
}

/// `<caller>_<random hex>`; the caller part keeps only `[A-Za-z0-9_-]`.
pub fn job_id_for(caller_id: &str) -> String {
    let caller: String = caller_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_CALLER_CHARS)
        .collect();
    let caller = if caller.is_empty() { "anonymous".to_string() } else { caller };
    format!("{caller}_{}", Uuid::new_v4().simple())
}

/// Asks the worker to stop, then kills it if it outlives `grace`.
async fn terminate(job_id: &str, child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
        if let Ok(Ok(status)) = timeout(grace, child.wait()).await {
            debug!("Job {job_id}: worker stopped after SIGTERM ({status})");
            return;
        }
        warn!("Job {job_id}: worker ignored SIGTERM, killing");
    }

    if let Err(e) = child.kill().await {
        error!("Job {job_id}: cannot kill worker: {e}");
    }
    match child.try_wait() {
        Ok(Some(status)) => debug!("Job {job_id}: worker killed ({status})"),
        other => error!("Job {job_id}: worker still running after kill: {other:?}"),
    }
}

/// Signal that ended the worker, if it died on one.
#[cfg(unix)]
fn crash_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn crash_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Reads to EOF, keeping at most `limit` bytes. The rest is drained so a
/// chatty worker never blocks on a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}

async fn join_reader(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

fn abort_readers<const N: usize>(readers: [Option<tokio::task::JoinHandle<Vec<u8>>>; N]) {
    for reader in readers.into_iter().flatten() {
        reader.abort();
    }
}

/// True if the directory holds anything besides the source file.
async fn has_outputs(dir: &Path) -> bool {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name() != SOURCE_FILE_NAME {
            return true;
        }
    }
    false
}
