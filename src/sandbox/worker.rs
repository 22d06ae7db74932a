//! Worker entry point: runs exactly one job inside its own process.
//!
//! ```text
//! docsandbox worker [--policy <json>] <job_dir> <source_file>
//! ```
//!
//! The worker always walks Starting → Preparing → Executing → Collecting →
//! Reporting → Terminal, and always reports exactly one `WorkerMessage` on
//! stdout, whatever happened before. Logs and script console output go to
//! stderr.

use std::io::{Read, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, error, info, warn};

use super::diagnostic::Diagnostic;
use super::orchestrator::SOURCE_FILE_NAME;
use super::protocol::{ResultChannel, WorkerMessage};
use crate::capabilities::CapabilityRegistry;
use crate::policy::Policy;
use crate::runtime::RestrictedRuntime;

/// Stack for the script thread; the JavaScript engine recurses on the
/// native stack while parsing deeply nested source.
const SCRIPT_STACK_BYTES: usize = 64 * 1024 * 1024;

/// How often the waiting thread checks for a termination signal.
const SIGNAL_POLL: Duration = Duration::from_millis(50);

/// Largest source file the worker will read.
const MAX_SOURCE_FILE_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerState {
    Starting,
    Preparing,
    Executing,
    Collecting,
    Reporting,
    Terminal,
}

struct Worker {
    state: WorkerState,
}

impl Worker {
    fn new() -> Self {
        Self {
            state: WorkerState::Starting,
        }
    }

    /// States only move forward.
    fn advance(&mut self, next: WorkerState) {
        debug_assert!(next > self.state, "{:?} -> {next:?}", self.state);
        debug!("Worker state {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

/// Parsed worker command line.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerArgs {
    pub policy: Policy,
    pub job_dir: PathBuf,
    pub source_file: PathBuf,
}

impl WorkerArgs {
    /// Parses the arguments following the `worker` subcommand.
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self> {
        let mut policy = None;
        let mut positional = Vec::new();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--policy" => {
                    let json = args.next().ok_or_else(|| anyhow!("--policy needs a value"))?;
                    let parsed: Policy =
                        serde_json::from_str(&json).context("invalid --policy value")?;
                    policy = Some(parsed);
                }
                flag if flag.starts_with("--") => bail!("unknown worker option {flag}"),
                _ => positional.push(PathBuf::from(arg)),
            }
        }
        let [job_dir, source_file]: [PathBuf; 2] = positional
            .try_into()
            .map_err(|_| anyhow!("expected <job_dir> <source_file>"))?;
        Ok(Self {
            policy: policy.unwrap_or_default(),
            job_dir,
            source_file,
        })
    }
}

/// How the script phase ended.
#[derive(Debug)]
enum ScriptOutcome {
    Completed,
    Failed(Diagnostic),
    Interrupted,
}

enum ScriptEvent {
    Prepared,
    Finished(Result<(), Diagnostic>),
}

/// Runs the worker and returns the process exit code. Exit codes are
/// informational; the reported message is authoritative.
pub fn run(args: Vec<String>) -> i32 {
    if let Err(e) = signals::install() {
        warn!("Could not install signal handlers: {e}");
    }
    let stdout = std::io::stdout();
    run_with(args, stdout.lock(), execute)
}

/// Drives `execute` and reports its message on `out`. A panic while
/// building the message still produces the fallback report.
fn run_with<W, F>(args: Vec<String>, out: W, execute: F) -> i32
where
    W: Write,
    F: FnOnce(Vec<String>, &mut Worker) -> WorkerMessage,
{
    let channel = ResultChannel::new(out);

    let mut worker = Worker::new();
    let built = std::panic::catch_unwind(AssertUnwindSafe(|| execute(args, &mut worker)));
    worker.advance(WorkerState::Reporting);

    let message = match built {
        Ok(message) => message,
        Err(_) => {
            error!("Worker failed while building its result");
            return match channel.report_fallback() {
                Ok(()) => 1,
                Err(_) => 2,
            };
        }
    };

    let code = match &message {
        WorkerMessage::Success { files } => {
            info!("Job finished with {} output file(s)", files.len());
            0
        }
        WorkerMessage::Error { message } => {
            info!("Job failed: {message}");
            1
        }
    };
    let reported = channel.report(&message);
    worker.advance(WorkerState::Terminal);
    match reported {
        Ok(()) => code,
        Err(e) => {
            error!("Could not write result: {e}");
            2
        }
    }
}

/// Everything up to and including Collecting.
fn execute(args: Vec<String>, worker: &mut Worker) -> WorkerMessage {
    let (policy, job_dir, source_file, source) = match start(args) {
        Ok(started) => started,
        Err(e) => return failure(&Diagnostic::from_error("WorkerError", &e)),
    };

    worker.advance(WorkerState::Preparing);
    let policy = Arc::new(policy);
    let outcome = run_script(policy.clone(), job_dir.clone(), source, worker);

    worker.advance(WorkerState::Collecting);
    let files = collect_outputs(&job_dir, &policy, &source_file);

    match (outcome, files) {
        (ScriptOutcome::Completed, Ok(files)) => WorkerMessage::Success {
            files: files.iter().map(|f| f.display().to_string()).collect(),
        },
        (ScriptOutcome::Completed, Err(e)) => {
            failure(&Diagnostic::from_error("WorkerError", &e).scrub_path(&job_dir))
        }
        (ScriptOutcome::Failed(diagnostic), files) => {
            log_discarded(files);
            failure(&diagnostic)
        }
        (ScriptOutcome::Interrupted, files) => {
            log_discarded(files);
            failure(&Diagnostic::new("Interrupted", "worker received a termination signal"))
        }
    }
}

fn failure(diagnostic: &Diagnostic) -> WorkerMessage {
    debug!("Reporting {} failure", diagnostic.kind());
    WorkerMessage::Error {
        message: diagnostic.to_string(),
    }
}

fn log_discarded(files: Result<Vec<PathBuf>>) {
    if let Ok(files) = files {
        if !files.is_empty() {
            debug!("Not reporting {} file(s) of a failed job", files.len());
        }
    }
}

/// Starting: validates the job directory and reads the source.
fn start(args: Vec<String>) -> Result<(Policy, PathBuf, PathBuf, String)> {
    let args = WorkerArgs::parse(args)?;
    let job_dir = verify_job_dir(&args.job_dir)?;
    let source = read_source(&args.source_file)?;
    Ok((args.policy, job_dir, args.source_file, source))
}

/// Canonical path of the job directory, which must exist and be writable.
pub fn verify_job_dir(dir: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(dir).context("job directory is not accessible")?;
    let metadata = std::fs::metadata(&canonical).context("job directory is not accessible")?;
    if !metadata.is_dir() {
        bail!("job directory is not a directory");
    }
    if metadata.permissions().readonly() {
        bail!("job directory is not writable");
    }
    Ok(canonical)
}

fn read_source(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path).context("cannot open source file")?;
    let mut source = String::new();
    file.take(MAX_SOURCE_FILE_BYTES + 1)
        .read_to_string(&mut source)
        .context("cannot read source file")?;
    if source.len() as u64 > MAX_SOURCE_FILE_BYTES {
        bail!("source file exceeds {MAX_SOURCE_FILE_BYTES} bytes");
    }
    Ok(source)
}

/// Preparing and Executing, on a dedicated thread. The calling thread waits
/// for the outcome and gives up early on a termination signal.
fn run_script(
    policy: Arc<Policy>,
    job_dir: PathBuf,
    source: String,
    worker: &mut Worker,
) -> ScriptOutcome {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("script".to_string())
        .stack_size(SCRIPT_STACK_BYTES)
        .spawn(move || {
            let built = RestrictedRuntime::new(policy, job_dir, CapabilityRegistry::with_builtins());
            let mut runtime = match built {
                Ok(runtime) => runtime,
                Err(diagnostic) => {
                    let _ = tx.send(ScriptEvent::Finished(Err(diagnostic)));
                    return;
                }
            };
            if let Err(diagnostic) = runtime.prepare() {
                let _ = tx.send(ScriptEvent::Finished(Err(diagnostic)));
                return;
            }
            let _ = tx.send(ScriptEvent::Prepared);
            let _ = tx.send(ScriptEvent::Finished(runtime.execute(&source)));
        });
    if let Err(e) = spawned {
        return ScriptOutcome::Failed(Diagnostic::new(
            "WorkerError",
            &format!("cannot start script thread: {e}"),
        ));
    }

    loop {
        match rx.recv_timeout(SIGNAL_POLL) {
            Ok(ScriptEvent::Prepared) => worker.advance(WorkerState::Executing),
            Ok(ScriptEvent::Finished(Ok(()))) => return ScriptOutcome::Completed,
            Ok(ScriptEvent::Finished(Err(diagnostic))) => return ScriptOutcome::Failed(diagnostic),
            Err(RecvTimeoutError::Timeout) => {
                if signals::interrupted() {
                    warn!("Termination requested, abandoning script");
                    return ScriptOutcome::Interrupted;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return ScriptOutcome::Failed(Diagnostic::new(
                    "WorkerError",
                    "script thread ended without a result",
                ))
            }
        }
    }
}

/// Regular files directly inside `job_dir` with a permitted output
/// extension, sorted by name, as absolute paths. Symlinks and the job's
/// own source file are skipped.
pub fn collect_outputs(job_dir: &Path, policy: &Policy, source_file: &Path) -> Result<Vec<PathBuf>> {
    let source_name = source_file.file_name().and_then(|n| n.to_str());
    let mut files = Vec::new();
    for entry in std::fs::read_dir(job_dir).context("listing job directory")? {
        let entry = entry.context("listing job directory")?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if Some(name) == source_name || name == SOURCE_FILE_NAME {
            continue;
        }
        if policy.is_permitted_output(name) {
            files.push(job_dir.join(name));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(unix)]
mod signals {
    use std::sync::atomic::{AtomicBool, Ordering};

    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    static INTERRUPTED: AtomicBool = AtomicBool::new(false);

    extern "C" fn on_signal(_signal: std::ffi::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    /// Routes SIGTERM and SIGINT to a flag instead of terminating, so the
    /// worker can still report.
    pub fn install() -> nix::Result<()> {
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: the handler only stores to an atomic.
        unsafe {
            signal::sigaction(Signal::SIGTERM, &action)?;
            signal::sigaction(Signal::SIGINT, &action)?;
        }
        Ok(())
    }

    pub fn interrupted() -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

#[cfg(not(unix))]
mod signals {
    pub fn install() -> Result<(), std::convert::Infallible> {
        Ok(())
    }

    pub fn interrupted() -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ── argument tests ──────────────────────────────

    #[test]
    fn test_parse_positional_only() {
        let parsed = WorkerArgs::parse(args(&["/jobs/a", "/jobs/a/source.js"])).unwrap();
        assert_eq!(parsed.job_dir, PathBuf::from("/jobs/a"));
        assert_eq!(parsed.source_file, PathBuf::from("/jobs/a/source.js"));
        assert_eq!(parsed.policy, Policy::default());
    }

    #[test]
    fn test_parse_policy_option() {
        let policy = Policy::new(vec!["json".to_string()], Vec::<(String, Vec<String>)>::new());
        let json = serde_json::to_string(&policy).unwrap();
        let parsed = WorkerArgs::parse(args(&["--policy", &json, "/d", "/d/s.js"])).unwrap();
        assert_eq!(parsed.policy, policy);
    }

    #[test]
    fn test_parse_rejects_bad_arity_and_flags() {
        assert!(WorkerArgs::parse(args(&["/d"])).is_err());
        assert!(WorkerArgs::parse(args(&["/d", "/s", "/x"])).is_err());
        assert!(WorkerArgs::parse(args(&["--verbose", "/d", "/s"])).is_err());
        assert!(WorkerArgs::parse(args(&["--policy"])).is_err());
    }

    // ── job tests ───────────────────────────────────

    fn job(source: &str) -> (tempfile::TempDir, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let source_file = dir.path().join("source.js");
        std::fs::write(&source_file, source).unwrap();
        let argv = vec![
            dir.path().display().to_string(),
            source_file.display().to_string(),
        ];
        (dir, argv)
    }

    #[test]
    fn test_execute_success_lists_outputs() {
        let (dir, argv) = job(
            "const { Canvas } = require('canvas');
             const c = new Canvas('out.pdf'); c.drawString(10, 10, 'x'); c.save();",
        );
        let mut worker = Worker::new();
        let message = execute(argv, &mut worker);
        assert_eq!(worker.state, WorkerState::Collecting);

        let expected = std::fs::canonicalize(dir.path()).unwrap().join("out.pdf");
        assert_eq!(
            message,
            WorkerMessage::Success {
                files: vec![expected.display().to_string()]
            }
        );
    }

    #[test]
    fn test_execute_empty_success() {
        let (_dir, argv) = job("const x = 1 + 1;");
        let message = execute(argv, &mut Worker::new());
        assert_eq!(message, WorkerMessage::Success { files: vec![] });
    }

    #[test]
    fn test_execute_denied_import_is_error() {
        let (_dir, argv) = job("require('socket');");
        match execute(argv, &mut Worker::new()) {
            WorkerMessage::Error { message } => {
                assert!(message.starts_with("ImportError:"), "{message}");
                assert!(message.contains("socket"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn test_execute_error_surfaces_no_files() {
        let (dir, argv) = job(
            "const { Canvas } = require('canvas');
             new Canvas('partial.pdf').save();
             throw new Error('late failure');",
        );
        let message = execute(argv, &mut Worker::new());
        assert_eq!(
            message,
            WorkerMessage::Error {
                message: "Error: late failure".to_string()
            }
        );
        assert!(dir.path().join("partial.pdf").exists());
    }

    #[test]
    fn test_execute_missing_job_dir() {
        let argv = args(&["/nonexistent/job", "/nonexistent/job/source.js"]);
        let mut worker = Worker::new();
        match execute(argv, &mut worker) {
            WorkerMessage::Error { message } => assert!(message.starts_with("WorkerError:")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(worker.state, WorkerState::Starting);
    }

    // ── reporting tests ─────────────────────────────

    #[test]
    fn test_run_reports_exactly_one_message() {
        let mut out = Vec::new();
        let code = run_with(vec![], &mut out, |_, worker| {
            worker.advance(WorkerState::Collecting);
            WorkerMessage::Success { files: vec![] }
        });
        assert_eq!(code, 0);
        assert_eq!(out.iter().filter(|b| **b == b'\n').count(), 1);
        assert_eq!(
            WorkerMessage::parse(&out).unwrap(),
            WorkerMessage::Success { files: vec![] }
        );
    }

    #[test]
    fn test_panic_while_building_result_still_reports() {
        let mut out = Vec::new();
        let code = run_with(vec![], &mut out, |_, _| panic!("renderer blew up"));
        assert_eq!(code, 1);
        match WorkerMessage::parse(&out).unwrap() {
            WorkerMessage::Error { message } => assert!(message.contains("internal error")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    // ── collection tests ────────────────────────────

    #[test]
    fn test_collect_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pdf", "a.docx", "source.js", "run.sh", "c.PPTX"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let files = collect_outputs(dir.path(), &Policy::default(), &dir.path().join("source.js")).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.docx", "b.pdf", "c.PPTX"]);
        assert!(files.iter().all(|f| f.starts_with(dir.path())));
    }

    #[test]
    fn test_collect_never_returns_source_file() {
        let policy = Policy::new(
            ["canvas".to_string()],
            [("canvas".to_string(), vec![".pdf".to_string(), ".js".to_string()])],
        );
        let (dir, argv) = job("const { Canvas } = require('canvas'); new Canvas('out.pdf').save();");
        std::fs::write(dir.path().join("helper.js"), b"x").unwrap();

        let source = dir.path().join("source.js");
        let files = collect_outputs(dir.path(), &policy, &source).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["helper.js"]);

        let json = serde_json::to_string(&policy).unwrap();
        let mut with_policy = args(&["--policy", &json]);
        with_policy.extend(argv);
        match execute(with_policy, &mut Worker::new()) {
            WorkerMessage::Success { files } => {
                assert!(files.iter().all(|f| !f.ends_with("source.js")), "{files:?}");
                assert!(files.iter().any(|f| f.ends_with("out.pdf")));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_collect_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/etc/hostname", dir.path().join("link.pdf")).unwrap();
        let source = dir.path().join("source.js");
        assert!(collect_outputs(dir.path(), &Policy::default(), &source).unwrap().is_empty());
    }
}
