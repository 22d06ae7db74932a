//! Process-level isolation for untrusted scripts.
//!
//! Each job runs in its own worker process inside a private directory:
//!
//! 1. The orchestrator creates the job directory and launches the worker
//! 2. The worker builds a restricted runtime, runs the script and reports
//!    one message on its stdout
//! 3. The orchestrator enforces the deadline, validates the report and
//!    schedules the directory for removal
//!
//! Output paths requested by scripts always pass through the confiner.

pub mod cleanup;
pub mod confiner;
pub mod diagnostic;
pub mod orchestrator;
pub mod protocol;
pub mod worker;
