//! Line-delimited JSON job server used by the chat front end.
//!
//! One request per input line:
//!
//! ```text
//! {"id": 7, "caller_id": "alice@example.com", "source": "..."}
//! ```
//!
//! One response per request, written as a single line once the job ends.
//! Responses may come out of order; `id` is echoed back for correlation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::sandbox::diagnostic::excerpt;
use crate::sandbox::orchestrator::{ErrorOrigin, ExecutionResult, JobReport, JobRunner};

#[derive(Debug, Deserialize)]
struct JobRequest {
    #[serde(default)]
    id: Option<Value>,
    caller_id: String,
    source: String,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    id: Option<Value>,
    job_id: Option<String>,
    #[serde(flatten)]
    result: ExecutionResult,
}

impl JobResponse {
    fn finished(id: Option<Value>, report: JobReport) -> Self {
        Self {
            id,
            job_id: Some(report.job_id),
            result: report.result,
        }
    }

    fn rejected(line: &str) -> Self {
        let id = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| v.get("id").cloned());
        Self {
            id,
            job_id: None,
            result: ExecutionResult::Error {
                origin: ErrorOrigin::Orchestrator,
                message: format!("invalid request: {}", excerpt(line.as_bytes())),
            },
        }
    }

    fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(e) => {
                error!("Cannot serialize response: {e}");
                r#"{"id":null,"job_id":null,"status":"error","origin":"orchestrator","message":"internal error"}"#
                    .to_string()
            }
        }
    }
}

/// Serves requests from `input` until EOF, then waits for the jobs still
/// running. At most `concurrency` jobs run at once; further requests wait
/// for a free slot before being read.
pub async fn serve<R, W>(
    runner: Arc<dyn JobRunner>,
    concurrency: usize,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let slots = Arc::new(Semaphore::new(concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let reader = async move {
        let mut lines = input.lines();
        let mut accepted = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Reading requests failed: {e}");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JobRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    warn!("Rejected request: {e}");
                    let _ = tx.send(JobResponse::rejected(line).to_line()).await;
                    continue;
                }
            };

            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            accepted += 1;
            debug!("Request {accepted} from {} accepted", request.caller_id);

            let runner = runner.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let report = runner.run_job(&request.source, &request.caller_id).await;
                drop(permit);
                let response = JobResponse::finished(request.id, report);
                let _ = tx.send(response.to_line()).await;
            });
        }
        info!("Input closed after {accepted} job(s), waiting for running jobs");
        // `tx` drops here; the writer stops once every job has answered
    };

    let writer = async {
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        anyhow::Ok(())
    };

    let ((), written) = tokio::join!(reader, writer);
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::BufReader;

    /// Echoes the source back as an error message after a short pause.
    struct StubRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubRunner {
        fn new() -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobRunner for StubRunner {
        async fn run_job(&self, source: &str, caller_id: &str) -> JobReport {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            JobReport {
                job_id: format!("{caller_id}_1"),
                result: ExecutionResult::Error {
                    origin: ErrorOrigin::Worker,
                    message: source.to_string(),
                },
            }
        }
    }

    async fn run(input: &str, runner: Arc<StubRunner>, concurrency: usize) -> Vec<Value> {
        let mut out = Vec::new();
        serve(runner, concurrency, BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let input = concat!(
            r#"{"id": 1, "caller_id": "alice", "source": "a"}"#,
            "\n\n",
            r#"{"id": "two", "caller_id": "bob", "source": "b"}"#,
            "\n"
        );
        let mut responses = run(input, Arc::new(StubRunner::new()), 4).await;
        responses.sort_by_key(|r| r["job_id"].as_str().unwrap_or_default().to_string());
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["job_id"], "alice_1");
        assert_eq!(responses[0]["status"], "error");
        assert_eq!(responses[0]["message"], "a");
        assert_eq!(responses[1]["id"], "two");
    }

    #[tokio::test]
    async fn test_malformed_line_gets_error_response() {
        let input = "{\"id\": 9, \"caller\": \"x\"}\nnot json at all\n";
        let responses = run(input, Arc::new(StubRunner::new()), 1).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 9);
        assert!(responses[0]["job_id"].is_null());
        assert_eq!(responses[0]["origin"], "orchestrator");
        assert!(responses[1]["id"].is_null());
        assert!(responses[1]["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid request: not json"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let input: String = (0..6)
            .map(|i| format!("{{\"caller_id\": \"c{i}\", \"source\": \"\"}}\n"))
            .collect();
        let runner = Arc::new(StubRunner::new());
        let responses = run(&input, runner.clone(), 2).await;
        assert_eq!(responses.len(), 6);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert!(responses.iter().all(|r| r["id"].is_null()));
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert!(run("", Arc::new(StubRunner::new()), 1).await.is_empty());
    }
}
