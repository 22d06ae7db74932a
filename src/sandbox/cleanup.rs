//! Job directory removal: immediate, deferred, and the startup sweep.
//!
//! All of it is best effort. Failures are logged at debug level and
//! otherwise ignored; removing a directory that is already gone is fine.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Removes one job directory and everything in it.
pub async fn remove_job_dir(dir: &Path) {
    if dir.file_name().is_none() {
        debug!("Refusing to remove {}", dir.display());
        return;
    }
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed job directory {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Could not remove {}: {e}", dir.display()),
    }
}

/// Removes `dir` after `delay`, on the current tokio runtime.
pub fn schedule_cleanup(dir: PathBuf, delay: Duration) -> JoinHandle<()> {
    debug!("Scheduled removal of {} in {}s", dir.display(), delay.as_secs());
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        remove_job_dir(&dir).await;
    })
}

/// Removes job directories under `root` whose last modification is older
/// than `retention`. Returns how many were removed.
///
/// Covers deferred cleanups lost when the process exited before they ran.
pub async fn sweep_expired(root: &Path, retention: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Nothing to sweep in {}: {e}", root.display());
            return 0;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= retention);
        if expired {
            remove_job_dir(&entry.path()).await;
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Swept {removed} expired job director{}", if removed == 1 { "y" } else { "ies" });
    }
    removed
}
