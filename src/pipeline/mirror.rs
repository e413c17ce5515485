//! Background copy of finished recordings to secondary storage.
//!
//! Copies run on their own threads while the helper keeps serving sessions.
//! Before the helper exits, [`await_mirrors`] waits a bounded time for them;
//! anything still copying at the deadline is reported, since process exit
//! will cut it short.

use crate::config::MirrorConfig;
use crate::error::{Result, ResultExt};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// A running mirror copy for one recording
#[derive(Debug)]
pub struct MirrorJob {
    output: PathBuf,
    handle: JoinHandle<Result<usize>>,
}

impl MirrorJob {
    /// Start mirroring `files`, which belong to the recording `output`.
    pub fn spawn(config: MirrorConfig, output: PathBuf, files: Vec<PathBuf>) -> Self {
        Self {
            output,
            handle: spawn_mirror(config, files),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Wait up to `timeout` for every job.
///
/// Returns the recordings whose mirror failed or was still running at the
/// deadline.
pub fn await_mirrors(jobs: Vec<MirrorJob>, timeout: Duration) -> Vec<PathBuf> {
    let deadline = Instant::now() + timeout;
    while jobs.iter().any(|job| !job.is_finished()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }

    let mut incomplete = Vec::new();
    for job in jobs {
        if !job.is_finished() {
            tracing::error!(
                "Mirror of {} still running after {:?}, copy will be incomplete",
                job.output.display(),
                timeout
            );
            incomplete.push(job.output);
            continue;
        }
        match job.handle.join() {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!("Mirror of {} failed: {}", job.output.display(), e);
                incomplete.push(job.output);
            }
            Err(_) => {
                tracing::error!("Mirror thread for {} panicked", job.output.display());
                incomplete.push(job.output);
            }
        }
    }
    incomplete
}

/// Copy `files` to their mirrored locations on a background thread.
///
/// The caller does not have to join the handle; failures are logged. The
/// handle yields the number of files copied.
pub fn spawn_mirror(config: MirrorConfig, files: Vec<PathBuf>) -> JoinHandle<Result<usize>> {
    std::thread::spawn(move || {
        let mut copied = 0;
        for file in &files {
            let Some(target) = config.target_for(file) else {
                tracing::warn!("No mirror target for {}", file.display());
                continue;
            };
            match copy_one(file, &target) {
                Ok(bytes) => {
                    tracing::debug!("Mirrored {} ({} bytes)", target.display(), bytes);
                    copied += 1;
                }
                Err(e) => {
                    tracing::error!("Mirroring {} failed: {}", file.display(), e);
                    return Err(e);
                }
            }
        }
        tracing::info!("Mirrored {} files to {}", copied, config.remote_root.display());
        Ok(copied)
    })
}

fn copy_one(source: &Path, target: &Path) -> Result<u64> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::copy(source, target)
        .with_context(|| format!("copying {} to {}", source.display(), target.display()))
}
