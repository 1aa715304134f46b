//! Task identifiers and scratch-artifact bookkeeping.

use std::{
    fmt, fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use time::OffsetDateTime;
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

/// Every suffix a task may leave behind in the scratch directory.
pub const ARTIFACT_SUFFIXES: &[&str] = &[
    ".tex",
    ".pdf",
    ".aux",
    ".log",
    ".xdv",
    ".fls",
    ".fdb_latexmk",
    ".png",
    "-1.png",
    "_processed.png",
    "_probe.png",
    "_probe-1.png",
    "_measure.png",
    "_measure-1.png",
];

/// Unique artifact namespace for one render attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(String);

impl TaskId {
    /// 64 random bits salted with the current time in milliseconds.
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Self(format!("{}-{millis}", &random[..16]))
    }

    /// Sub-task namespace used by the two-step path (`{id}_step1`, `{id}_step2`).
    pub fn step(&self, index: u8) -> Self {
        Self(format!("{}_step{index}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the artifact with the given suffix, e.g. `abc-1.png`.
    pub fn artifact(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owns the scratch directory and deletes task artifacts from it.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    scratch_dir: PathBuf,
}

impl TaskLifecycle {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn new_task_id(&self) -> TaskId {
        TaskId::generate()
    }

    /// Delete every known artifact of `task`. Individual failures are ignored.
    pub fn cleanup(&self, task: &TaskId) {
        let mut removed = 0usize;
        for path in self.artifact_paths(task) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) => log_removal_failure(&path, &err),
            }
        }
        log_cleanup(task, removed);
    }

    /// [`TaskLifecycle::cleanup`] on the async file API.
    pub async fn cleanup_async(&self, task: &TaskId) {
        let mut removed = 0usize;
        for path in self.artifact_paths(task) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => log_removal_failure(&path, &err),
            }
        }
        log_cleanup(task, removed);
    }

    /// Guard that cleans up `task` when released or dropped, unless
    /// [`TaskGuard::retain`] was called.
    pub fn guard(&self, task: TaskId) -> TaskGuard {
        TaskGuard {
            lifecycle: self.clone(),
            task,
            retained: false,
            released: false,
        }
    }

    fn artifact_paths<'a>(&'a self, task: &'a TaskId) -> impl Iterator<Item = PathBuf> + 'a {
        ARTIFACT_SUFFIXES
            .iter()
            .map(move |suffix| self.scratch_dir.join(task.artifact(suffix)))
    }
}

fn log_removal_failure(path: &Path, err: &io::Error) {
    if err.kind() == ErrorKind::NotFound {
        return;
    }
    debug!(
        target = "application::render::task",
        path = %path.display(),
        error = %err,
        "Ignoring artifact removal failure"
    );
}

fn log_cleanup(task: &TaskId, removed: usize) {
    debug!(
        target = "application::render::task",
        task_id = %task,
        removed,
        "Task artifacts cleaned up"
    );
}

/// Scopes a task's artifacts. Finished renders call [`TaskGuard::release`]; a guard that
/// is only dropped (a cancelled request) cleans up on the blocking pool.
pub struct TaskGuard {
    lifecycle: TaskLifecycle,
    task: TaskId,
    retained: bool,
    released: bool,
}

impl TaskGuard {
    pub fn task(&self) -> &TaskId {
        &self.task
    }

    /// Keep the artifacts on disk for postmortem inspection.
    pub fn retain(&mut self) {
        self.retained = true;
        info!(
            target = "application::render::task",
            task_id = %self.task,
            location = %self.lifecycle.scratch_dir.join(self.task.artifact(".*")).display(),
            "Task artifacts retained"
        );
    }

    /// Remove the artifacts now, unless retained.
    pub async fn release(mut self) {
        if !self.retained {
            self.lifecycle.cleanup_async(&self.task).await;
        }
        // Set after the await so a cancelled release still cleans up on drop.
        self.released = true;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.retained || self.released {
            return;
        }
        // Drop cannot await; keep the removals off the async workers when a runtime exists.
        match Handle::try_current() {
            Ok(handle) => {
                let lifecycle = self.lifecycle.clone();
                let task = self.task.clone();
                handle.spawn_blocking(move || lifecycle.cleanup(&task));
            }
            Err(_) => self.lifecycle.cleanup(&self.task),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").expect("write artifact");
    }

    #[test]
    fn generated_ids_are_unique_and_time_salted() {
        let ids: HashSet<TaskId> = (0..256).map(|_| TaskId::generate()).collect();
        assert_eq!(ids.len(), 256);

        let id = TaskId::generate();
        let (random, millis) = id.as_str().split_once('-').expect("separator");
        assert_eq!(random.len(), 16);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(millis.parse::<i128>().expect("millis") > 0);
    }

    #[test]
    fn step_ids_extend_the_parent() {
        let id = TaskId("abc-1".into());
        assert_eq!(id.step(1).as_str(), "abc-1_step1");
        assert_eq!(id.step(2).artifact(".pdf"), "abc-1_step2.pdf");
    }

    #[test]
    fn cleanup_removes_known_artifacts_only() {
        let dir = TempDir::new().expect("temp dir");
        let lifecycle = TaskLifecycle::new(dir.path().to_path_buf());
        let task = TaskId("t1".into());
        for suffix in [".tex", ".pdf", ".log", "-1.png", "_processed.png"] {
            touch(dir.path(), &task.artifact(suffix));
        }
        touch(dir.path(), "t1.keep");
        touch(dir.path(), "other.tex");

        lifecycle.cleanup(&task);

        let mut remaining: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["other.tex", "t1.keep"]);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dir = TempDir::new().expect("temp dir");
        let lifecycle = TaskLifecycle::new(dir.path().to_path_buf());
        let task = TaskId("t2".into());
        touch(dir.path(), &task.artifact(".tex"));

        lifecycle.cleanup(&task);
        lifecycle.cleanup(&task);
        lifecycle.cleanup(&TaskId("never-used".into()));

        assert!(!dir.path().join("t2.tex").exists());
    }

    #[test]
    fn guard_cleans_up_unless_retained() {
        let dir = TempDir::new().expect("temp dir");
        let lifecycle = TaskLifecycle::new(dir.path().to_path_buf());

        let dropped = TaskId("dropped".into());
        touch(dir.path(), &dropped.artifact(".pdf"));
        drop(lifecycle.guard(dropped));
        assert!(!dir.path().join("dropped.pdf").exists());

        let kept = TaskId("kept".into());
        touch(dir.path(), &kept.artifact(".pdf"));
        let mut guard = lifecycle.guard(kept);
        guard.retain();
        drop(guard);
        assert!(dir.path().join("kept.pdf").exists());
    }

    #[tokio::test]
    async fn release_cleans_up_unless_retained() {
        let dir = TempDir::new().expect("temp dir");
        let lifecycle = TaskLifecycle::new(dir.path().to_path_buf());

        let done = TaskId("done".into());
        touch(dir.path(), &done.artifact(".tex"));
        touch(dir.path(), &done.artifact("-1.png"));
        lifecycle.guard(done).release().await;
        assert!(!dir.path().join("done.tex").exists());
        assert!(!dir.path().join("done-1.png").exists());

        let failed = TaskId("failed".into());
        touch(dir.path(), &failed.artifact(".log"));
        let mut guard = lifecycle.guard(failed);
        guard.retain();
        guard.release().await;
        assert!(dir.path().join("failed.log").exists());
    }

    #[tokio::test]
    async fn dropped_guard_cleans_up_on_the_blocking_pool() {
        let dir = TempDir::new().expect("temp dir");
        let lifecycle = TaskLifecycle::new(dir.path().to_path_buf());
        let cancelled = TaskId("cancelled".into());
        touch(dir.path(), &cancelled.artifact(".pdf"));

        drop(lifecycle.guard(cancelled));

        let artifact = dir.path().join("cancelled.pdf");
        for _ in 0..200 {
            if !artifact.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!artifact.exists());
    }
}
