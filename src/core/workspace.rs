//! Transient intake/results stores and their per-request lifecycle.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SplitError};

/// How concurrent requests share the workspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One global workspace, erased on every request. Requests are serialized.
    #[default]
    Shared,
    /// `uploads/<request-id>` and `output/<request-id>` per request.
    PerRequest,
}

/// Directories handed to one pipeline run.
#[derive(Clone, Debug)]
pub struct Workspace {
    pub request_id: String,
    pub uploads_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
pub struct WorkspaceManager {
    uploads_root: PathBuf,
    output_root: PathBuf,
    isolation: Isolation,
    retention: Duration,
    // Requests between `reset` and `release`; never pruned.
    in_flight: Mutex<HashSet<String>>,
}

impl WorkspaceManager {
    pub fn new(
        uploads_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        isolation: Isolation,
        retention: Duration,
    ) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            output_root: output_root.into(),
            isolation,
            retention,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Root served under the static prefix; URLs are relative to it.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn new_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Erase and recreate the stores for `request_id` and mark it in flight.
    ///
    /// Shared mode destroys every artifact of the previous request. Per-request mode
    /// only touches the request's own subdirectories and prunes stale siblings that
    /// are no longer in flight. Pair every successful call with [`release`].
    ///
    /// [`release`]: WorkspaceManager::release
    pub fn reset(&self, request_id: &str) -> Result<Workspace> {
        self.in_flight().insert(request_id.to_string());
        let (uploads_dir, output_dir) = match self.isolation {
            Isolation::Shared => (self.uploads_root.clone(), self.output_root.clone()),
            Isolation::PerRequest => (
                self.uploads_root.join(request_id),
                self.output_root.join(request_id),
            ),
        };

        for dir in [&uploads_dir, &output_dir] {
            if let Err(e) = recreate_dir(dir) {
                self.release(request_id);
                return Err(e);
            }
        }

        if self.isolation == Isolation::PerRequest {
            for root in [&self.uploads_root, &self.output_root] {
                self.prune_stale(root, request_id);
            }
        }

        tracing::debug!(
            request_id,
            uploads = %uploads_dir.display(),
            output = %output_dir.display(),
            "workspace reset"
        );

        Ok(Workspace {
            request_id: request_id.to_string(),
            uploads_dir,
            output_dir,
        })
    }

    /// The run for `request_id` is over; its directories may be pruned once stale.
    pub fn release(&self, request_id: &str) {
        self.in_flight().remove(request_id);
    }

    fn in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune_stale(&self, root: &Path, keep: &str) {
        let Ok(entries) = fs::read_dir(root) else {
            return;
        };
        let active = self.in_flight().clone();
        let now = SystemTime::now();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name == keep || name.to_str().is_some_and(|n| active.contains(n)) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if matches!(age, Some(age) if age > self.retention) {
                let path = entry.path();
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => tracing::debug!(path = %path.display(), "pruned stale workspace"),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to prune workspace")
                    }
                }
            }
        }
    }
}

fn recreate_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(SplitError::workspace(dir, e)),
    }
    fs::create_dir_all(dir).map_err(|e| SplitError::workspace(dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(root: &Path, isolation: Isolation) -> WorkspaceManager {
        WorkspaceManager::new(
            root.join("uploads"),
            root.join("output"),
            isolation,
            Duration::from_secs(3600),
        )
    }

    fn is_empty_dir(p: &Path) -> bool {
        p.is_dir() && fs::read_dir(p).unwrap().next().is_none()
    }

    #[test]
    fn reset_twice_leaves_empty_stores() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path(), Isolation::Shared);

        let ws = mgr.reset("a").unwrap();
        fs::write(ws.uploads_dir.join("song.wav"), b"x").unwrap();
        fs::create_dir_all(ws.output_dir.join("song")).unwrap();

        mgr.reset("b").unwrap();
        let ws = mgr.reset("c").unwrap();

        assert!(is_empty_dir(&ws.uploads_dir));
        assert!(is_empty_dir(&ws.output_dir));
        assert_eq!(ws.output_dir, tmp.path().join("output"));
    }

    #[test]
    fn reset_creates_missing_parents() {
        let tmp = tempdir().unwrap();
        let mgr = WorkspaceManager::new(
            tmp.path().join("deep/uploads"),
            tmp.path().join("deep/er/output"),
            Isolation::Shared,
            Duration::from_secs(1),
        );
        let ws = mgr.reset("id").unwrap();
        assert!(ws.uploads_dir.is_dir());
        assert!(ws.output_dir.is_dir());
    }

    #[test]
    fn per_request_reset_keeps_other_requests() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path(), Isolation::PerRequest);

        let first = mgr.reset("first").unwrap();
        fs::write(first.output_dir.join("keep.mp3"), b"x").unwrap();

        let second = mgr.reset("second").unwrap();
        assert_eq!(second.output_dir, tmp.path().join("output").join("second"));
        assert!(first.output_dir.join("keep.mp3").exists());
    }

    #[test]
    fn per_request_reset_prunes_expired_siblings() {
        let tmp = tempdir().unwrap();
        let mgr = WorkspaceManager::new(
            tmp.path().join("uploads"),
            tmp.path().join("output"),
            Isolation::PerRequest,
            Duration::ZERO,
        );
        let old = mgr.reset("old").unwrap();
        mgr.release("old");
        std::thread::sleep(Duration::from_millis(20));

        let new = mgr.reset("new").unwrap();
        assert!(!old.output_dir.exists());
        assert!(!old.uploads_dir.exists());
        assert!(new.output_dir.is_dir());
    }

    #[test]
    fn in_flight_requests_survive_pruning_until_released() {
        let tmp = tempdir().unwrap();
        let mgr = WorkspaceManager::new(
            tmp.path().join("uploads"),
            tmp.path().join("output"),
            Isolation::PerRequest,
            Duration::ZERO,
        );
        let running = mgr.reset("running").unwrap();
        fs::write(running.uploads_dir.join("song.wav"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));

        mgr.reset("next").unwrap();
        assert!(running.uploads_dir.join("song.wav").exists());
        assert!(running.output_dir.is_dir());

        mgr.release("running");
        std::thread::sleep(Duration::from_millis(20));
        mgr.reset("later").unwrap();
        assert!(!running.uploads_dir.exists());
        assert!(!running.output_dir.exists());
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(
            WorkspaceManager::new_request_id(),
            WorkspaceManager::new_request_id()
        );
    }
}
