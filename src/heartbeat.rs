//! Heartbeat / Crash Recovery — per-session liveness records and detection
//! of sessions that died without a clean shutdown.
//!
//! Liveness is checked with the `nix` crate's zero-signal `kill` idiom:
//! sending signal `0` to a recorded `pid` reports whether the process still
//! exists without actually signaling it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by heartbeat writing and scanning.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// Failed to create the recovery directory.
    #[error("failed to create heartbeat directory {path}: {source}")]
    CreateDir {
        /// Directory that failed to create.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write a heartbeat file.
    #[error("failed to write heartbeat at {path}: {source}")]
    Write {
        /// Path that failed to write.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Subdirectory, relative to a project root or the user's home, where
/// heartbeat files live.
const RECOVERY_SUBDIR: &str = ".opencode/recovery";

/// A session's todo-list progress, as embedded in its heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoState {
    /// Number of todos marked complete.
    pub completed: usize,
    /// Total number of todos.
    pub total: usize,
}

/// A per-session liveness record, written periodically to both a
/// project-local and a user-global recovery directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    /// The session this heartbeat belongs to.
    pub session_id: String,
    /// Absolute path to the project the session is working in.
    pub project_dir: PathBuf,
    /// Current todo-list progress.
    pub todo_state: TodoState,
    /// When this heartbeat was written.
    pub timestamp: DateTime<Utc>,
    /// The process ID of the session's host process.
    pub pid: u32,
}

fn recovery_dir(base: &Path) -> PathBuf {
    base.join(RECOVERY_SUBDIR)
}

fn heartbeat_path(base: &Path, session_id: &str) -> PathBuf {
    recovery_dir(base).join(format!("{session_id}.json"))
}

/// Write `heartbeat` to both `project_dir/.opencode/recovery/<sid>.json`
/// and `home_dir/.opencode/recovery/<sid>.json`.
pub fn write(project_dir: &Path, home_dir: &Path, heartbeat: &Heartbeat) -> Result<(), HeartbeatError> {
    for base in [project_dir, home_dir] {
        let dir = recovery_dir(base);
        std::fs::create_dir_all(&dir).map_err(|source| HeartbeatError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        let path = heartbeat_path(base, &heartbeat.session_id);
        let json = serde_json::to_string_pretty(heartbeat).unwrap_or_default();
        std::fs::write(&path, json).map_err(|source| HeartbeatError::Write { path, source })?;
    }
    Ok(())
}

/// Delete a session's heartbeat from both locations on clean shutdown.
/// Missing files are not an error.
pub fn clear(project_dir: &Path, home_dir: &Path, session_id: &str) {
    for base in [project_dir, home_dir] {
        let _ = std::fs::remove_file(heartbeat_path(base, session_id));
    }
}

/// Whether `pid` still names a live process, checked by sending signal 0
/// (no-op, delivery-checking only) rather than an actual signal.
#[cfg(unix)]
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// On non-Unix targets there is no zero-signal probe available; assume
/// liveness so recovery never wrongly reclaims a live session's heartbeat.
#[cfg(not(unix))]
#[must_use]
pub fn is_process_alive(_pid: u32) -> bool {
    true
}

fn read_heartbeats_from(dir: &Path) -> Vec<Heartbeat> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| std::fs::read_to_string(e.path()).ok())
        .filter_map(|content| serde_json::from_str::<Heartbeat>(&content).ok())
        .collect()
}

/// Scan both the project-local and user-global recovery directories,
/// dedup by `session_id` (preferring the project-local copy when both
/// exist), and return every heartbeat whose `pid` is no longer alive —
/// these represent sessions that crashed without a clean shutdown.
#[must_use]
pub fn find_stale_heartbeats(project_dir: &Path, home_dir: &Path) -> Vec<Heartbeat> {
    let mut by_session: HashMap<String, Heartbeat> = HashMap::new();

    for heartbeat in read_heartbeats_from(&recovery_dir(home_dir)) {
        by_session.insert(heartbeat.session_id.clone(), heartbeat);
    }
    for heartbeat in read_heartbeats_from(&recovery_dir(project_dir)) {
        by_session.insert(heartbeat.session_id.clone(), heartbeat);
    }

    by_session
        .into_values()
        .filter(|hb| !is_process_alive(hb.pid))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(session_id: &str, pid: u32) -> Heartbeat {
        Heartbeat {
            session_id: session_id.to_string(),
            project_dir: PathBuf::from("/project"),
            todo_state: TodoState { completed: 1, total: 3 },
            timestamp: Utc::now(),
            pid,
        }
    }

    #[test]
    fn write_creates_both_copies() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        write(project.path(), home.path(), &sample("s1", std::process::id())).unwrap();
        assert!(heartbeat_path(project.path(), "s1").exists());
        assert!(heartbeat_path(home.path(), "s1").exists());
    }

    #[test]
    fn clear_removes_both_copies() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        write(project.path(), home.path(), &sample("s1", std::process::id())).unwrap();
        clear(project.path(), home.path(), "s1");
        assert!(!heartbeat_path(project.path(), "s1").exists());
        assert!(!heartbeat_path(home.path(), "s1").exists());
    }

    #[test]
    fn clear_on_missing_file_is_not_an_error() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        clear(project.path(), home.path(), "never-existed");
    }

    #[test]
    fn live_process_is_not_stale() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        write(project.path(), home.path(), &sample("s1", std::process::id())).unwrap();
        let stale = find_stale_heartbeats(project.path(), home.path());
        assert!(stale.is_empty());
    }

    #[test]
    fn dead_pid_is_stale() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        // PID 1 belongs to init on any real Unix host and is unreachable
        // from within this process's PID namespace in the common case, but
        // a genuinely unused high PID is a more reliable "dead" stand-in
        // across sandboxes.
        write(project.path(), home.path(), &sample("s1", 999_999)).unwrap();
        let stale = find_stale_heartbeats(project.path(), home.path());
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].session_id, "s1");
    }

    #[test]
    fn project_local_copy_wins_dedup() {
        let project = tempdir().unwrap();
        let home = tempdir().unwrap();
        write(project.path(), home.path(), &sample("s1", std::process::id())).unwrap();
        // Overwrite only the home copy with a dead pid — project-local
        // copy must win, so this session should not be reported stale.
        let home_hb = sample("s1", 999_999);
        std::fs::write(
            heartbeat_path(home.path(), "s1"),
            serde_json::to_string(&home_hb).unwrap(),
        )
        .unwrap();
        let stale = find_stale_heartbeats(project.path(), home.path());
        assert!(stale.is_empty());
    }
}
