//! File watcher for incremental re-indexing. Debounces a burst of
//! filesystem events into a single pass per settled path, then hands each
//! settled path to the caller's reindex callback (normally
//! `Pipeline::index_path`).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

const DEBOUNCE_MS: u64 = 500;

/// Starts watching `worktree_root` recursively. Returns the watcher
/// handle — dropping it stops watching. `None` on a platform/backend
/// failure to create or attach the watcher (logged, never fatal to the
/// caller). `on_change` runs on the debounce thread once per settled path;
/// it must not block for long.
pub fn start_watcher<F>(worktree_root: PathBuf, on_change: F) -> Option<RecommendedWatcher>
where
    F: Fn(&std::path::Path) + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("failed to create file watcher: {e}");
            return None;
        }
    };

    if !worktree_root.exists() {
        tracing::warn!(path = %worktree_root.display(), "cannot watch a worktree that does not exist");
        return None;
    }

    if let Err(e) = watcher.watch(&worktree_root, RecursiveMode::Recursive) {
        tracing::warn!(path = %worktree_root.display(), "failed to watch worktree: {e}");
        return None;
    }
    tracing::info!(path = %worktree_root.display(), "watching worktree for changes");

    std::thread::spawn(move || debounce_loop(rx, on_change));

    Some(watcher)
}

fn debounce_loop<F>(rx: mpsc::Receiver<Event>, on_change: F)
where
    F: Fn(&std::path::Path) + Send + 'static,
{
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> = pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                for path in &ready {
                    pending.remove(path);
                }
                for path in &ready {
                    if path.is_dir() {
                        continue;
                    }
                    on_change(path);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_coalesces_repeated_paths_to_one_pending_entry() {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        let now = Instant::now();
        pending.insert(PathBuf::from("/tmp/a.rs"), now);
        pending.insert(PathBuf::from("/tmp/a.rs"), now);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn watcher_on_missing_path_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(start_watcher(missing, |_| {}).is_none());
    }

    #[test]
    fn watcher_attaches_to_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let handle = start_watcher(dir.path().to_path_buf(), |_| {});
        assert!(handle.is_some());
    }
}
