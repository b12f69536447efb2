//! Per-workspace recursive file watcher. §4.8
//!
//! Bridges `notify` + `notify-debouncer-mini` filesystem events into
//! `ChangeEvent`s broadcast to the change buffer and any external observer.
//! Grounded on the pack's own notify/notify-debouncer-mini pairing for
//! exactly this retrieval use case (coco-retrieval's `Cargo.toml`).

use crate::change_buffer::{ChangeEvent, ChangeKind};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const DEFAULT_EXTRA_IGNORES: &[&str] = &["*.tmp", "*.temp"];

pub struct IgnorePredicate {
    dir_names: Vec<String>,
    glob_suffixes: Vec<String>,
}

impl IgnorePredicate {
    pub fn new(ignored_dirs: &[String], user_patterns: &[String]) -> Self {
        let mut dir_names: Vec<String> = ignored_dirs.to_vec();
        let mut glob_suffixes: Vec<String> =
            DEFAULT_EXTRA_IGNORES.iter().map(|s| s.trim_start_matches('*').to_string()).collect();
        for p in user_patterns {
            if let Some(suffix) = p.strip_prefix('*') {
                glob_suffixes.push(suffix.to_string());
            } else {
                dir_names.push(p.clone());
            }
        }
        dir_names.retain(|d| !d.is_empty());
        Self { dir_names, glob_suffixes }
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if path.components().any(|c| {
            let s = c.as_os_str().to_string_lossy();
            s.starts_with('.') || self.dir_names.iter().any(|d| d == s.as_ref())
        }) {
            return true;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        self.glob_suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
    }
}

pub struct Watcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    tx: broadcast::Sender<ChangeEvent>,
}

impl Watcher {
    /// Start watching `workspace` recursively. Errors from the watcher are
    /// logged and the watcher is not restarted automatically (§4.8).
    pub fn start(workspace: &Path, ignored_dirs: &[String], user_patterns: &[String]) -> Option<Self> {
        let (tx, _rx) = broadcast::channel(1024);
        let ignore = IgnorePredicate::new(ignored_dirs, user_patterns);
        let emitter = tx.clone();

        let mut debouncer = match new_debouncer(Duration::from_millis(200), move |res: DebounceEventResult| {
            match res {
                Ok(events) => {
                    for ev in events {
                        if ignore.is_ignored(&ev.path) {
                            continue;
                        }
                        let kind = classify(&ev.path, ev.kind);
                        let _ = emitter.send(ChangeEvent { kind, path: ev.path.clone(), at: Instant::now() });
                    }
                }
                Err(e) => tracing::warn!(error = %e, "file watcher error"),
            }
        }) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start file watcher");
                return None;
            }
        };

        if let Err(e) = debouncer.watcher().watch(workspace, notify::RecursiveMode::Recursive) {
            tracing::warn!(error = %e, workspace = %workspace.display(), "failed to watch workspace");
            return None;
        }

        Some(Self { _debouncer: debouncer, tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

fn classify(path: &Path, kind: DebouncedEventKind) -> ChangeKind {
    match kind {
        DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous => {
            if path.exists() {
                ChangeKind::Update
            } else {
                ChangeKind::Delete
            }
        }
        _ => ChangeKind::Update,
    }
}

/// A structured notification forwarded to an external observer (e.g. a
/// language server facade) alongside the change buffer delivery.
#[derive(Debug, Clone)]
pub struct WatcherNotification {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_predicate_matches_fixed_dir_list() {
        let pred = IgnorePredicate::new(&["node_modules".into(), ".git".into()], &[]);
        assert!(pred.is_ignored(Path::new("/repo/node_modules/x.js")));
        assert!(pred.is_ignored(Path::new("/repo/.git/HEAD")));
        assert!(!pred.is_ignored(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn ignore_predicate_matches_user_glob_suffix() {
        let pred = IgnorePredicate::new(&[], &["*.tmp".into()]);
        assert!(pred.is_ignored(Path::new("/repo/scratch.tmp")));
        assert!(!pred.is_ignored(Path::new("/repo/scratch.rs")));
    }

    #[test]
    fn ignore_predicate_matches_hidden_dot_directories() {
        let pred = IgnorePredicate::new(&[], &[]);
        assert!(pred.is_ignored(Path::new("/repo/.codeidx/config.json")));
    }
}
