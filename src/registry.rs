//! Process-wide registry of index services, keyed by normalized workspace
//! path. §5, §9: "model as a process-wide registry protected by a mutex,
//! entries owning their service exclusively."

use crate::service::IndexService;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<IndexService>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<IndexService>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn normalize(workspace: &Path) -> PathBuf {
    std::fs::canonicalize(workspace).unwrap_or_else(|_| workspace.to_path_buf())
}

/// Return the existing service for `workspace`, or construct and register a
/// new one via `IndexService::new`.
pub fn get_or_create(workspace: &Path) -> Arc<IndexService> {
    let key = normalize(workspace);
    let mut map = registry().lock().unwrap();
    map.entry(key.clone()).or_insert_with(|| Arc::new(IndexService::new(key.clone()))).clone()
}

pub fn get(workspace: &Path) -> Option<Arc<IndexService>> {
    let key = normalize(workspace);
    registry().lock().unwrap().get(&key).cloned()
}

/// Drop the registry's handle to `workspace`'s service; called by `destroy()`.
pub fn remove(workspace: &Path) {
    let key = normalize(workspace);
    registry().lock().unwrap().remove(&key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_same_instance_for_same_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let a = get_or_create(dir.path());
        let b = get_or_create(dir.path());
        assert!(Arc::ptr_eq(&a, &b));
        remove(dir.path());
    }

    #[test]
    fn remove_drops_the_registry_entry() {
        let dir = tempfile::tempdir().unwrap();
        let _a = get_or_create(dir.path());
        remove(dir.path());
        assert!(get(dir.path()).is_none());
    }
}
