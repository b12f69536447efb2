//! Workspace file collection for the structural full index (§4.9 step 1).
//!
//! Respects `.gitignore` (via the `ignore` crate's standard filters, the same
//! mechanism the teacher's own scanner used) in addition to the engine's
//! explicit `ignored_dirs` and `included_exts` allow-list.

use crate::config::Config;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub abs_path: PathBuf,
    /// Workspace-relative path with `/` separators.
    pub rel_path: String,
    pub bytes: u64,
}

fn build_overrides(workspace: &Path, ignored_dirs: &[String]) -> Result<Override, ignore::Error> {
    let mut ob = OverrideBuilder::new(workspace);
    for d in ignored_dirs {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        ob.add(&format!("**/{d}"))?;
        ob.add(&format!("**/{d}/**"))?;
    }
    // Always skip dot-directories per §4.9 step 1, regardless of config.
    ob.add("**/.*")?;
    ob.add("**/.*/**")?;
    ob.build()
}

/// Walk `workspace`, skipping ignored/dot directories, keeping only files
/// whose extension is allow-listed and whose size is within `max_file_size`.
pub fn collect_workspace_files(workspace: &Path, cfg: &Config) -> anyhow::Result<Vec<FileEntry>> {
    let overrides = build_overrides(workspace, &cfg.ignored_dirs)?;
    let walker = WalkBuilder::new(workspace)
        .standard_filters(true)
        .overrides(overrides)
        .build();

    let mut entries = Vec::new();
    for item in walker {
        let Ok(dent) = item else { continue };
        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let abs_path = dent.into_path();
        if !cfg.is_allowed_ext(&abs_path) {
            continue;
        }
        let Ok(meta) = std::fs::metadata(&abs_path) else {
            continue;
        };
        let bytes = meta.len();
        if bytes > cfg.max_file_size {
            continue;
        }
        let Ok(rel) = abs_path.strip_prefix(workspace) else {
            continue;
        };
        entries.push(FileEntry {
            abs_path: abs_path.clone(),
            rel_path: rel.to_string_lossy().replace('\\', "/"),
            bytes,
        });
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collects_only_allow_listed_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        fs::write(dir.path().join("b.exe"), [0u8; 4]).unwrap();
        let cfg = Config::default();
        let files = collect_workspace_files(dir.path(), &cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "a.rs");
    }

    #[test]
    fn skips_dot_directories_and_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/x.rs"), "fn x() {}").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/y.rs"), "fn y() {}").unwrap();
        fs::write(dir.path().join("keep.rs"), "fn keep() {}").unwrap();
        let cfg = Config::default();
        let files = collect_workspace_files(dir.path(), &cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "keep.rs");
    }

    #[test]
    fn skips_files_over_max_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.max_file_size = 4;
        fs::write(dir.path().join("small.rs"), "fn").unwrap();
        fs::write(dir.path().join("big.rs"), "fn a() {}").unwrap();
        let files = collect_workspace_files(dir.path(), &cfg).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "small.rs");
    }
}
