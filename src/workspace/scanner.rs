//! File collection for repository indexing.
//!
//! Walks the effective root of a repository (its path plus optional monorepo
//! `base_path`) with `ignore::WalkBuilder`, keeping files whose name ends in a
//! configured extension and pruning any directory listed in `ignore_dirs`.
//! Sizes are re-checked against `max_file_size_kb` before content is read.

use anyhow::{bail, Context, Result};
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::domain::{FileInfo, RepoConfig};

/// Whether a logical path passes the extension and ignore-dir filters.
///
/// Size is not checked here; it is re-checked when the file is read.
pub fn is_included(config: &RepoConfig, logical_path: &str) -> bool {
    let in_ignored_dir = logical_path
        .rsplit_once('/')
        .map(|(dirs, _)| dirs.split('/').any(|d| config.ignore_dirs.contains(d)))
        .unwrap_or(false);

    !in_ignored_dir && matches_extension(config, logical_path)
}

fn matches_extension(config: &RepoConfig, path: &str) -> bool {
    config.extensions.iter().any(|ext| {
        if ext.starts_with('.') {
            path.ends_with(ext.as_str())
        } else {
            path.ends_with(&format!(".{}", ext))
        }
    })
}

/// Map a path relative to the repository root into logical path space.
///
/// Returns `None` when the path lies outside `base_path`.
pub fn logical_from_repo_relative(config: &RepoConfig, repo_relative: &str) -> Option<String> {
    let normalized = repo_relative.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    match config.base_prefix() {
        Some(prefix) => normalized
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .map(str::to_string),
        None => Some(normalized.to_string()),
    }
}

/// Map an absolute path (e.g. from a filesystem event) into logical path space.
pub fn logical_from_absolute(config: &RepoConfig, absolute: &Path) -> Option<String> {
    let relative = absolute.strip_prefix(&config.path).ok()?;
    let relative = relative.to_string_lossy();
    if relative.is_empty() {
        return None;
    }
    logical_from_repo_relative(config, &relative)
}

fn size_kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

/// Collect every included file under the repository's effective root.
pub fn collect_files(config: &RepoConfig) -> Result<Vec<FileInfo>> {
    collect_files_excluding(config, &HashSet::new())
}

/// Collect files, pruning the given absolute directories (used for submodule checkouts).
pub(crate) fn collect_files_excluding(
    config: &RepoConfig,
    excluded_dirs: &HashSet<PathBuf>,
) -> Result<Vec<FileInfo>> {
    let root = config.effective_root();
    if !root.is_dir() {
        bail!("Repository root is not a directory: {}", root.display());
    }

    debug!("Collecting files under {}", root.display());

    let ignore_dirs = config.ignore_dirs.clone();
    let excluded = excluded_dirs.clone();
    let mut builder = WalkBuilder::new(&root);
    builder
        .standard_filters(false)
        .hidden(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !ignore_dirs.contains(&*name) && !excluded.contains(entry.path())
        });

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error walking directory: {}", e);
                continue;
            }
        };

        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let relative = match entry.path().strip_prefix(&root) {
            Ok(p) => p.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                warn!("Failed to get relative path for {}", entry.path().display());
                continue;
            }
        };

        if !is_included(config, &relative) {
            continue;
        }

        match read_candidate(config, entry.path(), relative) {
            Ok(Some(file)) => files.push(file),
            Ok(None) => {}
            Err(e) => warn!("{:#}", e),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Collected {} files", files.len());

    Ok(files)
}

/// Stat then read one file. `None` means the file is gone, oversized or not text.
fn read_candidate(config: &RepoConfig, absolute: &Path, logical: String) -> Result<Option<FileInfo>> {
    let metadata = match fs::metadata(absolute) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to stat {}", absolute.display()))
        }
    };

    let kb = size_kb(metadata.len());
    if kb > config.max_file_size_kb as f64 {
        debug!("Skipping large file ({:.1} KB): {}", kb, logical);
        return Ok(None);
    }

    let bytes = match fs::read(absolute) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", absolute.display()))
        }
    };

    match String::from_utf8(bytes) {
        Ok(content) => Ok(Some(FileInfo {
            path: logical,
            content,
            size_kb: kb,
        })),
        Err(_) => {
            debug!("Skipping binary file: {}", logical);
            Ok(None)
        }
    }
}

/// Read a single logical path for re-indexing.
///
/// `Ok(None)` means the file should be treated as removed: it no longer
/// exists, exceeds the size limit, or is not valid UTF-8.
pub async fn collect_file(config: &RepoConfig, logical_path: &str) -> Result<Option<FileInfo>> {
    let absolute = config.effective_root().join(logical_path);
    let config = config.clone();
    let logical = logical_path.to_string();
    tokio::task::spawn_blocking(move || read_candidate(&config, &absolute, logical))
        .await
        .context("File read task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_is_included() {
        let config = RepoConfig::new("/repo");
        assert!(is_included(&config, "src/main.rs"));
        assert!(is_included(&config, "README.md"));
        assert!(!is_included(&config, "node_modules/pkg/index.js"));
        assert!(!is_included(&config, "crates/a/target/debug/build.rs"));
        assert!(!is_included(&config, "image.png"));
    }

    #[test]
    fn test_extension_without_dot() {
        let mut config = RepoConfig::new("/repo");
        config.extensions = ["rs".to_string()].into_iter().collect();
        assert!(is_included(&config, "lib.rs"));
        assert!(!is_included(&config, "librs"));
    }

    #[test]
    fn test_logical_paths_with_base_path() {
        let mut config = RepoConfig::new("/repo");
        config.base_path = Some("packages/web".to_string());

        assert_eq!(
            logical_from_repo_relative(&config, "packages/web/src/app.ts").as_deref(),
            Some("src/app.ts")
        );
        assert_eq!(logical_from_repo_relative(&config, "packages/api/main.ts"), None);
        assert_eq!(logical_from_repo_relative(&config, "packages/webapp/x.ts"), None);
        assert_eq!(
            logical_from_absolute(&config, Path::new("/repo/packages/web/index.ts")).as_deref(),
            Some("index.ts")
        );
        assert_eq!(logical_from_absolute(&config, Path::new("/elsewhere/a.ts")), None);
    }

    #[test]
    fn test_collect_files_filters() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "src/main.rs", "fn main() {}");
        write(root, "src/notes.bin", "binary-ish");
        write(root, "node_modules/dep/index.js", "module.exports = 1;");
        write(root, "big.rs", &"x".repeat(3 * 1024));

        let mut config = RepoConfig::new(root);
        config.max_file_size_kb = 2;

        let files = collect_files(&config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs"]);
        assert_eq!(files[0].content, "fn main() {}");
    }

    #[test]
    fn test_collect_files_base_path() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "packages/web/src/app.ts", "export {}");
        write(root, "packages/api/src/server.ts", "export {}");

        let mut config = RepoConfig::new(root);
        config.base_path = Some("packages/web".to_string());

        let files = collect_files(&config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/app.ts");
    }

    #[tokio::test]
    async fn test_collect_file_missing_and_oversized() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(root, "small.rs", "let x = 1;");
        write(root, "large.rs", &"y".repeat(2048));

        let mut config = RepoConfig::new(root);
        config.max_file_size_kb = 1;

        assert!(collect_file(&config, "small.rs").await.unwrap().is_some());
        assert!(collect_file(&config, "large.rs").await.unwrap().is_none());
        assert!(collect_file(&config, "gone.rs").await.unwrap().is_none());
    }
}
