//! Submodule-aware file collection.
//!
//! Initialized submodules are collected from their checkout directory and
//! re-prefixed with their logical path. Nested submodules are not expanded.

use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

use super::scanner::{collect_files, collect_files_excluding, logical_from_repo_relative};
use crate::domain::{FileInfo, RepoConfig, SubmoduleInfo};

/// Collect files from one submodule, with paths in the parent's logical space.
///
/// An uninitialized submodule, or one outside `base_path`, contributes nothing.
pub fn collect_submodule_files(
    config: &RepoConfig,
    submodule: &SubmoduleInfo,
) -> Result<Vec<FileInfo>> {
    if !submodule.initialized {
        debug!("Skipping uninitialized submodule {}", submodule.path);
        return Ok(Vec::new());
    }

    let Some(prefix) = logical_from_repo_relative(config, &submodule.path) else {
        return Ok(Vec::new());
    };

    let sub_config = RepoConfig {
        path: config.path.join(&submodule.path),
        base_path: None,
        include_submodules: false,
        ..config.clone()
    };

    let files = collect_files(&sub_config)?
        .into_iter()
        .map(|mut file| {
            file.path = format!("{}/{}", prefix, file.path);
            file
        })
        .collect();

    Ok(files)
}

/// Collect the repository, expanding initialized submodules.
///
/// Submodule checkouts are pruned from the parent walk so their files are
/// only produced once, by the submodule pass.
pub fn collect_with_submodules(
    config: &RepoConfig,
    submodules: &[SubmoduleInfo],
) -> Result<Vec<FileInfo>> {
    let excluded: HashSet<PathBuf> = submodules
        .iter()
        .map(|s| config.path.join(&s.path))
        .collect();

    let mut files = collect_files_excluding(config, &excluded)?;
    for submodule in submodules {
        files.extend(collect_submodule_files(config, submodule)?);
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// The initialized submodule whose logical path equals `logical_path`, if any.
pub fn submodule_at<'a>(
    config: &RepoConfig,
    submodules: &'a [SubmoduleInfo],
    logical_path: &str,
) -> Option<&'a SubmoduleInfo> {
    submodules.iter().find(|s| {
        s.initialized
            && logical_from_repo_relative(config, &s.path).as_deref() == Some(logical_path)
    })
}
