//! Git access for the sync engine.
//!
//! Every operation degrades to `None` on failure (not a repository, git not
//! installed, unknown commit) so callers can skip a tick instead of erroring.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::debug;

use crate::domain::SubmoduleInfo;

/// Read-only view of a git repository.
#[async_trait]
pub trait GitPort: Send + Sync {
    /// Raw `git submodule status` output.
    async fn submodule_status(&self, repo_root: &Path) -> Option<String>;

    /// `git --version` output.
    async fn version(&self) -> Option<String>;

    /// Full sha of HEAD.
    async fn head_commit(&self, repo_root: &Path) -> Option<String>;

    /// Repo-relative paths changed between `from` and HEAD. A rename lists
    /// both the old and the new path.
    async fn diff_files(&self, repo_root: &Path, from: &str) -> Option<Vec<String>>;
}

/// `GitPort` backed by the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    async fn run(&self, repo_root: Option<&Path>, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(root) = repo_root {
            cmd.current_dir(root);
        }

        let output = match cmd.output().await {
            Ok(o) => o,
            Err(e) => {
                debug!("Failed to run git {:?}: {}", args, e);
                return None;
            }
        };

        if !output.status.success() {
            debug!(
                "git {:?} exited with {}: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }

        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitPort for GitCli {
    async fn submodule_status(&self, repo_root: &Path) -> Option<String> {
        self.run(Some(repo_root), &["submodule", "status"]).await
    }

    async fn version(&self) -> Option<String> {
        self.run(None, &["--version"])
            .await
            .map(|v| v.trim().to_string())
    }

    async fn head_commit(&self, repo_root: &Path) -> Option<String> {
        self.run(Some(repo_root), &["rev-parse", "HEAD"])
            .await
            .map(|sha| sha.trim().to_string())
            .filter(|sha| !sha.is_empty())
    }

    async fn diff_files(&self, repo_root: &Path, from: &str) -> Option<Vec<String>> {
        let output = self
            .run(
                Some(repo_root),
                &["diff", "--name-only", "--no-renames", from, "HEAD"],
            )
            .await?;
        Some(
            output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

fn status_line() -> &'static Regex {
    static LINE: OnceLock<Regex> = OnceLock::new();
    LINE.get_or_init(|| {
        Regex::new(r"^([ +\-U])([0-9a-fA-F]+) (\S+)(?: \(.*\))?$")
            .expect("submodule status regex is valid")
    })
}

/// Parse `git submodule status` output.
///
/// A leading `-` marks a submodule that has not been checked out.
pub fn parse_submodule_status(output: &str) -> Vec<SubmoduleInfo> {
    output
        .lines()
        .filter_map(|line| {
            let caps = status_line().captures(line.trim_end())?;
            Some(SubmoduleInfo {
                path: caps[3].to_string(),
                commit: caps[2].to_string(),
                initialized: &caps[1] != "-",
            })
        })
        .collect()
}

/// Current submodules of `repo_root`; empty when git cannot report them.
pub async fn list_submodules(git: &dyn GitPort, repo_root: &Path) -> Vec<SubmoduleInfo> {
    match git.submodule_status(repo_root).await {
        Some(output) => parse_submodule_status(&output),
        None => Vec::new(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submodule_status() {
        let output = concat!(
            " 3f2a9c1d0e4b5a6978877665544332211ffeedd1 libs/core (v1.2.0)\n",
            "-a1b2c3d4e5f60718293a4b5c6d7e8f9012345678 vendor/unused\n",
            "+0123456789abcdef0123456789abcdef01234567 libs/ui (heads/main)\n",
        );
        let subs = parse_submodule_status(output);
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].path, "libs/core");
        assert_eq!(subs[0].commit, "3f2a9c1d0e4b5a6978877665544332211ffeedd1");
        assert!(subs[0].initialized);
        assert_eq!(subs[1].path, "vendor/unused");
        assert!(!subs[1].initialized);
        assert_eq!(subs[2].commit, "0123456789abcdef0123456789abcdef01234567");
        assert!(subs[2].initialized);
    }

    #[test]
    fn test_parse_submodule_status_ignores_noise() {
        assert!(parse_submodule_status("").is_empty());
        assert!(parse_submodule_status("fatal: not a git repository").is_empty());
    }

    #[tokio::test]
    async fn test_head_commit_outside_repo_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let git = GitCli;
        assert_eq!(git.head_commit(dir.path()).await, None);
        assert_eq!(git.diff_files(dir.path(), "HEAD~1").await, None);
    }

    #[tokio::test]
    async fn test_diff_lists_both_sides_of_a_rename() {
        let git = GitCli;
        if git.version().await.is_none() {
            return;
        }

        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path();
        fake::git_in(root, &["init", "-q"]);
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.rs"), "pub fn a() -> u32 { 42 }\n").unwrap();
        fake::git_in(root, &["add", "."]);
        fake::git_in(root, &["commit", "-q", "-m", "first"]);
        let first = git.head_commit(root).await.unwrap();

        fake::git_in(root, &["mv", "src/a.rs", "src/b.rs"]);
        fake::git_in(root, &["commit", "-q", "-m", "rename"]);

        let mut diff = git.diff_files(root, &first).await.unwrap();
        diff.sort();
        assert_eq!(diff, vec!["src/a.rs".to_string(), "src/b.rs".to_string()]);
    }
}
