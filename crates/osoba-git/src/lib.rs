//! Worktree adapter: `git2`-backed worktree, branch, and fetch/merge
//! operations (spec §4.3). `git2` is synchronous, so every method offloads
//! its work to [`tokio::task::spawn_blocking`], following the teacher
//! pack's `vcs.rs` idiom for worktree and branch CRUD (`Repository::discover`,
//! `WorktreeAddOptions`, `WorktreePruneOptions`, `find_branch`/`branch`/`delete`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use git2::{BranchType, ErrorCode, Repository, WorktreeAddOptions, WorktreePruneOptions};
use thiserror::Error;
use tracing::{info, warn};

use osoba_core::ports::Worktree;
use osoba_core::ticket::{branch_name, parse_issue_id, window_name, worktree_path};

#[derive(Error, Debug)]
pub enum Error {
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("blocking task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("no commit to branch from: repository has no HEAD")]
    NoHead,
}

impl From<Error> for osoba_core::Error {
    fn from(err: Error) -> Self {
        osoba_core::Error::transient(err.to_string())
    }
}

type Result<T> = std::result::Result<T, osoba_core::Error>;

pub struct GitWorktree;

impl GitWorktree {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitWorktree {
    fn default() -> Self {
        Self::new()
    }
}

async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(Error::Join)?
        .map_err(Into::into)
}

fn open(repo_root: &Path) -> std::result::Result<Repository, Error> {
    Ok(Repository::discover(repo_root)?)
}

fn ensure_branch(repo: &Repository, branch: &str) -> std::result::Result<(), Error> {
    if repo.find_branch(branch, BranchType::Local).is_ok() {
        return Ok(());
    }
    let head = repo.head()?;
    let commit = head.peel_to_commit().map_err(|_| Error::NoHead)?;
    repo.branch(branch, &commit, false)?;
    Ok(())
}

#[async_trait]
impl Worktree for GitWorktree {
    async fn ensure_worktree_for_issue(&self, repo_root: &Path, id: u64) -> Result<PathBuf> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            let name = window_name(id);
            let path = worktree_path(&repo_root, id);

            if repo.find_worktree(&name).is_ok() {
                return Ok(path);
            }

            let branch = branch_name(id);
            ensure_branch(&repo, &branch)?;

            let reference = repo.find_reference(&format!("refs/heads/{branch}"))?;
            let mut opts = WorktreeAddOptions::new();
            opts.reference(Some(&reference));
            repo.worktree(&name, &path, Some(&opts))?;
            info!(issue_id = id, path = %path.display(), "created worktree");
            Ok(path)
        })
        .await
    }

    async fn remove_worktree_for_issue(&self, repo_root: &Path, id: u64) -> Result<()> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            let name = window_name(id);
            let worktree = match repo.find_worktree(&name) {
                Ok(w) => w,
                Err(err) if err.code() == ErrorCode::NotFound => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let mut opts = WorktreePruneOptions::new();
            opts.valid(true).locked(true).working_tree(true);
            worktree.prune(Some(&mut opts))?;
            Ok(())
        })
        .await
    }

    async fn worktree_exists_for_issue(&self, repo_root: &Path, id: u64) -> Result<bool> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            Ok(repo.find_worktree(&window_name(id)).is_ok())
        })
        .await
    }

    async fn update_main_branch(&self, repo_root: &Path) -> Result<()> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            let original_branch = repo
                .head()
                .ok()
                .and_then(|h| h.shorthand().map(str::to_string));

            let result = (|| -> std::result::Result<(), Error> {
                let mut remote = repo.find_remote("origin")?;
                remote.fetch(&["main"], None, None)?;

                let fetch_head = repo.find_reference("FETCH_HEAD")?;
                let fetch_commit = repo.reference_to_annotated_commit(&fetch_head)?;
                let analysis = repo.merge_analysis(&[&fetch_commit])?;

                if analysis.0.is_up_to_date() {
                    return Ok(());
                }
                if !analysis.0.is_fast_forward() {
                    return Err(git2::Error::from_str(
                        "main branch has diverged, cannot fast-forward",
                    )
                    .into());
                }

                let mut main_ref = repo.find_reference("refs/heads/main")?;
                main_ref.set_target(fetch_commit.id(), "fast-forward main")?;
                repo.set_head("refs/heads/main")?;
                repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
                Ok(())
            })();

            if result.is_err() {
                if let Some(branch) = original_branch {
                    let _ = repo.set_head(&format!("refs/heads/{branch}"));
                    let _ = repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()));
                }
            }

            result
        })
        .await
    }

    async fn list_worktree_ids(&self, repo_root: &Path) -> Result<Vec<u64>> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            Ok(repo
                .worktrees()?
                .iter()
                .flatten()
                .filter_map(parse_issue_id)
                .collect())
        })
        .await
    }

    async fn delete_branch_for_issue(&self, repo_root: &Path, id: u64) -> Result<()> {
        let repo_root = repo_root.to_path_buf();
        blocking(move || {
            let repo = open(&repo_root)?;
            let branch = branch_name(id);
            match repo.find_branch(&branch, BranchType::Local) {
                Ok(mut b) => {
                    b.delete()?;
                    Ok(())
                }
                Err(err) if err.code() == ErrorCode::NotFound => Ok(()),
                Err(err) => {
                    warn!(issue_id = id, error = %err, "failed to delete branch");
                    Err(err.into())
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_discover_fails_cleanly_outside_a_repo() {
        let dir = tempfile::tempdir().unwrap();
        let err = open(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Git(_)));
    }
}
