//! Repository access.
//!
//! Defines the narrow capability the selector needs from a git repository:
//! list tags, resolve a commit, and deepen history. Implementations live
//! outside the core crate (the `git` CLI adapter in the app) except for the
//! in-memory [`MemoryRepository`] used by tests and the GitHub command.
//!
//! [`SharedRepository`] owns the process-wide handle. Selection passes hold a
//! read guard; fetch and reset take the write guard.

mod memory;

pub use memory::MemoryRepository;

use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::error::RepositoryError;
use crate::models::{Commit, ObjectId};
use crate::stream::ReferenceStream;

/// Where and how to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneOptions {
    pub url: String,
    pub remote: String,
    pub branch: String,
    /// History depth; `0` means full history.
    pub depth: u32,
}

/// Arguments for an incremental fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub remote: String,
    pub refspec: String,
    /// Additional commits of history to fetch beyond the current shallow
    /// boundary. `None` fetches new commits only.
    pub deepen: Option<u32>,
}

impl FetchOptions {
    /// Fetch options that track `branch` on `remote`.
    pub fn for_branch(remote: &str, branch: &str, deepen: Option<u32>) -> Self {
        Self {
            remote: remote.to_string(),
            refspec: format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}"),
            deepen,
        }
    }
}

/// An opened local repository.
pub trait Repository: Send + Sync {
    /// All tag references, in repository order.
    fn tags(&self) -> Result<Box<dyn ReferenceStream>, RepositoryError>;

    /// Resolves a commit and its committer time.
    fn commit(&self, id: &ObjectId) -> Result<Commit, RepositoryError>;

    fn fetch(&mut self, options: &FetchOptions) -> Result<(), RepositoryError>;
}

/// Factory for repositories.
pub trait Git: Send + Sync {
    fn clone_repository(&self, options: &CloneOptions) -> Result<Box<dyn Repository>, RepositoryError>;
}

/// The process-wide repository handle.
///
/// Starts empty; [`clone_remote`](Self::clone_remote) populates it. A failed
/// re-clone keeps the previous handle.
pub struct SharedRepository {
    git: Arc<dyn Git>,
    options: CloneOptions,
    inner: RwLock<Option<Box<dyn Repository>>>,
}

impl SharedRepository {
    pub fn new(git: Arc<dyn Git>, options: CloneOptions) -> Self {
        Self {
            git,
            options,
            inner: RwLock::new(None),
        }
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Clones the remote and installs the result as the current handle.
    ///
    /// The clone runs without holding the lock, so readers keep using the
    /// old handle until the swap.
    pub fn clone_remote(&self) -> Result<(), RepositoryError> {
        tracing::info!(url = %self.options.url, depth = self.options.depth, "cloning repository");
        let repo = self.git.clone_repository(&self.options)?;
        *self.inner.write() = Some(repo);
        tracing::info!(url = %self.options.url, "repository ready");
        Ok(())
    }

    /// Drops the current clone and re-clones from scratch.
    pub fn reset(&self) -> Result<(), RepositoryError> {
        tracing::warn!(url = %self.options.url, "resetting repository");
        self.clone_remote()
    }

    /// Read access for one selection pass. `None` until initialized.
    pub fn read(&self) -> Option<MappedRwLockReadGuard<'_, dyn Repository>> {
        RwLockReadGuard::try_map(self.inner.read(), |repo| repo.as_deref()).ok()
    }

    /// Fetches the tracked branch, optionally deepening history.
    pub fn fetch(&self, deepen: Option<u32>) -> Result<(), RepositoryError> {
        let options = FetchOptions::for_branch(&self.options.remote, &self.options.branch, deepen);
        let mut guard = self.inner.write();
        let repo = guard.as_mut().ok_or(RepositoryError::NotInitialized)?;
        tracing::debug!(remote = %options.remote, deepen = ?deepen, "fetching");
        repo.fetch(&options)
    }
}
