//! The long-lived announcer service.
//!
//! Owns the shared repository handle, the epoch catalog and the selector
//! settings. Repository work is blocking (it shells out to `git`), so every
//! operation here hops onto tokio's blocking pool.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use announcer_core::epoch::{Basis, Catalog};
use announcer_core::repository::{Git, SharedRepository};
use announcer_core::select::{SelectRequest, Selection, Selector, SelectorConfig};

use crate::config::Config;
use crate::git::GitCli;

#[derive(Clone)]
pub struct Announcer {
    repository: Arc<SharedRepository>,
    catalog: Arc<Catalog>,
    selector: SelectorConfig,
}

impl Announcer {
    pub fn new(git: Arc<dyn Git>, config: &Config) -> Self {
        Self {
            repository: Arc::new(SharedRepository::new(git, config.repository.clone_options())),
            catalog: Arc::new(Catalog::standard()),
            selector: config.repository.selector_config(),
        }
    }

    /// An announcer backed by the `git` binary, cloning into the configured
    /// cache directory.
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(GitCli::new(config.cache_dir())), config)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Whether the initial clone has completed.
    pub fn is_ready(&self) -> bool {
        self.repository.is_initialized()
    }

    /// Performs the initial clone.
    pub async fn initialize(&self) -> Result<()> {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || repository.clone_remote())
            .await
            .context("clone task panicked")?
            .with_context(|| format!("Failed to clone {}", self.repository.options().url))
    }

    /// Fetches new history on the tracked branch.
    pub async fn refresh(&self) -> Result<()> {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || repository.fetch(None))
            .await
            .context("fetch task panicked")??;
        Ok(())
    }

    /// Discards the local clone and clones again.
    pub async fn reset(&self) -> Result<()> {
        let repository = self.repository.clone();
        tokio::task::spawn_blocking(move || repository.reset())
            .await
            .context("reset task panicked")??;
        Ok(())
    }

    /// Runs one selection.
    ///
    /// Selection failures come back as [`SelectError`] inside the
    /// `anyhow::Error`; callers downcast to tell validation errors and
    /// partial results apart from repository faults.
    ///
    /// [`SelectError`]: announcer_core::error::SelectError
    pub async fn select(&self, request: SelectRequest, basis: Basis) -> Result<Selection> {
        let repository = self.repository.clone();
        let catalog = self.catalog.clone();
        let config = self.selector.clone();
        let selection = tokio::task::spawn_blocking(move || {
            Selector::new(&catalog, config).select(&repository, &request, &basis)
        })
        .await
        .context("selection task panicked")??;
        Ok(selection)
    }

    /// Spawns the periodic fetch. The first fetch happens one interval
    /// after the call; ticks missed while a fetch runs are not replayed.
    pub fn spawn_refresh_loop(&self, every: Duration) -> JoinHandle<()> {
        let announcer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !announcer.is_ready() {
                    tracing::warn!("repository not initialized; skipping refresh");
                    continue;
                }
                match announcer.refresh().await {
                    Ok(()) => tracing::debug!("refresh complete"),
                    Err(e) => tracing::error!(error = %format!("{:#}", e), "refresh failed"),
                }
            }
        })
    }
}
