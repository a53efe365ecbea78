//! TOML configuration.
//!
//! ```toml
//! [repository]
//! url = "https://github.com/web-platform-tests/wpt.git"
//! branch = "master"
//! cache_dir = "./data/repo"
//! clone_depth = 200
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```
//!
//! Only `[repository].url` and `[server].bind` are required; every other
//! key has a default.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use announcer_core::repository::CloneOptions;
use announcer_core::select::SelectorConfig;
use announcer_core::stream::MERGED_PR_PREFIX;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    /// Remote URL; local paths and `file://` URLs work too.
    pub url: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Where the local clone lives. Defaults to `./data/repos/<hash of url>`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Initial clone depth; `0` clones full history.
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    #[serde(default = "default_fetch_chunk")]
    pub fetch_chunk: u32,
    #[serde(default = "default_max_depth_extensions")]
    pub max_depth_extensions: u32,
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
}

fn default_remote() -> String {
    "origin".to_string()
}
fn default_branch() -> String {
    "master".to_string()
}
fn default_clone_depth() -> u32 {
    100
}
fn default_fetch_chunk() -> u32 {
    100
}
fn default_max_depth_extensions() -> u32 {
    10
}
fn default_tag_prefix() -> String {
    MERGED_PR_PREFIX.to_string()
}

impl RepositoryConfig {
    pub fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            url: self.url.clone(),
            remote: self.remote.clone(),
            branch: self.branch.clone(),
            depth: self.clone_depth,
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            fetch_chunk: self.fetch_chunk,
            max_depth_extensions: self.max_depth_extensions,
            tag_prefix: self.tag_prefix.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Seconds between background fetches.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    pub owner: String,
    pub repo: String,
    /// Access token. Takes precedence over `token_path`.
    #[serde(default)]
    pub token: Option<String>,
    /// File containing an access token.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_github_batch_size")]
    pub batch_size: usize,
    /// Extra PRs fetched so that sorting by merge time is stable near the cut.
    #[serde(default = "default_slack_prs")]
    pub slack_prs: usize,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_github_batch_size() -> usize {
    100
}
fn default_slack_prs() -> usize {
    20
}

impl GithubConfig {
    /// Resolves the access token from `token` or `token_path`.
    ///
    /// A missing or unreadable token file is not an error; requests are
    /// then made anonymously.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Some(token.trim().to_string());
        }
        let path = self.token_path.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read GitHub token");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `ANNOUNCER_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Local clone directory, derived from the URL when not configured.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.repository.cache_dir {
            Some(dir) => dir.clone(),
            None => PathBuf::from("./data/repos").join(crate::git::short_hash(&self.repository.url)),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.repository.url.trim().is_empty() {
        bail!("repository.url must not be empty");
    }
    if config.repository.branch.trim().is_empty() {
        bail!("repository.branch must not be empty");
    }
    if !config.repository.tag_prefix.starts_with("refs/") {
        bail!(
            "repository.tag_prefix must be a full reference prefix (refs/...), got '{}'",
            config.repository.tag_prefix
        );
    }
    if config.repository.clone_depth > 0 && config.repository.fetch_chunk == 0 {
        bail!("repository.fetch_chunk must be > 0 for shallow clones");
    }
    if config.refresh.interval_secs == 0 {
        bail!("refresh.interval_secs must be > 0");
    }
    if let Some(github) = &config.github {
        if github.batch_size == 0 {
            bail!("github.batch_size must be > 0");
        }
        if github.owner.is_empty() || github.repo.is_empty() {
            bail!("github.owner and github.repo must be set");
        }
    }
    Ok(())
}
