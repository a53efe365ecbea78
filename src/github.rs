//! GitHub REST collaborator.
//!
//! Used by the `github prs` command to find epochal merged PRs without a
//! local clone, and by `github commits` for batched commit lookups. Every
//! fan-out is checked against the core rate limit first. Requests that fan out (commit lookups, PR pages) run on a
//! [`JoinSet`]; every task writes into its own slot and results are
//! aggregated after the join, so the first failure by position wins.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

use announcer_core::epoch::{Basis, Catalog};
use announcer_core::error::SelectError;
use announcer_core::models::ObjectId;
use announcer_core::repository::{CloneOptions, MemoryRepository, SharedRepository};
use announcer_core::select::{SelectRequest, Selection, Selector, SelectorConfig};

use crate::config::GithubConfig;

const PER_PAGE: usize = 100;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error(
        "{remaining} of {limit} remaining GitHub API requests insufficient for {needed} requests; limit resets at {reset}"
    )]
    RateLimitExceeded {
        needed: usize,
        remaining: u64,
        limit: u64,
        reset: DateTime<Utc>,
    },

    #[error("invalid access token")]
    InvalidToken,

    #[error("GitHub task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The `core` bucket of `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub reset: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Deserialize)]
struct RateLimitResources {
    core: RateLimit,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitActor {
    #[serde(default)]
    pub name: String,
    pub date: DateTime<Utc>,
}

/// A git commit object as returned by `GET /repos/{owner}/{repo}/git/commits/{sha}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitCommit {
    pub sha: String,
    pub committer: GitActor,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub merged_at: Option<DateTime<Utc>>,
    pub merge_commit_sha: Option<String>,
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: Arc<str>,
    owner: String,
    repo: String,
    base: String,
    batch_size: usize,
    slack_prs: usize,
}

impl GithubClient {
    /// Creates a client for `config`, listing PRs merged into `base`.
    pub fn new(config: &GithubConfig, base: &str) -> Result<Self, GithubError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("revision-announcer/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(token) = config.resolve_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| GithubError::InvalidToken)?;
            headers.insert(AUTHORIZATION, value);
        }
        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            api_url: Arc::from(config.api_url.trim_end_matches('/')),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            base: base.to_string(),
            batch_size: config.batch_size.max(1),
            slack_prs: config.slack_prs,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, path)
    }

    pub async fn core_rate_limit(&self) -> Result<RateLimit, GithubError> {
        let url = format!("{}/rate_limit", self.api_url);
        let response: RateLimitResponse = get_json(&self.http, &url).await?;
        let core = response.resources.core;
        tracing::info!(
            remaining = core.remaining,
            limit = core.limit,
            reset = %core.reset,
            "GitHub API requests remaining"
        );
        Ok(core)
    }

    /// Fails with [`GithubError::RateLimitExceeded`] unless `needed` more
    /// requests fit in the remaining core quota.
    async fn ensure_rate_limit(&self, needed: usize) -> Result<(), GithubError> {
        let rate = self.core_rate_limit().await?;
        if (rate.remaining as usize) < needed {
            return Err(GithubError::RateLimitExceeded {
                needed,
                remaining: rate.remaining,
                limit: rate.limit,
                reset: rate.reset,
            });
        }
        Ok(())
    }

    /// Looks up commits by hash, in input order.
    ///
    /// Fails up front when the remaining rate limit cannot cover one
    /// request per hash.
    pub async fn commits(&self, hashes: &[String]) -> Result<Vec<GitCommit>, GithubError> {
        self.ensure_rate_limit(hashes.len()).await?;

        let mut commits = Vec::with_capacity(hashes.len());
        for batch in hashes.chunks(self.batch_size) {
            let urls = batch
                .iter()
                .map(|hash| self.repo_url(&format!("git/commits/{}", hash)))
                .collect();
            commits.extend(fetch_all::<GitCommit>(&self.http, urls).await?);
        }
        Ok(commits)
    }

    /// The `num` most recently merged PRs into the base branch, newest
    /// merge first.
    ///
    /// PRs are listed by creation date, which only approximates merge
    /// order, so `slack_prs` extra PRs are fetched before sorting by merge
    /// time and truncating. Every round of page requests is checked against
    /// the rate limit before it is sent.
    pub async fn merged_prs(&self, num: usize) -> Result<Vec<PullRequest>, GithubError> {
        let total = num + self.slack_prs;
        let mut prs: Vec<PullRequest> = Vec::with_capacity(total);
        let mut next_page = 1;
        let mut num_pages = total.div_ceil(PER_PAGE) + 1;

        while prs.len() < total {
            self.ensure_rate_limit(num_pages).await?;
            let urls = (next_page..next_page + num_pages)
                .map(|page| {
                    self.repo_url(&format!(
                        "pulls?state=closed&base={}&sort=created&direction=desc&per_page={}&page={}",
                        self.base, PER_PAGE, page
                    ))
                })
                .collect();
            let pages = fetch_all::<Vec<PullRequest>>(&self.http, urls).await?;
            next_page += num_pages;
            num_pages = 1;

            let exhausted = pages.iter().all(Vec::is_empty);
            for page in pages {
                let room = total - prs.len();
                prs.extend(page.into_iter().filter(|pr| pr.merged_at.is_some()).take(room));
            }
            if exhausted {
                tracing::warn!(found = prs.len(), wanted = total, "ran out of pull requests");
                break;
            }
        }

        sort_by_merged_at(&mut prs);
        prs.truncate(num);
        Ok(prs)
    }
}

/// Newest merge first; unmerged PRs last.
pub fn sort_by_merged_at(prs: &mut [PullRequest]) {
    prs.sort_by(|a, b| b.merged_at.cmp(&a.merged_at));
}

async fn get_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> Result<T, GithubError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GithubError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            message: message.trim().to_string(),
        });
    }
    Ok(response.json::<T>().await?)
}

/// GETs every url concurrently. Results keep the order of `urls`; the
/// first failure by position is returned.
async fn fetch_all<T>(http: &reqwest::Client, urls: Vec<String>) -> Result<Vec<T>, GithubError>
where
    T: DeserializeOwned + Send + 'static,
{
    let mut slots: Vec<Option<Result<T, GithubError>>> = Vec::new();
    slots.resize_with(urls.len(), || None);

    let mut set = JoinSet::new();
    for (index, url) in urls.into_iter().enumerate() {
        let http = http.clone();
        set.spawn(async move {
            let result = get_json::<T>(&http, &url).await;
            if let Err(e) = &result {
                tracing::error!(url = %url, error = %e, "GitHub request failed");
            }
            (index, result)
        });
    }
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined?;
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(unreachable_slot))
        .collect()
}

fn unreachable_slot<T>() -> Result<T, GithubError> {
    Err(GithubError::Status {
        status: 0,
        url: String::new(),
        message: "request produced no result".to_string(),
    })
}

/// A merged PR chosen for an epoch.
#[derive(Debug, Clone, Serialize)]
pub struct EpochalPr {
    pub epoch: &'static str,
    pub number: u64,
    pub merged_at: DateTime<Utc>,
    pub merge_commit_sha: String,
}

/// Lays merged PRs out as a linear history of `merged_pr_<number>` tags.
///
/// PRs without a merge time or a valid merge commit are skipped.
pub fn to_memory_repository(prs: &[PullRequest]) -> MemoryRepository {
    let mut merged: Vec<&PullRequest> = prs.iter().filter(|pr| pr.merged_at.is_some()).collect();
    merged.sort_by_key(|pr| pr.merged_at);

    let mut repo = MemoryRepository::new();
    for pr in merged {
        let (Some(merged_at), Some(sha)) = (pr.merged_at, pr.merge_commit_sha.as_deref()) else {
            continue;
        };
        match sha.parse::<ObjectId>() {
            Ok(id) => repo.push_tagged(&format!("merged_pr_{}", pr.number), id, merged_at),
            Err(e) => tracing::warn!(number = pr.number, sha, error = %e, "skipping PR with bad merge sha"),
        }
    }
    repo
}

/// Runs the selector over merged PRs instead of a clone.
pub fn select_epochal_prs(
    prs: &[PullRequest],
    catalog: &Catalog,
    now: DateTime<Utc>,
) -> Result<Vec<EpochalPr>, SelectError> {
    let options = CloneOptions {
        url: "github://merged-prs".to_string(),
        remote: "origin".to_string(),
        branch: "master".to_string(),
        depth: 0,
    };
    let shared = SharedRepository::new(Arc::new(to_memory_repository(prs)), options);
    shared.clone_remote()?;

    let request = SelectRequest::all(catalog, 1);
    let basis = Basis::ending_at(now, catalog);
    let selection = Selector::new(catalog, SelectorConfig::default()).select(&shared, &request, &basis)?;
    Ok(epochal_prs(&selection, prs))
}

fn epochal_prs(selection: &Selection, prs: &[PullRequest]) -> Vec<EpochalPr> {
    selection
        .revisions()
        .filter_map(|revision| {
            let number: u64 = revision
                .reference
                .short_name()
                .strip_prefix("merged_pr_")?
                .parse()
                .ok()?;
            let pr = prs.iter().find(|pr| pr.number == number)?;
            Some(EpochalPr {
                epoch: revision.epoch,
                number,
                merged_at: pr.merged_at?,
                merge_commit_sha: revision.hash.to_hex(),
            })
        })
        .collect()
}
