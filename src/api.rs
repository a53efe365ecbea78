//! JSON shapes and query parsing for the revisions API.
//!
//! Shared by the HTTP server and the `revisions` CLI command so both print
//! the same documents.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use announcer_core::epoch::{Basis, Catalog, Epoch};
use announcer_core::error::SelectError;
use announcer_core::models::Revision;
use announcer_core::select::{SelectRequest, Selection};

pub const DEFAULT_NUM_REVISIONS: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEpoch {
    pub id: String,
    pub label: String,
    pub description: String,
    pub min_duration_sec: i64,
    pub max_duration_sec: i64,
}

impl From<&Epoch> for ApiEpoch {
    fn from(epoch: &Epoch) -> Self {
        Self {
            id: epoch.id.to_string(),
            label: epoch.label.to_string(),
            description: epoch.description.to_string(),
            min_duration_sec: epoch.min_duration.num_seconds(),
            max_duration_sec: epoch.max_duration.num_seconds(),
        }
    }
}

/// Every epoch in catalog order.
pub fn epochs(catalog: &Catalog) -> Vec<ApiEpoch> {
    catalog.iter().map(ApiEpoch::from).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRevision {
    /// 40-character hex commit hash.
    pub hash: String,
    pub commit_time: DateTime<Utc>,
}

impl From<&Revision> for ApiRevision {
    fn from(revision: &Revision) -> Self {
        Self {
            hash: revision.hash.to_hex(),
            commit_time: revision.commit_time,
        }
    }
}

/// A JSON object keyed by epoch id whose keys keep catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochMap<T> {
    entries: Vec<(&'static str, T)>,
}

impl<T> EpochMap<T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.iter().find(|(key, _)| *key == id).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> FromIterator<(&'static str, T)> for EpochMap<T> {
    fn from_iter<I: IntoIterator<Item = (&'static str, T)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<T: Serialize> Serialize for EpochMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Body of `GET /api/revisions/latest`.
#[derive(Debug, Clone, Serialize)]
pub struct LatestResponse {
    pub revisions: EpochMap<ApiRevision>,
    pub epochs: Vec<ApiEpoch>,
}

impl LatestResponse {
    /// Takes the newest revision of each epoch in `selection`.
    pub fn new(selection: &Selection, catalog: &Catalog) -> Self {
        let revisions = selection
            .iter()
            .filter_map(|entry| {
                let first = entry.revisions.first()?;
                Some((entry.epoch, ApiRevision::from(first)))
            })
            .collect();
        Self {
            revisions,
            epochs: epochs(catalog),
        }
    }
}

/// Body of `GET /api/revisions/list` and of the `revisions` command.
#[derive(Debug, Clone, Serialize)]
pub struct RevisionsResponse {
    pub revisions: EpochMap<Vec<ApiRevision>>,
    pub epochs: Vec<ApiEpoch>,
    /// Set when some epochs came back short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RevisionsResponse {
    /// Lists the selected revisions, newest first, and describes the epochs
    /// that were asked for.
    pub fn new(selection: &Selection, catalog: &Catalog) -> Self {
        let revisions = selection
            .iter()
            .map(|entry| {
                (
                    entry.epoch,
                    entry.revisions.iter().map(ApiRevision::from).collect(),
                )
            })
            .collect();
        let epochs = catalog
            .iter()
            .filter(|epoch| selection.get(epoch.id).is_some())
            .map(ApiEpoch::from)
            .collect();
        Self {
            revisions,
            epochs,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Rejected query parameters.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("parameter '{0}' may only be given once")]
    Repeated(String),

    #[error("parameter '{0}' must not be empty")]
    Empty(String),

    #[error("invalid num_revisions '{0}': expected a positive integer")]
    NumRevisions(String),

    #[error("invalid {name} '{value}': expected an RFC 3339 timestamp")]
    Time { name: String, value: String },

    #[error(transparent)]
    Select(#[from] SelectError),
}

/// Parsed `/api/revisions/list` parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevisionsQuery {
    /// Requested epoch ids; empty means every epoch.
    pub epochs: Vec<String>,
    pub num_revisions: Option<usize>,
    pub now: Option<DateTime<Utc>>,
    pub start: Option<DateTime<Utc>>,
}

impl RevisionsQuery {
    /// Parses raw query pairs.
    ///
    /// `epochs` may repeat and may hold a comma-separated list. The other
    /// parameters are single-valued. Unknown parameters are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, QueryError> {
        let mut query = Self::default();
        let mut num_revisions = None;
        let mut now = None;
        let mut start = None;

        for (key, value) in pairs {
            match key.as_str() {
                "epochs" | "epoch" => {
                    let ids: Vec<&str> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .collect();
                    if ids.is_empty() {
                        return Err(QueryError::Empty(key.clone()));
                    }
                    query.epochs.extend(ids.into_iter().map(str::to_string));
                }
                "num_revisions" => set_once(&mut num_revisions, key, value)?,
                "now" => set_once(&mut now, key, value)?,
                "start" => set_once(&mut start, key, value)?,
                _ => tracing::debug!(parameter = %key, "ignoring unknown query parameter"),
            }
        }

        if let Some(raw) = num_revisions {
            query.num_revisions = Some(parse_num_revisions(raw)?);
        }
        if let Some(raw) = now {
            query.now = Some(parse_time("now", raw)?);
        }
        if let Some(raw) = start {
            query.start = Some(parse_time("start", raw)?);
        }
        Ok(query)
    }

    /// The selection request. Epoch ids are checked against `catalog`.
    pub fn request(&self, catalog: &Catalog) -> Result<SelectRequest, QueryError> {
        let count = self.num_revisions.unwrap_or(DEFAULT_NUM_REVISIONS);
        if self.epochs.is_empty() {
            return Ok(SelectRequest::all(catalog, count));
        }
        let chosen = catalog.subset(&self.epochs)?;
        Ok(chosen
            .into_iter()
            .fold(SelectRequest::new(), |request, epoch| request.epoch(epoch.id, count)))
    }

    /// The time window. `now` defaults to `current`; `start` defaults to
    /// twice the catalog's longest epoch before `now`.
    pub fn basis(&self, catalog: &Catalog, current: DateTime<Utc>) -> Result<Basis, QueryError> {
        let now = self.now.unwrap_or(current);
        match self.start {
            Some(start) => Ok(Basis::new(start, now)?),
            None => Ok(Basis::ending_at(now, catalog)),
        }
    }
}

fn set_once<'a>(slot: &mut Option<&'a str>, key: &str, value: &'a str) -> Result<(), QueryError> {
    if slot.is_some() {
        return Err(QueryError::Repeated(key.to_string()));
    }
    if value.trim().is_empty() {
        return Err(QueryError::Empty(key.to_string()));
    }
    *slot = Some(value.trim());
    Ok(())
}

fn parse_num_revisions(raw: &str) -> Result<usize, QueryError> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(QueryError::NumRevisions(raw.to_string())),
    }
}

/// Parses an RFC 3339 timestamp into UTC.
pub fn parse_time(name: &str, raw: &str) -> Result<DateTime<Utc>, QueryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QueryError::Time {
            name: name.to_string(),
            value: raw.to_string(),
        })
}
