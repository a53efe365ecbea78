//! Error types for repository access, reference streams, and selection.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::ObjectId;
use crate::select::Selection;

/// Failures reported by a [`Repository`](crate::repository::Repository) or
/// [`Git`](crate::repository::Git) implementation.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The shared handle has not been cloned yet.
    #[error("repository is not initialized")]
    NotInitialized,

    #[error("clone of {url} failed: {message}")]
    Clone { url: String, message: String },

    #[error("fetch failed: {message}")]
    Fetch { message: String },

    #[error("listing tags failed: {message}")]
    Tags { message: String },

    /// A single reference's target commit could not be resolved.
    #[error("commit {id} not found: {message}")]
    CommitLookup { id: ObjectId, message: String },
}

/// Failures surfaced by a [`ReferenceStream`](crate::stream::ReferenceStream).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("reference stream used after close")]
    Closed,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors returned by [`Selector::select`](crate::select::Selector::select).
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("repository is not initialized")]
    NilRepository,

    #[error("no epochs requested")]
    VacuousEpochs,

    #[error("unknown epoch: {0}")]
    UnknownEpoch(String),

    #[error("invalid basis: start {start} is not before now {now}")]
    InvalidBasis {
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("number of revisions for epoch {epoch} must be at least 1")]
    InvalidRevisionCount { epoch: String },

    #[error("hour bucket of {0} hours does not divide a day")]
    InvalidHourSpan(u32),

    /// History ran out before every epoch was satisfied. Carries whatever
    /// revisions were found.
    #[error("not all epochs consumed: missing revisions for {}", .0.missing().join(", "))]
    NotAllEpochsConsumed(Box<Selection>),

    #[error(transparent)]
    Stream(StreamError),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for SelectError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotInitialized => SelectError::NilRepository,
            other => SelectError::Repository(other),
        }
    }
}

impl From<StreamError> for SelectError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Repository(inner) => inner.into(),
            other => SelectError::Stream(other),
        }
    }
}

impl SelectError {
    /// Whether the error is a caller mistake rather than a repository fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SelectError::VacuousEpochs
                | SelectError::UnknownEpoch(_)
                | SelectError::InvalidBasis { .. }
                | SelectError::InvalidRevisionCount { .. }
        )
    }

    /// The partial selection carried by `NotAllEpochsConsumed`.
    pub fn partial(&self) -> Option<&Selection> {
        match self {
            SelectError::NotAllEpochsConsumed(selection) => Some(selection),
            _ => None,
        }
    }
}
