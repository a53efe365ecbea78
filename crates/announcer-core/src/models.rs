//! Core data models shared by streams, repositories, and the selector.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 20-byte git object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Lowercase 40-character hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Error returned when parsing an [`ObjectId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseObjectIdError {
    #[error("object id is not valid hex: {0}")]
    Hex(String),
    #[error("object id must be {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },
}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseObjectIdError::Hex(s.to_string()))?;
        let fixed: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ParseObjectIdError::Length {
                expected: Self::LEN,
                got: bytes.len(),
            })?;
        Ok(Self(fixed))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// A named pointer to a commit, e.g. `refs/tags/merged_pr_1234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub name: String,
    pub target: ObjectId,
}

impl Reference {
    pub fn new(name: impl Into<String>, target: ObjectId) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }

    /// Builds a `refs/tags/<tag>` reference.
    pub fn tag(tag: &str, target: ObjectId) -> Self {
        Self::new(format!("refs/tags/{}", tag), target)
    }

    /// The name with any `refs/tags/` prefix removed.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix("refs/tags/").unwrap_or(&self.name)
    }
}

/// A commit with its authoritative (committer) timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub id: ObjectId,
    pub time: DateTime<Utc>,
}

/// A commit selected as the latest change before an epoch boundary.
///
/// Only the selector creates revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revision {
    /// Id of the epoch this revision satisfies.
    pub epoch: &'static str,
    /// The merge marker that pointed at the commit.
    #[serde(skip)]
    pub reference: Reference,
    pub hash: ObjectId,
    pub commit_time: DateTime<Utc>,
}
