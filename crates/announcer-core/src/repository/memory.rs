use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::RepositoryError;
use crate::models::{Commit, ObjectId, Reference};
use crate::stream::{ReferenceStream, VecStream};

use super::{CloneOptions, FetchOptions, Git, Repository};

/// An in-memory linear history with tags.
///
/// Commits are pushed oldest first. A shallow copy sees only the newest
/// `depth` commits, and tags pointing further back are hidden the way a
/// shallow git clone omits them. Acts as its own [`Git`] factory: cloning
/// copies the history with the requested depth.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    history: Vec<Commit>,
    positions: HashMap<ObjectId, usize>,
    tags: Vec<Reference>,
    /// Visible commits counted from the tip; `0` is unlimited.
    depth: usize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a commit to the tip of the history.
    pub fn push_commit(&mut self, id: ObjectId, time: DateTime<Utc>) {
        self.positions.insert(id, self.history.len());
        self.history.push(Commit { id, time });
    }

    /// Adds a `refs/tags/<tag>` reference. Tags keep insertion order.
    pub fn tag(&mut self, tag: &str, target: ObjectId) {
        self.tags.push(Reference::tag(tag, target));
    }

    /// Appends a commit and tags it.
    pub fn push_tagged(&mut self, tag: &str, id: ObjectId, time: DateTime<Utc>) {
        self.push_commit(id, time);
        self.tag(tag, id);
    }

    /// Number of commits currently visible.
    pub fn visible_len(&self) -> usize {
        match self.depth {
            0 => self.history.len(),
            d => d.min(self.history.len()),
        }
    }

    fn is_visible(&self, id: &ObjectId) -> bool {
        self.positions
            .get(id)
            .is_some_and(|&pos| pos + self.visible_len() >= self.history.len())
    }
}

impl Repository for MemoryRepository {
    fn tags(&self) -> Result<Box<dyn ReferenceStream>, RepositoryError> {
        let visible: Vec<Reference> = self
            .tags
            .iter()
            .filter(|r| self.is_visible(&r.target))
            .cloned()
            .collect();
        Ok(Box::new(VecStream::new(visible)))
    }

    fn commit(&self, id: &ObjectId) -> Result<Commit, RepositoryError> {
        match self.positions.get(id) {
            Some(&pos) if self.is_visible(id) => Ok(self.history[pos]),
            _ => Err(RepositoryError::CommitLookup {
                id: *id,
                message: "object not present in local history".to_string(),
            }),
        }
    }

    fn fetch(&mut self, options: &FetchOptions) -> Result<(), RepositoryError> {
        if let (Some(n), true) = (options.deepen, self.depth > 0) {
            self.depth = self.depth.saturating_add(n as usize);
        }
        Ok(())
    }
}

impl Git for MemoryRepository {
    fn clone_repository(&self, options: &CloneOptions) -> Result<Box<dyn Repository>, RepositoryError> {
        let mut copy = self.clone();
        copy.depth = options.depth as usize;
        Ok(Box::new(copy))
    }
}
