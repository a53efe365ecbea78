//! Revision selection.
//!
//! The [`Selector`] walks merged-PR tags newest first and, for each requested
//! epoch, records the most recent reference on the far side of an epoch
//! boundary. Epochs are consumed in catalog order (longest first) and share a
//! single scan: once the head epoch has its revisions, the next epoch starts
//! evaluating the pairs that follow.
//!
//! # Algorithm
//!
//! ```text
//! prev = none
//! for next in tags (newest first):
//!     skip if next.time > basis.now
//!     stop if next.time <= basis.start
//!     if prev is set and head.is_epochal(prev, next.time): record next for head
//!     prev = next.time
//! ```
//!
//! The newest reference inside the window only anchors the scan; epochs are
//! decided by pairs of references, never by the distance to `basis.now`.
//!
//! When the tags run out before every epoch is satisfied, the selector
//! deepens the local clone by `fetch_chunk` commits and resumes with the
//! references older than the last one examined. After
//! `max_depth_extensions` attempts, or once the window start has been
//! reached, it gives up with [`SelectError::NotAllEpochsConsumed`] carrying
//! the partial result.
//!
//! References with identical commit times keep repository order, and equal
//! instants are never epochal.

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::epoch::{Basis, Catalog, Epoch};
use crate::error::{RepositoryError, SelectError};
use crate::models::{Commit, ObjectId, Reference, Revision};
use crate::repository::{Repository, SharedRepository};
use crate::stream::{
    CommitLookup, Filter, NamePrefix, ReferenceStream, Stop, TimeOrder, TimedReference, Visit,
    MERGED_PR_PREFIX,
};

/// Tuning for the depth-extension loop.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Commits added to a shallow clone per extension.
    pub fetch_chunk: u32,
    /// Extensions attempted before giving up.
    pub max_depth_extensions: u32,
    /// Reference name prefix of merge markers.
    pub tag_prefix: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            fetch_chunk: 100,
            max_depth_extensions: 10,
            tag_prefix: MERGED_PR_PREFIX.to_string(),
        }
    }
}

/// Which epochs to select, and how many revisions for each.
#[derive(Debug, Clone, Default)]
pub struct SelectRequest {
    counts: Vec<(String, usize)>,
}

impl SelectRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests `count` revisions for `id`. A repeated id replaces the
    /// earlier count.
    pub fn epoch(mut self, id: impl Into<String>, count: usize) -> Self {
        let id = id.into();
        match self.counts.iter_mut().find(|(existing, _)| *existing == id) {
            Some(entry) => entry.1 = count,
            None => self.counts.push((id, count)),
        }
        self
    }

    /// Requests `count` revisions for every epoch in `catalog`.
    pub fn all(catalog: &Catalog, count: usize) -> Self {
        catalog
            .iter()
            .fold(Self::new(), |request, epoch| request.epoch(epoch.id, count))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, id: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, count)| *count)
    }
}

/// Revisions found for one epoch, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSelection {
    pub epoch: &'static str,
    pub requested: usize,
    pub revisions: Vec<Revision>,
}

impl EpochSelection {
    pub fn is_satisfied(&self) -> bool {
        self.revisions.len() >= self.requested
    }
}

/// Result of one selection, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    entries: Vec<EpochSelection>,
}

impl Selection {
    pub fn get(&self, id: &str) -> Option<&EpochSelection> {
        self.entries.iter().find(|e| e.epoch == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EpochSelection> {
        self.entries.iter()
    }

    /// All revisions, epoch by epoch.
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.entries.iter().flat_map(|e| e.revisions.iter())
    }

    /// Ids of epochs with fewer revisions than requested.
    pub fn missing(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| !e.is_satisfied())
            .map(|e| e.epoch)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(EpochSelection::is_satisfied)
    }
}

impl<'a> IntoIterator for &'a Selection {
    type Item = &'a EpochSelection;
    type IntoIter = std::slice::Iter<'a, EpochSelection>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Commit lookups that survive across the passes of one selection.
#[derive(Default)]
struct CommitCache {
    commits: RefCell<HashMap<ObjectId, Commit>>,
}

struct CachedLookup<'a> {
    repo: &'a dyn Repository,
    cache: &'a CommitCache,
}

impl CommitLookup for CachedLookup<'_> {
    fn commit(&self, id: &ObjectId) -> Result<Commit, RepositoryError> {
        if let Some(commit) = self.cache.commits.borrow().get(id) {
            return Ok(*commit);
        }
        let commit = self.repo.commit(id)?;
        self.cache.commits.borrow_mut().insert(*id, commit);
        Ok(commit)
    }
}

/// Scan state carried across depth extensions.
struct Scan<'c> {
    basis: Basis,
    epochs: Vec<&'c Epoch>,
    entries: Vec<EpochSelection>,
    head: usize,
    prev: Option<DateTime<Utc>>,
    last: Option<Reference>,
    window_closed: bool,
}

impl<'c> Scan<'c> {
    fn new(requested: Vec<(&'c Epoch, usize)>, basis: Basis) -> Self {
        let entries = requested
            .iter()
            .map(|(epoch, count)| EpochSelection {
                epoch: epoch.id,
                requested: *count,
                revisions: Vec::with_capacity(*count),
            })
            .collect();
        Self {
            basis,
            epochs: requested.into_iter().map(|(epoch, _)| epoch).collect(),
            entries,
            head: 0,
            prev: None,
            last: None,
            window_closed: false,
        }
    }

    fn is_done(&self) -> bool {
        self.head >= self.epochs.len()
    }

    fn visit(&mut self, candidate: TimedReference) -> Visit {
        let TimedReference { reference, commit } = candidate;
        self.last = Some(reference.clone());

        if commit.time > self.basis.now() {
            return Visit::Continue;
        }
        if commit.time <= self.basis.start() {
            self.window_closed = true;
            return Visit::Stop;
        }

        let Some(prev) = self.prev.replace(commit.time) else {
            return Visit::Continue;
        };
        let epoch = self.epochs[self.head];
        if epoch.is_epochal(&prev, &commit.time, &self.basis) {
            tracing::debug!(epoch = epoch.id, reference = %reference.name, time = %commit.time, "epochal reference");
            let entry = &mut self.entries[self.head];
            entry.revisions.push(Revision {
                epoch: epoch.id,
                reference,
                hash: commit.id,
                commit_time: commit.time,
            });
            if entry.is_satisfied() {
                self.head += 1;
            }
        }

        if self.is_done() {
            Visit::Stop
        } else {
            Visit::Continue
        }
    }

    fn finish(self) -> Selection {
        Selection {
            entries: self.entries,
        }
    }
}

/// Selects epochal revisions from a shared repository.
pub struct Selector<'c> {
    catalog: &'c Catalog,
    config: SelectorConfig,
}

impl<'c> Selector<'c> {
    pub fn new(catalog: &'c Catalog, config: SelectorConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Runs one selection against `repo` within `basis`.
    pub fn select(
        &self,
        repo: &SharedRepository,
        request: &SelectRequest,
        basis: &Basis,
    ) -> Result<Selection, SelectError> {
        if !repo.is_initialized() {
            return Err(SelectError::NilRepository);
        }
        let requested = self.resolve(request)?;

        let cache = CommitCache::default();
        let mut scan = Scan::new(requested, *basis);
        let mut extensions = 0;
        loop {
            {
                let guard = repo.read().ok_or(SelectError::NilRepository)?;
                let lookup = CachedLookup {
                    repo: &*guard,
                    cache: &cache,
                };
                for candidate in self.candidates(&*guard, &lookup, scan.last.as_ref())? {
                    if scan.visit(candidate) == Visit::Stop {
                        break;
                    }
                }
            }

            if scan.is_done() {
                return Ok(scan.finish());
            }
            let can_extend = !scan.window_closed
                && repo.options().depth > 0
                && self.config.fetch_chunk > 0
                && extensions < self.config.max_depth_extensions;
            if !can_extend {
                let selection = scan.finish();
                tracing::warn!(
                    missing = ?selection.missing(),
                    extensions,
                    "history exhausted before all epochs were satisfied"
                );
                return Err(SelectError::NotAllEpochsConsumed(Box::new(selection)));
            }

            extensions += 1;
            tracing::debug!(
                extensions,
                chunk = self.config.fetch_chunk,
                "deepening history"
            );
            repo.fetch(Some(self.config.fetch_chunk))?;
        }
    }

    fn resolve(&self, request: &SelectRequest) -> Result<Vec<(&'c Epoch, usize)>, SelectError> {
        if request.is_empty() {
            return Err(SelectError::VacuousEpochs);
        }
        if let Some((id, _)) = request.counts.iter().find(|(_, count)| *count == 0) {
            return Err(SelectError::InvalidRevisionCount { epoch: id.clone() });
        }
        let ids: Vec<&str> = request.counts.iter().map(|(id, _)| id.as_str()).collect();
        let epochs = self.catalog.subset(&ids)?;
        Ok(epochs
            .into_iter()
            .map(|epoch| (epoch, request.count(epoch.id).unwrap_or(1)))
            .collect())
    }

    /// Merge markers not yet examined, newest first.
    ///
    /// With no prior reference this is the whole tag list. Otherwise the
    /// stream is ordered oldest first and stopped at `after`, then reversed,
    /// which leaves exactly the references that sort after it newest first.
    fn candidates(
        &self,
        repo: &dyn Repository,
        lookup: &dyn CommitLookup,
        after: Option<&Reference>,
    ) -> Result<Vec<TimedReference>, SelectError> {
        let tags = Filter::new(repo.tags()?, NamePrefix::new(self.config.tag_prefix.as_str()));
        let mut out = Vec::new();

        let Some(sentinel) = after else {
            let mut ordered = TimeOrder::newest_first(tags, lookup);
            while let Some(timed) = ordered.next_timed()? {
                out.push(timed);
            }
            return Ok(out);
        };

        let mut stream = Stop::new(TimeOrder::oldest_first(tags, lookup), sentinel.clone());
        while let Some(reference) = stream.next()? {
            let commit = lookup.commit(&reference.target)?;
            out.push(TimedReference { reference, commit });
        }
        out.reverse();
        Ok(out)
    }
}
