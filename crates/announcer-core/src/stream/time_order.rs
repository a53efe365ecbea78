use std::collections::{HashMap, VecDeque};

use crate::error::{RepositoryError, StreamError};
use crate::models::{Commit, ObjectId, Reference};

use super::{ReferenceStream, Visit};

/// Resolves a reference target to its commit.
pub trait CommitLookup {
    fn commit(&self, id: &ObjectId) -> Result<Commit, RepositoryError>;
}

impl CommitLookup for HashMap<ObjectId, Commit> {
    fn commit(&self, id: &ObjectId) -> Result<Commit, RepositoryError> {
        self.get(id).copied().ok_or_else(|| RepositoryError::CommitLookup {
            id: *id,
            message: "unknown object".to_string(),
        })
    }
}

/// Direction of a [`TimeOrder`] stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    NewestFirst,
    OldestFirst,
}

/// A reference paired with the commit it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedReference {
    pub reference: Reference,
    pub commit: Commit,
}

/// Re-orders an inner stream by commit time.
///
/// The inner stream is drained on first access. References whose commit
/// cannot be resolved are logged and skipped. Equal times keep their inner
/// order, and [`Order::OldestFirst`] is the exact reverse of
/// [`Order::NewestFirst`].
pub struct TimeOrder<'a, S> {
    inner: Option<S>,
    lookup: &'a dyn CommitLookup,
    order: Order,
    sorted: VecDeque<TimedReference>,
    closed: bool,
}

impl<'a, S: ReferenceStream> TimeOrder<'a, S> {
    pub fn new(inner: S, lookup: &'a dyn CommitLookup, order: Order) -> Self {
        Self {
            inner: Some(inner),
            lookup,
            order,
            sorted: VecDeque::new(),
            closed: false,
        }
    }

    pub fn newest_first(inner: S, lookup: &'a dyn CommitLookup) -> Self {
        Self::new(inner, lookup, Order::NewestFirst)
    }

    pub fn oldest_first(inner: S, lookup: &'a dyn CommitLookup) -> Self {
        Self::new(inner, lookup, Order::OldestFirst)
    }

    pub fn order(&self) -> Order {
        self.order
    }

    /// Next reference together with its commit.
    pub fn next_timed(&mut self) -> Result<Option<TimedReference>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.materialize()?;
        Ok(self.sorted.pop_front())
    }

    fn materialize(&mut self) -> Result<(), StreamError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let lookup = self.lookup;
        let mut timed = Vec::new();
        let drained = inner.for_each(&mut |r| {
            match lookup.commit(&r.target) {
                Ok(commit) => timed.push(TimedReference {
                    reference: r.clone(),
                    commit,
                }),
                Err(err) => {
                    tracing::warn!(reference = %r.name, error = %err, "skipping unresolvable reference");
                }
            }
            Visit::Continue
        });
        inner.close();
        drained?;

        // Stable, so equal times keep inner order; reversing keeps the two
        // directions exact mirrors of each other.
        timed.sort_by(|a, b| b.commit.time.cmp(&a.commit.time));
        if self.order == Order::OldestFirst {
            timed.reverse();
        }
        self.sorted = timed.into();
        Ok(())
    }
}

impl<S: ReferenceStream> ReferenceStream for TimeOrder<'_, S> {
    fn next(&mut self) -> Result<Option<Reference>, StreamError> {
        Ok(self.next_timed()?.map(|t| t.reference))
    }

    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        self.materialize()?;
        while let Some(t) = self.sorted.pop_front() {
            if visit(&t.reference) == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        self.sorted.clear();
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }
}
