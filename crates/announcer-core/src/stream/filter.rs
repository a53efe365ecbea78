use crate::error::StreamError;
use crate::models::Reference;

use super::{ReferenceStream, Visit};

/// Tag prefix that marks a merged pull request.
pub const MERGED_PR_PREFIX: &str = "refs/tags/merged_pr_";

/// Decides whether a reference passes a [`Filter`].
pub trait ReferencePredicate {
    fn matches(&self, reference: &Reference) -> bool;
}

impl<F: Fn(&Reference) -> bool> ReferencePredicate for F {
    fn matches(&self, reference: &Reference) -> bool {
        self(reference)
    }
}

/// Matches references whose full name starts with a prefix.
#[derive(Debug, Clone)]
pub struct NamePrefix(String);

impl NamePrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn merged_prs() -> Self {
        Self::new(MERGED_PR_PREFIX)
    }
}

impl ReferencePredicate for NamePrefix {
    fn matches(&self, reference: &Reference) -> bool {
        reference.name.starts_with(&self.0)
    }
}

/// Yields only the references accepted by a predicate, in inner order.
pub struct Filter<S, P> {
    inner: S,
    predicate: P,
}

impl<S: ReferenceStream, P: ReferencePredicate> Filter<S, P> {
    pub fn new(inner: S, predicate: P) -> Self {
        Self { inner, predicate }
    }
}

impl<S: ReferenceStream> Filter<S, NamePrefix> {
    /// Keeps `refs/tags/merged_pr_*` references.
    pub fn merged_prs(inner: S) -> Self {
        Self::new(inner, NamePrefix::merged_prs())
    }
}

impl<S: ReferenceStream, P: ReferencePredicate> ReferenceStream for Filter<S, P> {
    fn next(&mut self) -> Result<Option<Reference>, StreamError> {
        while let Some(r) = self.inner.next()? {
            if self.predicate.matches(&r) {
                return Ok(Some(r));
            }
        }
        Ok(None)
    }

    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError> {
        let predicate = &self.predicate;
        self.inner.for_each(&mut |r| {
            if predicate.matches(r) {
                visit(r)
            } else {
                Visit::Continue
            }
        })
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
