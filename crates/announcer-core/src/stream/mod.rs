//! Reference streams and composable stream decorators.
//!
//! A [`ReferenceStream`] is an ordered, single-pass sequence of
//! [`Reference`]s with two access patterns: single-step ([`next`]) and bulk
//! ([`for_each`]). Decorators wrap an inner stream and support both patterns
//! identically, so a consumer cannot tell a primitive stream from a composed
//! one.
//!
//! | Type | Behavior |
//! |------|----------|
//! | [`VecStream`] | Primitive stream over owned references |
//! | [`Filter`] | Keeps references matching a predicate |
//! | [`Stop`] | Ends just before a sentinel reference |
//! | [`TimeOrder`] | Drains its input and re-orders by commit time |
//!
//! [`next`]: ReferenceStream::next
//! [`for_each`]: ReferenceStream::for_each

mod filter;
mod stop;
mod time_order;

pub use filter::{Filter, NamePrefix, ReferencePredicate, MERGED_PR_PREFIX};
pub use stop::Stop;
pub use time_order::{CommitLookup, Order, TimeOrder, TimedReference};

use crate::error::StreamError;
use crate::models::Reference;

/// Returned by a [`for_each`](ReferenceStream::for_each) visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// An ordered, single-pass sequence of references.
///
/// Once [`close`](ReferenceStream::close) has been called, both `next` and
/// `for_each` fail with [`StreamError::Closed`].
pub trait ReferenceStream {
    /// Returns the next reference, or `None` once the stream is exhausted.
    fn next(&mut self) -> Result<Option<Reference>, StreamError>;

    /// Visits the remaining references in order until the visitor returns
    /// [`Visit::Stop`] or the stream is exhausted. The reference on which the
    /// visitor stops is consumed.
    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError>;

    /// Releases the stream.
    fn close(&mut self);
}

impl<S: ReferenceStream + ?Sized> ReferenceStream for Box<S> {
    fn next(&mut self) -> Result<Option<Reference>, StreamError> {
        (**self).next()
    }

    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError> {
        (**self).for_each(visit)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Drains the remainder of `stream` into a vector.
pub fn collect<S: ReferenceStream + ?Sized>(stream: &mut S) -> Result<Vec<Reference>, StreamError> {
    let mut refs = Vec::new();
    stream.for_each(&mut |r| {
        refs.push(r.clone());
        Visit::Continue
    })?;
    Ok(refs)
}

/// Primitive stream over an owned list of references.
#[derive(Debug, Clone, Default)]
pub struct VecStream {
    refs: Vec<Reference>,
    idx: usize,
    closed: bool,
}

impl VecStream {
    pub fn new(refs: Vec<Reference>) -> Self {
        Self {
            refs,
            idx: 0,
            closed: false,
        }
    }

    /// Number of references not yet yielded.
    pub fn remaining(&self) -> usize {
        self.refs.len().saturating_sub(self.idx)
    }
}

impl From<Vec<Reference>> for VecStream {
    fn from(refs: Vec<Reference>) -> Self {
        Self::new(refs)
    }
}

impl ReferenceStream for VecStream {
    fn next(&mut self) -> Result<Option<Reference>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let r = self.refs.get(self.idx).cloned();
        if r.is_some() {
            self.idx += 1;
        }
        Ok(r)
    }

    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        while let Some(r) = self.refs.get(self.idx) {
            self.idx += 1;
            if visit(r) == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ObjectId;

    pub(crate) fn oid(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = n;
        ObjectId::from_bytes(bytes)
    }

    pub(crate) fn tag(name: &str, n: u8) -> Reference {
        Reference::tag(name, oid(n))
    }

    /// Drains a stream one step at a time.
    pub(crate) fn drain<S: ReferenceStream + ?Sized>(stream: &mut S) -> Vec<Reference> {
        let mut out = Vec::new();
        while let Some(r) = stream.next().unwrap() {
            out.push(r);
        }
        out
    }

    #[test]
    fn test_vec_stream_next_and_for_each_agree() {
        let refs = vec![tag("a", 1), tag("b", 2), tag("c", 3)];
        let mut stepped = VecStream::new(refs.clone());
        let mut bulk = VecStream::new(refs.clone());
        assert_eq!(drain(&mut stepped), refs);
        assert_eq!(collect(&mut bulk).unwrap(), refs);
        assert_eq!(stepped.next().unwrap(), None);
    }

    #[test]
    fn test_vec_stream_for_each_resumes_after_stop() {
        let mut stream = VecStream::new(vec![tag("a", 1), tag("b", 2), tag("c", 3)]);
        let mut seen = Vec::new();
        stream
            .for_each(&mut |r| {
                seen.push(r.clone());
                if r.short_name() == "b" {
                    Visit::Stop
                } else {
                    Visit::Continue
                }
            })
            .unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(stream.remaining(), 1);
        assert_eq!(stream.next().unwrap(), Some(tag("c", 3)));
    }

    #[test]
    fn test_vec_stream_closed() {
        let mut stream = VecStream::new(vec![tag("a", 1)]);
        stream.close();
        assert!(matches!(stream.next(), Err(StreamError::Closed)));
        assert!(matches!(
            stream.for_each(&mut |_| Visit::Continue),
            Err(StreamError::Closed)
        ));
    }

    #[test]
    fn test_boxed_stream_delegates() {
        let mut boxed: Box<dyn ReferenceStream> = Box::new(VecStream::new(vec![tag("a", 1)]));
        assert_eq!(drain(&mut boxed), vec![tag("a", 1)]);
    }
}
