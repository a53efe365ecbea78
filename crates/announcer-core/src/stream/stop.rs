use crate::error::StreamError;
use crate::models::Reference;

use super::{ReferenceStream, Visit};

/// Yields inner references up to, but not including, a sentinel.
///
/// The sentinel is matched on both name and target. When it is reached the
/// inner stream is closed and this stream reports exhaustion; if the sentinel
/// never appears the inner stream is passed through whole.
pub struct Stop<S> {
    inner: S,
    sentinel: Reference,
    done: bool,
    closed: bool,
}

impl<S: ReferenceStream> Stop<S> {
    pub fn new(inner: S, sentinel: Reference) -> Self {
        Self {
            inner,
            sentinel,
            done: false,
            closed: false,
        }
    }

    /// Whether the sentinel has been reached.
    pub fn reached(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        self.inner.close();
    }
}

impl<S: ReferenceStream> ReferenceStream for Stop<S> {
    fn next(&mut self) -> Result<Option<Reference>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.done {
            return Ok(None);
        }
        match self.inner.next()? {
            Some(r) if r == self.sentinel => {
                self.finish();
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn for_each(&mut self, visit: &mut dyn FnMut(&Reference) -> Visit) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if self.done {
            return Ok(());
        }
        let sentinel = &self.sentinel;
        let mut hit = false;
        self.inner.for_each(&mut |r| {
            if r == sentinel {
                hit = true;
                Visit::Stop
            } else {
                visit(r)
            }
        })?;
        if hit {
            self.finish();
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
        if !self.done {
            self.inner.close();
        }
    }
}
