//! Reference-counted shared resources.
//!
//! Several independent streams may sit on top of one underlying resource
//! (a descriptor, a socket). Each stream holds an [`Attachment`]; the
//! resource is released when the last attachment is released, or when
//! [`SharedResource::close_all`] tears everything down at once.
//!
//! Release is explicit. An attachment dropped without `release` still
//! decrements the count, but emits a `attachment_leaked` trace event so the
//! missing call can be found.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IoError, Result};
use crate::trace::{self, EventLevel, TraceEvent};

/// The underlying resource's one-shot release.
pub trait Release: Send {
    fn release(&mut self) -> Result<()>;
}

type Closer = Box<dyn FnOnce() -> Result<()> + Send>;

struct Shared<R> {
    resource: Option<R>,
    count: usize,
    closers: Vec<Closer>,
}

impl<R: Release> Shared<R> {
    fn release_resource(&mut self) -> Result<()> {
        match self.resource.take() {
            Some(mut r) => r.release(),
            None => Ok(()),
        }
    }
}

/// Fold results so the first failure is primary and later ones are
/// attached as suppressed.
pub(crate) fn collect_failures(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
    let mut failures = results.into_iter().filter_map(Result::err);
    match failures.next() {
        None => Ok(()),
        Some(primary) => Err(IoError::with_suppressed(primary, failures.collect())),
    }
}

/// A resource shared by several attachments.
pub struct SharedResource<R> {
    inner: Arc<Mutex<Shared<R>>>,
}

impl<R> Clone for SharedResource<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Release> SharedResource<R> {
    pub fn new(resource: R) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared {
                resource: Some(resource),
                count: 0,
                closers: Vec::new(),
            })),
        }
    }

    /// Take a new reference. Fails with `Closed` once released.
    pub fn attach(&self) -> Result<Attachment<R>> {
        let mut shared = self.inner.lock();
        if shared.resource.is_none() {
            return Err(IoError::Closed);
        }
        shared.count += 1;
        Ok(Attachment {
            shared: Arc::clone(&self.inner),
            released: false,
        })
    }

    /// Live attachments.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.inner.lock().count
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.lock().resource.is_none()
    }

    /// Register a closer run by [`close_all`](Self::close_all), typically
    /// the close of a stream layered on this resource.
    pub fn on_close_all(&self, closer: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
        let mut shared = self.inner.lock();
        if shared.resource.is_none() {
            return Err(IoError::Closed);
        }
        shared.closers.push(Box::new(closer));
        Ok(())
    }

    /// Run every registered closer, then release the resource.
    ///
    /// Every step runs even when an earlier one fails. The first failure
    /// is returned with the rest attached as suppressed. Later calls are
    /// no-ops.
    pub fn close_all(&self) -> Result<()> {
        let (closers, released) = {
            let mut shared = self.inner.lock();
            let closers = std::mem::take(&mut shared.closers);
            shared.count = 0;
            (closers, shared.release_resource())
        };
        let mut results: Vec<Result<()>> = closers.into_iter().map(|close| close()).collect();
        results.push(released);
        let outcome = collect_failures(results);
        if let Err(e) = &outcome {
            trace::error("shared_resource", "close_all_failed", e);
        }
        outcome
    }
}

/// One reference to a [`SharedResource`].
pub struct Attachment<R: Release> {
    shared: Arc<Mutex<Shared<R>>>,
    released: bool,
}

impl<R: Release> Attachment<R> {
    /// Run `f` on the resource. Fails with `Closed` once it is released.
    pub fn with<T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T> {
        let mut shared = self.shared.lock();
        shared.resource.as_mut().map(f).ok_or(IoError::Closed)
    }

    /// Drop this reference; the last one releases the resource.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.detach()
    }

    fn detach(&mut self) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.count == 0 {
            return Ok(());
        }
        shared.count -= 1;
        if shared.count == 0 {
            shared.release_resource()
        } else {
            Ok(())
        }
    }
}

impl<R: Release> Drop for Attachment<R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if trace::level().enabled() {
            trace::emit(TraceEvent::new(
                EventLevel::Warn,
                "shared_resource",
                "attachment_leaked",
            ));
        }
        if let Err(e) = self.detach() {
            trace::error("shared_resource", "release_failed", &e);
        }
    }
}
