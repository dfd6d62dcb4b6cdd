//! Shared store of in-flight and recently finished requests.

use crate::{
    error::TrackerError,
    request::Request,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

/// Store shared between the driver thread (which creates and mutates
/// requests) and the reporter thread (which drains finished ones).
///
/// A single mutex guards both the active map and the finished queue; every
/// operation is a short critical section with no I/O or computation inside.
/// Any request id is in at most one of the two at any instant.
#[derive(Debug, Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    active: HashMap<u64, Request>,
    finished: Vec<Request>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new request for `session`, failing if one is already active.
    pub fn create(&self, session: u64, line: u64) -> Result<(), TrackerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.active.contains_key(&session) {
            return Err(TrackerError::DuplicateSession { line, session });
        }
        inner.active.insert(session, Request::new(session, line));
        Ok(())
    }

    /// Point-in-time copy of the active request for `session`.
    pub fn get(&self, session: u64) -> Option<Request> {
        self.inner.lock().unwrap().active.get(&session).cloned()
    }

    /// Run `f` against the active request for `session`, or return `None` if
    /// no such request exists. `f` runs under the registry lock and must not
    /// block.
    pub fn update<R>(&self, session: u64, f: impl FnOnce(&mut Request) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.active.get_mut(&session).map(f)
    }

    /// Atomically move the request for `session` from the active set to the
    /// finished queue. Returns `false` if the session is not active.
    pub fn mark_finished(&self, session: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.active.remove(&session) {
            Some(request) => {
                inner.finished.push(request);
                true
            }
            None => false,
        }
    }

    /// Swap out the finished queue, leaving it empty. Each finished request
    /// is returned by exactly one call.
    pub fn pop_finished(&self) -> Vec<Request> {
        std::mem::take(&mut self.inner.lock().unwrap().finished)
    }

    /// Point-in-time copy of all active requests, safe to read without the
    /// lock afterward.
    pub fn snapshot_active(&self) -> Vec<Request> {
        self.inner.lock().unwrap().active.values().cloned().collect()
    }

    pub fn active_len(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }
}
