//! Handle allocation and session storage.

use super::{Session, SessionHandle};
use std::collections::BTreeMap;

/// Owns every live session, keyed by handle.
///
/// Handles start at 1 and only grow, so a stale handle can never
/// address a newer session.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: BTreeMap<SessionHandle, Session>,
    last_issued: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh handle, greater than every handle issued before.
    pub fn allocate(&mut self) -> SessionHandle {
        self.last_issued += 1;
        SessionHandle::from_raw(self.last_issued)
    }

    /// Stores a session under its handle.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.handle(), session);
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        self.sessions.get(&handle)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        self.sessions.get_mut(&handle)
    }

    /// Takes a session out of the registry. The caller tears it down.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<Session> {
        self.sessions.remove(&handle)
    }

    /// Live handles in ascending order.
    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Removes every session, in handle order.
    pub fn drain(&mut self) -> impl Iterator<Item = Session> {
        std::mem::take(&mut self.sessions).into_values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
