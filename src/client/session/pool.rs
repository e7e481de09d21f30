use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use super::ServerSession;
use crate::bson::Document;

/// A LIFO pool of server sessions.
///
/// The pool is guarded by a synchronous mutex so that sessions can be checked in from `Drop`.
/// The lock is never held across an await point.
#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ServerSession>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Checks out a server session from the pool, discarding any that are about to expire. If
    /// none are left, a new session is created.
    pub(crate) fn check_out(&self, logical_session_timeout: Option<Duration>) -> ServerSession {
        let mut pool = self.lock();
        while let Some(session) = pool.pop_front() {
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks a server session back in. Dirty sessions and sessions about to expire are
    /// discarded, as are any expiring sessions at the cold end of the pool.
    pub(crate) fn check_in(&self, session: ServerSession, logical_session_timeout: Option<Duration>) {
        let mut pool = self.lock();
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    /// Removes every pooled session and returns their ids.
    pub(crate) fn drain_ids(&self) -> Vec<Document> {
        self.lock().drain(..).map(|session| session.id).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &Document) -> bool {
        self.lock().iter().any(|s| &s.id == id)
    }
}
