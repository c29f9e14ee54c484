//! Per-domain challenge session tracking
//!
//! Holds the one live [`ChallengeSession`] per domain between user
//! interactions and serializes operations on the same domain.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, trace};

use wildcert_common::{ChallengeSession, Generation, Phase};

use crate::error::SessionError;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive access to one domain, released on drop
#[derive(Debug)]
pub struct DomainGuard {
    domain: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl DomainGuard {
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Forget the mutex unless another caller already holds a handle to it
        self.locks
            .remove_if(&self.domain, |_, lock| Arc::strong_count(lock) == 1);
        trace!(domain = %self.domain, "Released domain lock");
    }
}

/// Keyed store of challenge sessions
///
/// # Thread Safety
///
/// Sessions live in a `DashMap`, so reads never block. Mutating operations
/// take the domain's lock first via [`SessionStore::lock`]; a second
/// operation on a locked domain is refused with [`SessionError::Busy`]
/// rather than queued.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, ChallengeSession>,
    locks: Arc<LockMap>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            locks: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Take the domain's exclusive scope without waiting
    pub fn lock(&self, domain: &str) -> Result<DomainGuard, SessionError> {
        let mutex = self
            .locks
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match mutex.try_lock_owned() {
            Ok(guard) => {
                trace!(domain = %domain, "Acquired domain lock");
                Ok(DomainGuard {
                    domain: domain.to_string(),
                    guard: Some(guard),
                    locks: Arc::clone(&self.locks),
                })
            }
            Err(_) => {
                debug!(domain = %domain, "Domain is busy");
                Err(SessionError::Busy {
                    domain: domain.to_string(),
                })
            }
        }
    }

    /// Store `session`, replacing any earlier session for its domain
    pub fn insert(&self, session: ChallengeSession) {
        let domain = session.domain.clone();
        if let Some(previous) = self.sessions.insert(domain.clone(), session) {
            info!(
                domain = %domain,
                previous_generation = %previous.generation,
                previous_phase = %previous.phase,
                "Replaced challenge session"
            );
        }
    }

    /// Copy of the session as it is now, if any
    pub fn snapshot(&self, domain: &str) -> Option<ChallengeSession> {
        self.sessions.get(domain).map(|s| s.clone())
    }

    /// Copy of a session that can still make progress.
    ///
    /// Expired sessions are dropped here. Failed sessions are kept for
    /// inspection but refused.
    pub fn active(&self, domain: &str) -> Result<ChallengeSession, SessionError> {
        let session = self
            .snapshot(domain)
            .ok_or_else(|| SessionError::NotFound {
                domain: domain.to_string(),
            })?;

        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        if session.is_expired(ttl, now) {
            self.sessions
                .remove_if(domain, |_, s| s.generation == session.generation);
            info!(domain = %domain, generation = %session.generation, "Discarded expired challenge session");
            return Err(SessionError::Expired {
                domain: domain.to_string(),
                age_secs: (now - session.created_at).num_seconds(),
            });
        }

        if session.phase == Phase::Failed {
            return Err(SessionError::Failed {
                domain: domain.to_string(),
                reason: session
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(session)
    }

    /// Apply `f` to the session, provided it is still `generation`
    pub fn update<R>(
        &self,
        domain: &str,
        generation: Generation,
        f: impl FnOnce(&mut ChallengeSession) -> R,
    ) -> Result<R, SessionError> {
        let mut session = self
            .sessions
            .get_mut(domain)
            .ok_or_else(|| SessionError::NotFound {
                domain: domain.to_string(),
            })?;

        if session.generation != generation {
            return Err(SessionError::Stale {
                domain: domain.to_string(),
            });
        }

        Ok(f(&mut session))
    }

    /// Move the session to `next`
    pub fn transition(
        &self,
        domain: &str,
        generation: Generation,
        next: Phase,
    ) -> Result<(), SessionError> {
        let from = self.update(domain, generation, |s| {
            let from = s.phase;
            s.transition(next).map(|_| from)
        })??;
        debug!(domain = %domain, from = %from, to = %next, "Session phase changed");
        Ok(())
    }

    /// Move the session to `Failed` with `error` attached
    pub fn fail(
        &self,
        domain: &str,
        generation: Generation,
        error: &str,
    ) -> Result<(), SessionError> {
        self.update(domain, generation, |s| s.fail(error))??;
        info!(domain = %domain, error = %error, "Session failed");
        Ok(())
    }

    /// Drop the session for `domain`
    pub fn remove(&self, domain: &str) -> Option<ChallengeSession> {
        let removed = self.sessions.remove(domain).map(|(_, s)| s);
        if removed.is_some() {
            debug!(domain = %domain, "Removed challenge session");
        }
        removed
    }

    /// Drop every expired session, returning how many went
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_expired(ttl, now));
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            info!(purged = purged, "Purged expired challenge sessions");
        }
        purged
    }

    /// Snapshots of all sessions, sorted by domain
    pub fn list(&self) -> Vec<ChallengeSession> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|s| s.value().clone()).collect();
        sessions.sort_by(|a, b| a.domain.cmp(&b.domain));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
