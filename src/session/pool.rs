use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::server::{ServerSession, SessionId};
use crate::dispatch::SessionIdIssuer;

/// Pool of reusable server sessions.
///
/// The pool is the client's only piece of process-wide mutable shared state:
/// every logical session acquires from and releases to it, from any thread.
/// Idle sessions are kept most-recently-used first so reuse favors sessions
/// far from their idle timeout; entries past the timeout are pruned lazily on
/// acquire and drained eagerly on shutdown.
pub struct ServerSessionPool {
    idle: Mutex<VecDeque<Arc<ServerSession>>>,
    issuer: Arc<dyn SessionIdIssuer>,

    /// Server-advertised idle timeout; `None` means sessions never expire.
    logical_session_timeout: Option<Duration>,

    created: AtomicUsize,
    discarded: AtomicUsize,
}

impl ServerSessionPool {
    pub fn new(
        issuer: Arc<dyn SessionIdIssuer>,
        logical_session_timeout: Option<Duration>,
    ) -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
            issuer,
            logical_session_timeout,
            created: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Get a usable server session: the most recently used idle entry, or a
    /// freshly issued one when the idle set is empty. Never returns a dirty
    /// or about-to-expire session.
    pub fn acquire(&self) -> Arc<ServerSession> {
        let reused = {
            let mut idle = self.idle.lock();
            self.prune_expired(&mut idle);
            idle.pop_front()
        };

        match reused {
            Some(session) => session,
            None => {
                self.created.fetch_add(1, Ordering::SeqCst);
                Arc::new(ServerSession::new(self.issuer.issue_session_id()))
            }
        }
    }

    /// Return a session to the idle set. Dirty and about-to-expire sessions
    /// are discarded; the cluster reaps them server-side.
    pub fn release(&self, session: Arc<ServerSession>) {
        if session.is_dirty() {
            tracing::debug!(session_id = %session.id(), "discarding dirty server session");
            self.discarded.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if session.is_about_to_expire(self.logical_session_timeout) {
            tracing::debug!(session_id = %session.id(), "discarding expired server session");
            self.discarded.fetch_add(1, Ordering::SeqCst);
            return;
        }

        session.touch();
        self.idle.lock().push_front(session);
    }

    /// Drain the idle set and return the drained identifiers, so the owner
    /// can best-effort notify the cluster on shutdown.
    pub fn clear(&self) -> Vec<SessionId> {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        self.discarded.fetch_add(drained.len(), Ordering::SeqCst);
        drained.iter().map(|s| s.id()).collect()
    }

    /// Pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle_sessions: self.idle.lock().len(),
            created_sessions: self.created.load(Ordering::SeqCst),
            discarded_sessions: self.discarded.load(Ordering::SeqCst),
        }
    }

    /// Drop idle entries past the timeout. Oldest entries live at the back.
    fn prune_expired(&self, idle: &mut VecDeque<Arc<ServerSession>>) {
        let mut pruned = 0usize;
        while let Some(session) = idle.back() {
            if session.is_about_to_expire(self.logical_session_timeout) {
                idle.pop_back();
                pruned += 1;
            } else {
                break;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "pruned expired server sessions");
            self.discarded.fetch_add(pruned, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for ServerSessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSessionPool")
            .field("stats", &self.stats())
            .field("logical_session_timeout", &self.logical_session_timeout)
            .finish()
    }
}

/// Server-session pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_sessions: usize,
    pub created_sessions: usize,
    pub discarded_sessions: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool Stats: {} idle, {} created, {} discarded",
            self.idle_sessions, self.created_sessions, self.discarded_sessions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::UuidSessionIdIssuer;

    fn pool(timeout: Option<Duration>) -> ServerSessionPool {
        ServerSessionPool::new(Arc::new(UuidSessionIdIssuer), timeout)
    }

    #[test]
    fn test_acquire_allocates_when_empty() {
        let pool = pool(Some(Duration::from_secs(30 * 60)));
        let a = pool.acquire();
        let b = pool.acquire();

        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().created_sessions, 2);
    }

    #[test]
    fn test_release_then_acquire_reuses() {
        let pool = pool(Some(Duration::from_secs(30 * 60)));
        let session = pool.acquire();
        let id = session.id();

        pool.release(session);
        assert_eq!(pool.stats().idle_sessions, 1);

        let reused = pool.acquire();
        assert_eq!(reused.id(), id);
        assert_eq!(pool.stats().created_sessions, 1);
    }

    #[test]
    fn test_most_recently_used_first() {
        let pool = pool(Some(Duration::from_secs(30 * 60)));
        let first = pool.acquire();
        let second = pool.acquire();
        let second_id = second.id();

        pool.release(first);
        pool.release(second);

        // The session released last comes back first.
        assert_eq!(pool.acquire().id(), second_id);
    }

    #[test]
    fn test_dirty_session_is_discarded() {
        let pool = pool(Some(Duration::from_secs(30 * 60)));
        let session = pool.acquire();
        let dirty_id = session.id();
        session.mark_dirty();

        pool.release(session);
        assert_eq!(pool.stats().idle_sessions, 0);
        assert_eq!(pool.stats().discarded_sessions, 1);

        assert_ne!(pool.acquire().id(), dirty_id);
    }

    #[test]
    fn test_expired_session_not_returned_to_idle_set() {
        // Timeout below the safety margin: every session is about to expire.
        let pool = pool(Some(Duration::from_secs(1)));
        let session = pool.acquire();

        pool.release(session);
        assert_eq!(pool.stats().idle_sessions, 0);
        assert_eq!(pool.stats().discarded_sessions, 1);
    }

    #[test]
    fn test_clear_drains_and_reports_ids() {
        let pool = pool(Some(Duration::from_secs(30 * 60)));
        let a = pool.acquire();
        let b = pool.acquire();
        let ids = [a.id(), b.id()];

        pool.release(a);
        pool.release(b);

        let drained = pool.clear();
        assert_eq!(drained.len(), 2);
        assert!(ids.iter().all(|id| drained.contains(id)));
        assert_eq!(pool.stats().idle_sessions, 0);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = Arc::new(pool(Some(Duration::from_secs(30 * 60))));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let session = pool.acquire();
                        pool.release(session);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.idle_sessions, stats.created_sessions);
    }
}
