use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::browser::session::{BrowsingSession, SessionFactory};
use crate::error::{Result, ScraperError};
use crate::proxy::ProxyPool;

/// How an operation left its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Session usable; return it to the idle set.
    Healthy,
    /// Browsing context crashed, proxy rejected, or navigation engine error;
    /// destroy the session and replace it lazily.
    Broken,
}

type IdleSet = Arc<Mutex<VecDeque<Box<dyn BrowsingSession>>>>;

/// Bounded pool of reusable browser sessions with fair FIFO allocation.
///
/// The pool starts empty; the first `acquire()` fixes the capacity from the
/// proxy pool and the configured maximum. Sessions are created lazily as
/// leases find the idle set empty, each bound to the next proxy credential,
/// which is also how a destroyed session gets its replacement.
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    proxies: Option<Arc<ProxyPool>>,
    max_capacity: usize,
    idle: IdleSet,
    semaphore: Arc<Semaphore>,
    capacity: tokio::sync::Mutex<Option<usize>>,
}

impl SessionPool {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        proxies: Option<Arc<ProxyPool>>,
        max_capacity: usize,
    ) -> Self {
        Self {
            factory,
            proxies,
            max_capacity: max_capacity.max(1),
            idle: Arc::new(Mutex::new(VecDeque::new())),
            semaphore: Arc::new(Semaphore::new(0)),
            capacity: tokio::sync::Mutex::new(None),
        }
    }

    /// Lease a session, suspending (FIFO) while the pool is at capacity with
    /// every session in use. Dropping the lease returns the session on all
    /// exit paths.
    pub async fn acquire(&self) -> Result<SessionLease> {
        self.ensure_populated().await?;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ScraperError::PoolInit(format!("Session pool closed: {}", e)))?;

        let idle_session = self
            .idle
            .lock()
            .expect("idle set lock poisoned")
            .pop_front();

        let session = match idle_session {
            Some(session) => {
                debug!("Reusing idle session {}", session.id());
                session
            }
            // empty slot: either first use or a broken session was destroyed
            None => self.create_session().await?,
        };

        Ok(SessionLease {
            session: Some(session),
            broken: false,
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    /// Consume a lease with an explicit outcome instead of relying on drop.
    pub fn release(lease: SessionLease, outcome: SessionOutcome) {
        let mut lease = lease;
        if outcome == SessionOutcome::Broken {
            lease.mark_broken();
        }
        drop(lease);
    }

    async fn ensure_populated(&self) -> Result<()> {
        let mut capacity = self.capacity.lock().await;
        if capacity.is_some() {
            return Ok(());
        }

        let resolved = match &self.proxies {
            Some(proxies) => {
                if proxies.is_empty() {
                    return Err(ScraperError::PoolInit(
                        "No proxies available to populate the session pool".to_string(),
                    )
                    .into());
                }
                self.max_capacity.min(proxies.len())
            }
            None => self.max_capacity,
        };

        self.semaphore.add_permits(resolved);
        *capacity = Some(resolved);
        info!("Session pool populated with capacity {}", resolved);
        Ok(())
    }

    async fn create_session(&self) -> Result<Box<dyn BrowsingSession>> {
        let proxy = match &self.proxies {
            Some(proxies) => Some(proxies.next()?),
            None => None,
        };
        self.factory.create(proxy).await
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("idle set lock poisoned").len()
    }

    /// Close every idle session. In-flight leases drain back into the idle
    /// set and are closed by a subsequent call.
    pub async fn shutdown(&self) {
        loop {
            let session = self
                .idle
                .lock()
                .expect("idle set lock poisoned")
                .pop_front();
            let Some(mut session) = session else { break };
            if let Err(e) = session.close().await {
                warn!("Failed to close session {}: {}", session.id(), e);
            }
        }
        info!("Session pool shut down");
    }
}

/// Exclusive loan of one session. Returns the session to the pool when
/// dropped; broken sessions are destroyed instead, freeing the slot for a
/// lazily created replacement on the next proxy credential.
pub struct SessionLease {
    session: Option<Box<dyn BrowsingSession>>,
    broken: bool,
    idle: IdleSet,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("has_session", &self.session.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

impl SessionLease {
    pub fn session(&self) -> &dyn BrowsingSession {
        self.session
            .as_deref()
            .expect("session lease already released")
    }

    /// Mark the underlying browsing context unusable; it will be destroyed
    /// on release rather than returned to the idle set.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if self.broken {
            let id = session.id();
            warn!("Destroying broken session {}", id);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let mut session = session;
                    if let Err(e) = session.close().await {
                        debug!("Close of broken session {} failed: {}", id, e);
                    }
                });
            }
        } else {
            self.idle
                .lock()
                .expect("idle set lock poisoned")
                .push_back(session);
        }
        // the semaphore permit drops with the lease, freeing the slot
    }
}
