use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use rose_proto::report::BackendKind;

use crate::error::{StoreError, StoreResult};
use crate::record::{GlobalRecord, GlobalUpdate, Session};
use crate::{StateStore, SESSION_COUNTER};

struct Entry {
    session: Session,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    global: GlobalRecord,
    counters: HashMap<String, u64>,
}

/// In-process backend. All records sit behind one lock, so every write
/// replaces a whole record at once.
///
/// Only valid when a single worker process serves every request: other
/// processes cannot see this state.
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    ttl: Duration,
    sweeper: Option<JoinHandle<()>>,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), ttl, sweeper: None }
    }

    /// Like [`MemoryStore::new`], plus a background task dropping idle
    /// sessions every `interval`. Must be called inside a tokio runtime.
    pub fn with_sweeper(ttl: Duration, interval: Duration) -> Self {
        let mut store = Self::new(ttl);
        let weak = Arc::downgrade(&store.inner);
        store.sweeper = Some(tokio::spawn(sweep_loop(weak, interval)));
        info!("memory store: sweeping idle sessions every {:?} (ttl {:?})", interval, ttl);
        store
    }

    /// Removes sessions idle past the ttl; returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        sweep(&self.inner).await
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        if let Some(h) = self.sweeper.take() {
            h.abort();
        }
    }
}

async fn sweep(inner: &Mutex<Inner>) -> usize {
    let now = Instant::now();
    let mut g = inner.lock().await;
    let before = g.sessions.len();
    g.sessions.retain(|id, e| {
        let keep = e.expires_at > now;
        if !keep {
            debug!("memory store: session {} expired", id);
        }
        keep
    });
    before - g.sessions.len()
}

async fn sweep_loop(inner: Weak<Mutex<Inner>>, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        let Some(strong) = inner.upgrade() else { break; };
        let n = sweep(&strong).await;
        if n > 0 {
            info!("memory store: swept {} idle session(s)", n);
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn get_session(&self, id: &str) -> StoreResult<Session> {
        let mut g = self.inner.lock().await;
        match g.sessions.get(id) {
            Some(e) if e.expires_at > Instant::now() => Ok(e.session.clone()),
            Some(_) => {
                // expired but not swept yet
                g.sessions.remove(id);
                Err(StoreError::NotFound(id.to_string()))
            }
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn put_session(&self, session: &Session) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.sessions.insert(
            session.id.clone(),
            Entry { session: session.clone(), expires_at: Instant::now() + self.ttl },
        );
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().await.sessions.remove(id).is_some())
    }

    async fn get_global(&self) -> StoreResult<GlobalRecord> {
        let g = self.inner.lock().await;
        let mut global = g.global.clone();
        global.next_session_number = g.counters.get(SESSION_COUNTER).copied().unwrap_or(0) + 1;
        Ok(global)
    }

    async fn put_global(&self, global: &GlobalRecord) -> StoreResult<()> {
        self.inner.lock().await.global = global.clone();
        Ok(())
    }

    async fn update_global(&self, updates: &[GlobalUpdate]) -> StoreResult<GlobalRecord> {
        let mut g = self.inner.lock().await;
        g.global.apply(updates);
        let mut global = g.global.clone();
        global.next_session_number = g.counters.get(SESSION_COUNTER).copied().unwrap_or(0) + 1;
        Ok(global)
    }

    async fn atomic_increment(&self, counter: &str) -> StoreResult<u64> {
        let mut g = self.inner.lock().await;
        let v = g.counters.entry(counter.to_string()).or_insert(0);
        *v += 1;
        Ok(*v)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
