//! Session and global state shared by every request handler.
//!
//! Two backends implement [`StateStore`]: [`memory::MemoryStore`] keeps state
//! in this process (single worker only) and [`shared::SharedStore`] keeps it
//! in Redis so any number of worker processes see the same sessions. The
//! backend is chosen once at startup.

pub mod codec;
pub mod error;
pub mod memory;
pub mod record;
pub mod shared;

use async_trait::async_trait;
use tracing::{debug, warn};

use rose_proto::report::BackendKind;

pub use error::{StoreError, StoreResult};
pub use record::{GlobalRecord, GlobalUpdate, Session};

/// Counter that numbers sessions.
pub const SESSION_COUNTER: &str = "next_session_number";

pub fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

#[async_trait]
pub trait StateStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn get_session(&self, id: &str) -> StoreResult<Session>;

    /// Full replace. Refreshes the session's expiry.
    async fn put_session(&self, session: &Session) -> StoreResult<()>;

    /// Returns whether the session existed.
    async fn delete_session(&self, id: &str) -> StoreResult<bool>;

    async fn get_global(&self) -> StoreResult<GlobalRecord>;

    async fn put_global(&self, global: &GlobalRecord) -> StoreResult<()>;

    /// Read-modify-write of the global record, safe against concurrent writers.
    async fn update_global(&self, updates: &[GlobalUpdate]) -> StoreResult<GlobalRecord>;

    /// Linearizable across every caller of the same backend.
    async fn atomic_increment(&self, counter: &str) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;

    async fn create_session(&self, now_ms: i64) -> StoreResult<Session> {
        let number = self.atomic_increment(SESSION_COUNTER).await?;
        let session = Session::new(record::new_session_id(), number, now_ms);
        self.put_session(&session).await?;
        // The session is already live and numbered; the marker is advisory.
        if let Err(e) = self.update_global(&[GlobalUpdate::SetLastActive(session.id.clone())]).await {
            warn!("store: could not mark session {} as last active: {}", session.id, e);
        }
        debug!("store: created session {} (#{}) on {}", session.id, number, self.kind());
        Ok(session)
    }
}
