use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info, warn};

use rose_proto::report::BackendKind;

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::record::{GlobalRecord, GlobalUpdate, Session};
use crate::{session_key, StateStore, SESSION_COUNTER};

pub const GLOBAL_KEY: &str = "persistent_data";

// SET KEYS[1] = ARGV[2] only if its current value is ARGV[1] ('' = absent).
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if (cur == false and ARGV[1] == '') or cur == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

#[derive(Debug, Clone)]
pub struct SharedConfig {
    pub url: String,
    pub session_ttl: Duration,
    pub connect_timeout: Duration,
    pub cas_retries: u32,
}

/// Redis backend, visible to every worker process.
///
/// Session records are last-writer-wins: one session is expected to be
/// driven by one request stream, so concurrent `advance` calls on the same
/// id may lose updates. The global record is contended by all sessions and
/// is only ever written through compare-and-swap.
#[derive(Clone)]
pub struct SharedStore {
    con: ConnectionManager,
    ttl_secs: u64,
    cas_retries: u32,
    cas: redis::Script,
}

impl SharedStore {
    pub async fn connect(cfg: &SharedConfig) -> StoreResult<Self> {
        let client = redis::Client::open(cfg.url.as_str())?;
        let con = tokio::time::timeout(cfg.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Unavailable(format!("connect to {} timed out", redact(&cfg.url))))??;

        let store = Self {
            con,
            ttl_secs: cfg.session_ttl.as_secs().max(1),
            cas_retries: cfg.cas_retries.max(1),
            cas: redis::Script::new(CAS_SCRIPT),
        };
        store.ping().await?;
        info!("shared store: connected to {}", redact(&cfg.url));
        Ok(store)
    }

    async fn get_raw(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut con = self.con.clone();
        let v: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(v)
    }

    async fn counter_value(&self, counter: &str) -> StoreResult<u64> {
        let v: Option<u64> = {
            let mut con = self.con.clone();
            redis::cmd("GET").arg(counter_key(counter)).query_async(&mut con).await?
        };
        Ok(v.unwrap_or(0))
    }

    async fn with_counter(&self, mut global: GlobalRecord) -> StoreResult<GlobalRecord> {
        global.next_session_number = self.counter_value(SESSION_COUNTER).await? + 1;
        Ok(global)
    }
}

fn counter_key(counter: &str) -> String {
    format!("counter:{}", counter)
}

// Strip credentials before logging a connection url.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(s), Some(at)) if at > s => format!("{}***{}", &url[..s + 3], &url[at..]),
        _ => url.to_string(),
    }
}

#[async_trait]
impl StateStore for SharedStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Shared
    }

    async fn get_session(&self, id: &str) -> StoreResult<Session> {
        let key = session_key(id);
        match self.get_raw(&key).await? {
            Some(raw) => codec::decode(&key, &raw),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn put_session(&self, session: &Session) -> StoreResult<()> {
        let key = session_key(&session.id);
        let raw = codec::encode(&key, session)?;
        let mut con = self.con.clone();
        let _: () = redis::cmd("SET")
            .arg(&key)
            .arg(raw)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<bool> {
        let mut con = self.con.clone();
        let n: u64 = redis::cmd("DEL").arg(session_key(id)).query_async(&mut con).await?;
        Ok(n > 0)
    }

    async fn get_global(&self) -> StoreResult<GlobalRecord> {
        let global = match self.get_raw(GLOBAL_KEY).await? {
            Some(raw) => codec::decode(GLOBAL_KEY, &raw)?,
            None => GlobalRecord::default(),
        };
        self.with_counter(global).await
    }

    async fn put_global(&self, global: &GlobalRecord) -> StoreResult<()> {
        let raw = codec::encode(GLOBAL_KEY, global)?;
        let mut con = self.con.clone();
        let _: () = redis::cmd("SET").arg(GLOBAL_KEY).arg(raw).query_async(&mut con).await?;
        Ok(())
    }

    async fn update_global(&self, updates: &[GlobalUpdate]) -> StoreResult<GlobalRecord> {
        for attempt in 1..=self.cas_retries {
            let current = self.get_raw(GLOBAL_KEY).await?;
            let mut global: GlobalRecord = match &current {
                Some(raw) => codec::decode(GLOBAL_KEY, raw)?,
                None => GlobalRecord::default(),
            };
            if !global.apply(updates) {
                return self.with_counter(global).await;
            }

            let next = codec::encode(GLOBAL_KEY, &global)?;
            let mut con = self.con.clone();
            let swapped: i64 = self
                .cas
                .key(GLOBAL_KEY)
                .arg(current.as_deref().unwrap_or_default())
                .arg(&next)
                .invoke_async(&mut con)
                .await?;
            if swapped == 1 {
                return self.with_counter(global).await;
            }
            debug!("shared store: global record changed underneath us (attempt {})", attempt);
        }
        warn!("shared store: global update abandoned after {} attempts", self.cas_retries);
        Err(StoreError::Conflict { key: GLOBAL_KEY.to_string(), attempts: self.cas_retries })
    }

    async fn atomic_increment(&self, counter: &str) -> StoreResult<u64> {
        let mut con = self.con.clone();
        let v: u64 = redis::cmd("INCR").arg(counter_key(counter)).query_async(&mut con).await?;
        Ok(v)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut con = self.con.clone();
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }
}
