use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use rose_proto::report::{BackendKind, FrameReport, HealthReport, SessionStats, SessionSummary, TrackView};
use rose_store::memory::MemoryStore;
use rose_store::shared::{SharedConfig, SharedStore};
use rose_store::{GlobalUpdate, Session, StateStore, StoreError};
use rose_vision::frame::{detect_encoded, DetectError};
use rose_vision::tracker::IdentityTracker;
use rose_vision::{Detection, Detector};

use crate::clock::{Clock, SystemClock};
use crate::{EngineConfig, SessionError};

/// One camera frame handed to `advance`.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Encoded image (JPEG/PNG), run through the configured detector.
    Encoded(Vec<u8>),
    /// Detections already computed upstream.
    Detections(Vec<Detection>),
}

/// Drives session lifecycles on top of a [`StateStore`].
///
/// Holds no per-session state itself: every request reads the session from
/// the store and writes it back, so any worker can serve any request.
pub struct SessionManager {
    store: RwLock<Arc<dyn StateStore>>,
    degraded: AtomicBool,
    tracker: IdentityTracker,
    detector: Option<Arc<dyn Detector>>,
    clock: Arc<dyn Clock>,
    cfg: EngineConfig,
}

/// Opens the backend named by the config. Call once at process start.
pub async fn open_store(cfg: &EngineConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match cfg.backend {
        BackendKind::InMemory => Ok(memory_store(cfg)),
        BackendKind::Shared => {
            let store = SharedStore::connect(&SharedConfig {
                url: cfg.shared_url.clone(),
                session_ttl: cfg.session_ttl(),
                connect_timeout: cfg.connect_timeout(),
                cas_retries: cfg.global_cas_retries,
            })
            .await?;
            Ok(Arc::new(store))
        }
    }
}

fn memory_store(cfg: &EngineConfig) -> Arc<dyn StateStore> {
    match cfg.sweep_interval() {
        Some(every) => Arc::new(MemoryStore::with_sweeper(cfg.session_ttl(), every)),
        None => Arc::new(MemoryStore::new(cfg.session_ttl())),
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn StateStore>, cfg: EngineConfig) -> Self {
        Self {
            store: RwLock::new(store),
            degraded: AtomicBool::new(false),
            tracker: IdentityTracker::new(cfg.tracking.clone()),
            detector: None,
            clock: Arc::new(SystemClock),
            cfg,
        }
    }

    /// Opens the configured backend; an unreachable shared backend degrades
    /// to in-process state instead of failing startup.
    pub async fn from_config(cfg: EngineConfig) -> Self {
        match open_store(&cfg).await {
            Ok(store) => {
                info!("session manager: using {} state", store.kind());
                Self::new(store, cfg)
            }
            Err(e) => {
                warn!("session manager: shared backend unavailable ({:#}); falling back to in-memory state, sessions are NOT shared across workers", e);
                let m = Self::new(memory_store(&cfg), cfg);
                m.degraded.store(true, Ordering::SeqCst);
                m
            }
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    async fn store(&self) -> Arc<dyn StateStore> {
        self.store.read().await.clone()
    }

    /// Swap the shared backend for in-process state. Idempotent.
    async fn degrade(&self) -> Arc<dyn StateStore> {
        let mut slot = self.store.write().await;
        if slot.kind() != BackendKind::InMemory {
            warn!("session manager: degrading to in-memory state; sessions are NOT shared across workers");
            *slot = memory_store(&self.cfg);
            self.degraded.store(true, Ordering::SeqCst);
        }
        slot.clone()
    }

    async fn load(&self, store: &dyn StateStore, id: &str) -> Result<Session, SessionError> {
        match store.get_session(id).await {
            Ok(s) => Ok(s),
            Err(StoreError::Corrupt { key, source }) => {
                warn!("session manager: discarding unreadable session at {}: {}", key, source);
                if let Err(e) = store.delete_session(id).await {
                    warn!("session manager: could not delete {}: {:#}", key, e);
                }
                Err(SessionError::SessionNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn start(&self) -> Result<(String, u64), SessionError> {
        let now = self.clock.now_ms();
        let store = self.store().await;
        let session = match store.create_session(now).await {
            Ok(s) => s,
            Err(StoreError::Unavailable(msg)) if store.kind() == BackendKind::Shared => {
                warn!("session manager: start failed on shared backend: {}", msg);
                self.degrade().await.create_session(now).await?
            }
            Err(e) => return Err(e.into()),
        };
        info!("session {} started (#{})", session.id, session.session_number);
        Ok((session.id, session.session_number))
    }

    pub async fn advance(&self, session_id: &str, frame: Frame) -> Result<FrameReport, SessionError> {
        let store = self.store().await;
        let mut session = self.load(store.as_ref(), session_id).await?;
        let now = self.clock.now_ms();

        session.frame_count += 1;
        let frame_index = session.frame_count;

        let mut detection_error = None;
        let mut first_observation = false;
        match self.detect(frame).await {
            Ok(dets) => {
                first_observation = session.recent_frame_counts.is_empty();
                let out = self.tracker.update(&mut session.track_set, &dets, frame_index);
                debug!(
                    "session {} frame {}: dets={} matched={} new={} removed={}",
                    session_id, frame_index, dets.len(), out.matched, out.created.len(), out.removed.len()
                );
                session.push_frame_count(out.active_ids.len() as u32, self.cfg.smoothing_window);
            }
            Err(e) => {
                warn!("session {} frame {} skipped: {}", session_id, frame_index, e);
                detection_error = Some(e.to_string());
            }
        }

        if frame_index > 1 {
            let dt = now - session.last_update_time_ms;
            if dt > 0 {
                session.display_fps = 1000.0 / dt as f32;
            }
        }
        session.last_update_time_ms = now;

        // First observation publishes immediately; afterwards at most once per interval.
        let interval = i64::try_from(self.cfg.count_update_interval_ms).unwrap_or(i64::MAX);
        let due = now - session.last_count_update_time_ms >= interval;
        let count_updated = !session.recent_frame_counts.is_empty() && (due || first_observation);
        if count_updated {
            session.display_count = session.smoothed_count();
            session.last_count_update_time_ms = now;
        }

        store.put_session(&session).await?;
        let global = store
            .update_global(&[GlobalUpdate::MergeUniqueIds(session.session_unique_ids().clone())])
            .await?;

        let tracks = session
            .track_set
            .tracks
            .values()
            .map(|t| TrackView { id: t.id, bbox: t.bbox.to_array(), confidence: t.confidence, state: t.state })
            .collect();

        Ok(FrameReport {
            session_number: session.session_number,
            frame_index,
            current_count: session.track_set.active_count(),
            session_unique_count: session.session_unique_ids().len(),
            total_unique_count: global.total_unique_ids.len(),
            display_count: session.display_count,
            count_updated,
            display_fps: session.display_fps,
            tracks,
            detection_error,
        })
    }

    async fn detect(&self, frame: Frame) -> Result<Vec<Detection>, DetectError> {
        match frame {
            Frame::Detections(dets) => Ok(dets),
            Frame::Encoded(bytes) => {
                let detector = self.detector.clone().ok_or(DetectError::NoDetector)?;
                // inference blocks; keep it off the async workers
                tokio::task::spawn_blocking(move || detect_encoded(detector.as_ref(), &bytes))
                    .await
                    .unwrap_or_else(|e| Err(DetectError::Detector(anyhow::anyhow!("detector task failed: {}", e))))
            }
        }
    }

    pub async fn stop(&self, session_id: &str) -> Result<SessionSummary, SessionError> {
        let store = self.store().await;
        let session = self.load(store.as_ref(), session_id).await?;

        let now = self.clock.now_ms();
        let duration_secs = (now - session.start_time_ms).max(0) as f64 / 1000.0;
        let summary = SessionSummary {
            session_id: session.id.clone(),
            session_number: session.session_number,
            started_at_ms: session.start_time_ms,
            ended_at_ms: now,
            duration_secs,
            frames_processed: session.frame_count,
            session_unique_count: session.session_unique_ids().len(),
            average_fps: if duration_secs > 0.0 { session.frame_count as f64 / duration_secs } else { 0.0 },
            final_display_count: session.display_count,
        };

        // Record first, delete second: a failed global update leaves the
        // session in place for a retry. History holds one entry per session
        // id, so a retried or racing stop cannot append twice.
        store
            .update_global(&[
                GlobalUpdate::MergeUniqueIds(session.session_unique_ids().clone()),
                GlobalUpdate::AppendHistory(summary.clone()),
            ])
            .await?;
        if !store.delete_session(session_id).await? {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }

        info!(
            "session {} stopped (#{}): {} frames, {} unique in {:.1}s",
            session_id, summary.session_number, summary.frames_processed, summary.session_unique_count, duration_secs
        );
        Ok(summary)
    }

    pub async fn stats(&self, session_id: &str) -> Result<SessionStats, SessionError> {
        let store = self.store().await;
        let s = self.load(store.as_ref(), session_id).await?;
        Ok(SessionStats {
            session_id: s.id.clone(),
            session_number: s.session_number,
            started_at_ms: s.start_time_ms,
            last_update_ms: s.last_update_time_ms,
            elapsed_secs: (self.clock.now_ms() - s.start_time_ms).max(0) as f64 / 1000.0,
            frames_processed: s.frame_count,
            current_count: s.track_set.active_count(),
            session_unique_count: s.session_unique_ids().len(),
            display_count: s.display_count,
        })
    }

    pub async fn total_unique_count(&self) -> Result<usize, SessionError> {
        Ok(self.store().await.get_global().await?.total_unique_ids.len())
    }

    pub async fn history(&self) -> Result<Vec<SessionSummary>, SessionError> {
        Ok(self.store().await.get_global().await?.session_history)
    }

    pub async fn health(&self) -> HealthReport {
        let store = self.store().await;
        let reachable = match store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("health: {} backend unreachable: {:#}", store.kind(), e);
                false
            }
        };
        HealthReport { backend: store.kind(), reachable, degraded: self.is_degraded() }
    }
}
