use std::collections::{BTreeSet, VecDeque};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use rose_proto::report::SessionSummary;
use rose_vision::tracker::TrackSet;

/// Track ids of session N are allocated above `N << SESSION_ID_SHIFT`.
pub const SESSION_ID_SHIFT: u32 = 32;

pub fn new_session_id() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub session_number: u64,
    pub start_time_ms: i64,
    pub last_update_time_ms: i64,
    pub last_count_update_time_ms: i64,
    pub frame_count: u64,
    pub track_set: TrackSet,
    pub display_count: u32,
    pub recent_frame_counts: VecDeque<u32>,
    #[serde(default)]
    pub display_fps: f32,
}

impl Session {
    pub fn new(id: String, session_number: u64, now_ms: i64) -> Self {
        Self {
            id,
            session_number,
            start_time_ms: now_ms,
            last_update_time_ms: now_ms,
            last_count_update_time_ms: now_ms,
            frame_count: 0,
            track_set: TrackSet::with_id_base(session_number << SESSION_ID_SHIFT),
            display_count: 0,
            recent_frame_counts: VecDeque::new(),
            display_fps: 0.0,
        }
    }

    pub fn session_unique_ids(&self) -> &BTreeSet<u64> {
        &self.track_set.session_unique_ids
    }

    /// Append an in-frame count, keeping at most `window` of the latest ones.
    pub fn push_frame_count(&mut self, count: u32, window: usize) {
        self.recent_frame_counts.push_back(count);
        while self.recent_frame_counts.len() > window.max(1) {
            self.recent_frame_counts.pop_front();
        }
    }

    /// Rounded mean of the recent in-frame counts.
    pub fn smoothed_count(&self) -> u32 {
        if self.recent_frame_counts.is_empty() {
            return 0;
        }
        let sum: u64 = self.recent_frame_counts.iter().map(|&c| c as u64).sum();
        (sum as f64 / self.recent_frame_counts.len() as f64).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRecord {
    #[serde(default)]
    pub total_unique_ids: BTreeSet<u64>,
    #[serde(default)]
    pub session_history: Vec<SessionSummary>,
    /// Mirrors the session counter on read. Writing it back does not move the counter.
    #[serde(default = "one")]
    pub next_session_number: u64,
    #[serde(default)]
    pub last_active_session_id: Option<String>,
}

fn one() -> u64 {
    1
}

impl Default for GlobalRecord {
    fn default() -> Self {
        Self {
            total_unique_ids: BTreeSet::new(),
            session_history: Vec::new(),
            next_session_number: 1,
            last_active_session_id: None,
        }
    }
}

/// Commutative edits applied to the global record under the backend's
/// update discipline (lock or compare-and-swap).
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalUpdate {
    MergeUniqueIds(BTreeSet<u64>),
    AppendHistory(SessionSummary),
    SetLastActive(String),
}

impl GlobalRecord {
    /// Applies `updates` in order; returns whether anything changed.
    pub fn apply(&mut self, updates: &[GlobalUpdate]) -> bool {
        let mut changed = false;
        for u in updates {
            match u {
                GlobalUpdate::MergeUniqueIds(ids) => {
                    for id in ids {
                        changed |= self.total_unique_ids.insert(*id);
                    }
                }
                GlobalUpdate::AppendHistory(summary) => {
                    // one entry per session, so a retried stop cannot append twice
                    if !self.session_history.iter().any(|s| s.session_id == summary.session_id) {
                        self.session_history.push(summary.clone());
                        changed = true;
                    }
                }
                GlobalUpdate::SetLastActive(id) => {
                    if self.last_active_session_id.as_deref() != Some(id.as_str()) {
                        self.last_active_session_id = Some(id.clone());
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}
