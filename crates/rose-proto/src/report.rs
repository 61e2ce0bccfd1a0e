use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "in-memory")]
    InMemory,
    #[serde(rename = "shared")]
    Shared,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "in-memory",
            BackendKind::Shared => "shared",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackView {
    pub id: u64,
    // x, y, w, h
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub state: TrackState,
}

/// Result of one `advance` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameReport {
    pub session_number: u64,
    pub frame_index: u64,
    pub current_count: usize,
    pub session_unique_count: usize,
    pub total_unique_count: usize,
    pub display_count: u32,
    /// True when this frame refreshed `display_count`.
    pub count_updated: bool,
    pub display_fps: f32,
    pub tracks: Vec<TrackView>,
    /// Set when the frame was skipped (undecodable or detector error).
    pub detection_error: Option<String>,
}

/// Final statistics of a stopped session, appended to the session history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub session_number: u64,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub duration_secs: f64,
    pub frames_processed: u64,
    pub session_unique_count: usize,
    pub average_fps: f64,
    pub final_display_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub session_number: u64,
    pub started_at_ms: i64,
    pub last_update_ms: i64,
    pub elapsed_secs: f64,
    pub frames_processed: u64,
    pub current_count: usize,
    pub session_unique_count: usize,
    pub display_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub backend: BackendKind,
    pub reachable: bool,
    /// The shared backend was configured but the process fell back to in-memory state.
    pub degraded: bool,
}

impl HealthReport {
    pub fn status(&self) -> &'static str {
        if self.reachable { "healthy" } else { "unhealthy" }
    }
}
