use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{iou, BBox, Detection, TrackState};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub iou_match_threshold: f32,
    /// Unmatched tracks stay Active for this many frames after their last match.
    pub inactive_timeout_frames: u64,
    /// Unmatched tracks are dropped once this many frames passed since their last match.
    pub removal_timeout_frames: u64,
    pub min_confidence: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.5,
            inactive_timeout_frames: 30,
            removal_timeout_frames: 75,
            min_confidence: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub bbox: BBox,
    pub last_seen_frame: u64,
    pub state: TrackState,
    pub confidence: f32,
}

/// Per-session tracker state. Everything the tracker needs between frames
/// lives here so it can be persisted between stateless requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSet {
    pub next_id: u64,
    pub tracks: BTreeMap<u64, Track>,
    /// Every id ever created in this session. Never shrinks.
    pub session_unique_ids: BTreeSet<u64>,
}

impl TrackSet {
    /// Ids are allocated from `base + 1` upwards. Seeding each session with a
    /// distinct base keeps ids unique across sessions too.
    pub fn with_id_base(base: u64) -> Self {
        Self { next_id: base + 1, tracks: BTreeMap::new(), session_unique_ids: BTreeSet::new() }
    }

    pub fn active_ids(&self) -> Vec<u64> {
        self.tracks.values().filter(|t| t.state == TrackState::Active).map(|t| t.id).collect()
    }

    pub fn active_count(&self) -> usize {
        self.tracks.values().filter(|t| t.state == TrackState::Active).count()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.session_unique_ids.insert(id);
        id
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackOutput {
    pub active_ids: Vec<u64>,
    pub created: Vec<u64>,
    pub removed: Vec<u64>,
    pub matched: usize,
}

#[derive(Debug, Clone)]
pub struct IdentityTracker {
    cfg: TrackingConfig,
}

impl IdentityTracker {
    pub fn new(cfg: TrackingConfig) -> Self {
        Self { cfg }
    }

    pub fn update(&self, set: &mut TrackSet, dets: &[Detection], frame_index: u64) -> TrackOutput {
        // Non-finite values would not survive the stored JSON round trip.
        let dets: Vec<&Detection> = dets
            .iter()
            .filter(|d| d.conf.is_finite() && d.bbox.is_finite() && d.conf >= self.cfg.min_confidence)
            .collect();
        let ids: Vec<u64> = set.tracks.keys().copied().collect();

        // Candidate pairs in encounter order (track id, then detection index)
        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, id) in ids.iter().enumerate() {
            let tb = set.tracks[id].bbox;
            for (di, d) in dets.iter().enumerate() {
                let v = iou(&tb, &d.bbox);
                if v >= self.cfg.iou_match_threshold {
                    pairs.push((ti, di, v));
                }
            }
        }
        // Stable sort: equal IoU keeps encounter order.
        pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));

        // Greedy association by IOU
        let mut used_track = vec![false; ids.len()];
        let mut used_det = vec![false; dets.len()];
        let mut out = TrackOutput::default();
        for (ti, di, _) in pairs {
            if used_track[ti] || used_det[di] { continue; }
            used_track[ti] = true;
            used_det[di] = true;

            let d = dets[di];
            if let Some(t) = set.tracks.get_mut(&ids[ti]) {
                t.bbox = d.bbox;
                t.last_seen_frame = frame_index;
                t.confidence = d.conf;
                t.state = TrackState::Active;
            }
            out.matched += 1;
        }

        // Age out unmatched tracks
        for (ti, id) in ids.iter().enumerate() {
            if used_track[ti] { continue; }
            let Some(t) = set.tracks.get_mut(id) else { continue; };
            let missed = frame_index.saturating_sub(t.last_seen_frame);
            if missed > self.cfg.removal_timeout_frames {
                set.tracks.remove(id);
                out.removed.push(*id);
            } else if missed > self.cfg.inactive_timeout_frames {
                t.state = TrackState::Inactive;
            }
        }

        // Create new tracks for unmatched detections
        for (di, d) in dets.iter().enumerate() {
            if used_det[di] { continue; }
            let id = set.allocate_id();
            set.tracks.insert(id, Track {
                id,
                bbox: d.bbox,
                last_seen_frame: frame_index,
                state: TrackState::Active,
                confidence: d.conf,
            });
            out.created.push(id);
        }

        out.active_ids = set.active_ids();
        out
    }
}
