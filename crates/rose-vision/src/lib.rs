mod iou;
pub mod frame;
pub mod tracker;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use iou::iou;
pub use rose_proto::report::TrackState;

/// Axis-aligned box, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.w, self.h]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub conf: f32,
}

impl Detection {
    pub fn new(bbox: BBox, conf: f32) -> Self {
        Self { bbox, conf }
    }
}

/// Object detector boundary. Implementations wrap the model runtime and must
/// be callable from several request tasks at once.
pub trait Detector: Send + Sync {
    fn detect_rgb(&self, rgb: &[u8], w: u32, h: u32) -> Result<Vec<Detection>>;
}
