use anyhow::Result;

use crate::EngineConfig;

pub fn check_config(cfg: &EngineConfig) -> Result<()> {
    let t = &cfg.tracking;
    anyhow::ensure!(t.iou_match_threshold > 0.0 && t.iou_match_threshold <= 1.0, "tracking.iou_match_threshold must be in (0, 1]");
    anyhow::ensure!((0.0..=1.0).contains(&t.min_confidence), "tracking.min_confidence must be in [0, 1]");
    anyhow::ensure!(t.removal_timeout_frames >= t.inactive_timeout_frames, "tracking.removal_timeout_frames must be >= inactive_timeout_frames");
    anyhow::ensure!(cfg.smoothing_window >= 1, "smoothing_window must be >= 1");
    anyhow::ensure!(cfg.session_ttl_secs >= 1, "session_ttl_secs must be >= 1");
    anyhow::ensure!(cfg.global_cas_retries >= 1, "global_cas_retries must be >= 1");
    anyhow::ensure!(
        cfg.shared_url.starts_with("redis://") || cfg.shared_url.starts_with("rediss://"),
        "shared_url must be a redis:// or rediss:// url"
    );
    Ok(())
}
