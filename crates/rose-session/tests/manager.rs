use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rose_proto::report::BackendKind;
use rose_session::clock::ManualClock;
use rose_session::{EngineConfig, Frame, SessionError, SessionManager};
use rose_store::memory::MemoryStore;
use rose_store::StateStore;
use rose_vision::tracker::TrackingConfig;
use rose_vision::{BBox, Detection, Detector};

const T0: i64 = 1_700_000_000_000;

fn cfg() -> EngineConfig {
    let mut c = EngineConfig::default();
    c.tracking = TrackingConfig {
        iou_match_threshold: 0.3,
        inactive_timeout_frames: 2,
        removal_timeout_frames: 5,
        min_confidence: 0.4,
    };
    c.smoothing_window = 4;
    c.count_update_interval_ms = 1000;
    c.sweep_interval_secs = 0;
    c
}

fn setup() -> (SessionManager, Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
    let m = SessionManager::new(store.clone(), cfg()).with_clock(clock.clone());
    (m, clock, store)
}

fn frame(boxes: &[(f32, f32)]) -> Frame {
    Frame::Detections(boxes.iter().map(|&(x, y)| Detection::new(BBox::new(x, y, 10.0, 10.0), 0.9)).collect())
}

#[tokio::test]
async fn session_numbers_are_sequential() {
    let (m, _, _) = setup();
    let (a, n1) = m.start().await.unwrap();
    let (b, n2) = m.start().await.unwrap();
    assert_ne!(a, b);
    assert_eq!((n1, n2), (1, 2));
}

#[tokio::test]
async fn advance_reports_counts_and_fps() {
    let (m, clock, _) = setup();
    let (id, number) = m.start().await.unwrap();

    let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 50.0)])).await.unwrap();
    assert_eq!(r.session_number, number);
    assert_eq!(r.frame_index, 1);
    assert_eq!(r.current_count, 2);
    assert_eq!(r.session_unique_count, 2);
    assert_eq!(r.total_unique_count, 2);
    assert!(r.count_updated);
    assert_eq!(r.display_count, 2);
    assert_eq!(r.tracks.len(), 2);

    clock.advance_ms(100);
    let r = m.advance(&id, frame(&[(1.0, 0.0), (51.0, 50.0)])).await.unwrap();
    assert_eq!(r.frame_index, 2);
    assert_eq!(r.session_unique_count, 2);
    assert!(!r.count_updated);
    assert!((r.display_fps - 10.0).abs() < 1e-3);
}

#[tokio::test]
async fn display_count_is_rate_limited_and_smoothed() {
    let (m, clock, _) = setup();
    let (id, _) = m.start().await.unwrap();

    let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0)])).await.unwrap();
    assert_eq!(r.display_count, 2);

    clock.advance_ms(100);
    let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)])).await.unwrap();
    assert_eq!(r.current_count, 3);
    assert_eq!(r.display_count, 2);
    assert!(!r.count_updated);

    clock.advance_ms(100);
    let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)])).await.unwrap();
    assert_eq!(r.display_count, 2);

    clock.advance_ms(900);
    let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0), (100.0, 0.0)])).await.unwrap();
    // window [2, 3, 3, 3] -> 2.75
    assert!(r.count_updated);
    assert_eq!(r.display_count, 3);
}

#[tokio::test]
async fn unique_counts_never_shrink_and_total_covers_session() {
    let (m, clock, _) = setup();
    let (id, _) = m.start().await.unwrap();
    let script: Vec<Vec<(f32, f32)>> = vec![
        vec![(0.0, 0.0), (40.0, 0.0)],
        vec![(1.0, 0.0)],
        vec![],
        vec![(80.0, 0.0)],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![],
        vec![(0.0, 0.0), (40.0, 0.0), (80.0, 0.0)],
    ];
    let mut prev = 0;
    for boxes in script {
        clock.advance_ms(50);
        let r = m.advance(&id, frame(&boxes)).await.unwrap();
        assert!(r.session_unique_count >= prev);
        assert!(r.total_unique_count >= r.session_unique_count);
        prev = r.session_unique_count;
    }
    assert!(prev >= 3);
}

#[tokio::test]
async fn totals_accumulate_across_sessions() {
    let (m, clock, _) = setup();
    let (s1, _) = m.start().await.unwrap();
    m.advance(&s1, frame(&[(0.0, 0.0), (50.0, 0.0)])).await.unwrap();
    m.stop(&s1).await.unwrap();

    clock.advance_ms(1000);
    let (s2, _) = m.start().await.unwrap();
    // same place as a rose from session 1, still a distinct identity
    let r = m.advance(&s2, frame(&[(0.0, 0.0)])).await.unwrap();
    assert_eq!(r.session_unique_count, 1);
    assert_eq!(r.total_unique_count, 3);
    assert_eq!(m.total_unique_count().await.unwrap(), 3);
}

#[tokio::test]
async fn stop_twice_reports_not_found_and_keeps_one_history_entry() {
    let (m, clock, _) = setup();
    let (id, number) = m.start().await.unwrap();
    for _ in 0..4 {
        clock.advance_ms(500);
        m.advance(&id, frame(&[(0.0, 0.0)])).await.unwrap();
    }

    let summary = m.stop(&id).await.unwrap();
    assert_eq!(summary.session_number, number);
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.session_unique_count, 1);
    assert!((summary.duration_secs - 2.0).abs() < 1e-9);
    assert!((summary.average_fps - 2.0).abs() < 1e-9);

    let err = m.stop(&id).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
    assert_eq!(m.history().await.unwrap().len(), 1);

    let err = m.advance(&id, frame(&[])).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (m, _, _) = setup();
    assert!(matches!(m.advance("missing", frame(&[])).await, Err(SessionError::SessionNotFound(_))));
    assert!(matches!(m.stats("missing").await, Err(SessionError::SessionNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_after_ttl() {
    let (m, _, store) = setup();
    let (id, _) = m.start().await.unwrap();
    m.advance(&id, frame(&[(0.0, 0.0)])).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(store.sweep_expired().await, 1);

    let err = m.advance(&id, frame(&[(0.0, 0.0)])).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_starts_never_share_a_number() {
    let (m, _, _) = setup();
    let m = Arc::new(m);
    let mut handles = Vec::new();
    for _ in 0..32 {
        let m = m.clone();
        handles.push(tokio::spawn(async move { m.start().await.unwrap().1 }));
    }
    let mut seen = BTreeSet::new();
    for h in handles {
        assert!(seen.insert(h.await.unwrap()));
    }
    assert_eq!(seen.len(), 32);
}

struct OneRose;

impl Detector for OneRose {
    fn detect_rgb(&self, _rgb: &[u8], _w: u32, _h: u32) -> anyhow::Result<Vec<Detection>> {
        Ok(vec![Detection::new(BBox::new(1.0, 1.0, 2.0, 2.0), 0.95)])
    }
}

fn png() -> Vec<u8> {
    let img = image::RgbImage::new(8, 8);
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[tokio::test]
async fn encoded_frames_run_through_detector() {
    let (m, _, _) = setup();
    let m = m.with_detector(Arc::new(OneRose));
    let (id, _) = m.start().await.unwrap();
    let r = m.advance(&id, Frame::Encoded(png())).await.unwrap();
    assert!(r.detection_error.is_none());
    assert_eq!(r.current_count, 1);
}

#[tokio::test]
async fn undecodable_frame_is_skipped_but_counted() {
    let (m, _, _) = setup();
    let m = m.with_detector(Arc::new(OneRose));
    let (id, _) = m.start().await.unwrap();

    let r = m.advance(&id, Frame::Encoded(b"definitely not a jpeg".to_vec())).await.unwrap();
    assert_eq!(r.frame_index, 1);
    assert!(r.detection_error.is_some());
    assert_eq!(r.current_count, 0);
    assert!(!r.count_updated);

    let r = m.advance(&id, Frame::Encoded(png())).await.unwrap();
    assert_eq!(r.frame_index, 2);
    assert_eq!(r.current_count, 1);
    assert_eq!(m.stats(&id).await.unwrap().frames_processed, 2);
}

#[tokio::test]
async fn encoded_frame_without_detector_is_skipped() {
    let (m, _, _) = setup();
    let (id, _) = m.start().await.unwrap();
    let r = m.advance(&id, Frame::Encoded(png())).await.unwrap();
    assert!(r.detection_error.unwrap().contains("no detector"));
}

#[tokio::test]
async fn stats_reflect_session_state() {
    let (m, clock, _) = setup();
    let (id, number) = m.start().await.unwrap();
    m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0)])).await.unwrap();
    clock.advance_ms(1500);
    let st = m.stats(&id).await.unwrap();
    assert_eq!(st.session_number, number);
    assert_eq!(st.frames_processed, 1);
    assert_eq!(st.session_unique_count, 2);
    assert_eq!(st.display_count, 2);
    assert!((st.elapsed_secs - 1.5).abs() < 1e-9);
}

#[tokio::test]
async fn health_reports_in_memory_backend() {
    let (m, _, store) = setup();
    assert_eq!(store.kind(), BackendKind::InMemory);
    let h = m.health().await;
    assert_eq!(h.backend, BackendKind::InMemory);
    assert!(h.reachable);
    assert!(!h.degraded);
}

#[tokio::test]
async fn unreachable_shared_backend_degrades_at_startup() {
    let mut c = cfg();
    c.backend = BackendKind::Shared;
    c.shared_url = "redis://127.0.0.1:1/0".into();
    c.connect_timeout_ms = 300;
    let m = SessionManager::from_config(c).await;
    assert!(m.is_degraded());

    let (id, _) = m.start().await.unwrap();
    m.advance(&id, frame(&[(0.0, 0.0)])).await.unwrap();
    let h = m.health().await;
    assert_eq!(h.backend, BackendKind::InMemory);
    assert!(h.degraded);
}

#[tokio::test]
async fn huge_update_interval_never_refreshes_after_first_observation() {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
    let mut c = cfg();
    c.count_update_interval_ms = u64::MAX;
    let m = SessionManager::new(store, c).with_clock(clock.clone());
    let (id, _) = m.start().await.unwrap();

    let r = m.advance(&id, frame(&[(0.0, 0.0)])).await.unwrap();
    assert!(r.count_updated);
    for _ in 0..5 {
        clock.advance_ms(60_000);
        let r = m.advance(&id, frame(&[(0.0, 0.0), (50.0, 0.0)])).await.unwrap();
        assert!(!r.count_updated);
        assert_eq!(r.display_count, 1);
    }
}
