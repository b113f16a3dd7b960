use chrono::{Duration, NaiveDate, NaiveDateTime};
use image::{Rgb, RgbImage};
use ndarray::arr1;
use rollcall_core::camera::{CaptureError, FrameSource};
use rollcall_core::catalog::{Identification, ReferenceCatalog};
use rollcall_core::controller::{default_cooldown, AttendanceController};
use rollcall_core::encoder::{BoundingBox, EncodedFace, EncoderError, FaceEncoder};
use rollcall_core::ledger::{AttendanceLog, Ledger};
use rollcall_core::session::{FeedbackKind, RunFlag, SessionState};
use rollcall_core::store::RecordStore;
use rollcall_core::{AttendanceKiosk, StopReason};
use std::collections::VecDeque;
use tempfile::TempDir;

/// Frames are solid colors; each distinct red level stands for one face
struct ScriptedFrames(VecDeque<RgbImage>);

impl ScriptedFrames {
    fn new(levels: &[u8]) -> Self {
        Self(
            levels
                .iter()
                .map(|&r| RgbImage::from_pixel(4, 4, Rgb([r, 0, 0])))
                .collect(),
        )
    }
}

impl FrameSource for ScriptedFrames {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        self.0.pop_front().ok_or(CaptureError::Exhausted)
    }
}

/// Red channel 0 means an empty frame; 255 yields two faces (Alice and Bob)
struct ColorEncoder;

impl FaceEncoder for ColorEncoder {
    fn detect_and_encode(&mut self, image: &RgbImage) -> Result<Vec<EncodedFace>, EncoderError> {
        let bbox = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 2.0,
            height: 2.0,
        };
        let face = |v: f32| EncodedFace {
            bbox: bbox.clone(),
            encoding: arr1(&[v, 0.0]),
        };
        Ok(match image.get_pixel(0, 0)[0] {
            0 => Vec::new(),
            255 => vec![face(1.0), face(2.0)],
            r => vec![face(r as f32 / 10.0)],
        })
    }
}

fn kiosk(dir: &TempDir) -> (AttendanceKiosk, AttendanceLog, RecordStore) {
    let mut catalog = ReferenceCatalog::new();
    catalog.insert("Alice", arr1(&[1.0, 0.0]));
    catalog.insert("Bob", arr1(&[2.0, 0.0]));

    let log = AttendanceLog::new(dir.path().join("attendance.csv"));
    let records = RecordStore::open_in_memory().unwrap();
    let ledger = Ledger::new(log.clone(), Box::new(records.clone()));
    let controller = AttendanceController::new(ledger, default_cooldown(), true).unwrap();

    (AttendanceKiosk::new(catalog, controller, 0.6), log, records)
}

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

#[test]
fn unmatched_face_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let (mut kiosk, log, records) = kiosk(&dir);

    // 90 / 10 = 9.0, far from both references
    let frame = RgbImage::from_pixel(4, 4, Rgb([90, 0, 0]));
    let reports = kiosk.process_frame(&frame, &mut ColorEncoder, start()).unwrap();

    assert_eq!(reports.len(), 1);
    assert!(matches!(reports[0].identification, Identification::Unknown { .. }));
    assert!(reports[0].decision.is_none());
    assert!(log.read_all().unwrap().is_empty());
    assert!(records.attendance_records().unwrap().is_empty());
}

#[test]
fn every_face_in_a_frame_is_decided() {
    let dir = TempDir::new().unwrap();
    let (mut kiosk, log, _) = kiosk(&dir);

    let frame = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
    let reports = kiosk.process_frame(&frame, &mut ColorEncoder, start()).unwrap();

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.decision.as_ref().is_some_and(|d| d.accepted)));
    let names: Vec<_> = log.read_all().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[test]
fn loop_stops_when_frames_run_out() {
    let dir = TempDir::new().unwrap();
    let (mut kiosk, log, _) = kiosk(&dir);

    // Alice, Alice again (cooldown), nobody, stranger, Alice after a minute
    let mut frames = ScriptedFrames::new(&[10, 10, 0, 90, 10]);
    let mut tick = 0;
    let clock = move || {
        let now = start() + Duration::seconds(tick);
        tick += 20;
        now
    };

    let mut session = SessionState::new(RunFlag::new(true));
    let summary = kiosk.run(&mut frames, &mut ColorEncoder, &mut session, clock);

    assert_eq!(summary.frames, 5);
    assert_eq!(summary.faces, 4);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.unknown, 1);
    assert!(matches!(summary.stop_reason, StopReason::CaptureFailed(_)));

    let events = log.read_all().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status.as_str(), "Check-Out");

    let last = session.last_feedback().unwrap();
    assert_eq!(last.kind, FeedbackKind::Success);
    assert_eq!(last.message, "Check-Out recorded for Alice");
}

#[test]
fn cleared_flag_prevents_capture() {
    let dir = TempDir::new().unwrap();
    let (mut kiosk, _, _) = kiosk(&dir);

    let mut frames = ScriptedFrames::new(&[10]);
    let mut session = SessionState::new(RunFlag::new(false));
    let summary = kiosk.run(&mut frames, &mut ColorEncoder, &mut session, start);

    assert_eq!(summary.frames, 0);
    assert_eq!(summary.stop_reason, StopReason::Stopped);
}

#[test]
fn frame_limit_is_honoured() {
    let dir = TempDir::new().unwrap();
    let (mut kiosk, _, _) = kiosk(&dir);

    let mut frames = ScriptedFrames::new(&[0, 0, 0, 0]);
    let mut session = SessionState::new(RunFlag::new(true)).with_frame_limit(2);
    let summary = kiosk.run(&mut frames, &mut ColorEncoder, &mut session, start);

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.stop_reason, StopReason::FrameLimit);
}

#[test]
fn annotated_frames_are_saved() {
    let dir = TempDir::new().unwrap();
    let (kiosk, _, _) = kiosk(&dir);
    let out = dir.path().join("frames");
    let mut kiosk = kiosk.with_frame_output(&out);

    let mut frames = ScriptedFrames::new(&[10, 90]);
    let mut session = SessionState::new(RunFlag::new(true));
    kiosk.run(&mut frames, &mut ColorEncoder, &mut session, start);

    let mut names: Vec<String> = std::fs::read_dir(&out)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names[0].ends_with("_000001_Alice.jpg"), "{}", names[0]);
    assert!(names[1].ends_with("_000002_unknown.jpg"), "{}", names[1]);
}

#[test]
fn failed_face_does_not_discard_the_others() {
    let dir = TempDir::new().unwrap();
    let mut catalog = ReferenceCatalog::new();
    catalog.insert("Alice", arr1(&[1.0, 0.0]));
    // Blank name: the ledger refuses it, but only for this face
    catalog.insert("  ", arr1(&[2.0, 0.0]));

    let log = AttendanceLog::new(dir.path().join("attendance.csv"));
    let records = RecordStore::open_in_memory().unwrap();
    let ledger = Ledger::new(log.clone(), Box::new(records.clone()));
    let controller = AttendanceController::new(ledger, default_cooldown(), true).unwrap();
    let mut kiosk = AttendanceKiosk::new(catalog, controller, 0.6);

    let frame = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
    let reports = kiosk.process_frame(&frame, &mut ColorEncoder, start()).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].decision.as_ref().is_some_and(|d| d.accepted));
    assert!(reports[0].error.is_none());
    assert!(reports[1].decision.is_none());
    assert!(reports[1].error.is_some());

    let mut frames = ScriptedFrames::new(&[255]);
    let mut session = SessionState::new(RunFlag::new(true));
    let later = || start() + Duration::minutes(5);
    let summary = kiosk.run(&mut frames, &mut ColorEncoder, &mut session, later);
    assert_eq!(summary.faces, 2);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.errors, 1);

    let names: Vec<_> = log.read_all().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["Alice", "Alice"]);
    assert_eq!(records.attendance_records().unwrap().len(), 2);
}
