pub mod camera;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod controller;
pub mod credential;
pub mod encoder;
pub mod import;
pub mod ledger;
pub mod session;
pub mod store;

use catalog::{Identification, ReferenceCatalog};
use chrono::NaiveDateTime;
use controller::{AttendanceController, Decision};
use encoder::{BoundingBox, FaceEncoder};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use ledger::{AttendanceLog, Ledger};
use session::{Feedback, FeedbackKind, SessionState};
use std::path::{Path, PathBuf};
use store::{BlobStore, RecordStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera error: {0}")]
    Capture(#[from] camera::CaptureError),
    #[error("Recognition error: {0}")]
    Encoder(#[from] encoder::EncoderError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),
    #[error("Storage error: {0}")]
    Storage(#[from] store::StorageError),
    #[error("Credential error: {0}")]
    Credential(#[from] credential::CredentialError),
    #[error("Import error: {0}")]
    Import(#[from] import::ImportError),
    #[error("No working camera found. Please connect a camera.")]
    NoCamera,
    #[error("{0}")]
    Other(String),
}

/// Message shown when a face matches nobody in the catalog
pub const UNKNOWN_FACE_MESSAGE: &str = "Face not recognized";

/// Open the requested camera, or the first working one.
pub fn open_camera(
    config: &config::CameraConfig,
    requested: Option<usize>,
) -> Result<camera::Camera, Error> {
    if let Some(index) = requested.or(config.index) {
        return Ok(camera::Camera::open(index, config)?);
    }

    let available = camera::Camera::available_indices(config.max_index, config);
    log::info!("Working cameras: {:?}", available);
    let index = available.first().copied().ok_or(Error::NoCamera)?;
    Ok(camera::Camera::open(index, config)?)
}

/// What happened to one face in a frame
#[derive(Debug, Clone)]
pub struct FaceReport {
    pub bbox: BoundingBox,
    pub identification: Identification,
    /// Present for recognized faces whose attendance was decided
    pub decision: Option<Decision>,
    /// Set when the ledger failed for this face; other faces are unaffected
    pub error: Option<String>,
}

/// Why [`AttendanceKiosk::run`] returned
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// The run flag was cleared
    Stopped,
    /// The configured frame limit was reached
    FrameLimit,
    /// The frame source failed; the loop does not retry
    CaptureFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub faces: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub unknown: u64,
    pub errors: u64,
    pub stop_reason: StopReason,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            frames: 0,
            faces: 0,
            accepted: 0,
            rejected: 0,
            unknown: 0,
            errors: 0,
            stop_reason: StopReason::Stopped,
        }
    }
}

/// Matches faces against the catalog and records attendance
pub struct AttendanceKiosk {
    catalog: ReferenceCatalog,
    controller: AttendanceController,
    threshold: f32,
    frame_output: Option<PathBuf>,
}

impl AttendanceKiosk {
    pub fn new(catalog: ReferenceCatalog, controller: AttendanceController, threshold: f32) -> Self {
        Self {
            catalog,
            controller,
            threshold,
            frame_output: None,
        }
    }

    /// Build the kiosk from configuration: open the log, mirror every event
    /// into `records`, and encode the reference catalog with `encoder`.
    pub fn from_config<E: FaceEncoder + ?Sized>(
        config: &config::Config,
        records: RecordStore,
        encoder: &mut E,
    ) -> Result<Self, Error> {
        let log = AttendanceLog::new(&config.storage.log_path);
        let ledger = Ledger::new(log, Box::new(records.clone()));
        let controller = AttendanceController::new(
            ledger,
            config.cooldown()?,
            config.attendance.cache_status,
        )?;

        log::info!("Loading known faces...");
        let blobs = BlobStore::new(&config.storage.blob_dir);
        let people = records.people()?;
        let catalog = ReferenceCatalog::build(&people, &blobs, encoder);
        if catalog.is_empty() {
            log::warn!("No usable reference faces; every face will be unknown");
        }

        let mut kiosk = Self::new(catalog, controller, config.recognition.threshold);
        if config.debug.save_frames {
            kiosk = kiosk.with_frame_output(&config.debug.output_dir);
        }
        Ok(kiosk)
    }

    /// Save every processed frame, annotated with face boxes, into `dir`
    pub fn with_frame_output<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.frame_output = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn catalog(&self) -> &ReferenceCatalog {
        &self.catalog
    }

    pub fn controller(&self) -> &AttendanceController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AttendanceController {
        &mut self.controller
    }

    /// Identify every face in `frame` and attempt attendance for each
    /// recognized one. Faces are handled independently of each other: a
    /// ledger failure is kept in that face's report and the rest go on.
    pub fn process_frame<E: FaceEncoder + ?Sized>(
        &mut self,
        frame: &RgbImage,
        encoder: &mut E,
        now: NaiveDateTime,
    ) -> Result<Vec<FaceReport>, Error> {
        let faces = encoder.detect_and_encode(frame)?;

        let mut reports = Vec::with_capacity(faces.len());
        for face in faces {
            let identification = self.catalog.identify(&face.encoding, self.threshold);
            let (decision, error) = match &identification {
                Identification::Known { name, distance } => {
                    log::debug!("Recognized {} (distance {:.3})", name, distance);
                    match self.controller.decide(name, now) {
                        Ok(d) => (Some(d), None),
                        Err(e) => {
                            log::error!("Attendance for {} failed: {}", name, e);
                            (None, Some(e.to_string()))
                        }
                    }
                }
                Identification::Unknown { best_distance } => {
                    log::debug!("Unknown face (best distance {:?})", best_distance);
                    (None, None)
                }
            };
            reports.push(FaceReport {
                bbox: face.bbox,
                identification,
                decision,
                error,
            });
        }

        Ok(reports)
    }

    /// Run the capture loop until the session's run flag is cleared, the
    /// frame limit is reached, or the frame source fails.
    ///
    /// The flag is checked once per frame, so stopping takes effect after
    /// the current frame is processed. Recognition and ledger errors are
    /// logged and the loop moves on to the next frame.
    pub fn run<S, E, C>(
        &mut self,
        source: &mut S,
        encoder: &mut E,
        session: &mut SessionState,
        mut clock: C,
    ) -> RunSummary
    where
        S: camera::FrameSource + ?Sized,
        E: FaceEncoder + ?Sized,
        C: FnMut() -> NaiveDateTime,
    {
        let mut summary = RunSummary::new();

        while session.is_running() {
            if session.frame_limit().is_some_and(|limit| summary.frames >= limit) {
                summary.stop_reason = StopReason::FrameLimit;
                return summary;
            }

            let frame = match source.next_frame() {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Stopping capture: {}", e);
                    summary.stop_reason = StopReason::CaptureFailed(e.to_string());
                    return summary;
                }
            };
            summary.frames += 1;

            let reports = match self.process_frame(&frame, encoder, clock()) {
                Ok(r) => r,
                Err(e) => {
                    log::error!("Frame {} failed: {}", summary.frames, e);
                    summary.errors += 1;
                    session.show(Feedback::new(FeedbackKind::Error, e.to_string()));
                    continue;
                }
            };

            for report in &reports {
                summary.faces += 1;
                if let Some(error) = &report.error {
                    summary.errors += 1;
                    session.show(Feedback::new(FeedbackKind::Error, error.clone()));
                    continue;
                }
                match &report.decision {
                    Some(decision) if decision.accepted => {
                        summary.accepted += 1;
                        session.show(Feedback::new(FeedbackKind::Success, decision.message.clone()));
                    }
                    Some(decision) => {
                        summary.rejected += 1;
                        session.show(Feedback::new(FeedbackKind::Warning, decision.message.clone()));
                    }
                    None => {
                        summary.unknown += 1;
                        session.show(Feedback::new(FeedbackKind::Error, UNKNOWN_FACE_MESSAGE));
                    }
                }
            }

            if let Some(dir) = &self.frame_output {
                if let Err(e) = Self::save_annotated(&frame, &reports, dir, summary.frames) {
                    log::warn!("Failed to save annotated frame: {}", e);
                }
            }
        }

        summary.stop_reason = StopReason::Stopped;
        summary
    }

    /// Draw face boxes (green for known, red for unknown) and save the frame.
    /// The file name lists who was in it, in face order.
    fn save_annotated(
        frame: &RgbImage,
        reports: &[FaceReport],
        dir: &Path,
        frame_number: u64,
    ) -> Result<PathBuf, Error> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Other(format!("Failed to create frame directory: {}", e)))?;

        let mut annotated = frame.clone();
        for report in reports {
            let color = match report.identification {
                Identification::Known { .. } => Rgb([0, 255, 0]),
                Identification::Unknown { .. } => Rgb([255, 0, 0]),
            };
            let bbox = &report.bbox;
            let rect = Rect::at(bbox.x as i32, bbox.y as i32)
                .of_size((bbox.width as u32).max(1), (bbox.height as u32).max(1));
            draw_hollow_rect_mut(&mut annotated, rect, color);
        }

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut file_name = format!("frame_{}_{:06}", timestamp, frame_number);
        for report in reports {
            file_name.push('_');
            file_name.push_str(&Self::file_label(&report.identification));
        }
        let path = dir.join(format!("{}.jpg", file_name));
        annotated
            .save(&path)
            .map_err(|e| Error::Other(format!("Failed to save frame: {}", e)))?;
        log::debug!("Annotated frame saved: {}", path.display());
        Ok(path)
    }

    /// Name of a face as it appears in a saved frame's file name
    fn file_label(identification: &Identification) -> String {
        match identification {
            Identification::Known { name, .. } => name
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
                .collect(),
            Identification::Unknown { .. } => "unknown".to_string(),
        }
    }
}
