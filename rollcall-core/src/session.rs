use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    Success,
    Warning,
    Error,
}

/// Message shown to the person in front of the kiosk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub kind: FeedbackKind,
    pub message: String,
}

impl Feedback {
    pub fn new(kind: FeedbackKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Cloneable start/stop switch checked once per frame
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new(running: bool) -> Self {
        Self(Arc::new(AtomicBool::new(running)))
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type DisplayFn = Box<dyn FnMut(&Feedback)>;

/// Per-session state owned by the capture loop
pub struct SessionState {
    run: RunFlag,
    last_feedback: Option<Feedback>,
    frame_limit: Option<u64>,
    display: Option<DisplayFn>,
}

impl SessionState {
    pub fn new(run: RunFlag) -> Self {
        Self {
            run,
            last_feedback: None,
            frame_limit: None,
            display: None,
        }
    }

    /// Stop after this many frames even if the flag is still set
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Called with each feedback that differs from the one shown before it
    pub fn with_display<F>(mut self, display: F) -> Self
    where
        F: FnMut(&Feedback) + 'static,
    {
        self.display = Some(Box::new(display));
        self
    }

    pub fn run_flag(&self) -> &RunFlag {
        &self.run
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    pub fn frame_limit(&self) -> Option<u64> {
        self.frame_limit
    }

    pub fn last_feedback(&self) -> Option<&Feedback> {
        self.last_feedback.as_ref()
    }

    /// Show `feedback` unless it repeats the last one. Returns whether it was shown.
    pub fn show(&mut self, feedback: Feedback) -> bool {
        if self.last_feedback.as_ref() == Some(&feedback) {
            return false;
        }

        match feedback.kind {
            FeedbackKind::Success => log::info!("{}", feedback.message),
            FeedbackKind::Warning => log::warn!("{}", feedback.message),
            FeedbackKind::Error => log::warn!("{}", feedback.message),
        }
        if let Some(display) = self.display.as_mut() {
            display(&feedback);
        }
        self.last_feedback = Some(feedback);
        true
    }
}
