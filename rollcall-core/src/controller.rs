use crate::ledger::{AttendanceEvent, AttendanceStatus, LastStatus, Ledger, LedgerError, StatusTable};
use chrono::{Duration, NaiveDateTime};
use std::fmt;

/// Default minimum time between two accepted events for the same person
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

pub fn default_cooldown() -> Duration {
    Duration::seconds(DEFAULT_COOLDOWN_SECS)
}

/// Why an attempt was turned away. Not an error: the caller just shows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RecentCheckIn,
    RecentCheckOut,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::RecentCheckIn => f.write_str("Already checked in recently"),
            Rejection::RecentCheckOut => {
                f.write_str("You just checked out. Wait a minute before checking in again.")
            }
        }
    }
}

/// Decide the next status for a person given their last one.
///
/// No prior event checks in. Otherwise the status alternates, but only
/// once at least `cooldown` has passed since the prior event. A clock that
/// went backwards counts as inside the window.
pub fn next_status(
    prior: Option<&LastStatus>,
    now: NaiveDateTime,
    cooldown: Duration,
) -> Result<AttendanceStatus, Rejection> {
    let Some(prior) = prior else {
        return Ok(AttendanceStatus::CheckIn);
    };

    let within_window = now.signed_duration_since(prior.time) < cooldown;
    match (prior.status, within_window) {
        (AttendanceStatus::CheckIn, true) => Err(Rejection::RecentCheckIn),
        (AttendanceStatus::CheckOut, true) => Err(Rejection::RecentCheckOut),
        (AttendanceStatus::CheckIn, false) => Ok(AttendanceStatus::CheckOut),
        (AttendanceStatus::CheckOut, false) => Ok(AttendanceStatus::CheckIn),
    }
}

/// Outcome of one attendance attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub accepted: bool,
    pub message: String,
    /// The recorded event, when accepted
    pub event: Option<AttendanceEvent>,
    /// False if the event reached the log but not the record store
    pub mirrored: bool,
}

impl Decision {
    fn accepted(event: AttendanceEvent, mirrored: bool) -> Self {
        Self {
            accepted: true,
            message: format!("{} recorded for {}", event.status, event.name),
            event: Some(event),
            mirrored,
        }
    }

    fn rejected(rejection: Rejection) -> Self {
        Self {
            accepted: false,
            message: rejection.to_string(),
            event: None,
            mirrored: false,
        }
    }

    pub fn status(&self) -> Option<AttendanceStatus> {
        self.event.as_ref().map(|e| e.status)
    }
}

/// Where the controller reads a person's last status from
#[derive(Debug, Clone)]
enum StatusSource {
    /// Rescan the whole log on every decision
    Rescan,
    /// Table rebuilt from the log once, then kept up to date in memory
    Cached(StatusTable),
}

pub struct AttendanceController {
    ledger: Ledger,
    cooldown: Duration,
    source: StatusSource,
}

impl AttendanceController {
    /// Create a controller. With `cache_status` the log is scanned once here;
    /// without it every decision rescans the log.
    pub fn new(ledger: Ledger, cooldown: Duration, cache_status: bool) -> Result<Self, LedgerError> {
        let source = if cache_status {
            let table = ledger.log().last_statuses()?;
            log::info!("Loaded last status for {} person(s)", table.len());
            StatusSource::Cached(table)
        } else {
            ledger.log().ensure_exists()?;
            StatusSource::Rescan
        };

        Ok(Self {
            ledger,
            cooldown,
            source,
        })
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Last known status for `name`
    pub fn last_status(&self, name: &str) -> Result<Option<LastStatus>, LedgerError> {
        match &self.source {
            StatusSource::Rescan => Ok(self.ledger.log().last_statuses()?.get(name).copied()),
            StatusSource::Cached(table) => Ok(table.get(name).copied()),
        }
    }

    /// Try to record attendance for `name` at `now`.
    ///
    /// `name` is trimmed the same way the log is read back, and a blank
    /// name is an error. A rejection leaves the ledger untouched and is
    /// returned as a normal decision. An accepted event is committed to the
    /// ledger before the decision is returned.
    pub fn decide(&mut self, name: &str, now: NaiveDateTime) -> Result<Decision, LedgerError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LedgerError::EmptyName);
        }

        let prior = self.last_status(name)?;

        let status = match next_status(prior.as_ref(), now, self.cooldown) {
            Ok(s) => s,
            Err(rejection) => {
                log::info!("{}: {}", name, rejection);
                return Ok(Decision::rejected(rejection));
            }
        };

        let event = AttendanceEvent::new(name, now, status);
        let outcome = self.ledger.commit(&event)?;

        if let StatusSource::Cached(table) = &mut self.source {
            table.observe(&event);
        }

        log::info!("{} recorded for {}", status, name);
        Ok(Decision::accepted(event, outcome.mirrored))
    }
}
