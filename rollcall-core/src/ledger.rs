use chrono::{NaiveDateTime, SubsecRound};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Header line written when the attendance log is created
pub const LOG_HEADER: &str = "Name,Time,Status";

/// Second-precision, naive local time as written to the log
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Attendance log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Attendance log CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] crate::store::StorageError),
    #[error("No attendance records yet")]
    NoRecords,
    #[error("Attendance name cannot be empty")]
    EmptyName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttendanceStatus {
    CheckIn,
    CheckOut,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::CheckIn => "Check-In",
            AttendanceStatus::CheckOut => "Check-Out",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown attendance status: {0}")]
pub struct ParseStatusError(String);

impl FromStr for AttendanceStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Check-In" => Ok(AttendanceStatus::CheckIn),
            "Check-Out" => Ok(AttendanceStatus::CheckOut),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// One accepted attendance event. Never edited once written.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub name: String,
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
}

impl AttendanceEvent {
    pub fn new(name: impl Into<String>, time: NaiveDateTime, status: AttendanceStatus) -> Self {
        Self {
            name: name.into(),
            time,
            status,
        }
    }

    /// Event time truncated to the precision kept by the log
    pub fn logged_time(&self) -> NaiveDateTime {
        self.time.trunc_subsecs(0)
    }
}

/// Most recent event seen for a person
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastStatus {
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
}

/// name -> last status, derived from the attendance log
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    entries: HashMap<String, LastStatus>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the table.
    ///
    /// Uses the log's second precision so a table kept in memory agrees with
    /// one rebuilt from disk. An event older than the current entry is ignored;
    /// equal timestamps go to the later event.
    pub fn observe(&mut self, event: &AttendanceEvent) {
        let candidate = LastStatus {
            time: event.logged_time(),
            status: event.status,
        };
        match self.entries.get_mut(&event.name) {
            Some(current) if current.time > candidate.time => {}
            Some(current) => *current = candidate,
            None => {
                self.entries.insert(event.name.clone(), candidate);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&LastStatus> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by name
    pub fn sorted(&self) -> Vec<(&str, &LastStatus)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(name, last)| (name.as_str(), last))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

impl<'a> FromIterator<&'a AttendanceEvent> for StatusTable {
    fn from_iter<I: IntoIterator<Item = &'a AttendanceEvent>>(iter: I) -> Self {
        let mut table = StatusTable::new();
        for event in iter {
            table.observe(event);
        }
        table
    }
}

/// Destination for accepted attendance events
pub trait EventSink {
    /// Short name used in log messages
    fn name(&self) -> &str;

    fn record(&mut self, event: &AttendanceEvent) -> Result<(), LedgerError>;
}

/// Append-only CSV file of attendance events.
///
/// The file is opened and closed on every operation; no handle is kept.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    path: PathBuf,
}

impl AttendanceLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its header line if it does not exist yet.
    /// Calling this again never touches an existing, non-empty log.
    pub fn ensure_exists(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                writeln!(file, "{}", LOG_HEADER)?;
                log::info!("Created attendance log at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if fs::metadata(&self.path)?.len() == 0 {
                    let mut file = OpenOptions::new().append(true).open(&self.path)?;
                    writeln!(file, "{}", LOG_HEADER)?;
                    log::warn!("Attendance log was empty, wrote header");
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Append one event as `name,YYYY-MM-DD HH:MM:SS,status`
    pub fn append(&self, event: &AttendanceEvent) -> Result<(), LedgerError> {
        self.ensure_exists()?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);

        let time = event.time.format(LOG_TIME_FORMAT).to_string();
        writer.write_record([event.name.as_str(), time.as_str(), event.status.as_str()])?;
        writer.flush()?;
        Ok(())
    }

    /// Read every well-formed event in file order.
    ///
    /// A missing log is initialised and yields no events. Malformed rows are
    /// skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<AttendanceEvent>, LedgerError> {
        if !self.path.exists() {
            self.ensure_exists()?;
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut events = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            // Header is line 1
            let line = idx + 2;
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("Skipping unreadable attendance row {}: {}", line, e);
                    continue;
                }
            };
            match Self::parse_record(&record) {
                Some(event) => events.push(event),
                None => log::warn!("Skipping malformed attendance row {}: {:?}", line, record),
            }
        }

        Ok(events)
    }

    fn parse_record(record: &csv::StringRecord) -> Option<AttendanceEvent> {
        if record.len() != 3 {
            return None;
        }
        let name = record.get(0)?;
        if name.is_empty() {
            return None;
        }
        let time = NaiveDateTime::parse_from_str(record.get(1)?, LOG_TIME_FORMAT).ok()?;
        let status = record.get(2)?.parse().ok()?;
        Some(AttendanceEvent::new(name, time, status))
    }

    /// Scan the whole log and keep the latest status per name
    pub fn last_statuses(&self) -> Result<StatusTable, LedgerError> {
        let events = self.read_all()?;
        Ok(events.iter().collect())
    }

    /// Copy the raw log to `dest`. Fails with `NoRecords` if there is no log yet.
    pub fn export_to<P: AsRef<Path>>(&self, dest: P) -> Result<u64, LedgerError> {
        if !self.path.exists() {
            return Err(LedgerError::NoRecords);
        }
        Ok(fs::copy(&self.path, dest)?)
    }
}

impl EventSink for AttendanceLog {
    fn name(&self) -> &str {
        "attendance log"
    }

    fn record(&mut self, event: &AttendanceEvent) -> Result<(), LedgerError> {
        self.append(event)
    }
}

/// What happened to an event handed to [`Ledger::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// False when the log was written but the mirror rejected the event
    pub mirrored: bool,
}

/// The attendance log plus a structured mirror, written one after the other.
///
/// The two writes are not transactional. The log is written first and is
/// the source of truth for later decisions; a mirror failure after a
/// successful log append is reported and left as is.
pub struct Ledger {
    log: AttendanceLog,
    mirror: Box<dyn EventSink>,
}

impl Ledger {
    pub fn new(log: AttendanceLog, mirror: Box<dyn EventSink>) -> Self {
        Self { log, mirror }
    }

    pub fn log(&self) -> &AttendanceLog {
        &self.log
    }

    pub fn commit(&mut self, event: &AttendanceEvent) -> Result<CommitOutcome, LedgerError> {
        self.log.record(event)?;

        match self.mirror.record(event) {
            Ok(()) => Ok(CommitOutcome { mirrored: true }),
            Err(e) => {
                log::error!(
                    "{} recorded {} for {} at {} but {} failed: {}",
                    self.log.name(),
                    event.status,
                    event.name,
                    event.time.format(LOG_TIME_FORMAT),
                    self.mirror.name(),
                    e
                );
                Ok(CommitOutcome { mirrored: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn name(&self) -> &str {
            "failing sink"
        }

        fn record(&mut self, _event: &AttendanceEvent) -> Result<(), LedgerError> {
            Err(LedgerError::Io(std::io::Error::new(ErrorKind::Other, "offline")))
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Check-In".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::CheckIn);
        assert_eq!("Check-Out".parse::<AttendanceStatus>().unwrap(), AttendanceStatus::CheckOut);
        assert!("check-in".parse::<AttendanceStatus>().is_err());
        assert_eq!(AttendanceStatus::CheckOut.to_string(), "Check-Out");
    }

    #[test]
    fn test_ensure_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("nested").join("attendance.csv"));

        log.ensure_exists().unwrap();
        log.ensure_exists().unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "Name,Time,Status\n");
    }

    #[test]
    fn test_ensure_exists_repairs_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(&path, "").unwrap();

        AttendanceLog::new(&path).ensure_exists().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Name,Time,Status\n");
    }

    #[test]
    fn test_append_format() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));

        let time = at(9, 0, 0) + chrono::Duration::milliseconds(750);
        log.append(&AttendanceEvent::new("Alice", time, AttendanceStatus::CheckIn))
            .unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents, "Name,Time,Status\nAlice,2024-01-01 09:00:00,Check-In\n");
    }

    #[test]
    fn test_missing_log_is_initialised_on_read() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));

        let table = log.last_statuses().unwrap();
        assert!(table.is_empty());
        assert!(log.path().exists());
    }

    #[test]
    fn test_last_statuses_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "Name,Time,Status\n\
             Alice,2024-01-01 09:00:00,Check-In\n\
             Bob,2024-01-01 09:00:10,Check-In\n\
             Alice,2024-01-01 12:00:00,Check-Out\n",
        )
        .unwrap();

        let table = AttendanceLog::new(&path).last_statuses().unwrap();
        assert_eq!(table.len(), 2);
        let alice = table.get("Alice").unwrap();
        assert_eq!(alice.status, AttendanceStatus::CheckOut);
        assert_eq!(alice.time, at(12, 0, 0));
        assert_eq!(table.get("Bob").unwrap().status, AttendanceStatus::CheckIn);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attendance.csv");
        fs::write(
            &path,
            "Name,Time,Status\n\
             Alice,2024-01-01 09:00:00,Check-In\n\
             garbage line\n\
             Bob,yesterday,Check-In\n\
             Carol,2024-01-01 09:00:00,Sleeping\n",
        )
        .unwrap();

        let events = AttendanceLog::new(&path).read_all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Alice");
    }

    #[test]
    fn test_status_table_ignores_older_events() {
        let mut table = StatusTable::new();
        table.observe(&AttendanceEvent::new("Alice", at(10, 0, 0), AttendanceStatus::CheckOut));
        table.observe(&AttendanceEvent::new("Alice", at(9, 0, 0), AttendanceStatus::CheckIn));

        assert_eq!(table.get("Alice").unwrap().status, AttendanceStatus::CheckOut);
    }

    #[test]
    fn test_export_without_log() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));
        let result = log.export_to(dir.path().join("copy.csv"));
        assert!(matches!(result, Err(LedgerError::NoRecords)));
    }

    #[test]
    fn test_export_copies_log() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));
        log.append(&AttendanceEvent::new("Alice", at(9, 0, 0), AttendanceStatus::CheckIn))
            .unwrap();

        let dest = dir.path().join("copy.csv");
        log.export_to(&dest).unwrap();
        assert_eq!(
            fs::read_to_string(&dest).unwrap(),
            fs::read_to_string(log.path()).unwrap()
        );
    }

    #[test]
    fn test_commit_survives_mirror_failure() {
        let dir = TempDir::new().unwrap();
        let log = AttendanceLog::new(dir.path().join("attendance.csv"));
        let mut ledger = Ledger::new(log.clone(), Box::new(FailingSink));

        let outcome = ledger
            .commit(&AttendanceEvent::new("Alice", at(9, 0, 0), AttendanceStatus::CheckIn))
            .unwrap();

        assert!(!outcome.mirrored);
        assert_eq!(log.read_all().unwrap().len(), 1);
    }
}
