use crate::credential::AdminCredential;
use crate::ledger::{AttendanceEvent, AttendanceStatus, EventSink, LedgerError};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Nanosecond timestamp format written by the record store
const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Accepts any number of fractional digits when reading records back
const RECORD_TIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Invalid blob id: {0}")]
    InvalidBlobId(String),
    #[error("Blob not found: {0}")]
    BlobNotFound(BlobId),
}

/// Content address of a stored blob: lowercase hex SHA-256 of its bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(String);

impl BlobId {
    pub fn for_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let hex = digest.iter().map(|b| format!("{:02x}", b)).collect();
        BlobId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(BlobId(s.to_string()))
        } else {
            Err(StorageError::InvalidBlobId(s.to_string()))
        }
    }
}

/// Directory of immutable blobs, one file per content address
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    /// Store bytes and return their address. Storing equal bytes twice is a no-op.
    pub fn put(&self, data: &[u8]) -> Result<BlobId, StorageError> {
        let id = BlobId::for_bytes(data);
        let path = self.blob_path(&id);
        if path.exists() {
            log::debug!("Blob {} already stored", id);
            return Ok(id);
        }

        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&self.base_path, fs::Permissions::from_mode(0o700))?;
            }
        }

        fs::write(&path, data)?;

        // Set permissions to 600 (owner read/write only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(id)
    }

    pub fn get(&self, id: &BlobId) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(id);
        if !path.exists() {
            return Err(StorageError::BlobNotFound(id.clone()));
        }
        Ok(fs::read(path)?)
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.blob_path(id).exists()
    }
}

/// A reference-image person record
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub id: i64,
    pub name: String,
    /// None when the stored reference is not a valid blob id
    pub image: Option<BlobId>,
}

/// Structured mirror of one attendance event
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRecord {
    pub id: i64,
    pub name: String,
    pub time: NaiveDateTime,
    pub status: AttendanceStatus,
}

/// SQLite-backed store for people, attendance records and the admin credential.
///
/// Cloning shares the same connection.
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        // journal_mode answers with a row, so failures here are not fatal
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "busy_timeout", "5000");

        log::debug!("Opened record store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS attendance_records (
                 id     INTEGER PRIMARY KEY AUTOINCREMENT,
                 name   TEXT NOT NULL,
                 time   TEXT NOT NULL,
                 status TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS people (
                 id    INTEGER PRIMARY KEY AUTOINCREMENT,
                 name  TEXT NOT NULL,
                 image TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS admin_credentials (
                 id            INTEGER PRIMARY KEY AUTOINCREMENT,
                 username      TEXT NOT NULL,
                 password_hash TEXT NOT NULL,
                 email         TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Record store mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert_attendance(&self, event: &AttendanceEvent) -> Result<i64, StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO attendance_records (name, time, status) VALUES (?1, ?2, ?3)",
            params![
                event.name,
                event.time.format(RECORD_TIME_FORMAT).to_string(),
                event.status.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All attendance records in insertion order
    pub fn attendance_records(&self) -> Result<Vec<AttendanceRecord>, StorageError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT id, name, time, status FROM attendance_records ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, time, status) = row?;
            let time = NaiveDateTime::parse_from_str(&time, RECORD_TIME_PARSE_FORMAT)
                .map_err(|e| StorageError::Corrupt(format!("attendance record {}: {}", id, e)))?;
            let status = status
                .parse()
                .map_err(|e| StorageError::Corrupt(format!("attendance record {}: {}", id, e)))?;
            records.push(AttendanceRecord {
                id,
                name,
                time,
                status,
            });
        }
        Ok(records)
    }

    /// Insert a person record. Duplicate names are allowed.
    pub fn insert_person(&self, name: &str, image: &BlobId) -> Result<i64, StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO people (name, image) VALUES (?1, ?2)",
            params![name, image.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All person records in insertion order
    pub fn people(&self) -> Result<Vec<PersonRecord>, StorageError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT id, name, image FROM people ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut people = Vec::new();
        for row in rows {
            let (id, name, image) = row?;
            people.push(PersonRecord {
                id,
                name,
                image: image.parse().ok(),
            });
        }
        Ok(people)
    }

    pub fn insert_admin(&self, credential: &AdminCredential) -> Result<i64, StorageError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO admin_credentials (username, password_hash, email) VALUES (?1, ?2, ?3)",
            params![
                credential.username,
                credential.password_hash,
                credential.email
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The first credential stored for `username`
    pub fn find_admin(&self, username: &str) -> Result<Option<AdminCredential>, StorageError> {
        let conn = self.lock();
        let credential = conn
            .query_row(
                "SELECT username, password_hash, email FROM admin_credentials
                 WHERE username = ?1 ORDER BY id LIMIT 1",
                params![username],
                |row| {
                    Ok(AdminCredential {
                        username: row.get(0)?,
                        password_hash: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }
}

impl EventSink for RecordStore {
    fn name(&self) -> &str {
        "record store"
    }

    fn record(&mut self, event: &AttendanceEvent) -> Result<(), LedgerError> {
        self.insert_attendance(event)?;
        Ok(())
    }
}
