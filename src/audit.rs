//! Forensic audit log.
//!
//! One append-only record per incident: when it was logged, what kind of
//! threat it was, its peak confidence, and how long it lasted. Each entry is
//! chained to its predecessor with SHA-256, so editing or deleting a past row
//! breaks `verify_chain`.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Label for a lockout incident that ran to its natural end.
pub const THREAT_INTRUSION: &str = "Cell phone visual intrusion";
/// Label for a lockout incident ended by a manual override.
pub const THREAT_OVERRIDDEN: &str = "Cell phone visual intrusion (overridden)";
/// Label for a redaction-mode incident.
pub const THREAT_REDACTED: &str = "Cell phone redacted";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Unix seconds (UTC) at which the incident was logged.
    pub timestamp: u64,
    pub threat_type: String,
    /// Peak confidence over the incident.
    pub confidence: f32,
    pub duration_s: f64,
}

impl IncidentRecord {
    pub fn now(threat_type: &str, confidence: f32, duration_s: f64) -> Result<Self> {
        Ok(Self {
            timestamp: now_s()?,
            threat_type: threat_type.to_string(),
            confidence,
            duration_s,
        })
    }

    fn payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A record as stored, with its chain position.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredIncident {
    pub id: i64,
    pub record: IncidentRecord,
    pub entry_hash: [u8; 32],
}

pub trait AuditLog: Send {
    fn append(&mut self, record: &IncidentRecord) -> Result<()>;

    /// Up to `limit` records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<StoredIncident>>;

    /// Walk the whole chain; returns the number of verified entries.
    fn verify_chain(&self) -> Result<usize>;
}

/// Hashes a log entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?
        .as_secs())
}

fn to_hash(bytes: Vec<u8>, what: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| anyhow!("corrupt audit log: {} size", what))
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteAuditLog {
    conn: Connection,
}

impl SqliteAuditLog {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("open audit db {}", db_path.display()))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS security_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              threat_type TEXT NOT NULL,
              confidence REAL NOT NULL,
              duration_s REAL NOT NULL,
              prev_hash BLOB NOT NULL,
              entry_hash BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_security_logs_created ON security_logs(created_at);
            "#,
        )?;
        Ok(())
    }

    fn last_entry_hash(&self) -> Result<[u8; 32]> {
        let mut stmt = self
            .conn
            .prepare("SELECT entry_hash FROM security_logs ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => to_hash(row.get(0)?, "entry_hash"),
            None => Ok([0u8; 32]),
        }
    }

    /// Raw connection, for inspection tools and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

struct Row {
    id: i64,
    record: IncidentRecord,
    prev_hash: Vec<u8>,
    entry_hash: Vec<u8>,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let created_at: i64 = row.get(1)?;
    let confidence: f64 = row.get(3)?;
    Ok(Row {
        id: row.get(0)?,
        record: IncidentRecord {
            timestamp: created_at.max(0) as u64,
            threat_type: row.get(2)?,
            confidence: confidence as f32,
            duration_s: row.get(4)?,
        },
        prev_hash: row.get(5)?,
        entry_hash: row.get(6)?,
    })
}

const SELECT_ROWS: &str =
    "SELECT id, created_at, threat_type, confidence, duration_s, prev_hash, entry_hash FROM security_logs";

impl AuditLog for SqliteAuditLog {
    fn append(&mut self, record: &IncidentRecord) -> Result<()> {
        let created_at = i64::try_from(record.timestamp)
            .map_err(|_| anyhow!("timestamp exceeds i64 range"))?;
        let prev_hash = self.last_entry_hash()?;
        let entry_hash = hash_entry(&prev_hash, record.payload()?.as_bytes());

        self.conn.execute(
            r#"
            INSERT INTO security_logs(created_at, threat_type, confidence, duration_s, prev_hash, entry_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                created_at,
                record.threat_type,
                record.confidence as f64,
                record.duration_s,
                prev_hash.to_vec(),
                entry_hash.to_vec()
            ],
        )?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredIncident>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id DESC LIMIT ?1", SELECT_ROWS))?;
        let rows = stmt.query_map(params![limit], read_row)?;
        let mut out = Vec::new();
        for row in rows {
            let row = row?;
            out.push(StoredIncident {
                id: row.id,
                record: row.record,
                entry_hash: to_hash(row.entry_hash, "entry_hash")?,
            });
        }
        Ok(out)
    }

    fn verify_chain(&self) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY id ASC", SELECT_ROWS))?;
        let rows = stmt.query_map([], read_row)?;
        let mut prev = [0u8; 32];
        let mut count = 0;
        for row in rows {
            let row = row?;
            let stored_prev = to_hash(row.prev_hash, "prev_hash")?;
            if stored_prev != prev {
                return Err(anyhow!("audit chain broken before entry {}", row.id));
            }
            let expected = hash_entry(&prev, row.record.payload()?.as_bytes());
            let stored = to_hash(row.entry_hash, "entry_hash")?;
            if stored != expected {
                return Err(anyhow!("audit entry {} does not match its hash", row.id));
            }
            prev = stored;
            count += 1;
        }
        Ok(count)
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Vec<(IncidentRecord, [u8; 32], [u8; 32])>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> Vec<IncidentRecord> {
        self.entries.iter().map(|(r, _, _)| r.clone()).collect()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&mut self, record: &IncidentRecord) -> Result<()> {
        let prev_hash = self.entries.last().map(|e| e.2).unwrap_or([0u8; 32]);
        let entry_hash = hash_entry(&prev_hash, record.payload()?.as_bytes());
        self.entries.push((record.clone(), prev_hash, entry_hash));
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredIncident>> {
        Ok(self
            .entries
            .iter()
            .enumerate()
            .rev()
            .take(limit)
            .map(|(i, (record, _, hash))| StoredIncident {
                id: i as i64 + 1,
                record: record.clone(),
                entry_hash: *hash,
            })
            .collect())
    }

    fn verify_chain(&self) -> Result<usize> {
        let mut prev = [0u8; 32];
        for (i, (record, stored_prev, stored)) in self.entries.iter().enumerate() {
            if *stored_prev != prev || hash_entry(&prev, record.payload()?.as_bytes()) != *stored {
                return Err(anyhow!("audit chain broken at entry {}", i + 1));
            }
            prev = *stored;
        }
        Ok(self.entries.len())
    }
}
