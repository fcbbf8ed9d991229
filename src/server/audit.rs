//! Append-only audit log with a SHA-256 hash chain
//!
//! One JSON object per line. Each entry's hash covers its sequence number,
//! the previous entry's hash, timestamp, kind and the payload text exactly as
//! written, so edits and truncation in the middle of the file are detectable
//! with [`AuditLog::verify`]. Payloads are never re-parsed for hashing.
//! Reopening an existing file continues its chain.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{MlopsError, Result};

fn genesis_hash() -> String {
    "0".repeat(64)
}

/// What an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Request,
    Response,
}

impl AuditKind {
    fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Request => "request",
            AuditKind::Response => "response",
        }
    }
}

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    /// RFC 3339 timestamp
    pub ts: String,
    pub kind: AuditKind,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
}

fn compute_hash(seq: u64, prev_hash: &str, ts: &str, kind: AuditKind, payload: &str) -> String {
    let input = format!("{}|{}|{}|{}|{}", seq, prev_hash, ts, kind.as_str(), payload);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Line layout on disk
#[derive(Serialize)]
struct EntryLine<'a> {
    seq: u64,
    ts: &'a str,
    kind: AuditKind,
    payload: &'a RawValue,
    prev_hash: &'a str,
    hash: &'a str,
}

/// A line read back, with the payload kept as its original text
#[derive(Deserialize)]
struct StoredEntry {
    seq: u64,
    ts: String,
    kind: AuditKind,
    payload: Box<RawValue>,
    prev_hash: String,
    hash: String,
}

impl StoredEntry {
    fn expected_hash(&self) -> String {
        compute_hash(self.seq, &self.prev_hash, &self.ts, self.kind, self.payload.get())
    }
}

/// Result of a chain check
#[derive(Debug, Clone, Serialize)]
pub struct AuditVerification {
    pub valid: bool,
    pub entries: usize,
    /// Line number (1-based) of the first bad entry
    pub first_invalid_line: Option<usize>,
    pub message: String,
}

struct ChainHead {
    file: File,
    next_seq: u64,
    last_hash: String,
}

pub struct AuditLog {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

impl AuditLog {
    /// Open or create the log at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (next_seq, last_hash) = match Self::read_entries(&path)?.last() {
            Some(entry) => (entry.seq + 1, entry.hash.clone()),
            None => (0, genesis_hash()),
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            head: Mutex::new(ChainHead {
                file,
                next_seq,
                last_hash,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry and return it
    pub fn record(&self, kind: AuditKind, payload: Value) -> Result<AuditEntry> {
        let mut head = self.head.lock();

        let ts = chrono::Utc::now().to_rfc3339();
        let seq = head.next_seq;
        let prev_hash = head.last_hash.clone();
        let payload_text = RawValue::from_string(serde_json::to_string(&payload)?)?;
        let hash = compute_hash(seq, &prev_hash, &ts, kind, payload_text.get());

        let mut line = serde_json::to_string(&EntryLine {
            seq,
            ts: &ts,
            kind,
            payload: &payload_text,
            prev_hash: &prev_hash,
            hash: &hash,
        })?;
        line.push('\n');
        head.file.write_all(line.as_bytes())?;
        head.file.flush()?;

        let entry = AuditEntry {
            seq,
            ts,
            kind,
            payload,
            prev_hash,
            hash,
        };
        head.next_seq += 1;
        head.last_hash = entry.hash.clone();
        Ok(entry)
    }

    fn read_entries(path: &Path) -> Result<Vec<StoredEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: StoredEntry = serde_json::from_str(&line).map_err(|e| {
                MlopsError::SerializationError(format!("audit log line {}: {}", idx + 1, e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Check the whole chain in the file at `path`
    pub fn verify(path: &Path) -> Result<AuditVerification> {
        let entries = Self::read_entries(path)?;
        let mut prev_hash = genesis_hash();

        for (i, entry) in entries.iter().enumerate() {
            let problem = if entry.seq != i as u64 {
                Some(format!("sequence gap: expected {}, found {}", i, entry.seq))
            } else if entry.prev_hash != prev_hash {
                Some("prev_hash does not match the previous entry".to_string())
            } else if entry.hash != entry.expected_hash() {
                Some("entry hash mismatch".to_string())
            } else {
                None
            };

            if let Some(message) = problem {
                return Ok(AuditVerification {
                    valid: false,
                    entries: entries.len(),
                    first_invalid_line: Some(i + 1),
                    message,
                });
            }
            prev_hash = entry.hash.clone();
        }

        Ok(AuditVerification {
            valid: true,
            entries: entries.len(),
            first_invalid_line: None,
            message: "audit chain verified".to_string(),
        })
    }
}
