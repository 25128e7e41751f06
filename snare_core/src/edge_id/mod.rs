//! Allocation of coverage edge ids to instrumented source files.
//!
//! Every process instrumenting code must agree on the ids of the files it
//! shares with other processes, otherwise the coverage they report is
//! meaningless to the engine. [`MemorySyncIdStrategy`] serves single process
//! runs; [`FileSyncIdStrategy`] coordinates through a shared sync file.

mod file_sync;
mod lock;
mod memory;

pub use file_sync::FileSyncIdStrategy;
pub use lock::{LockPolicy, SyncFileLock};
pub use memory::MemorySyncIdStrategy;

use crate::coverage::{CoverageError, SharedCounters, lock_counters};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EdgeIdError {
    #[error(transparent)]
    CounterLimit(#[from] CoverageError),

    #[error("Timed out after {waited:?} waiting for the lock on ID sync file {path}")]
    LockTimeout { path: String, waited: Duration },

    #[error("Expected ID file line to be of the form <source file>,<first ID>,<num IDs>, got \"{line}\"")]
    MalformedRecord { line: String },

    #[error("Multiple entries for {filename} in ID sync file")]
    DuplicateRecord { filename: String },

    #[error("{filename} has {used} edges, but {reserved} edges reserved in ID sync file")]
    IdCountMismatch {
        filename: String,
        used: usize,
        reserved: usize,
    },

    #[error("commit_id_count() is called before start_for_source_file()")]
    CommitWithoutStart,

    #[error("commit_id_count({committed}) does not match start_for_source_file({started})")]
    CommitMismatch { started: String, committed: String },

    #[error("Cannot lock ID sync file {path}: advisory file locks are not supported on this platform")]
    LockUnsupported { path: String },

    #[error("Source file name {0:?} cannot be stored in the ID sync file")]
    InvalidFilename(String),

    #[error("ID sync file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hands out edge ids while source files are being instrumented.
///
/// Callers bracket every source file with `start_for_source_file` and
/// `commit_id_count` and draw its ids with `next_edge_id` in between.
pub trait EdgeIdStrategy {
    fn next_edge_id(&mut self) -> Result<usize, EdgeIdError>;

    fn start_for_source_file(&mut self, filename: &str) -> Result<(), EdgeIdError>;

    fn commit_id_count(&mut self, filename: &str) -> Result<(), EdgeIdError>;
}

/// Returns `*next` and advances it, growing the counter buffer first.
fn take_next_id(counters: &SharedCounters, next: &mut usize) -> Result<usize, EdgeIdError> {
    lock_counters(counters).ensure_capacity(*next)?;
    let id = *next;
    *next += 1;
    Ok(id)
}

/// Terminator of every record appended to the ID sync file.
pub const LINE_ENDING: &str = if cfg!(windows) { "\r\n" } else { "\n" };

/// One line of the ID sync file: `<source file>,<first ID>,<num IDs>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeIdRecord {
    pub source_file: String,
    pub first_id: usize,
    pub id_count: usize,
}

impl EdgeIdRecord {
    /// First id after the range of this record.
    pub fn end(&self) -> usize {
        self.first_id + self.id_count
    }
}

impl fmt::Display for EdgeIdRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.source_file, self.first_id, self.id_count)
    }
}

impl FromStr for EdgeIdRecord {
    type Err = EdgeIdError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || EdgeIdError::MalformedRecord {
            line: line.to_string(),
        };
        let parts: Vec<&str> = line.split(',').collect();
        let [source_file, first_id, id_count] = parts.as_slice() else {
            return Err(malformed());
        };
        Ok(EdgeIdRecord {
            source_file: source_file.to_string(),
            first_id: first_id.trim().parse().map_err(|_| malformed())?,
            id_count: id_count.trim().parse().map_err(|_| malformed())?,
        })
    }
}

/// Parses sync file contents, skipping empty lines.
pub fn parse_records(contents: &str) -> Result<Vec<EdgeIdRecord>, EdgeIdError> {
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}

/// Reads every record of an ID sync file without locking it.
pub fn read_records(path: &Path) -> Result<Vec<EdgeIdRecord>, EdgeIdError> {
    parse_records(&fs::read_to_string(path)?)
}

/// Checks that records tile the id space from 0 without gaps or overlaps.
///
/// Returns the first record that does not start where its predecessor ended.
pub fn check_contiguous(records: &[EdgeIdRecord]) -> Result<usize, &EdgeIdRecord> {
    let mut next = 0;
    for record in records {
        if record.first_id != next {
            return Err(record);
        }
        next = record.end();
    }
    Ok(next)
}
