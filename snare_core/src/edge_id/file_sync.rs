use super::{
    EdgeIdError, EdgeIdRecord, EdgeIdStrategy, LINE_ENDING, LockPolicy, SyncFileLock,
    parse_records, take_next_id,
};
use crate::coverage::SharedCounters;
use rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Reservation {
    /// The file is new to the sync file; the lock is held until commit.
    Fresh {
        filename: String,
        first_id: usize,
        lock: SyncFileLock,
    },
    /// Another process already recorded the file.
    Known {
        filename: String,
        first_id: usize,
        id_count: usize,
    },
}

impl Reservation {
    fn first_id(&self) -> usize {
        match self {
            Reservation::Fresh { first_id, .. } | Reservation::Known { first_id, .. } => *first_id,
        }
    }

    fn filename(&self) -> &str {
        match self {
            Reservation::Fresh { filename, .. } | Reservation::Known { filename, .. } => filename,
        }
    }
}

/// Allocator that keeps edge ids consistent across processes through a
/// shared sync file with one `<source file>,<first ID>,<num IDs>` line per
/// instrumented file.
///
/// The first process to instrument a file keeps the sync file locked from
/// `start_for_source_file` until `commit_id_count` appends its record. Later
/// processes reuse the recorded range and release the lock right away.
#[derive(Debug)]
pub struct FileSyncIdStrategy {
    sync_file: PathBuf,
    counters: SharedCounters,
    policy: LockPolicy,
    rng: ChaCha8Rng,
    next_edge_id: usize,
    reservation: Option<Reservation>,
}

impl FileSyncIdStrategy {
    pub fn new(sync_file: impl Into<PathBuf>, counters: SharedCounters, policy: LockPolicy) -> Self {
        Self {
            sync_file: sync_file.into(),
            counters,
            policy,
            rng: ChaCha8Rng::from_os_rng(),
            next_edge_id: 0,
            reservation: None,
        }
    }

    pub fn sync_file(&self) -> &Path {
        &self.sync_file
    }
}

impl EdgeIdStrategy for FileSyncIdStrategy {
    fn next_edge_id(&mut self) -> Result<usize, EdgeIdError> {
        take_next_id(&self.counters, &mut self.next_edge_id)
    }

    fn start_for_source_file(&mut self, filename: &str) -> Result<(), EdgeIdError> {
        if filename.contains([',', '\n', '\r']) {
            return Err(EdgeIdError::InvalidFilename(filename.to_string()));
        }
        // Dropping an unfinished reservation releases its lock.
        self.reservation = None;

        let mut lock = SyncFileLock::acquire(&self.sync_file, &self.policy, &mut self.rng)?;
        let mut contents = String::new();
        lock.file().seek(SeekFrom::Start(0))?;
        lock.file().read_to_string(&mut contents)?;
        // Any error below drops `lock` and thereby unlocks the file.
        let records = parse_records(&contents)?;
        let mut matching = records.iter().filter(|r| r.source_file == filename);

        let reservation = match (matching.next(), matching.next()) {
            (None, _) => {
                let first_id = records.last().map_or(0, EdgeIdRecord::end);
                log::debug!("Reserving edge ids for {filename} starting at {first_id}");
                Reservation::Fresh {
                    filename: filename.to_string(),
                    first_id,
                    lock,
                }
            }
            (Some(record), None) => {
                log::debug!(
                    "Reusing {} edge ids for {} starting at {}",
                    record.id_count,
                    filename,
                    record.first_id
                );
                drop(lock);
                Reservation::Known {
                    filename: filename.to_string(),
                    first_id: record.first_id,
                    id_count: record.id_count,
                }
            }
            (Some(_), Some(_)) => {
                return Err(EdgeIdError::DuplicateRecord {
                    filename: filename.to_string(),
                });
            }
        };
        self.next_edge_id = reservation.first_id();
        self.reservation = Some(reservation);
        Ok(())
    }

    /// A commit for another file than the one started fails and leaves the
    /// reservation in place.
    fn commit_id_count(&mut self, filename: &str) -> Result<(), EdgeIdError> {
        let started = self
            .reservation
            .as_ref()
            .ok_or(EdgeIdError::CommitWithoutStart)?
            .filename();
        if started != filename {
            return Err(EdgeIdError::CommitMismatch {
                started: started.to_string(),
                committed: filename.to_string(),
            });
        }
        let reservation = self
            .reservation
            .take()
            .ok_or(EdgeIdError::CommitWithoutStart)?;
        let used = self.next_edge_id - reservation.first_id();
        match reservation {
            Reservation::Known { id_count, .. } => {
                if id_count != used {
                    return Err(EdgeIdError::IdCountMismatch {
                        filename: filename.to_string(),
                        used,
                        reserved: id_count,
                    });
                }
            }
            Reservation::Fresh {
                first_id, mut lock, ..
            } => {
                let record = EdgeIdRecord {
                    source_file: filename.to_string(),
                    first_id,
                    id_count: used,
                };
                write!(lock.file(), "{record}{LINE_ENDING}")?;
                lock.file().flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::coverage::CoverageCounters;
    use crate::edge_id::read_records;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn strategy(path: &Path) -> FileSyncIdStrategy {
        FileSyncIdStrategy::new(
            path,
            CoverageCounters::with_defaults().into_shared(),
            LockPolicy {
                max_wait: Duration::from_millis(200),
                ..LockPolicy::default()
            },
        )
    }

    fn instrument(s: &mut FileSyncIdStrategy, file: &str, edges: usize) -> Vec<usize> {
        s.start_for_source_file(file).unwrap();
        let ids = (0..edges).map(|_| s.next_edge_id().unwrap()).collect();
        s.commit_id_count(file).unwrap();
        ids
    }

    #[test]
    fn first_instrumentation_appends_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let mut s = strategy(&path);
        assert_eq!(instrument(&mut s, "a.js", 3), vec![0, 1, 2]);
        assert_eq!(instrument(&mut s, "b.js", 2), vec![3, 4]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a.js,0,3\nb.js,3,2\n");
    }

    #[test]
    fn known_files_reuse_their_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "a.js,0,3\nb.js,3,2\n").unwrap();
        let mut s = strategy(&path);
        assert_eq!(instrument(&mut s, "b.js", 2), vec![3, 4]);
        assert_eq!(instrument(&mut s, "c.js", 1), vec![5]);
        assert_eq!(read_records(&path).unwrap().len(), 3);
    }

    #[test]
    fn known_file_releases_the_lock_before_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "a.js,0,1\n").unwrap();
        let mut s = strategy(&path);
        s.start_for_source_file("a.js").unwrap();
        assert!(SyncFileLock::try_acquire(&path).unwrap().is_some());
        s.next_edge_id().unwrap();
        s.commit_id_count("a.js").unwrap();

        s.start_for_source_file("new.js").unwrap();
        assert!(
            SyncFileLock::try_acquire(&path).unwrap().is_none(),
            "a fresh reservation holds the lock until commit"
        );
        s.commit_id_count("new.js").unwrap();
        assert!(SyncFileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test]
    fn edge_count_mismatch_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "a.js,0,3\n").unwrap();
        let mut s = strategy(&path);
        s.start_for_source_file("a.js").unwrap();
        s.next_edge_id().unwrap();
        let err = s.commit_id_count("a.js").unwrap_err();
        assert_eq!(
            err.to_string(),
            "a.js has 1 edges, but 3 edges reserved in ID sync file"
        );
    }

    #[test]
    fn protocol_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let mut s = strategy(&path);
        assert!(matches!(
            s.commit_id_count("a.js"),
            Err(EdgeIdError::CommitWithoutStart)
        ));
        assert!(matches!(
            s.start_for_source_file("a,b.js"),
            Err(EdgeIdError::InvalidFilename(_))
        ));
    }

    #[test]
    fn commit_must_name_the_started_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let mut s = strategy(&path);
        s.start_for_source_file("a.js").unwrap();
        s.next_edge_id().unwrap();
        let err = s.commit_id_count("b.js").unwrap_err();
        assert!(
            matches!(&err, EdgeIdError::CommitMismatch { started, committed }
                if started == "a.js" && committed == "b.js"),
            "got {err:?}"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        s.commit_id_count("a.js").unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("a.js,0,1{LINE_ENDING}")
        );
    }

    #[test]
    fn corrupt_sync_files_fail_and_unlock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        fs::write(&path, "a.js,0,3\ngarbage\n").unwrap();
        let mut s = strategy(&path);
        let err = s.start_for_source_file("b.js").unwrap_err();
        assert!(err.to_string().contains("garbage"), "message: {err}");
        assert!(SyncFileLock::try_acquire(&path).unwrap().is_some());

        fs::write(&path, "a.js,0,3\na.js,3,3\n").unwrap();
        let err = s.start_for_source_file("a.js").unwrap_err();
        assert_eq!(err.to_string(), "Multiple entries for a.js in ID sync file");
        assert!(SyncFileLock::try_acquire(&path).unwrap().is_some());
    }

    #[test_log::test]
    fn contended_lock_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        let mut holder = strategy(&path);
        holder.start_for_source_file("slow.js").unwrap();
        let mut waiter = strategy(&path);
        assert!(matches!(
            waiter.start_for_source_file("other.js"),
            Err(EdgeIdError::LockTimeout { .. })
        ));
    }
}
