use super::{StoreError, StoreResult, StudentStore};
use crate::StudentAggregate;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default, Serialize, Deserialize)]
struct StudentSnapshot {
    students: Vec<StudentAggregate>,
}

/// Keeps every student in one pretty-printed JSON file. Each update reads,
/// patches and rewrites the whole file.
pub struct JsonFileStudentStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStudentStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Writes `students` as the full contents of the file.
    pub fn seed(&self, students: Vec<StudentAggregate>) -> StoreResult<()> {
        self.save(&StudentSnapshot { students })
    }

    fn load(&self) -> StoreResult<StudentSnapshot> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StudentSnapshot::default()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn save(&self, snapshot: &StudentSnapshot) -> StoreResult<()> {
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(file, snapshot)?;
        Ok(())
    }
}

/// Best-effort deadline. Local file reads are not interruptible, so the
/// timeout is checked between steps: a slow `get` reports `Timeout` once the
/// read finishes, and a slow `update` aborts before anything is written.
fn check_deadline(started: Instant, timeout: Duration) -> StoreResult<()> {
    if started.elapsed() > timeout {
        return Err(StoreError::Timeout(timeout));
    }
    Ok(())
}

impl StudentStore for JsonFileStudentStore {
    fn get(&self, id: &str, timeout: Duration) -> StoreResult<StudentAggregate> {
        let started = Instant::now();
        let snapshot = self.load()?;
        check_deadline(started, timeout)?;
        snapshot
            .students
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(
        &self,
        student: &StudentAggregate,
        expected_version: u64,
        timeout: Duration,
    ) -> StoreResult<u64> {
        let started = Instant::now();
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))?;
        let mut snapshot = self.load()?;
        let stored = snapshot
            .students
            .iter_mut()
            .find(|s| s.id == student.id)
            .ok_or_else(|| StoreError::NotFound(student.id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: student.id.clone(),
                expected: expected_version,
                found: stored.version,
            });
        }
        *stored = student.clone();
        stored.version = expected_version + 1;
        check_deadline(started, timeout)?;
        self.save(&snapshot)?;
        Ok(expected_version + 1)
    }
}
