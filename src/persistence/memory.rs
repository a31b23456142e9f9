use super::{StoreError, StoreResult, StudentStore};
use crate::StudentAggregate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct InMemoryStudentStore {
    students: Mutex<HashMap<String, StudentAggregate>>,
}

impl InMemoryStudentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a student as-is, version included.
    pub fn insert(&self, student: StudentAggregate) -> StoreResult<()> {
        self.lock()?.insert(student.id.clone(), student);
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, HashMap<String, StudentAggregate>>> {
        self.students
            .lock()
            .map_err(|_| StoreError::Unavailable("student map lock poisoned".into()))
    }
}

impl StudentStore for InMemoryStudentStore {
    fn get(&self, id: &str, _timeout: Duration) -> StoreResult<StudentAggregate> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn update(
        &self,
        student: &StudentAggregate,
        expected_version: u64,
        _timeout: Duration,
    ) -> StoreResult<u64> {
        let mut students = self.lock()?;
        let stored = students
            .get_mut(&student.id)
            .ok_or_else(|| StoreError::NotFound(student.id.clone()))?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: student.id.clone(),
                expected: expected_version,
                found: stored.version,
            });
        }
        let mut next = student.clone();
        next.version = expected_version + 1;
        *stored = next;
        Ok(expected_version + 1)
    }
}
