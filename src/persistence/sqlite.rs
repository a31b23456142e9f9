use super::{StoreError, StoreResult, StudentStore};
use crate::StudentAggregate;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Students in one table, their leave records in another keyed by
/// `(student_id, leave_id)`.
///
/// Raw leave strings are stored as-is; `leave_id` is pulled out of the JSON
/// when present and otherwise synthesised from the record's position, so a
/// corrupt record still round-trips.
pub struct SqliteStudentStore {
    connection: Mutex<Connection>,
}

impl SqliteStudentStore {
    pub fn new<P: AsRef<std::path::Path>>(path: P) -> StoreResult<Self> {
        let connection = Connection::open(path)?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> StoreResult<Self> {
        let connection = Connection::open_in_memory()?;
        Self::initialize_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn initialize_schema(connection: &Connection) -> StoreResult<()> {
        let ddl = r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                student_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS student_leaves (
                student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
                leave_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (student_id, leave_id)
            );
        "#;
        connection.execute_batch(ddl)?;
        Ok(())
    }

    fn lock(&self, timeout: Duration) -> StoreResult<MutexGuard<'_, Connection>> {
        let conn = self
            .connection
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite mutex poisoned".into()))?;
        conn.busy_timeout(timeout)?;
        Ok(conn)
    }

    /// Inserts or replaces a student as-is, version included.
    pub fn insert(&self, student: &StudentAggregate) -> StoreResult<()> {
        let mut conn = self.lock(Duration::from_secs(5))?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO students (id, version, student_json) VALUES (?1, ?2, ?3)",
            params![student.id, student.version as i64, Self::document_json(student)?],
        )?;
        Self::save_leaves(&tx, student)?;
        tx.commit()?;
        Ok(())
    }

    /// The document without its leave array; leaves live in their own table.
    fn document_json(student: &StudentAggregate) -> StoreResult<String> {
        let mut document = student.clone();
        document.leave.clear();
        Ok(serde_json::to_string(&document)?)
    }

    fn leave_key(raw: &str, position: usize) -> String {
        serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| value.get("leaveId")?.as_str().map(str::to_string))
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("#unkeyed-{position}"))
    }

    fn save_leaves(tx: &Transaction, student: &StudentAggregate) -> StoreResult<()> {
        tx.execute(
            "DELETE FROM student_leaves WHERE student_id = ?1",
            params![student.id],
        )?;
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO student_leaves (student_id, leave_id, position, record)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        let mut used = HashSet::with_capacity(student.leave.len());
        for (position, raw) in student.leave.iter().enumerate() {
            let mut key = Self::leave_key(raw, position);
            let mut attempt = 0;
            // Real ids may look like the synthetic ones.
            while !used.insert(key.clone()) {
                attempt += 1;
                key = if attempt == 1 {
                    format!("#duplicate-{position}")
                } else {
                    format!("#duplicate-{position}-{attempt}")
                };
            }
            stmt.execute(params![student.id, key, position as i64, raw])?;
        }
        Ok(())
    }

    fn load_leaves(conn: &Connection, student_id: &str) -> StoreResult<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT record FROM student_leaves WHERE student_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![student_id], |row| row.get::<_, String>(0))?;
        let mut leaves = Vec::new();
        for row in rows {
            leaves.push(row?);
        }
        Ok(leaves)
    }
}

impl StudentStore for SqliteStudentStore {
    fn get(&self, id: &str, timeout: Duration) -> StoreResult<StudentAggregate> {
        let conn = self.lock(timeout)?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, student_json FROM students WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((version, json)) = row else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let mut student: StudentAggregate = serde_json::from_str(&json)?;
        student.version = version as u64;
        student.leave = Self::load_leaves(&conn, id)?;
        Ok(student)
    }

    fn update(
        &self,
        student: &StudentAggregate,
        expected_version: u64,
        timeout: Duration,
    ) -> StoreResult<u64> {
        let mut conn = self.lock(timeout)?;
        let tx = conn.transaction()?;
        let found: Option<i64> = tx
            .query_row(
                "SELECT version FROM students WHERE id = ?1",
                params![student.id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(found) = found else {
            return Err(StoreError::NotFound(student.id.clone()));
        };
        if found as u64 != expected_version {
            return Err(StoreError::VersionConflict {
                id: student.id.clone(),
                expected: expected_version,
                found: found as u64,
            });
        }
        let next = expected_version + 1;
        let mut document = student.clone();
        document.version = next;
        tx.execute(
            "UPDATE students SET version = ?2, student_json = ?3 WHERE id = ?1",
            params![student.id, next as i64, Self::document_json(&document)?],
        )?;
        Self::save_leaves(&tx, student)?;
        tx.commit()?;
        Ok(next)
    }
}
