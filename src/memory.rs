//! Pattern Memory Store
//!
//! Append-only SQLite log of patterns distilled by completed reasoning chains.
//! Rows are never updated or deleted; triggers reject both. Writes are
//! best-effort: a failed append is logged and swallowed so pattern capture
//! never blocks a response.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::KernelResult;

/// A transferable insight extracted from a completed chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub source_domain: String,
    pub abstract_structure: String,
    pub potential_domains: BTreeSet<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    pub fn new(name: &str, source_domain: &str, abstract_structure: &str, confidence: f64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            source_domain: source_domain.to_string(),
            abstract_structure: abstract_structure.to_string(),
            potential_domains: BTreeSet::new(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        self.potential_domains.extend(domains);
        self
    }
}

/// Durable append-only pattern log
pub struct PatternStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str =
    "id, name, source_domain, abstract_structure, potential_domains, confidence, created_at";

impl PatternStore {
    /// Open or create the pattern database
    pub fn open(path: &Path) -> KernelResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::with_connection(conn)?;

        info!("Pattern store opened: {}", path.display());
        Ok(store)
    }

    /// Volatile store, used when no durable storage is available and in tests
    pub fn open_in_memory() -> KernelResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> KernelResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> KernelResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS patterns (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                source_domain TEXT NOT NULL,
                abstract_structure TEXT NOT NULL,
                potential_domains TEXT NOT NULL DEFAULT '[]',
                confidence REAL NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_domain ON patterns(source_domain);

            CREATE TRIGGER IF NOT EXISTS patterns_no_update BEFORE UPDATE ON patterns BEGIN
                SELECT RAISE(ABORT, 'patterns are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS patterns_no_delete BEFORE DELETE ON patterns BEGIN
                SELECT RAISE(ABORT, 'patterns are append-only');
            END;
            "#,
        )?;
        Ok(())
    }

    /// Append a pattern. Failures are logged, never propagated.
    pub fn append(&self, pattern: Pattern) -> bool {
        match self.try_append(&pattern) {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %pattern.id, "Pattern store unavailable, dropping pattern: {}", e);
                false
            }
        }
    }

    /// Append a pattern, surfacing storage errors
    pub fn try_append(&self, pattern: &Pattern) -> KernelResult<()> {
        let domains = serde_json::to_string(&pattern.potential_domains)
            .unwrap_or_else(|_| "[]".to_string());

        self.conn.lock().execute(
            r#"
            INSERT INTO patterns (id, name, source_domain, abstract_structure,
                                  potential_domains, confidence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                pattern.id,
                pattern.name,
                pattern.source_domain,
                pattern.abstract_structure,
                domains,
                pattern.confidence,
                pattern.created_at.timestamp_millis(),
            ],
        )?;

        debug!(id = %pattern.id, name = %pattern.name, "Pattern appended");
        Ok(())
    }

    /// Most recent patterns first
    pub fn list_recent(&self, limit: usize) -> Vec<Pattern> {
        let sql = format!(
            "SELECT {} FROM patterns ORDER BY seq DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        self.query(&sql, params![limit as i64]).unwrap_or_else(|e| {
            warn!("Failed to read recent patterns: {}", e);
            Vec::new()
        })
    }

    /// Recent patterns with at least `min_confidence`
    pub fn list_confident(&self, min_confidence: f64, limit: usize) -> KernelResult<Vec<Pattern>> {
        let sql = format!(
            "SELECT {} FROM patterns WHERE confidence >= ?1 ORDER BY seq DESC LIMIT ?2",
            SELECT_COLUMNS
        );
        self.query(&sql, params![min_confidence, limit as i64])
    }

    pub fn get(&self, id: &str) -> KernelResult<Option<Pattern>> {
        let sql = format!("SELECT {} FROM patterns WHERE id = ?1", SELECT_COLUMNS);
        Ok(self.query(&sql, params![id])?.into_iter().next())
    }

    pub fn count(&self) -> KernelResult<usize> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> KernelResult<Vec<Pattern>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, row_to_pattern)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Pattern> {
    let domains: String = row.get(4)?;
    let created_ms: i64 = row.get(6)?;
    Ok(Pattern {
        id: row.get(0)?,
        name: row.get(1)?,
        source_domain: row.get(2)?,
        abstract_structure: row.get(3)?,
        potential_domains: serde_json::from_str(&domains).unwrap_or_default(),
        confidence: row.get(5)?,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_ms).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_list_recent() {
        let store = PatternStore::open_in_memory().unwrap();
        let first = Pattern::new("First", "cooking", "heat transforms structure", 0.8);
        let second = Pattern::new("Second", "music", "tension seeks resolution", 0.9)
            .with_domains(["storytelling".to_string(), "ux".to_string()]);

        assert!(store.append(first.clone()));
        assert!(store.append(second.clone()));

        let recent = store.list_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
        assert!(recent[0].potential_domains.contains("ux"));

        let one = store.list_recent(1);
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].name, "Second");
    }

    #[test]
    fn test_rows_are_immutable() {
        let store = PatternStore::open_in_memory().unwrap();
        let p = Pattern::new("Fixed", "math", "invariants", 0.9);
        store.append(p.clone());

        let conn = store.conn.lock();
        assert!(conn
            .execute("UPDATE patterns SET name = 'changed'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM patterns", []).is_err());
        drop(conn);

        assert_eq!(store.get(&p.id).unwrap().unwrap().name, "Fixed");
    }

    #[test]
    fn test_duplicate_id_not_overwritten() {
        let store = PatternStore::open_in_memory().unwrap();
        let p = Pattern::new("Original", "a", "b", 0.5);
        assert!(store.append(p.clone()));

        let mut clash = p.clone();
        clash.name = "Impostor".to_string();
        assert!(!store.append(clash));

        assert_eq!(store.get(&p.id).unwrap().unwrap().name, "Original");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_unavailable_storage_is_swallowed() {
        let store = PatternStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute_batch(
                "DROP TRIGGER patterns_no_update; DROP TRIGGER patterns_no_delete; DROP TABLE patterns;",
            )
            .unwrap();

        assert!(!store.append(Pattern::new("Lost", "x", "y", 0.9)));
        assert!(store.list_recent(5).is_empty());
    }

    #[test]
    fn test_list_confident() {
        let store = PatternStore::open_in_memory().unwrap();
        store.append(Pattern::new("weak", "a", "b", 0.3));
        store.append(Pattern::new("strong", "a", "b", 0.7));

        let confident = store.list_confident(0.5, 10).unwrap();
        assert_eq!(confident.len(), 1);
        assert_eq!(confident[0].name, "strong");
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Pattern::new("x", "y", "z", 1.7).confidence, 1.0);
        assert_eq!(Pattern::new("x", "y", "z", -0.2).confidence, 0.0);
    }
}
