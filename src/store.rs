// 💾 Profile Store - read/write contract for merged profiles
// Two implementations: in-memory snapshot and SQLite (WAL).
// Both replace the whole profile set per run; readers never see a half-written run.

use crate::aggregator::{AggregationRun, RunInfo, RunSummary};
use crate::error::StoreError;
use crate::profile::BeeProfile;
use crate::record::SourceRecord;
use crate::resolver::ReviewEntry;
use crate::species::SpeciesKey;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Lazy, finite profile listing. Call `list_profiles` again to restart.
pub type ProfileIter<'a> = Box<dyn Iterator<Item = Result<BeeProfile, StoreError>> + Send + 'a>;

pub trait ProfileStore: Send + Sync {
    /// All profiles of the last completed run, ordered by species key
    fn list_profiles(&self) -> Result<ProfileIter<'_>, StoreError>;

    fn get_profile(&self, key: &SpeciesKey) -> Result<BeeProfile, StoreError>;

    fn needs_review(&self) -> Result<Vec<ReviewEntry>, StoreError>;

    /// Swap in a completed run atomically
    fn replace_all(&self, run: &AggregationRun) -> Result<(), StoreError>;

    fn last_run(&self) -> Result<Option<RunInfo>, StoreError>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct Snapshot {
    /// Sorted by species key
    profiles: Vec<BeeProfile>,
    needs_review: Vec<ReviewEntry>,
    run: Option<RunInfo>,
}

impl Snapshot {
    fn find(&self, key: &SpeciesKey) -> Option<&BeeProfile> {
        self.profiles
            .binary_search_by(|p| p.species_key.cmp(key))
            .ok()
            .map(|i| &self.profiles[i])
    }
}

/// Serves the last completed run. Cloning shares the same snapshot slot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProfileStore {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        InMemoryProfileStore::default()
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, StoreError> {
        self.current
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| StoreError::Poisoned)
    }
}

/// Keeps its own handle on the snapshot it started from
struct SnapshotIter {
    snapshot: Arc<Snapshot>,
    next: usize,
}

impl Iterator for SnapshotIter {
    type Item = Result<BeeProfile, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let profile = self.snapshot.profiles.get(self.next)?.clone();
        self.next += 1;
        Some(Ok(profile))
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn list_profiles(&self) -> Result<ProfileIter<'_>, StoreError> {
        Ok(Box::new(SnapshotIter {
            snapshot: self.snapshot()?,
            next: 0,
        }))
    }

    fn get_profile(&self, key: &SpeciesKey) -> Result<BeeProfile, StoreError> {
        self.snapshot()?
            .find(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn needs_review(&self) -> Result<Vec<ReviewEntry>, StoreError> {
        Ok(self.snapshot()?.needs_review.clone())
    }

    fn replace_all(&self, run: &AggregationRun) -> Result<(), StoreError> {
        let mut profiles = run.profiles.clone();
        profiles.sort_by(|a, b| a.species_key.cmp(&b.species_key));

        let snapshot = Arc::new(Snapshot {
            profiles,
            needs_review: run.needs_review.clone(),
            run: Some(run.info()),
        });

        let mut current = self.current.write().map_err(|_| StoreError::Poisoned)?;
        *current = snapshot;
        debug!(run_id = %run.run_id, "in-memory snapshot replaced");
        Ok(())
    }

    fn last_run(&self) -> Result<Option<RunInfo>, StoreError> {
        Ok(self.snapshot()?.run.clone())
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles (
            species_key TEXT PRIMARY KEY,
            scientific_name TEXT NOT NULL,
            conservation_status TEXT NOT NULL,
            profile_json TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    // Audit trail: one row per contributing record
    conn.execute(
        "CREATE TABLE IF NOT EXISTS contributing_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            species_key TEXT NOT NULL,
            provider TEXT NOT NULL,
            record_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS needs_review (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            species_key TEXT NOT NULL,
            entry_json TEXT NOT NULL,
            run_id TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            summary_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contributing_species ON contributing_records(species_key)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_status ON profiles(conservation_status)",
        [],
    )?;

    Ok(())
}

pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        SqliteProfileStore::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        SqliteProfileStore::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        setup_database(&conn)?;
        Ok(SqliteProfileStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load_profile(&self, key: &str) -> Result<BeeProfile, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT profile_json FROM profiles WHERE species_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    /// Audit rows for one species, in insertion order
    pub fn audit_records(&self, key: &SpeciesKey) -> Result<Vec<SourceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT record_json FROM contributing_records WHERE species_key = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![key.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    pub fn profile_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Rows of one run, read in a single query; each profile is decoded on demand.
/// A later `replace_all` cannot mix another run into a listing in progress.
struct SqliteProfileIter {
    rows: std::vec::IntoIter<String>,
}

impl Iterator for SqliteProfileIter {
    type Item = Result<BeeProfile, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let json = self.rows.next()?;
        Some(serde_json::from_str(&json).map_err(StoreError::from))
    }
}

impl ProfileStore for SqliteProfileStore {
    fn list_profiles(&self) -> Result<ProfileIter<'_>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT profile_json FROM profiles ORDER BY species_key")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(profiles = rows.len(), "listing profiles");
        Ok(Box::new(SqliteProfileIter {
            rows: rows.into_iter(),
        }))
    }

    fn get_profile(&self, key: &SpeciesKey) -> Result<BeeProfile, StoreError> {
        self.load_profile(key.as_str())
    }

    fn needs_review(&self) -> Result<Vec<ReviewEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT entry_json FROM needs_review ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }

    fn replace_all(&self, run: &AggregationRun) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM contributing_records", [])?;
        tx.execute("DELETE FROM needs_review", [])?;
        tx.execute("DELETE FROM profiles", [])?;

        {
            let mut insert_profile = tx.prepare(
                "INSERT INTO profiles (species_key, scientific_name, conservation_status, profile_json, run_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_record = tx.prepare(
                "INSERT INTO contributing_records (fingerprint, species_key, provider, record_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for profile in &run.profiles {
                insert_profile.execute(params![
                    profile.species_key.as_str(),
                    profile.scientific_name,
                    profile.conservation_status.code(),
                    serde_json::to_string(profile)?,
                    run.run_id,
                ])?;

                for contributing in &profile.contributing_records {
                    insert_record.execute(params![
                        contributing.fingerprint,
                        profile.species_key.as_str(),
                        contributing.record.provider_id().code(),
                        serde_json::to_string(&contributing.record)?,
                    ])?;
                }
            }

            let mut insert_review = tx.prepare(
                "INSERT INTO needs_review (species_key, entry_json, run_id) VALUES (?1, ?2, ?3)",
            )?;
            for entry in &run.needs_review {
                insert_review.execute(params![
                    entry.species_key.as_str(),
                    serde_json::to_string(entry)?,
                    run.run_id,
                ])?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO runs (run_id, started_at, completed_at, summary_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run.run_id,
                run.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                run.completed_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                serde_json::to_string(&run.summary)?,
            ],
        )?;

        tx.commit()?;

        info!(
            run_id = %run.run_id,
            profiles = run.profiles.len(),
            needs_review = run.needs_review.len(),
            "profiles written to SQLite"
        );
        Ok(())
    }

    fn last_run(&self) -> Result<Option<RunInfo>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT run_id, started_at, completed_at, summary_json
                 FROM runs ORDER BY completed_at DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        parse_timestamp_column(row.get(1)?, 1)?,
                        parse_timestamp_column(row.get(2)?, 2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((run_id, started_at, completed_at, summary_json)) => {
                let summary: RunSummary = serde_json::from_str(&summary_json)?;
                Ok(Some(RunInfo {
                    run_id,
                    started_at,
                    completed_at,
                    summary,
                }))
            }
            None => Ok(None),
        }
    }
}

fn parse_timestamp_column(value: String, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

// ============================================================================
// TESTS
// ============================================================================
