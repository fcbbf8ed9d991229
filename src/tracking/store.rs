//! SQLite tracking store
//!
//! One database file holds experiments, runs with their tags, params,
//! metrics and artifact index, and the model registry tables. Each
//! `TrackingStore` owns one connection; several stores (threads or
//! processes) may share a database and are serialised by SQLite's write lock.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::artifacts::ArtifactStore;
use super::run::ActiveRun;
use super::{RunRecord, RunStatus};
use crate::config::TrackingConfig;
use crate::error::{MlopsError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = "
PRAGMA journal_mode=WAL;
PRAGMA foreign_keys=ON;
CREATE TABLE IF NOT EXISTS experiments (
    experiment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    experiment_id INTEGER NOT NULL REFERENCES experiments(experiment_id),
    run_name TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    artifact_uri TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS run_tags (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (run_id, key)
);
CREATE TABLE IF NOT EXISTS run_params (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (run_id, key)
);
CREATE TABLE IF NOT EXISTS run_metrics (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    key TEXT NOT NULL,
    value REAL NOT NULL,
    step INTEGER NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS run_artifacts (
    run_id TEXT NOT NULL REFERENCES runs(run_id),
    path TEXT NOT NULL,
    PRIMARY KEY (run_id, path)
);
CREATE TABLE IF NOT EXISTS registered_models (
    name TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS model_versions (
    name TEXT NOT NULL REFERENCES registered_models(name),
    version INTEGER NOT NULL,
    run_id TEXT,
    source TEXT NOT NULL,
    stage TEXT NOT NULL DEFAULT 'None',
    created_at INTEGER NOT NULL,
    UNIQUE (name, version)
);
CREATE TABLE IF NOT EXISTS stage_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version INTEGER NOT NULL,
    from_stage TEXT NOT NULL,
    to_stage TEXT NOT NULL,
    at INTEGER NOT NULL
);
";

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run name used when the caller gives none: `Run_<YYYYmmdd_HHMMSS>`
pub fn default_run_name() -> String {
    format!("Run_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Tracking database plus artifact tree
pub struct TrackingStore {
    conn: Mutex<Connection>,
    artifacts: ArtifactStore,
}

impl TrackingStore {
    /// Open (creating if needed) the store described by `config`
    pub fn open(config: &TrackingConfig) -> Result<Self> {
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;

        debug!(db = %db_path.display(), "Tracking store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            artifacts: ArtifactStore::new(config.artifact_root.clone()),
        })
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run `f` with exclusive use of this store's connection
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Id of the named experiment, creating it on first use
    pub fn get_or_create_experiment(&self, name: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO experiments (name, created_at) VALUES (?1, ?2)",
                params![name, now_millis()],
            )?;
            let id = conn.query_row(
                "SELECT experiment_id FROM experiments WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    /// Open a run scope in `experiment`
    pub fn start_run(&self, experiment: &str, run_name: Option<&str>) -> Result<ActiveRun<'_>> {
        let experiment_id = self.get_or_create_experiment(experiment)?;
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let run_name = run_name.map(str::to_string).unwrap_or_else(default_run_name);
        let artifact_uri = self.artifacts.run_dir(&run_id);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (run_id, experiment_id, run_name, status, start_time, artifact_uri)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    experiment_id,
                    run_name,
                    RunStatus::Running.as_str(),
                    now_millis(),
                    artifact_uri.display().to_string(),
                ],
            )?;
            Ok(())
        })?;

        info!(run_id = %run_id, run_name = %run_name, experiment = %experiment, "Run started");
        Ok(ActiveRun::new(self, run_id))
    }

    pub(crate) fn run_status(conn: &Connection, run_id: &str) -> Result<RunStatus> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        match status {
            Some(s) => s.parse(),
            None => Err(MlopsError::TrackingError(format!("unknown run '{}'", run_id))),
        }
    }

    /// Close a running run. Closing happens exactly once; a second close is `RunClosed`.
    pub fn terminate_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        if status == RunStatus::Running {
            return Err(MlopsError::TrackingError(
                "a run cannot be terminated as running".to_string(),
            ));
        }

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE runs SET status = ?1, end_time = ?2 WHERE run_id = ?3 AND status = ?4",
                params![status.as_str(), now_millis(), run_id, RunStatus::Running.as_str()],
            )?;
            if updated == 0 {
                // distinguish unknown run from already closed
                Self::run_status(conn, run_id)?;
                return Err(MlopsError::RunClosed(run_id.to_string()));
            }
            Ok(())
        })?;

        info!(run_id = %run_id, status = status.as_str(), "Run closed");
        Ok(())
    }

    /// Full record of a run
    pub fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT r.run_name, e.name, r.status, r.start_time, r.end_time, r.artifact_uri
                     FROM runs r JOIN experiments e ON e.experiment_id = r.experiment_id
                     WHERE r.run_id = ?1",
                    params![run_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<i64>>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()?
                .ok_or_else(|| MlopsError::TrackingError(format!("unknown run '{}'", run_id)))?;
            let (run_name, experiment, status, start_time, end_time, artifact_uri) = row;

            let tags = string_map(conn, "SELECT key, value FROM run_tags WHERE run_id = ?1", run_id)?;
            let params = string_map(conn, "SELECT key, value FROM run_params WHERE run_id = ?1", run_id)?;

            // latest value per key
            let mut metrics = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT key, value FROM run_metrics WHERE run_id = ?1 ORDER BY step, timestamp, rowid",
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (key, value) = row?;
                metrics.insert(key, value);
            }

            let mut stmt = conn.prepare("SELECT path FROM run_artifacts WHERE run_id = ?1 ORDER BY path")?;
            let artifacts = stmt
                .query_map(params![run_id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(RunRecord {
                run_id: run_id.to_string(),
                run_name,
                experiment,
                status: status.parse()?,
                start_time,
                end_time,
                artifact_uri,
                tags,
                params,
                metrics,
                artifacts,
            })
        })
    }

    /// Run ids of an experiment, newest first
    pub fn list_runs(&self, experiment: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.run_id FROM runs r JOIN experiments e ON e.experiment_id = r.experiment_id
                 WHERE e.name = ?1 ORDER BY r.start_time DESC, r.rowid DESC",
            )?;
            let ids = stmt
                .query_map(params![experiment], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn string_map(conn: &Connection, sql: &str, run_id: &str) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (k, v) = row?;
        map.insert(k, v);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingConfig::in_dir(dir.path())).unwrap();

        let a = store.get_or_create_experiment("bikes").unwrap();
        let b = store.get_or_create_experiment("bikes").unwrap();
        let c = store.get_or_create_experiment("other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_default_run_name() {
        let name = default_run_name();
        assert!(name.starts_with("Run_"));
        assert_eq!(name.len(), "Run_20240101_120000".len());
    }

    #[test]
    fn test_terminate_twice_is_run_closed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingConfig::in_dir(dir.path())).unwrap();
        let run = store.start_run("bikes", Some("r1")).unwrap();
        let run_id = run.run_id().to_string();
        run.finish().unwrap();

        let err = store.terminate_run(&run_id, RunStatus::Failed).unwrap_err();
        assert!(matches!(err, MlopsError::RunClosed(_)));
        assert_eq!(store.get_run(&run_id).unwrap().status, RunStatus::Finished);
    }

    #[test]
    fn test_terminate_unknown_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingConfig::in_dir(dir.path())).unwrap();
        assert!(matches!(
            store.terminate_run("missing", RunStatus::Finished),
            Err(MlopsError::TrackingError(_))
        ));
    }

    #[test]
    fn test_list_runs_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(&TrackingConfig::in_dir(dir.path())).unwrap();
        let first = store.start_run("bikes", None).unwrap();
        let first_id = first.run_id().to_string();
        first.finish().unwrap();
        let second = store.start_run("bikes", None).unwrap();
        let second_id = second.run_id().to_string();
        second.finish().unwrap();

        assert_eq!(store.list_runs("bikes").unwrap(), vec![second_id, first_id]);
        assert!(store.list_runs("nothing").unwrap().is_empty());
    }
}
