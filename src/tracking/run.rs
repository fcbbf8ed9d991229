//! Active run handle
//!
//! `open -> logging -> closed`. Writes are accepted any number of times while
//! the run is open; `finish` or `fail` close it and consume the handle. A
//! handle dropped without being closed marks its run failed.

use std::path::{Path, PathBuf};

use rusqlite::params;
use serde::Serialize;
use tracing::{debug, warn};

use super::store::{now_millis, TrackingStore};
use super::RunStatus;
use crate::error::{MlopsError, Result};

/// Lifecycle phase of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Open,
    Logging,
    Closed,
}

/// Write access to one running run
pub struct ActiveRun<'a> {
    store: &'a TrackingStore,
    run_id: String,
    phase: RunPhase,
    metric_step: i64,
}

impl<'a> ActiveRun<'a> {
    pub(crate) fn new(store: &'a TrackingStore, run_id: String) -> Self {
        Self {
            store,
            run_id,
            phase: RunPhase::Open,
            metric_step: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Directory holding this run's artifacts
    pub fn artifact_dir(&self) -> PathBuf {
        self.store.artifacts().run_dir(&self.run_id)
    }

    /// Execute one write if the run is still running in the database
    fn write(&mut self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<()> {
        let run_id = self.run_id.clone();
        self.store.with_conn(|conn| {
            if TrackingStore::run_status(conn, &run_id)? != RunStatus::Running {
                return Err(MlopsError::RunClosed(run_id.clone()));
            }
            conn.execute(sql, values)?;
            Ok(())
        })?;
        self.phase = RunPhase::Logging;
        Ok(())
    }

    /// Set or overwrite a tag
    pub fn set_tag(&mut self, key: &str, value: &str) -> Result<()> {
        let run_id = self.run_id.clone();
        self.write(
            "INSERT INTO run_tags (run_id, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (run_id, key) DO UPDATE SET value = excluded.value",
            params![run_id, key, value],
        )
    }

    /// Log a parameter. Parameters are immutable: re-logging the same value
    /// is accepted, a different value is an error.
    pub fn log_param(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.ensure_running()?;
        let value = value.to_string();
        let existing: Option<String> = self.store.with_conn(|conn| {
            use rusqlite::OptionalExtension;
            Ok(conn
                .query_row(
                    "SELECT value FROM run_params WHERE run_id = ?1 AND key = ?2",
                    params![self.run_id, key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match existing {
            Some(old) if old == value => Ok(()),
            Some(old) => Err(MlopsError::TrackingError(format!(
                "param '{}' already logged as '{}', refusing '{}'",
                key, old, value
            ))),
            None => {
                let run_id = self.run_id.clone();
                self.write(
                    "INSERT INTO run_params (run_id, key, value) VALUES (?1, ?2, ?3)",
                    params![run_id, key, value],
                )
            }
        }
    }

    /// Log a metric value; repeated keys keep a history ordered by step
    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        let run_id = self.run_id.clone();
        let step = self.metric_step;
        self.write(
            "INSERT INTO run_metrics (run_id, key, value, step, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, key, value, step, now_millis()],
        )?;
        self.metric_step += 1;
        debug!(run_id = %self.run_id, key, value, "Metric logged");
        Ok(())
    }

    fn index_artifact(&mut self, artifact_path: &str) -> Result<()> {
        let run_id = self.run_id.clone();
        self.write(
            "INSERT OR IGNORE INTO run_artifacts (run_id, path) VALUES (?1, ?2)",
            params![run_id, artifact_path],
        )
    }

    fn ensure_running(&self) -> Result<()> {
        let status = self
            .store
            .with_conn(|conn| TrackingStore::run_status(conn, &self.run_id))?;
        if status != RunStatus::Running {
            return Err(MlopsError::RunClosed(self.run_id.clone()));
        }
        Ok(())
    }

    /// Copy a local file into the run's artifacts, optionally under `dest_dir`
    pub fn log_artifact(&mut self, local: &Path, dest_dir: Option<&str>) -> Result<String> {
        self.ensure_running()?;
        let artifact_path = self.store.artifacts().put_file(&self.run_id, local, dest_dir)?;
        self.index_artifact(&artifact_path)?;
        Ok(artifact_path)
    }

    /// Store bytes as an artifact at `artifact_path`
    pub fn log_artifact_bytes(&mut self, artifact_path: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure_running()?;
        let target = self.store.artifacts().put_bytes(&self.run_id, artifact_path, bytes)?;
        self.index_artifact(artifact_path)?;
        Ok(target)
    }

    /// Store a value as pretty JSON
    pub fn log_json<T: Serialize>(&mut self, artifact_path: &str, value: &T) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.log_artifact_bytes(artifact_path, &bytes)
    }

    /// The handle counts as closed only once the database agrees
    fn close(&mut self, status: RunStatus) -> Result<()> {
        match self.store.terminate_run(&self.run_id, status) {
            Ok(()) => {
                self.phase = RunPhase::Closed;
                Ok(())
            }
            Err(e @ MlopsError::RunClosed(_)) => {
                self.phase = RunPhase::Closed;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the run as finished
    pub fn finish(mut self) -> Result<String> {
        self.close(RunStatus::Finished)?;
        Ok(std::mem::take(&mut self.run_id))
    }

    /// Close the run as failed
    pub fn fail(mut self) -> Result<String> {
        self.close(RunStatus::Failed)?;
        Ok(std::mem::take(&mut self.run_id))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.phase == RunPhase::Closed {
            return;
        }
        warn!(run_id = %self.run_id, "Run handle dropped while open, marking run failed");
        if let Err(e) = self.close(RunStatus::Failed) {
            warn!(run_id = %self.run_id, error = %e, "Could not mark run failed");
        }
    }
}
