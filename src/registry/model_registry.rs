//! Registration, lookup and promotion of model versions

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::info;

use super::artifact::{ModelArtifact, ServedModel, MODEL_FILE};
use super::{ModelVersion, Promotion, Stage, StageTransition};
use crate::error::{MlopsError, Result};
use crate::tracking::TrackingStore;

const VERSION_COLUMNS: &str = "name, version, run_id, source, stage, created_at";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<(String, u32, Option<String>, String, String, i64)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_version(raw: (String, u32, Option<String>, String, String, i64)) -> Result<ModelVersion> {
    let (name, version, run_id, source, stage, created_at) = raw;
    Ok(ModelVersion {
        name,
        version,
        run_id,
        source,
        stage: stage.parse()?,
        created_at,
    })
}

fn model_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM registered_models WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn newest_at_stage(conn: &Connection, name: &str, stage: Stage) -> Result<Option<u32>> {
    Ok(conn
        .query_row(
            "SELECT version FROM model_versions WHERE name = ?1 AND stage = ?2
             ORDER BY version DESC LIMIT 1",
            params![name, stage.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

fn record_transition(conn: &Connection, name: &str, version: u32, from: Stage, to: Stage) -> Result<()> {
    conn.execute(
        "UPDATE model_versions SET stage = ?1 WHERE name = ?2 AND version = ?3",
        params![to.as_str(), name, version],
    )?;
    conn.execute(
        "INSERT INTO stage_transitions (name, version, from_stage, to_stage, at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![name, version, from.as_str(), to.as_str(), now_millis()],
    )?;
    Ok(())
}

/// Registry view over a tracking store
pub struct ModelRegistry<'a> {
    store: &'a TrackingStore,
}

impl<'a> ModelRegistry<'a> {
    pub fn new(store: &'a TrackingStore) -> Self {
        Self { store }
    }

    /// Register a new version of `name` at stage `None`.
    ///
    /// The version number is `max(existing) + 1`, read and written inside one
    /// IMMEDIATE transaction so concurrent registrations for the same name
    /// (from any connection) get distinct numbers.
    pub fn register_model(&self, name: &str, run_id: Option<&str>, source: &str) -> Result<ModelVersion> {
        let version = self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = now_millis();

            tx.execute(
                "INSERT OR IGNORE INTO registered_models (name, created_at) VALUES (?1, ?2)",
                params![name, now],
            )?;
            let next: u32 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM model_versions WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO model_versions (name, version, run_id, source, stage, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![name, next, run_id, source, Stage::None.as_str(), now],
            )?;
            tx.commit()?;

            Ok(ModelVersion {
                name: name.to_string(),
                version: next,
                run_id: run_id.map(str::to_string),
                source: source.to_string(),
                stage: Stage::None,
                created_at: now,
            })
        })?;

        info!(model = %name, version = version.version, "Registered model version");
        Ok(version)
    }

    pub fn get_version(&self, name: &str, version: u32) -> Result<ModelVersion> {
        self.store.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {} FROM model_versions WHERE name = ?1 AND version = ?2", VERSION_COLUMNS),
                    params![name, version],
                    version_from_row,
                )
                .optional()?;
            match raw {
                Some(raw) => into_version(raw),
                None if model_exists(conn, name)? => Err(MlopsError::TrackingError(format!(
                    "model '{}' has no version {}",
                    name, version
                ))),
                None => Err(MlopsError::UnknownModel(name.to_string())),
            }
        })
    }

    /// All versions of a model, ascending
    pub fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        self.store.with_conn(|conn| {
            if !model_exists(conn, name)? {
                return Err(MlopsError::UnknownModel(name.to_string()));
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM model_versions WHERE name = ?1 ORDER BY version",
                VERSION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![name], version_from_row)?;
            let versions = rows
                .map(|raw| into_version(raw?))
                .collect::<Result<Vec<_>>>()?;
            Ok(versions)
        })
    }

    /// Newest version of `name` currently at `stage`
    pub fn latest_version(&self, name: &str, stage: Stage) -> Result<Option<ModelVersion>> {
        self.store.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM model_versions WHERE name = ?1 AND stage = ?2
                         ORDER BY version DESC LIMIT 1",
                        VERSION_COLUMNS
                    ),
                    params![name, stage.as_str()],
                    version_from_row,
                )
                .optional()?;
            raw.map(into_version).transpose()
        })
    }

    /// Move the newest unpromoted version of `name` to `target`.
    ///
    /// Falls back to the newest version already at `target`, which makes
    /// re-promotion a no-op. Every other version holding `target` is archived
    /// in the same transaction.
    pub fn promote(&self, name: &str, target: Stage) -> Result<Promotion> {
        if target == Stage::None {
            return Err(MlopsError::InvalidTransition(
                "cannot promote a version to stage None".to_string(),
            ));
        }

        let promotion = self.store.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            if !model_exists(&tx, name)? {
                return Err(MlopsError::UnknownModel(name.to_string()));
            }

            let (version, from_stage) = match newest_at_stage(&tx, name, Stage::None)? {
                Some(v) => (v, Stage::None),
                None => match newest_at_stage(&tx, name, target)? {
                    Some(v) => (v, target),
                    None => {
                        return Err(MlopsError::NoEligibleVersion {
                            model: name.to_string(),
                            stage: target.to_string(),
                        })
                    }
                },
            };

            let mut archived = Vec::new();
            if target != Stage::Archived {
                let mut stmt = tx.prepare(
                    "SELECT version FROM model_versions WHERE name = ?1 AND stage = ?2 AND version != ?3
                     ORDER BY version",
                )?;
                archived = stmt
                    .query_map(params![name, target.as_str(), version], |row| row.get::<_, u32>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                drop(stmt);

                for &old in &archived {
                    record_transition(&tx, name, old, target, Stage::Archived)?;
                }
            }

            if from_stage != target {
                record_transition(&tx, name, version, from_stage, target)?;
            }

            tx.commit()?;

            Ok(Promotion {
                name: name.to_string(),
                version,
                from_stage,
                to_stage: target,
                archived,
            })
        })?;

        info!(
            model = %name,
            version = promotion.version,
            from = %promotion.from_stage,
            to = %promotion.to_stage,
            archived = ?promotion.archived,
            "Promotion applied"
        );
        Ok(promotion)
    }

    /// Stage history of a model, oldest first
    pub fn transitions(&self, name: &str) -> Result<Vec<StageTransition>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, version, from_stage, to_stage, at FROM stage_transitions
                 WHERE name = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;

            let transitions = rows
                .map(|row| -> Result<StageTransition> {
                    let (name, version, from, to, at) = row?;
                    Ok(StageTransition {
                        name,
                        version,
                        from_stage: from.parse()?,
                        to_stage: to.parse()?,
                        at,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(transitions)
        })
    }

    /// Load the newest version of `name` at `stage` for serving
    pub fn load_served_model(&self, name: &str, stage: Stage) -> Result<ServedModel> {
        let version = self
            .latest_version(name, stage)?
            .ok_or_else(|| MlopsError::ModelUnavailable {
                model: name.to_string(),
                stage: stage.to_string(),
            })?;

        let artifact = ModelArtifact::load(&Path::new(&version.source).join(MODEL_FILE))?;
        info!(
            model = %name,
            version = version.version,
            stage = %stage,
            features = artifact.feature_names.len(),
            "Loaded model for serving"
        );
        Ok(ServedModel::new(version, artifact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;

    fn open(dir: &Path) -> TrackingStore {
        TrackingStore::open(&TrackingConfig::in_dir(dir)).unwrap()
    }

    #[test]
    fn test_versions_increment_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let registry = ModelRegistry::new(&store);

        assert_eq!(registry.register_model("a", None, "/m/1").unwrap().version, 1);
        assert_eq!(registry.register_model("a", None, "/m/2").unwrap().version, 2);
        assert_eq!(registry.register_model("b", Some("run"), "/m/3").unwrap().version, 1);

        let versions = registry.list_versions("a").unwrap();
        assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2]);
        assert!(versions.iter().all(|v| v.stage == Stage::None));
        assert_eq!(registry.get_version("b", 1).unwrap().run_id.as_deref(), Some("run"));
    }

    #[test]
    fn test_promote_newest_unpromoted_and_archive_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let registry = ModelRegistry::new(&store);

        registry.register_model("m", None, "/m/1").unwrap();
        registry.register_model("m", None, "/m/2").unwrap();

        let first = registry.promote("m", Stage::Staging).unwrap();
        assert_eq!((first.version, first.from_stage), (2, Stage::None));
        assert!(first.archived.is_empty());

        // version 1 is now the newest None-stage version
        let second = registry.promote("m", Stage::Staging).unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.archived, vec![2]);

        assert_eq!(registry.get_version("m", 2).unwrap().stage, Stage::Archived);
        assert_eq!(registry.latest_version("m", Stage::Staging).unwrap().unwrap().version, 1);
        assert_eq!(registry.transitions("m").unwrap().len(), 3);
    }

    #[test]
    fn test_repromotion_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let registry = ModelRegistry::new(&store);

        registry.register_model("m", None, "/m/1").unwrap();
        registry.promote("m", Stage::Production).unwrap();
        let again = registry.promote("m", Stage::Production).unwrap();

        assert!(again.is_noop());
        assert_eq!(again.version, 1);
        assert_eq!(registry.transitions("m").unwrap().len(), 1);
    }

    #[test]
    fn test_promote_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let registry = ModelRegistry::new(&store);

        assert!(matches!(
            registry.promote("ghost", Stage::Staging),
            Err(MlopsError::UnknownModel(_))
        ));

        registry.register_model("m", None, "/m/1").unwrap();
        registry.promote("m", Stage::Staging).unwrap();
        assert!(matches!(
            registry.promote("m", Stage::Production),
            Err(MlopsError::NoEligibleVersion { .. })
        ));
        assert!(matches!(
            registry.promote("m", Stage::None),
            Err(MlopsError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_load_served_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path());
        let registry = ModelRegistry::new(&store);

        assert!(matches!(
            registry.load_served_model("m", Stage::Production),
            Err(MlopsError::ModelUnavailable { .. })
        ));
    }
}
