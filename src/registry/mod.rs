//! # Registro de Artefactos
//!
//! Store durable de modelos con nombre y versión. Cada artefacto es un
//! registro de metadatos en el índice más un payload comprimido e
//! inmutable; reemplazar el payload es escribir un blob nuevo y luego
//! mover la referencia en el índice.
//!
//! Las operaciones que escriben (create, update, delete) sobre un mismo
//! nombre se serializan con un lock por nombre. Nombres distintos nunca se
//! bloquean entre sí.

pub mod locks;
pub mod payload;
pub mod record;
pub mod store;

pub use record::{ArtifactRecord, ArtifactSummary, Listing, PayloadRef};

use crate::error::{JobError, Result};
use crate::models::{Model, ModelKind, ModelState};
use chrono::Utc;
use locks::KeyLocks;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use store::ArtifactStore;
use tracing::{debug, info};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.\-]{0,127}$").expect("artifact name pattern is valid")
    })
}

/// Valida un nombre o una versión de artefacto
fn validate_label(what: &str, value: &str) -> Result<()> {
    if name_pattern().is_match(value) {
        Ok(())
    } else {
        Err(JobError::InvalidArgument(format!("invalid {} '{}'", what, value)))
    }
}

/// Resultado de un update o delete: aplicado ahora, o ya aplicado antes por la misma tarea
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T> {
    Fresh(T),
    Replayed,
}

/// Estado de trabajo que recibe el mutator de `update`
pub struct Revision {
    state: ModelState,
    scores: BTreeMap<String, f64>,
    payload_changed: bool,
}

impl Revision {
    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Acceso mutable al modelo; el payload se reescribe al confirmar
    pub fn state_mut(&mut self) -> &mut ModelState {
        self.payload_changed = true;
        &mut self.state
    }

    pub fn set_score(&mut self, metric: &str, score: f64) {
        self.scores.insert(metric.to_string(), score);
    }
}

/// Registro de artefactos. Clonar es barato y comparte el mismo store.
#[derive(Clone)]
pub struct Registry {
    store: Arc<ArtifactStore>,
    locks: Arc<KeyLocks>,
}

impl Registry {
    fn with_store(store: ArtifactStore) -> Self {
        Self {
            store: Arc::new(store),
            locks: Arc::new(KeyLocks::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_store(ArtifactStore::in_memory())
    }

    /// Abre el registro persistido bajo `root`
    pub fn open(root: &Path) -> Result<Self> {
        let store = ArtifactStore::open(root)?;
        info!(root = %root.display(), artifacts = store.count(), "Artifact registry opened");
        Ok(Self::with_store(store))
    }

    /// Clases de modelo soportadas
    pub fn supported_kinds(&self) -> Vec<&'static str> {
        ModelKind::names()
    }

    /// Crea un artefacto sin entrenar.
    ///
    /// Sin `name` se asigna un nombre sintético. `origin` es la tarea que lo
    /// pide: si esa tarea ya creó un artefacto, se devuelve el existente en
    /// lugar de crear otro.
    pub fn create(
        &self,
        name: Option<&str>,
        version: Option<&str>,
        kind: ModelKind,
        params: &Value,
        origin: Option<&str>,
    ) -> Result<ArtifactRecord> {
        if let Some(existing) = origin.and_then(|task| self.store.find_by_origin(task)) {
            debug!(name = %existing.name, task_id = ?origin, "Create replayed");
            return Ok(existing);
        }

        if let Some(version) = version {
            validate_label("version", version)?;
        }
        if let Some(name) = name {
            validate_label("name", name)?;
        }

        // Los params se validan antes de consumir un nombre sintético
        let model = Model::new(kind, params)?;
        let bytes = payload::encode(&ModelState::new(model))?;

        let name = match name {
            Some(name) => name.to_string(),
            None => self.store.allocate_name()?,
        };

        self.locks.with_lock(&name, || {
            if let Some(existing) = self.store.find_exact(&name, version) {
                if origin.is_some() && existing.origin_task.as_deref() == origin {
                    return Ok(existing);
                }
                return Err(JobError::DuplicateName {
                    name: name.clone(),
                    version: version.map(str::to_string),
                });
            }

            let now = Utc::now();
            let record = self.store.insert(bytes, |seq, payload| ArtifactRecord {
                name: name.clone(),
                version: version.map(str::to_string),
                kind,
                trained: false,
                payload,
                scores: BTreeMap::new(),
                revision: 0,
                seq,
                origin_task: origin.map(str::to_string),
                applied_tasks: Default::default(),
                created_at: now,
                updated_at: now,
            })?;

            info!(name = %record.label(), kind = %kind, "Artifact created");
            Ok(record)
        })
    }

    /// Con versión: esa versión exacta. Sin versión: la más reciente.
    pub fn get(&self, name: &str, version: Option<&str>) -> Result<ArtifactRecord> {
        self.store
            .resolve(name, version)
            .ok_or_else(|| JobError::not_found(name, version))
    }

    /// Lee y verifica el payload de un registro
    pub fn load(&self, record: &ArtifactRecord) -> Result<ModelState> {
        let bytes = self.store.get_blob(&record.payload)?;
        payload::decode(&bytes, &record.payload)
    }

    /// Read-modify-write con el lock del nombre tomado.
    ///
    /// El mutator recibe el registro actual y un `Revision` sobre el que
    /// trabaja; si devuelve error no se escribe nada. Al confirmar, el
    /// registro queda `trained`, con `revision` incrementada y `task` en
    /// `applied_tasks`. Si `task` ya figura ahí (aunque otros updates hayan
    /// llegado después), no se vuelve a aplicar y se devuelve
    /// `Applied::Replayed`.
    pub fn update<T>(
        &self,
        name: &str,
        version: Option<&str>,
        task: Option<&str>,
        mutator: impl FnOnce(&ArtifactRecord, &mut Revision) -> Result<T>,
    ) -> Result<(ArtifactRecord, Applied<T>)> {
        self.locks.with_lock(name, || {
            let current = self.get(name, version)?;
            if task.is_some_and(|task| current.has_applied(task)) {
                debug!(name = %current.label(), task_id = ?task, "Update replayed");
                return Ok((current, Applied::Replayed));
            }

            let mut revision = Revision {
                state: self.load(&current)?,
                scores: current.scores.clone(),
                payload_changed: false,
            };
            let value = mutator(&current, &mut revision)?;

            let bytes = if revision.payload_changed {
                Some(payload::encode(&revision.state)?)
            } else {
                None
            };

            let mut next = current.clone();
            next.trained = true;
            next.scores = revision.scores;
            next.revision += 1;
            if let Some(task) = task {
                next.record_applied(task);
            }
            next.updated_at = Utc::now();

            let next = self.store.replace(next, bytes)?;
            info!(name = %next.label(), revision = next.revision, "Artifact updated");
            Ok((next, Applied::Fresh(value)))
        })
    }

    /// Borra una versión, o todas las del nombre si `version` es None.
    ///
    /// Si `task` ya aplicó un delete, no se borra nada más y se devuelve
    /// `Applied::Replayed`, aunque el nombre se haya vuelto a crear.
    pub fn delete(
        &self,
        name: &str,
        version: Option<&str>,
        task: Option<&str>,
    ) -> Result<Applied<Vec<ArtifactRecord>>> {
        self.locks.with_lock(name, || {
            if task.is_some_and(|task| self.store.was_deleted_by(task)) {
                debug!(name = %name, task_id = ?task, "Delete replayed");
                return Ok(Applied::Replayed);
            }

            let removed = self.store.remove(name, version, task)?;
            if removed.is_empty() {
                return Err(JobError::not_found(name, version));
            }
            info!(name = %name, version = ?version, removed = removed.len(), "Artifact deleted");
            Ok(Applied::Fresh(removed))
        })
    }

    /// Foto de todos los artefactos en orden de creación
    pub fn list(&self) -> Listing {
        Listing::new(self.store.records().iter().map(ArtifactRecord::summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frame;
    use serde_json::json;
    use std::thread;

    fn fit_linear(revision: &mut Revision, data: Value) -> Result<()> {
        let (features, y) = Frame::from_json(&data)?.split_target("target")?;
        revision.state_mut().fit(&features, &y)
    }

    #[test]
    fn test_create_then_get_is_untrained() {
        let registry = Registry::in_memory();
        for (i, kind) in ModelKind::ALL.into_iter().enumerate() {
            let name = format!("m{}", i);
            registry.create(Some(&name), None, kind, &json!({}), None).unwrap();

            let record = registry.get(&name, None).unwrap();
            assert!(!record.trained);
            assert_eq!(record.kind, kind);
            assert_eq!(registry.load(&record).unwrap().model.kind(), kind);
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();
        let err = registry
            .create(Some("m1"), None, ModelKind::LogisticRegression, &Value::Null, None)
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateName { .. }));

        // La versión hace la clave distinta
        registry
            .create(Some("m1"), Some("v2"), ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();
        assert_eq!(registry.get("m1", None).unwrap().version.as_deref(), Some("v2"));
    }

    #[test]
    fn test_synthetic_names() {
        let registry = Registry::in_memory();
        let a = registry.create(None, None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        let b = registry.create(None, None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        assert_eq!(a.name, "0");
        assert_eq!(b.name, "1");
    }

    #[test]
    fn test_invalid_params_keep_synthetic_counter() {
        let registry = Registry::in_memory();
        let err = registry
            .create(None, None, ModelKind::LogisticRegression, &json!({"c": -1.0}), None)
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidArgument(_)));

        let record = registry.create(None, None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        assert_eq!(record.name, "0");
    }

    #[test]
    fn test_invalid_name_rejected() {
        let registry = Registry::in_memory();
        for bad in ["", " lead", "a/b", "../etc"] {
            let err = registry
                .create(Some(bad), None, ModelKind::LinearRegression, &Value::Null, None)
                .unwrap_err();
            assert!(matches!(err, JobError::InvalidArgument(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_create_replays_by_origin() {
        let registry = Registry::in_memory();
        let first = registry
            .create(None, None, ModelKind::LinearRegression, &Value::Null, Some("task-1"))
            .unwrap();
        let again = registry
            .create(None, None, ModelKind::LinearRegression, &Value::Null, Some("task-1"))
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_update_trains_and_bumps_revision() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        let (record, applied) = registry
            .update("m1", None, Some("t1"), |_, rev| {
                fit_linear(rev, json!({"x": [1, 2, 3], "target": [2, 4, 6]}))
            })
            .unwrap();
        assert_eq!(applied, Applied::Fresh(()));
        assert!(record.trained);
        assert_eq!(record.revision, 1);

        let state = registry.load(&record).unwrap();
        let pred = state.predict(&Frame::from_json(&json!({"x": [4]})).unwrap()).unwrap();
        assert!((pred[0] - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_update_replay_is_noop() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        let mut calls = 0;
        for _ in 0..2 {
            registry
                .update("m1", None, Some("t1"), |_, rev| {
                    calls += 1;
                    fit_linear(rev, json!({"x": [1, 2], "target": [1, 2]}))
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        assert_eq!(registry.get("m1", None).unwrap().revision, 1);
    }

    #[test]
    fn test_replay_after_later_update_is_noop() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        registry
            .update("m1", None, Some("t1"), |_, rev| {
                fit_linear(rev, json!({"x": [1, 2, 3], "target": [2, 4, 6]}))
            })
            .unwrap();
        registry
            .update("m1", None, Some("t2"), |_, rev| {
                fit_linear(rev, json!({"x": [1, 2, 3], "target": [5, 10, 15]}))
            })
            .unwrap();

        // t1 vuelve a llegar después de t2: no pisa el modelo de t2
        let (record, applied) = registry
            .update("m1", None, Some("t1"), |_, rev| {
                fit_linear(rev, json!({"x": [1, 2, 3], "target": [2, 4, 6]}))
            })
            .unwrap();
        assert_eq!(applied, Applied::Replayed);
        assert_eq!(record.revision, 2);

        let state = registry.load(&record).unwrap();
        let pred = state.predict(&Frame::from_json(&json!({"x": [1]})).unwrap()).unwrap();
        assert!((pred[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_applied_tasks_are_bounded() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        for i in 0..record::APPLIED_TASKS_LIMIT + 5 {
            let task = format!("t{}", i);
            registry.update("m1", None, Some(&task), |_, _| Ok(())).unwrap();
        }

        let record = registry.get("m1", None).unwrap();
        assert_eq!(record.applied_tasks.len(), record::APPLIED_TASKS_LIMIT);
        assert!(!record.has_applied("t0"));
        assert!(record.has_applied(&format!("t{}", record::APPLIED_TASKS_LIMIT + 4)));
    }

    #[test]
    fn test_failed_mutator_writes_nothing() {
        let registry = Registry::in_memory();
        let before = registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        let err = registry
            .update("m1", None, None, |_, rev| fit_linear(rev, json!({"x": [1, 2]})))
            .unwrap_err();
        assert!(matches!(err, JobError::MissingTargetColumn(_)));
        assert_eq!(registry.get("m1", None).unwrap(), before);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let registry = Registry::in_memory();
        let err = registry.update("ghost", None, None, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, JobError::NotFound { .. }));
    }

    #[test]
    fn test_delete_semantics() {
        let registry = Registry::in_memory();
        registry.create(Some("m1"), Some("a"), ModelKind::LinearRegression, &Value::Null, None).unwrap();
        registry.create(Some("m1"), Some("b"), ModelKind::LinearRegression, &Value::Null, None).unwrap();

        let Applied::Fresh(removed) = registry.delete("m1", Some("a"), None).unwrap() else {
            panic!("delete was not applied");
        };
        assert_eq!(removed.len(), 1);
        assert!(registry.get("m1", Some("a")).is_err());
        assert!(registry.get("m1", Some("b")).is_ok());

        let Applied::Fresh(removed) = registry.delete("m1", None, None).unwrap() else {
            panic!("delete was not applied");
        };
        assert_eq!(removed.len(), 1);
        assert!(matches!(
            registry.delete("m1", None, None).unwrap_err(),
            JobError::NotFound { .. }
        ));
    }

    #[test]
    fn test_delete_replay_is_noop() {
        let registry = Registry::in_memory();
        registry.create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None).unwrap();

        assert!(matches!(
            registry.delete("m1", None, Some("d1")).unwrap(),
            Applied::Fresh(_)
        ));
        assert_eq!(registry.delete("m1", None, Some("d1")).unwrap(), Applied::Replayed);

        // Vuelto a crear, una reentrega del mismo delete no lo borra
        registry.create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        assert_eq!(registry.delete("m1", None, Some("d1")).unwrap(), Applied::Replayed);
        assert!(registry.get("m1", None).is_ok());

        // Otra tarea sí lo borra
        assert!(matches!(
            registry.delete("m1", None, Some("d2")).unwrap(),
            Applied::Fresh(_)
        ));
    }

    #[test]
    fn test_listing_is_a_snapshot() {
        let registry = Registry::in_memory();
        registry.create(Some("a"), None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        let listing = registry.list();

        registry.create(Some("b"), None, ModelKind::LinearRegression, &Value::Null, None).unwrap();

        // Recorrer dos veces da lo mismo y no ve el alta posterior
        let first: Vec<_> = listing.iter().map(|s| s.name.clone()).collect();
        let second: Vec<_> = listing.iter().map(|s| s.name.clone()).collect();
        assert_eq!(first, vec!["a".to_string()]);
        assert_eq!(first, second);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_concurrent_train_keeps_a_valid_payload() {
        let registry = Registry::in_memory();
        registry
            .create(Some("m1"), None, ModelKind::LinearRegression, &Value::Null, None)
            .unwrap();

        let handles: Vec<_> = [2.0, 3.0]
            .into_iter()
            .map(|slope| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let data = json!({"x": [1.0, 2.0, 3.0], "target": [slope, slope * 2.0, slope * 3.0]});
                    registry.update("m1", None, None, |_, rev| fit_linear(rev, data)).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let record = registry.get("m1", None).unwrap();
        assert_eq!(record.revision, 2);
        let state = registry.load(&record).unwrap();
        let pred = state.predict(&Frame::from_json(&json!({"x": [1]})).unwrap()).unwrap();
        // Exactamente uno de los dos ajustes, nunca una mezcla
        assert!((pred[0] - 2.0).abs() < 1e-6 || (pred[0] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_reopen_preserves_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Registry::open(dir.path()).unwrap();
            registry.create(None, None, ModelKind::LogisticRegression, &json!({"c": 0.5}), None).unwrap();
            registry
                .update("0", None, None, |_, rev| {
                    let (features, y) = Frame::from_json(&json!({"x": [0, 1, 2, 3], "target": [0, 0, 1, 1]}))?
                        .split_target("target")?;
                    rev.state_mut().fit(&features, &y)
                })
                .unwrap();
        }

        let registry = Registry::open(dir.path()).unwrap();
        let record = registry.get("0", None).unwrap();
        assert!(record.trained);
        assert!(registry.load(&record).is_ok());

        // El contador de nombres continúa tras el reinicio
        let next = registry.create(None, None, ModelKind::LinearRegression, &Value::Null, None).unwrap();
        assert_eq!(next.name, "1");
    }
}
