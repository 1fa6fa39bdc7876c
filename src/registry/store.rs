//! # Persistencia del Registro
//! src/registry/store.rs
//!
//! Índice JSON con los metadatos de todos los artefactos más un directorio
//! de blobs direccionados por contenido:
//!
//! ```text
//! <root>/index.json
//! <root>/blobs/<sha256>.gz
//! ```
//!
//! Toda escritura va a un archivo temporal que luego se renombra (atómico en
//! Unix). El blob se escribe antes que el índice, así que la escritura del
//! índice es el punto de commit. Sin `root` todo vive en memoria.

use crate::error::{JobError, Result};
use crate::{lock, write_atomic};
use crate::registry::payload;
use crate::registry::record::{ArtifactRecord, PayloadRef};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Contenido de `index.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Index {
    /// Siguiente nombre sintético
    next_id: u64,

    /// Siguiente número de orden de creación
    next_seq: u64,

    records: Vec<ArtifactRecord>,

    /// Tareas delete ya aplicadas, de la más vieja a la más nueva
    #[serde(default)]
    deleted_by: VecDeque<String>,
}

/// Deletes recordados para reconocer reentregas
pub const DELETE_TOMBSTONES_LIMIT: usize = 256;

enum Blobs {
    Memory(Mutex<HashMap<String, Vec<u8>>>),
    Disk(PathBuf),
}

/// Store de metadatos y payloads
pub struct ArtifactStore {
    index: Mutex<Index>,
    index_path: Option<PathBuf>,
    blobs: Blobs,
}

impl ArtifactStore {
    /// Store sin persistencia
    pub fn in_memory() -> Self {
        Self {
            index: Mutex::new(Index::default()),
            index_path: None,
            blobs: Blobs::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Abre (o crea) un store en disco
    pub fn open(root: &Path) -> Result<Self> {
        let blob_dir = root.join("blobs");
        fs::create_dir_all(&blob_dir)?;

        let index_path = root.join("index.json");
        let index = if index_path.exists() {
            let reader = BufReader::new(File::open(&index_path)?);
            // Un índice corrupto no se descarta: los artefactos no se regeneran
            serde_json::from_reader(reader).map_err(|e| {
                JobError::Storage(format!("corrupted registry index {}: {}", index_path.display(), e))
            })?
        } else {
            Index::default()
        };

        Ok(Self {
            index: Mutex::new(index),
            index_path: Some(index_path),
            blobs: Blobs::Disk(blob_dir),
        })
    }

    fn persist(&self, index: &Index) -> Result<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(index)
            .map_err(|e| JobError::Internal(format!("failed to serialize index: {}", e)))?;
        write_atomic(path, &bytes)?;
        Ok(())
    }

    /// Aplica `f` al índice y lo persiste; si la escritura falla, el índice
    /// en memoria vuelve a su estado anterior.
    fn commit<T>(&self, f: impl FnOnce(&mut Index) -> Result<T>) -> Result<T> {
        let mut index = lock(&self.index);
        let snapshot = index.clone();

        let value = f(&mut index)?;
        if let Err(e) = self.persist(&index) {
            *index = snapshot;
            return Err(e);
        }
        Ok(value)
    }

    // ==================== Índice ====================

    /// Coincidencia exacta de `(name, version)`
    pub fn find_exact(&self, name: &str, version: Option<&str>) -> Option<ArtifactRecord> {
        lock(&self.index)
            .records
            .iter()
            .find(|r| r.is_key(name, version))
            .cloned()
    }

    /// Con versión: coincidencia exacta. Sin versión: el registro más
    /// reciente con ese nombre.
    pub fn resolve(&self, name: &str, version: Option<&str>) -> Option<ArtifactRecord> {
        if version.is_some() {
            return self.find_exact(name, version);
        }
        lock(&self.index)
            .records
            .iter()
            .filter(|r| r.name == name)
            .max_by_key(|r| r.seq)
            .cloned()
    }

    pub fn find_by_origin(&self, task_id: &str) -> Option<ArtifactRecord> {
        lock(&self.index)
            .records
            .iter()
            .find(|r| r.origin_task.as_deref() == Some(task_id))
            .cloned()
    }

    /// Reserva un nombre sintético libre e incrementa el contador persistido
    pub fn allocate_name(&self) -> Result<String> {
        self.commit(|index| loop {
            let candidate = index.next_id.to_string();
            index.next_id += 1;
            if !index.records.iter().any(|r| r.name == candidate) {
                return Ok(candidate);
            }
        })
    }

    /// Inserta un registro nuevo. El blob se escribe primero; `build` recibe
    /// el número de orden asignado y la referencia al blob.
    pub fn insert(
        &self,
        bytes: Vec<u8>,
        build: impl FnOnce(u64, PayloadRef) -> ArtifactRecord,
    ) -> Result<ArtifactRecord> {
        let mut index = lock(&self.index);
        let reference = self.put_blob(bytes)?;
        let record = build(index.next_seq, reference);

        if index
            .records
            .iter()
            .any(|r| r.is_key(&record.name, record.version.as_deref()))
        {
            self.release_blob(&index, &record.payload.digest);
            return Err(JobError::DuplicateName {
                name: record.name,
                version: record.version,
            });
        }

        let snapshot = index.clone();
        index.next_seq += 1;
        index.records.push(record.clone());

        if let Err(e) = self.persist(&index) {
            *index = snapshot;
            self.release_blob(&index, &record.payload.digest);
            return Err(e);
        }
        Ok(record)
    }

    /// Reemplaza el registro con la misma clave. Con `bytes`, el payload
    /// nuevo se escribe antes del índice y el anterior se libera si ya nadie
    /// lo referencia.
    pub fn replace(&self, mut record: ArtifactRecord, bytes: Option<Vec<u8>>) -> Result<ArtifactRecord> {
        let mut index = lock(&self.index);
        let position = index
            .records
            .iter()
            .position(|r| r.is_key(&record.name, record.version.as_deref()))
            .ok_or_else(|| JobError::not_found(&record.name, record.version.as_deref()))?;

        if let Some(bytes) = bytes {
            record.payload = self.put_blob(bytes)?;
        }

        let previous = std::mem::replace(&mut index.records[position], record.clone());
        if let Err(e) = self.persist(&index) {
            index.records[position] = previous;
            if record.payload.digest != index.records[position].payload.digest {
                self.release_blob(&index, &record.payload.digest);
            }
            return Err(e);
        }

        if previous.payload.digest != record.payload.digest {
            self.release_blob(&index, &previous.payload.digest);
        }
        Ok(record)
    }

    /// Borra una versión, o todas si `version` es None. Si algo se borró,
    /// `task` queda registrada en el mismo commit.
    pub fn remove(
        &self,
        name: &str,
        version: Option<&str>,
        task: Option<&str>,
    ) -> Result<Vec<ArtifactRecord>> {
        let mut index = lock(&self.index);
        let snapshot = index.clone();

        let (removed, kept): (Vec<_>, Vec<_>) = index
            .records
            .drain(..)
            .partition(|r| r.name == name && (version.is_none() || r.version.as_deref() == version));
        index.records = kept;

        if removed.is_empty() {
            return Ok(removed);
        }
        if let Some(task) = task {
            if index.deleted_by.len() >= DELETE_TOMBSTONES_LIMIT {
                index.deleted_by.pop_front();
            }
            index.deleted_by.push_back(task.to_string());
        }
        if let Err(e) = self.persist(&index) {
            *index = snapshot;
            return Err(e);
        }

        for record in &removed {
            self.release_blob(&index, &record.payload.digest);
        }
        Ok(removed)
    }

    /// Si `task_id` ya aplicó un delete
    pub fn was_deleted_by(&self, task_id: &str) -> bool {
        lock(&self.index).deleted_by.iter().any(|t| t == task_id)
    }

    /// Copia de todos los registros en orden de creación
    pub fn records(&self) -> Vec<ArtifactRecord> {
        let mut records = lock(&self.index).records.clone();
        records.sort_by_key(|r| r.seq);
        records
    }

    pub fn count(&self) -> usize {
        lock(&self.index).records.len()
    }

    pub fn is_referenced(&self, digest: &str) -> bool {
        lock(&self.index)
            .records
            .iter()
            .any(|r| r.payload.digest == digest)
    }

    // ==================== Blobs ====================

    fn put_blob(&self, bytes: Vec<u8>) -> Result<PayloadRef> {
        let reference = PayloadRef {
            digest: payload::digest(&bytes),
            size: bytes.len() as u64,
        };

        match &self.blobs {
            Blobs::Memory(map) => {
                lock(map).insert(reference.digest.clone(), bytes);
            }
            Blobs::Disk(dir) => {
                let path = dir.join(format!("{}.gz", reference.digest));
                if !path.exists() {
                    write_atomic(&path, &bytes)?;
                }
            }
        }

        Ok(reference)
    }

    pub fn get_blob(&self, reference: &PayloadRef) -> Result<Vec<u8>> {
        let missing = || JobError::Internal(format!("payload {} is missing", reference.digest));
        match &self.blobs {
            Blobs::Memory(map) => lock(map).get(&reference.digest).cloned().ok_or_else(missing),
            Blobs::Disk(dir) => {
                let path = dir.join(format!("{}.gz", reference.digest));
                match fs::read(&path) {
                    Ok(bytes) => Ok(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(missing()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn remove_blob(&self, digest: &str) -> Result<()> {
        match &self.blobs {
            Blobs::Memory(map) => {
                lock(map).remove(digest);
            }
            Blobs::Disk(dir) => {
                let path = dir.join(format!("{}.gz", digest));
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Borra el blob si ningún registro de `index` lo referencia. Un blob
    /// huérfano no rompe nada, así que un fallo aquí solo se registra.
    fn release_blob(&self, index: &Index, digest: &str) {
        if index.records.iter().any(|r| r.payload.digest == digest) {
            return;
        }
        if let Err(e) = self.remove_blob(digest) {
            warn!(digest = %digest, error = %e, "failed to remove unreferenced payload");
        }
    }

    pub fn blob_count(&self) -> Result<usize> {
        match &self.blobs {
            Blobs::Memory(map) => Ok(lock(map).len()),
            Blobs::Disk(dir) => Ok(fs::read_dir(dir)?
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "gz"))
                .count()),
        }
    }
}
