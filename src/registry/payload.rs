//! # Codec de Payloads
//! src/registry/payload.rs
//!
//! `ModelState` → JSON → gzip. El blob se direcciona por el SHA256 de los
//! bytes comprimidos y el digest se verifica en cada lectura.

use crate::error::{JobError, Result};
use crate::models::ModelState;
use crate::registry::record::PayloadRef;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Serializa y comprime el estado del modelo
pub fn encode(state: &ModelState) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(state)
        .map_err(|e| JobError::Internal(format!("failed to serialize model: {}", e)))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| JobError::Internal(format!("failed to compress model: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| JobError::Internal(format!("failed to compress model: {}", e)))
}

/// SHA256 en hexadecimal
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Verifica el digest, descomprime y deserializa
pub fn decode(bytes: &[u8], expected: &PayloadRef) -> Result<ModelState> {
    let actual = digest(bytes);
    if actual != expected.digest {
        return Err(JobError::Internal(format!(
            "payload digest mismatch: expected {}, got {}",
            expected.digest, actual
        )));
    }

    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(|e| JobError::Internal(format!("corrupted payload: {}", e)))?;

    serde_json::from_slice(&json)
        .map_err(|e| JobError::Internal(format!("corrupted payload: {}", e)))
}
