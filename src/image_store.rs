/// This module implements the content-addressed image store backing region
/// artwork. Uploads are keyed by the SHA-256 of their bytes, so the reference
/// returned to the client is stable, deduplicating, and safe to attach to a
/// purchase later.
use crate::db::Database;
use crate::error::ApiError;
use log::debug;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const IMAGE_PREFIX: &str = "img:";

pub struct ImageStore {
    db: Arc<Database>,
}

impl ImageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stores image bytes and returns their stable reference (hex SHA-256).
    /// Re-uploading identical bytes returns the same reference.
    pub fn put(&self, bytes: &[u8]) -> Result<String, ApiError> {
        let reference = hex::encode(Sha256::digest(bytes));
        let key = format!("{}{}", IMAGE_PREFIX, reference);
        self.db.inner.put(key.as_bytes(), bytes)?;
        debug!("Stored image {} ({} bytes)", reference, bytes.len());
        Ok(reference)
    }

    /// Fetches image bytes by reference.
    pub fn get(&self, reference: &str) -> Result<Vec<u8>, ApiError> {
        let key = format!("{}{}", IMAGE_PREFIX, reference);
        self.db
            .inner
            .get(key.as_bytes())?
            .ok_or(ApiError::NotFound)
    }
}
