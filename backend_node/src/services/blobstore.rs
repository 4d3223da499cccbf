//! In-memory stand-in for the decentralized blob network.
//!
//! Content ids keep the `0x`-prefixed hex shape of real network ids so the
//! rest of the pipeline treats them as opaque references.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
}

/// Canonical URI for a stored blob.
pub fn mesh_uri(cid: &str) -> String {
    format!("mesh://{cid}")
}

struct StoredBlob {
    data: Vec<u8>,
    content_type: Option<String>,
    metadata: Value,
    stored_at: DateTime<Utc>,
}

/// Mock blob storage backing gradient and dataset uploads.
pub struct BlobStore {
    blobs: Mutex<HashMap<String, StoredBlob>>,
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Store a blob and return its content id.
    pub fn upload(&self, data: Vec<u8>, content_type: Option<String>, metadata: Value) -> String {
        let cid = format!("0x{}", Uuid::new_v4().simple());
        let size = data.len();
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(
            cid.clone(),
            StoredBlob {
                data,
                content_type,
                metadata,
                stored_at: Utc::now(),
            },
        );
        log::debug!("stored blob {cid} ({size} bytes)");
        cid
    }

    pub fn download(&self, cid: &str) -> Result<Vec<u8>, BlobError> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(cid)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| BlobError::NotFound(cid.to_string()))
    }

    pub fn info(&self, cid: &str) -> Result<Value, BlobError> {
        let blobs = self.blobs.lock().unwrap();
        let blob = blobs
            .get(cid)
            .ok_or_else(|| BlobError::NotFound(cid.to_string()))?;
        Ok(json!({
            "cid": cid,
            "size": blob.data.len(),
            "contentType": blob.content_type,
            "metadata": blob.metadata,
            "storedAt": blob.stored_at,
        }))
    }

    pub fn exists(&self, cid: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(cid)
    }

    pub fn delete(&self, cid: &str) -> bool {
        self.blobs.lock().unwrap().remove(cid).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
