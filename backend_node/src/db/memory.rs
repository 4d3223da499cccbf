use super::{DbError, DocumentStore, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// In-memory document store used when no external database is configured
/// and in tests.
pub struct MemoryDocumentStore {
    collections: Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<bool> {
        let patch = match patch {
            Value::Object(map) => map,
            other => {
                return Err(DbError::InvalidDocument(format!(
                    "update patch must be an object, got {other}"
                )))
            }
        };
        let mut collections = self.collections.lock().unwrap();
        let Some(doc) = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        else {
            return Ok(false);
        };
        match doc {
            Value::Object(fields) => {
                for (key, value) in patch {
                    fields.insert(key, value);
                }
                Ok(true)
            }
            _ => Err(DbError::InvalidDocument(format!(
                "document {collection}/{id} is not an object"
            ))),
        }
    }

    async fn list(&self, collection: &str, filter: Option<(&str, &Value)>) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let matches = docs
            .values()
            .filter(|doc| match filter {
                Some((field, expected)) => doc.get(field) == Some(expected),
                None => true,
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.lock().unwrap();
        Ok(collections.get(collection).map(|d| d.len()).unwrap_or(0))
    }
}
