//! Typed CRUD wrappers over the document store, one group per collection.

use super::{collections, DbError, DocumentStore, Result};
use crate::db::records::{
    Contributor, Dataset, GradientSubmission, ModelInfo, SessionStatus, TrainingSession,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Collection-level access to platform records.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn DocumentStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // --- training sessions ---

    pub async fn create_training_session(&self, session: &TrainingSession) -> Result<String> {
        let doc = serde_json::to_value(session)?;
        self.store
            .insert(collections::TRAINING_SESSIONS, &session.id, doc)
            .await?;
        Ok(session.id.clone())
    }

    pub async fn get_training_session(&self, session_id: &str) -> Result<Option<Value>> {
        self.store.get(collections::TRAINING_SESSIONS, session_id).await
    }

    pub async fn session_status(&self, session_id: &str) -> Result<Option<SessionStatus>> {
        let Some(doc) = self.get_training_session(session_id).await? else {
            return Ok(None);
        };
        let status = doc
            .get("status")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?;
        Ok(status)
    }

    /// Shallow-merge fields into a session document. Moving to a terminal
    /// status stamps `end_time`.
    pub async fn update_training_session(&self, session_id: &str, mut patch: Value) -> Result<bool> {
        if let Some(status) = patch.get("status") {
            let status: SessionStatus = serde_json::from_value(status.clone())?;
            if status.is_terminal() {
                if let Some(fields) = patch.as_object_mut() {
                    fields
                        .entry("end_time")
                        .or_insert_with(|| json!(Utc::now()));
                }
            }
        }
        self.store
            .update(collections::TRAINING_SESSIONS, session_id, patch)
            .await
    }

    pub async fn list_training_sessions(&self, model_id: Option<&str>) -> Result<Vec<Value>> {
        match model_id {
            Some(model_id) => {
                let filter_value = json!(model_id);
                self.store
                    .list(
                        collections::TRAINING_SESSIONS,
                        Some(("model_id", &filter_value)),
                    )
                    .await
            }
            None => self.store.list(collections::TRAINING_SESSIONS, None).await,
        }
    }

    // --- models ---

    pub async fn create_model(&self, model: &ModelInfo) -> Result<String> {
        let doc = serde_json::to_value(model)?;
        self.store.insert(collections::MODELS, &model.id, doc).await?;
        Ok(model.id.clone())
    }

    pub async fn get_model(&self, model_id: &str) -> Result<Option<Value>> {
        self.store.get(collections::MODELS, model_id).await
    }

    pub async fn update_model(&self, model_id: &str, mut patch: Value) -> Result<bool> {
        if let Some(fields) = patch.as_object_mut() {
            fields.insert("updated_at".to_string(), json!(Utc::now()));
        }
        self.store.update(collections::MODELS, model_id, patch).await
    }

    pub async fn list_models(&self) -> Result<Vec<Value>> {
        self.store.list(collections::MODELS, None).await
    }

    // --- gradients ---

    pub async fn submit_gradient(&self, submission: &GradientSubmission) -> Result<String> {
        let doc = serde_json::to_value(submission)?;
        self.store
            .insert(collections::GRADIENTS, &submission.id, doc)
            .await?;
        Ok(submission.id.clone())
    }

    pub async fn get_gradients(&self, model_id: &str) -> Result<Vec<Value>> {
        let filter_value = json!(model_id);
        self.store
            .list(collections::GRADIENTS, Some(("model_id", &filter_value)))
            .await
    }

    pub async fn get_gradient(&self, gradient_id: &str) -> Result<Option<Value>> {
        self.store.get(collections::GRADIENTS, gradient_id).await
    }

    // --- contributors ---

    pub async fn create_contributor(&self, contributor: &Contributor) -> Result<String> {
        let doc = serde_json::to_value(contributor)?;
        self.store
            .insert(collections::CONTRIBUTORS, &contributor.id, doc)
            .await?;
        Ok(contributor.id.clone())
    }

    pub async fn get_contributor(&self, contributor_id: &str) -> Result<Option<Value>> {
        self.store.get(collections::CONTRIBUTORS, contributor_id).await
    }

    /// Bump a contributor's reputation and contribution count, creating the
    /// record on first contribution.
    pub async fn update_contributor_reputation(
        &self,
        contributor_id: &str,
        score_delta: f64,
    ) -> Result<bool> {
        let existing = self.get_contributor(contributor_id).await?;
        let mut contributor: Contributor = match existing {
            Some(doc) => serde_json::from_value(doc)?,
            None => {
                let contributor = Contributor::new(
                    contributor_id.to_string(),
                    format!("0x{}", &contributor_id.replace('-', "")),
                );
                self.create_contributor(&contributor).await?;
                contributor
            }
        };
        contributor.reputation_score += score_delta;
        contributor.total_contributions += 1;
        if score_delta > 0.0 {
            contributor.successful_contributions += 1;
        }
        let now = Utc::now();
        contributor.last_contribution = now;
        contributor.updated_at = now;
        self.store
            .update(
                collections::CONTRIBUTORS,
                contributor_id,
                serde_json::to_value(&contributor)?,
            )
            .await
    }

    // --- datasets ---

    pub async fn create_dataset(&self, dataset: &Dataset) -> Result<String> {
        let doc = serde_json::to_value(dataset)?;
        self.store
            .insert(collections::DATASETS, &dataset.id, doc)
            .await?;
        Ok(dataset.id.clone())
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Option<Value>> {
        self.store.get(collections::DATASETS, dataset_id).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<Value>> {
        self.store.list(collections::DATASETS, None).await
    }

    pub async fn datasets_by_contributor(&self, contributor_id: &str) -> Result<Vec<Value>> {
        let filter_value = json!(contributor_id);
        self.store
            .list(collections::DATASETS, Some(("uploaded_by", &filter_value)))
            .await
    }
}

impl Registry {
    /// Convenience for callers that need a parsed session or a not-found error.
    pub async fn require_training_session(&self, session_id: &str) -> Result<Value> {
        self.get_training_session(session_id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("training session {session_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDocumentStore;

    fn registry() -> Registry {
        Registry::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn terminal_update_stamps_end_time() {
        let registry = registry();
        let session = TrainingSession::new(
            "s1".to_string(),
            "model_s1".to_string(),
            "demo_contributor".to_string(),
        );
        registry.create_training_session(&session).await.unwrap();

        registry
            .update_training_session("s1", json!({"status": "stopped"}))
            .await
            .unwrap();

        let doc = registry.require_training_session("s1").await.unwrap();
        assert_eq!(doc["status"], "stopped");
        assert!(doc.get("end_time").is_some());
    }

    #[tokio::test]
    async fn reputation_update_creates_contributor() {
        let registry = registry();
        registry
            .update_contributor_reputation("alice", 1.5)
            .await
            .unwrap();
        registry
            .update_contributor_reputation("alice", 0.5)
            .await
            .unwrap();

        let doc = registry.get_contributor("alice").await.unwrap().unwrap();
        let contributor: Contributor = serde_json::from_value(doc).unwrap();
        assert_eq!(contributor.total_contributions, 2);
        assert!((contributor.reputation_score - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn session_status_parses() {
        let registry = registry();
        let session = TrainingSession::new(
            "s2".to_string(),
            "model_s2".to_string(),
            "demo_contributor".to_string(),
        );
        registry.create_training_session(&session).await.unwrap();
        assert_eq!(
            registry.session_status("s2").await.unwrap(),
            Some(SessionStatus::Preparing)
        );
        assert_eq!(registry.session_status("missing").await.unwrap(), None);
    }
}
