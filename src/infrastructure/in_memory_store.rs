use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    domain::errors::DomainError,
    infrastructure::{Document, EntityStore, Filter, ensure_collection_name},
};

#[derive(Default)]
pub struct InMemoryEntityStore {
    collections: RwLock<HashMap<String, HashMap<Uuid, Document>>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn filter(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, DomainError> {
        ensure_collection_name(collection)?;
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matched = documents
            .values()
            .filter(|document| filter.matches(&document.body))
            .cloned()
            .collect::<Vec<_>>();
        matched.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(matched)
    }

    async fn create(&self, collection: &str, body: Value) -> Result<Document, DomainError> {
        ensure_collection_name(collection)?;
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            body,
            created_at: now,
            updated_at: now,
        };

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(document.id, document.clone());
        Ok(document)
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
    ) -> Result<Option<Document>, DomainError> {
        ensure_collection_name(collection)?;
        let mut collections = self.collections.write().await;
        let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(&id))
        else {
            return Ok(None);
        };

        document.body = body;
        document.updated_at = Utc::now();
        Ok(Some(document.clone()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn update_of_unknown_document_is_none() {
        let store = InMemoryEntityStore::new();
        let updated = store
            .update("retention_states", Uuid::new_v4(), json!({}))
            .await
            .expect("update should not fail");
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn update_replaces_body_and_keeps_identity() {
        let store = InMemoryEntityStore::new();
        let created = store
            .create("power_user_states", json!({"user_email": "ana@example.com", "signal_score": 10}))
            .await
            .expect("create");

        let updated = store
            .update(
                "power_user_states",
                created.id,
                json!({"user_email": "ana@example.com", "signal_score": 40}),
            )
            .await
            .expect("update")
            .expect("document exists");

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.body["signal_score"], 40);
        assert!(updated.updated_at >= created.updated_at);
    }
}
