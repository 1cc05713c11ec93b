//! Document persistence.
//!
//! The engine only needs a small key-object store: filter a collection by
//! field equality, create a document, replace a document body. Per-user
//! records are layered on top by [`StateRepository`].

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{errors::DomainError, records::UserRecord};

pub mod file_store;
pub mod in_memory_store;

pub use file_store::JsonFileEntityStore;
pub use in_memory_store::InMemoryEntityStore;

/// Collections owned by neighbouring services. The engine only counts them.
pub mod collections {
    pub const DEAL_BOOKMARKS: &str = "deal_bookmarks";
    pub const ANALYTICS_EVENTS: &str = "analytics_events";
    pub const PORTFOLIO_GOALS: &str = "portfolio_goals";
    pub const COMMUNITY_MEMBERSHIPS: &str = "community_memberships";
}

const USER_EMAIL_FIELD: &str = "user_email";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conjunction of top-level field equalities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: BTreeMap<String, Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn by_user(email: &str) -> Self {
        Self::new().with_field(USER_EMAIL_FIELD, email)
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Matching documents, oldest first.
    async fn filter(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, DomainError>;
    async fn create(&self, collection: &str, body: Value) -> Result<Document, DomainError>;
    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
    ) -> Result<Option<Document>, DomainError>;
}

/// Collection names double as file names, so keep them to `[a-z0-9_]`.
pub(crate) fn ensure_collection_name(collection: &str) -> Result<(), DomainError> {
    let valid = !collection.is_empty()
        && collection
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');
    if valid {
        Ok(())
    } else {
        Err(DomainError::storage(format!(
            "invalid collection name '{collection}'"
        )))
    }
}

/// Typed access to the one-per-user state records.
#[derive(Clone)]
pub struct StateRepository {
    store: Arc<dyn EntityStore>,
}

impl StateRepository {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn load<R: UserRecord>(&self, user_email: &str) -> Result<Option<R>, DomainError> {
        let Some(document) = self.current(R::COLLECTION, user_email).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(document.body)?))
    }

    /// Replaces the user's record, creating it on first write.
    pub async fn upsert<R: UserRecord>(&self, record: &R) -> Result<(), DomainError> {
        let body = serde_json::to_value(record)?;
        match self.current(R::COLLECTION, record.user_email()).await? {
            Some(existing) => {
                self.store
                    .update(R::COLLECTION, existing.id, body)
                    .await?
                    .ok_or_else(|| {
                        DomainError::storage(format!(
                            "{} document {} vanished during update",
                            R::COLLECTION,
                            existing.id
                        ))
                    })?;
            }
            None => {
                self.store.create(R::COLLECTION, body).await?;
            }
        }
        Ok(())
    }

    /// Number of documents a user owns in `collection`.
    pub async fn count(&self, collection: &str, user_email: &str) -> Result<u64, DomainError> {
        let documents = self
            .store
            .filter(collection, &Filter::by_user(user_email))
            .await?;
        Ok(u64::try_from(documents.len()).unwrap_or(u64::MAX))
    }

    /// Duplicates should not exist; if they do, the latest write wins.
    async fn current(
        &self,
        collection: &str,
        user_email: &str,
    ) -> Result<Option<Document>, DomainError> {
        let documents = self
            .store
            .filter(collection, &Filter::by_user(user_email))
            .await?;
        Ok(documents
            .into_iter()
            .max_by(|left, right| left.updated_at.cmp(&right.updated_at)))
    }
}
