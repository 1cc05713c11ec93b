//! One JSON file per collection under a data directory.
//!
//! Every write rewrites the whole collection into a temp file in the same
//! directory and renames it over the old one, so readers never observe a
//! torn file. Writers are serialized by a process-local lock.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{
    domain::errors::DomainError,
    infrastructure::{Document, EntityStore, Filter, ensure_collection_name},
};

pub struct JsonFileEntityStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileEntityStore {
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, DomainError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|err| {
            DomainError::storage(format!(
                "failed to create data directory {}: {err}",
                data_dir.display()
            ))
        })?;

        Ok(Self {
            data_dir,
            write_lock: Mutex::new(()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.json"))
    }

    async fn read_collection(&self, collection: &str) -> Result<Vec<Document>, DomainError> {
        let path = self.collection_path(collection);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(DomainError::storage(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    async fn write_collection(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<(), DomainError> {
        let bytes = serde_json::to_vec_pretty(documents)?;
        let data_dir = self.data_dir.clone();
        let path = self.collection_path(collection);

        tokio::task::spawn_blocking(move || write_atomic(&data_dir, &path, &bytes))
            .await
            .map_err(|err| DomainError::internal(format!("collection writer panicked: {err}")))??;

        debug!(collection, documents = documents.len(), "collection persisted");
        Ok(())
    }
}

fn write_atomic(data_dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), DomainError> {
    let storage_err =
        |err: io::Error| DomainError::storage(format!("failed to write {}: {err}", path.display()));

    let mut temp = NamedTempFile::new_in(data_dir).map_err(storage_err)?;
    temp.write_all(bytes).map_err(storage_err)?;
    temp.as_file().sync_all().map_err(storage_err)?;
    temp.persist(path).map_err(|err| storage_err(err.error))?;
    Ok(())
}

#[async_trait]
impl EntityStore for JsonFileEntityStore {
    async fn filter(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, DomainError> {
        ensure_collection_name(collection)?;
        let mut matched = self
            .read_collection(collection)
            .await?
            .into_iter()
            .filter(|document| filter.matches(&document.body))
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
        let _guard = self.write_lock.lock().await;

        let mut documents = self.read_collection(collection).await?;
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            body,
            created_at: now,
            updated_at: now,
        };
        documents.push(document.clone());

        self.write_collection(collection, &documents).await?;
        Ok(document)
    }

    async fn update(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
    ) -> Result<Option<Document>, DomainError> {
        ensure_collection_name(collection)?;
        let _guard = self.write_lock.lock().await;

        let mut documents = self.read_collection(collection).await?;
        let Some(document) = documents.iter_mut().find(|document| document.id == id) else {
            return Ok(None);
        };
        document.body = body;
        document.updated_at = Utc::now();
        let updated = document.clone();

        self.write_collection(collection, &documents).await?;
        Ok(Some(updated))
    }
}
