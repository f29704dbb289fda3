//! Model record lookup.
//!
//! Records are the metadata rows created when a model file is uploaded. The
//! relational store behind them is owned by the file-management side of the
//! service; prediction only needs to find a record by id.

use async_trait::async_trait;
use modelhub_models::{ModelId, ModelLocator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::config::ModelsConfig;
use crate::error::Result;

/// What a model does, which decides where its file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Image classification.
    Cls,
    /// Object detection.
    Detect,
    /// Anything else.
    #[serde(other)]
    Other,
}

impl FileType {
    /// Folder files of this type are stored in.
    #[must_use]
    pub fn folder(self, models: &ModelsConfig) -> &str {
        match self {
            Self::Cls => models.cls_folder.as_str(),
            Self::Detect => models.detect_folder.as_str(),
            Self::Other => models.default_folder.as_str(),
        }
    }

    /// Name used in responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cls => "cls",
            Self::Detect => "detect",
            Self::Other => "other",
        }
    }
}

/// Metadata for one uploaded model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Database id; the cache identity.
    pub id: i64,
    /// Stored file name. Not unique across records.
    pub filename: String,
    /// Model task.
    pub file_type: FileType,
}

impl ModelRecord {
    /// Create a record.
    pub fn new(id: i64, filename: impl Into<String>, file_type: FileType) -> Self {
        Self {
            id,
            filename: filename.into(),
            file_type,
        }
    }

    /// Cache identity of this record.
    #[must_use]
    pub fn identity(&self) -> ModelId {
        ModelId(self.id)
    }

    /// Where the cache should load this record's model from.
    #[must_use]
    pub fn locator(&self, models: &ModelsConfig) -> ModelLocator {
        ModelLocator::new(self.file_type.folder(models), self.filename.clone())
    }
}

/// Read access to model records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find a record by id.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried. A missing record is `Ok(None)`.
    async fn find(&self, id: i64) -> Result<Option<ModelRecord>>;
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<i64, ModelRecord>>,
}

impl InMemoryRecordStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub async fn insert(&self, record: ModelRecord) {
        self.records.write().await.insert(record.id, record);
    }

    /// Remove a record, returning it if it existed.
    pub async fn remove(&self, id: i64) -> Option<ModelRecord> {
        self.records.write().await.remove(&id)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn find(&self, id: i64) -> Result<Option<ModelRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_by_file_type() {
        let models = ModelsConfig::default();

        let cls = ModelRecord::new(1, "a.pt", FileType::Cls).locator(&models);
        let detect = ModelRecord::new(2, "a.pt", FileType::Detect).locator(&models);
        let other = ModelRecord::new(3, "a.pt", FileType::Other).locator(&models);

        assert_eq!(cls, ModelLocator::new("models/cls", "a.pt"));
        assert_eq!(detect, ModelLocator::new("models/detect", "a.pt"));
        assert_eq!(other, ModelLocator::new("models", "a.pt"));
    }

    #[test]
    fn test_unknown_file_type_deserializes_as_other() {
        let record: ModelRecord =
            serde_json::from_str(r#"{"id": 4, "filename": "x.pt", "file_type": "segment"}"#)
                .unwrap();
        assert_eq!(record.file_type, FileType::Other);
        assert_eq!(record.identity(), ModelId(4));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRecordStore::new();
        store.insert(ModelRecord::new(1, "a.pt", FileType::Cls)).await;

        assert!(store.find(1).await.unwrap().is_some());
        assert!(store.find(2).await.unwrap().is_none());

        store.remove(1).await;
        assert!(store.find(1).await.unwrap().is_none());
    }
}
