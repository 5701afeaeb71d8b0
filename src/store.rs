//! File Store - create-once persistence of processed files
//!
//! The store is keyed by file id and treats records as immutable: a
//! reprocessed upload arrives with a fresh id, never as an update.

use crate::error::{PipelineError, Result};
use crate::pipeline::ProcessedFile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Listing row; deliberately light, without the table or workbook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub file_id: String,
    pub file_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub has_dashboard: bool,
}

impl From<&ProcessedFile> for FileSummary {
    fn from(file: &ProcessedFile) -> Self {
        Self {
            file_id: file.file_id.clone(),
            file_name: file.file_name.clone(),
            created_at: file.created_at,
            has_dashboard: file.has_dashboard,
        }
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, file: ProcessedFile) -> Result<()>;

    async fn get(&self, file_id: &str) -> Result<Option<ProcessedFile>>;

    /// Summaries for one owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileSummary>>;

    /// Returns whether a record was actually removed.
    async fn delete(&self, file_id: &str) -> Result<bool>;
}

#[derive(Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, ProcessedFile>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn create(&self, file: ProcessedFile) -> Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| PipelineError::Store("store lock poisoned".to_string()))?;
        if files.contains_key(&file.file_id) {
            return Err(PipelineError::Store(format!(
                "file id {} already exists",
                file.file_id
            )));
        }
        debug!(file_id = %file.file_id, "persisting processed file");
        files.insert(file.file_id.clone(), file);
        Ok(())
    }

    async fn get(&self, file_id: &str) -> Result<Option<ProcessedFile>> {
        let files = self
            .files
            .read()
            .map_err(|_| PipelineError::Store("store lock poisoned".to_string()))?;
        Ok(files.get(file_id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileSummary>> {
        let files = self
            .files
            .read()
            .map_err(|_| PipelineError::Store("store lock poisoned".to_string()))?;
        let mut summaries: Vec<FileSummary> = files
            .values()
            .filter(|f| f.owner_id == owner_id)
            .map(FileSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        let mut files = self
            .files
            .write()
            .map_err(|_| PipelineError::Store("store lock poisoned".to_string()))?;
        Ok(files.remove(file_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::{run_pipeline, ProcessingRequest};
    use crate::ingest::RawUpload;
    use crate::workbook::XlsxSynthesizer;

    fn processed(owner: &str) -> ProcessedFile {
        let upload = RawUpload {
            bytes: b"category,amount\nA,10\nB,20\n".to_vec(),
            media_type: "text/csv".to_string(),
            file_name: "t.csv".to_string(),
            owner_id: owner.to_string(),
            uploaded_at: chrono::Utc::now(),
        };
        run_pipeline(
            &upload,
            &ProcessingRequest::default(),
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips() {
        let store = InMemoryFileStore::new();
        let file = processed("owner-1");
        let id = file.file_id.clone();
        store.create(file).await.unwrap();
        let fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.file_id, id);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_ids() {
        let store = InMemoryFileStore::new();
        let file = processed("owner-1");
        store.create(file.clone()).await.unwrap();
        assert!(store.create(file).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_is_scoped_to_owner() {
        let store = InMemoryFileStore::new();
        store.create(processed("owner-1")).await.unwrap();
        store.create(processed("owner-1")).await.unwrap();
        store.create(processed("owner-2")).await.unwrap();
        let listed = store.list_by_owner("owner-1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(store.list_by_owner("owner-3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_whether_a_record_existed() {
        let store = InMemoryFileStore::new();
        let file = processed("owner-1");
        let id = file.file_id.clone();
        store.create(file).await.unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }
}
