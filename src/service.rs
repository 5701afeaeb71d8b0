//! Analytics Service - orchestration and ownership enforcement
//!
//! One facade over the pipeline, store, context builder and answer
//! generator. Every read goes through an ownership check that reports a
//! missing file identically for "does not exist" and "not yours", so file
//! ids leak nothing across owners.

use crate::config::PipelineConfig;
use crate::context::{ChatExchange, ContextBuilder};
use crate::error::{PipelineError, Result};
use crate::ingest::RawUpload;
use crate::llm::{is_general_message, AnswerGenerator};
use crate::pipeline::{run_pipeline, PipelineStage, ProcessedFile, ProcessingRequest, StageFailure};
use crate::store::{FileStore, FileSummary};
use crate::workbook::WorkbookSynthesizer;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct AnalyticsService {
    store: Arc<dyn FileStore>,
    generator: Arc<dyn AnswerGenerator>,
    synthesizer: Box<dyn WorkbookSynthesizer>,
    context_builder: ContextBuilder,
    config: PipelineConfig,
}

impl AnalyticsService {
    pub fn new(
        store: Arc<dyn FileStore>,
        generator: Arc<dyn AnswerGenerator>,
        synthesizer: Box<dyn WorkbookSynthesizer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            generator,
            synthesizer,
            context_builder: ContextBuilder::new(config.clone()),
            config,
        }
    }

    /// Run the full pipeline and persist the result. Persistence happens
    /// only after every stage has succeeded, so an abandoned call leaves
    /// no partial record behind.
    pub async fn process(
        &self,
        upload: RawUpload,
        request: ProcessingRequest,
    ) -> std::result::Result<ProcessedFile, StageFailure> {
        let file = run_pipeline(&upload, &request, &self.config, self.synthesizer.as_ref())?;
        self.with_timeout("persist", self.store.create(file.clone()))
            .await
            .map_err(|e| StageFailure {
                stage: PipelineStage::Persisted,
                reason: e.to_string(),
            })?;
        info!(file_id = %file.file_id, owner = %file.owner_id, "processed file persisted");
        Ok(file)
    }

    pub async fn get_file(&self, file_id: &str, owner_id: &str) -> Result<ProcessedFile> {
        self.owned_file(file_id, owner_id).await
    }

    pub async fn list_files(&self, owner_id: &str) -> Result<Vec<FileSummary>> {
        self.with_timeout("list", self.store.list_by_owner(owner_id))
            .await
    }

    /// Workbook bytes plus their download name. Absent when the processing
    /// run skipped or degraded the dashboard.
    pub async fn download_workbook(
        &self,
        file_id: &str,
        owner_id: &str,
    ) -> Result<(String, Vec<u8>)> {
        let file = self.owned_file(file_id, owner_id).await?;
        match (file.workbook_file_name, file.workbook) {
            (Some(name), Some(bytes)) => Ok((name, bytes)),
            _ => Err(PipelineError::DashboardUnavailable),
        }
    }

    /// Answer a question about a processed file. Small talk is answered
    /// without context; data questions get the assembled file context.
    pub async fn ask(&self, file_id: &str, owner_id: &str, question: &str) -> Result<ChatExchange> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::UnsupportedInput(
                "question must not be empty".to_string(),
            ));
        }
        let file = self.owned_file(file_id, owner_id).await?;

        let (context, answer) = if is_general_message(question) {
            let answer = self
                .with_timeout("answer", self.generator.generate(question, None))
                .await?;
            (String::new(), answer)
        } else {
            let context = self.context_builder.build(&file);
            let answer = self
                .with_timeout("answer", self.generator.generate(question, Some(&context)))
                .await?;
            (context, answer)
        };

        Ok(ChatExchange {
            question: question.to_string(),
            file_id: file.file_id,
            assembled_context: context,
            answer,
        })
    }

    pub async fn delete_file(&self, file_id: &str, owner_id: &str) -> Result<()> {
        self.owned_file(file_id, owner_id).await?;
        self.with_timeout("delete", self.store.delete(file_id))
            .await?;
        info!(file_id, "file deleted");
        Ok(())
    }

    /// Fetch a file and verify ownership. Missing and foreign files are
    /// indistinguishable to the caller.
    async fn owned_file(&self, file_id: &str, owner_id: &str) -> Result<ProcessedFile> {
        let file = self.with_timeout("fetch", self.store.get(file_id)).await?;
        match file {
            Some(file) if file.owner_id == owner_id => Ok(file),
            _ => Err(PipelineError::NoSuchFile),
        }
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        future: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(
            Duration::from_secs(self.config.external_timeout_secs),
            future,
        )
        .await
        .map_err(|_| PipelineError::Timeout(format!("{} operation timed out", operation)))?
    }
}
