//! Processing Pipeline - one sequential run from raw upload to ProcessedFile
//!
//! Stage machine: Received -> Parsed -> Cleaned -> RelationsMined ->
//! InsightsComputed -> (DashboardSynthesized | skip) -> Persisted. Failures
//! up to InsightsComputed abort the run; dashboard failures degrade. The run
//! is a pure function of (bytes, request): every invocation yields a fresh
//! file id, never an in-place mutation of a prior result.

use crate::charts::{ChartRecommendation, ChartRecommender};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::ingest::{IngestReport, Ingestor, RawUpload};
use crate::insights::{CleanupFacts, Insight, InsightEngine};
use crate::relations::{PivotTable, RelationMiner};
use crate::table::CanonicalTable;
use crate::workbook::WorkbookSynthesizer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Immutable processing parameters, fixed once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRequest {
    pub remove_fields: Vec<String>,
    pub requested_relations: usize,
    pub description: String,
    pub require_dashboard: bool,
}

impl Default for ProcessingRequest {
    fn default() -> Self {
        Self {
            remove_fields: Vec::new(),
            requested_relations: 1,
            description: String::new(),
            require_dashboard: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Received,
    Parsed,
    Cleaned,
    RelationsMined,
    InsightsComputed,
    DashboardSynthesized,
    Persisted,
}

/// Terminal failure of a processing run, carrying the stage it died in.
#[derive(Error, Debug)]
#[error("pipeline failed at {stage:?}: {reason}")]
pub struct StageFailure {
    pub stage: PipelineStage,
    pub reason: String,
}

/// The aggregate root persisted after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub file_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub source_sheets: Vec<String>,
    pub canonical_table: CanonicalTable,
    pub pivot_tables: Vec<PivotTable>,
    pub requested_relations: usize,
    pub generated_relations: usize,
    pub insights: Vec<Insight>,
    pub chart_recommendations: Vec<ChartRecommendation>,
    pub has_dashboard: bool,
    #[serde(with = "base64_bytes", default)]
    pub workbook: Option<Vec<u8>>,
    pub workbook_file_name: Option<String>,
}

impl ProcessedFile {
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        owner_id: String,
        file_name: String,
        source_sheets: Vec<String>,
        canonical_table: CanonicalTable,
        mined: crate::relations::MinedRelations,
        request: &ProcessingRequest,
        insights: Vec<Insight>,
        chart_recommendations: Vec<ChartRecommendation>,
        workbook: Option<Vec<u8>>,
    ) -> Self {
        let file_id = uuid::Uuid::new_v4().to_string();
        let workbook_file_name = workbook
            .as_ref()
            .map(|_| format!("processed_{}.xlsx", file_id));
        Self {
            file_id,
            owner_id,
            file_name,
            created_at: chrono::Utc::now(),
            source_sheets,
            canonical_table,
            pivot_tables: mined.pivots,
            requested_relations: request.requested_relations,
            generated_relations: mined.generated_relations,
            insights,
            chart_recommendations,
            has_dashboard: workbook.is_some(),
            workbook,
            workbook_file_name,
        }
    }

    /// `(requested, generated)` when the miner came up short. Informational,
    /// never an error.
    pub fn insufficient_relations_notice(&self) -> Option<(usize, usize)> {
        if self.generated_relations < self.requested_relations {
            Some((self.requested_relations, self.generated_relations))
        } else {
            None
        }
    }
}

/// Map an ingestion error to the stage it belongs to.
fn ingest_stage(error: &PipelineError) -> PipelineStage {
    match error {
        PipelineError::UnsupportedInput(_) => PipelineStage::Received,
        PipelineError::Parse(_) => PipelineStage::Parsed,
        PipelineError::EmptyTable(_) => PipelineStage::Cleaned,
        _ => PipelineStage::Parsed,
    }
}

/// Run the full pipeline. Pure: no persistence happens here, so a caller
/// abandoning the returned future leaves no partial state behind.
pub fn run_pipeline(
    upload: &RawUpload,
    request: &ProcessingRequest,
    config: &PipelineConfig,
    synthesizer: &dyn WorkbookSynthesizer,
) -> Result<ProcessedFile, StageFailure> {
    let requested = request.requested_relations.clamp(1, config.max_relations);

    let report: IngestReport = Ingestor::new(config.clone())
        .ingest(upload, &request.remove_fields)
        .map_err(|e| StageFailure { stage: ingest_stage(&e), reason: e.to_string() })?;

    let mined = RelationMiner::new(config.clone()).mine(&report.table, requested);
    if mined.generated_relations < requested {
        info!(
            requested,
            generated = mined.generated_relations,
            "fewer relations than requested"
        );
    }

    let facts = CleanupFacts {
        duplicates_removed: report.duplicates_removed,
        unmatched_remove_fields: report.unmatched_remove_fields.clone(),
        coerced_nulls: report.coerced_nulls.clone(),
    };
    let insights = InsightEngine::new(config.clone()).analyze(&report.table, &facts);

    let recommendations =
        ChartRecommender::new(config.clone()).recommend(&report.table, &mined.pivots);

    let workbook = if request.require_dashboard {
        match synthesizer.serialize(&report.table, &mined.pivots, &recommendations) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                // Dashboard synthesis degrades; it never aborts the run.
                warn!(%error, "workbook synthesis failed, continuing without dashboard");
                None
            }
        }
    } else {
        None
    };

    let mut effective_request = request.clone();
    effective_request.requested_relations = requested;

    let file = ProcessedFile::assemble(
        upload.owner_id.clone(),
        upload.file_name.clone(),
        report.source_sheets,
        report.table,
        mined,
        &effective_request,
        insights,
        recommendations,
        workbook,
    );
    info!(
        file_id = %file.file_id,
        rows = file.canonical_table.row_count(),
        relations = file.generated_relations,
        has_dashboard = file.has_dashboard,
        "pipeline run complete"
    );
    Ok(file)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::XlsxSynthesizer;
    use chrono::Utc;

    fn upload(csv: &str) -> RawUpload {
        RawUpload {
            bytes: csv.as_bytes().to_vec(),
            media_type: "text/csv".to_string(),
            file_name: "sales.csv".to_string(),
            owner_id: "user-1".to_string(),
            uploaded_at: Utc::now(),
        }
    }

    const SALES_CSV: &str =
        "category,amount,date\nA,10,2024-01-01\nA,20,2024-01-02\nB,30,2024-01-03\nB,40,2024-01-04\n";

    #[test]
    fn test_full_run_produces_expected_pivot() {
        let request = ProcessingRequest { requested_relations: 1, ..Default::default() };
        let file = run_pipeline(
            &upload(SALES_CSV),
            &request,
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap();
        assert_eq!(file.generated_relations, 1);
        let pivot = &file.pivot_tables[0];
        assert_eq!(pivot.index_column, "category");
        assert_eq!(pivot.value(&pivot.rows[0], "sum"), Some(30.0));
        assert_eq!(pivot.value(&pivot.rows[1], "sum"), Some(70.0));
        assert!(!file.has_dashboard);
        assert!(file.workbook.is_none());
    }

    #[test]
    fn test_removing_date_column_disables_trend_insights() {
        let request = ProcessingRequest {
            remove_fields: vec!["date".to_string()],
            ..Default::default()
        };
        let file = run_pipeline(
            &upload(SALES_CSV),
            &request,
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap();
        assert_eq!(file.canonical_table.column_count(), 2);
        assert!(file
            .insights
            .iter()
            .all(|i| i.category != crate::insights::InsightCategory::Trend));
    }

    #[test]
    fn test_insufficient_relations_is_a_notice_not_an_error() {
        let request = ProcessingRequest { requested_relations: 5, ..Default::default() };
        let file = run_pipeline(
            &upload(SALES_CSV),
            &request,
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap();
        assert_eq!(file.insufficient_relations_notice(), Some((5, 1)));
    }

    #[test]
    fn test_reprocessing_is_idempotent_except_for_identity() {
        let request = ProcessingRequest { requested_relations: 2, ..Default::default() };
        let config = PipelineConfig::default();
        let first = run_pipeline(&upload(SALES_CSV), &request, &config, &XlsxSynthesizer).unwrap();
        let second = run_pipeline(&upload(SALES_CSV), &request, &config, &XlsxSynthesizer).unwrap();
        assert_eq!(first.canonical_table.records(), second.canonical_table.records());
        assert_eq!(first.generated_relations, second.generated_relations);
        assert_ne!(first.file_id, second.file_id);
    }

    #[test]
    fn test_failures_carry_their_stage() {
        let mut bad = upload("x");
        bad.media_type = "application/zip".to_string();
        bad.file_name = "a.zip".to_string();
        let failure = run_pipeline(
            &bad,
            &ProcessingRequest::default(),
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap_err();
        assert_eq!(failure.stage, PipelineStage::Received);

        let empty = upload("a,b\n,\n");
        let failure = run_pipeline(
            &empty,
            &ProcessingRequest::default(),
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap_err();
        assert_eq!(failure.stage, PipelineStage::Cleaned);
    }

    #[test]
    fn test_dashboard_run_embeds_workbook_bytes() {
        let request = ProcessingRequest {
            requested_relations: 2,
            require_dashboard: true,
            ..Default::default()
        };
        let file = run_pipeline(
            &upload(SALES_CSV),
            &request,
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap();
        assert!(file.has_dashboard);
        let bytes = file.workbook.as_ref().unwrap();
        assert_eq!(&bytes[0..2], b"PK");
        assert!(file.workbook_file_name.as_ref().unwrap().ends_with(".xlsx"));
    }

    #[test]
    fn test_workbook_bytes_round_trip_as_base64() {
        let request = ProcessingRequest { require_dashboard: true, ..Default::default() };
        let file = run_pipeline(
            &upload(SALES_CSV),
            &request,
            &PipelineConfig::default(),
            &XlsxSynthesizer,
        )
        .unwrap();
        let json = serde_json::to_value(&file).unwrap();
        assert!(json["workbook"].is_string());
        let restored: ProcessedFile = serde_json::from_value(json).unwrap();
        assert_eq!(restored.workbook, file.workbook);
    }
}
