//! Pipeline Configuration - every heuristic threshold in one place
//!
//! Thresholds are deliberately configurable rather than hard-coded; tests
//! reference these fields instead of magic constants.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum accepted upload size in bytes.
    pub max_upload_bytes: usize,

    /// Fraction of non-null values that must parse for a column type to be assigned.
    pub type_majority_ratio: f64,

    /// Null ratio above which a column emits a data-quality warning.
    pub null_rate_threshold: f64,

    /// Standard deviations from the mean beyond which a value is an outlier.
    pub outlier_sigma: f64,

    /// Absolute Pearson correlation above which a pair of numeric columns is reported.
    pub correlation_threshold: f64,

    /// Minimum number of time buckets required before trend detection runs.
    pub trend_min_buckets: usize,

    /// R-squared of the fitted trend line required to report a trend.
    pub trend_min_r_squared: f64,

    /// Coefficient of variation (percent) above which a column is flagged as highly variable.
    pub variability_threshold: f64,

    /// Share of non-null values above which one categorical value dominates a column.
    pub dominant_category_ratio: f64,

    /// Maximum distinct values a column may have to act as a pivot group key.
    pub cardinality_ceiling: usize,

    /// Distinct-to-row ratio at which a column is treated as an identifier.
    pub identifier_ratio: f64,

    /// Minimum row count before the identifier heuristic applies; tiny
    /// tables cannot distinguish identifiers from low-cardinality keys.
    pub identifier_min_rows: usize,

    /// Hard cap on requested_relations.
    pub max_relations: usize,

    /// Categories beyond which a pie chart is discouraged.
    pub pie_category_limit: usize,

    /// Minimum score for a chart recommendation to be emitted.
    pub chart_score_floor: f64,

    /// Maximum number of chart recommendations returned.
    pub max_chart_recommendations: usize,

    /// Character budget for the assembled question-answering context.
    pub context_char_budget: usize,

    /// Number of top-confidence insights included in the context.
    pub context_top_insights: usize,

    /// Timeout in seconds applied to record-store and answer-generation calls.
    pub external_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 25 * 1024 * 1024,
            type_majority_ratio: 0.9,
            null_rate_threshold: 0.2,
            outlier_sigma: 3.0,
            correlation_threshold: 0.6,
            trend_min_buckets: 3,
            trend_min_r_squared: 0.3,
            variability_threshold: 50.0,
            dominant_category_ratio: 0.7,
            cardinality_ceiling: 50,
            identifier_ratio: 0.9,
            identifier_min_rows: 4,
            max_relations: 20,
            pie_category_limit: 8,
            chart_score_floor: 0.3,
            max_chart_recommendations: 5,
            context_char_budget: 8_000,
            context_top_insights: 8,
            external_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file; absent fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        Ok(config)
    }
}
