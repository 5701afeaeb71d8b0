//! Dataflow Engine - tabular data processing and grounded insight pipeline
//!
//! Turns raw CSV/xlsx uploads into a cleaned canonical table, mines pivot
//! relations, derives heuristic insights and chart recommendations, renders
//! an xlsx dashboard workbook, and answers questions about the result with
//! an LLM grounded in the processed content.

pub mod charts;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod pipeline;
pub mod relations;
pub mod service;
pub mod store;
pub mod table;
pub mod workbook;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{run_pipeline, ProcessedFile, ProcessingRequest};
pub use service::AnalyticsService;
