//! Grounded Query Context Builder - bounded textual context for a question
//!
//! Assembles table shape, pivot summaries and top insights into a character
//! budget. When the budget is exceeded, the lowest-confidence insights are
//! dropped first, then pivot summaries are truncated with a visible marker.

use crate::config::PipelineConfig;
use crate::insights::{Insight, Severity};
use crate::pipeline::ProcessedFile;
use crate::relations::PivotTable;

pub const TRUNCATION_MARKER: &str = "[context truncated]";

/// Transient record of one question/answer exchange. Not persisted.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub question: String,
    pub file_id: String,
    pub assembled_context: String,
    pub answer: String,
}

pub struct ContextBuilder {
    config: PipelineConfig,
}

impl ContextBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, file: &ProcessedFile) -> String {
        let shape = shape_section(file);
        let pivots = pivot_section(&file.pivot_tables);

        let mut insights: Vec<&Insight> = file.insights.iter().collect();
        insights.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        insights.truncate(self.config.context_top_insights);

        let budget = self.config.context_char_budget;
        loop {
            let context = assemble(&shape, &pivots, &insights);
            if context.len() <= budget {
                return context;
            }
            // Drop the lowest-confidence insight and retry.
            if insights.pop().is_none() {
                break;
            }
        }

        // Insights are gone and the text still overflows: truncate the
        // pivot section, or the shape itself when it alone exceeds the
        // budget. The marker makes the cut visible, never silent mid-table.
        let marker_len = TRUNCATION_MARKER.len() + 1;
        let fixed = format!("{}\n\n", shape);
        if fixed.len() + marker_len > budget {
            let available = budget.saturating_sub(marker_len);
            let mut context: String = shape.chars().take(available).collect();
            context.push('\n');
            context.push_str(TRUNCATION_MARKER);
            return context;
        }
        let available = budget - fixed.len() - marker_len;
        let mut truncated: String = pivots.chars().take(available).collect();
        truncated.push('\n');
        truncated.push_str(TRUNCATION_MARKER);
        let mut context = fixed;
        context.push_str(&truncated);
        context
    }
}

fn assemble(shape: &str, pivots: &str, insights: &[&Insight]) -> String {
    let mut sections = vec![shape.to_string()];
    if !pivots.is_empty() {
        sections.push(pivots.to_string());
    }
    if !insights.is_empty() {
        let mut text = String::from("Key findings:");
        for insight in insights {
            text.push_str(&format!(
                "\n- [{}] {}: {}",
                severity_label(insight.severity),
                insight.title,
                insight.message
            ));
        }
        sections.push(text);
    }
    sections.join("\n\n")
}

/// Same rendering the serialized API uses for severities.
fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn shape_section(file: &ProcessedFile) -> String {
    let table = &file.canonical_table;
    let mut text = format!(
        "Table '{}': {} rows x {} columns (sheets: {})",
        file.file_name,
        table.row_count(),
        table.column_count(),
        file.source_sheets.join(", ")
    );
    for (idx, column) in table.columns.iter().enumerate() {
        text.push_str(&format!(
            "\n- {} ({:?}), {} null(s)",
            column.name,
            column.inferred_type,
            table.null_count(idx)
        ));
    }
    text
}

fn pivot_section(pivots: &[PivotTable]) -> String {
    if pivots.is_empty() {
        return String::new();
    }
    let mut text = String::from("Pivot tables:");
    for pivot in pivots {
        text.push_str(&format!(
            "\n{} (grouped by {}, {} groups)",
            pivot.title,
            pivot.index_column,
            pivot.rows.len()
        ));
        for header in &pivot.column_headers {
            if let Some(total) = pivot.column_total(header) {
                text.push_str(&format!(" | total {} = {:.2}", header, total));
            }
        }
        for row in pivot.rows.iter().take(10) {
            let cells: Vec<String> = pivot
                .column_headers
                .iter()
                .zip(&row.values)
                .map(|(header, value)| format!("{}={:.2}", header, value))
                .collect();
            text.push_str(&format!("\n  {}: {}", row.index_value, cells.join(", ")));
        }
        if pivot.rows.len() > 10 {
            text.push_str(&format!("\n  ... {} more groups", pivot.rows.len() - 10));
        }
    }
    text
}
