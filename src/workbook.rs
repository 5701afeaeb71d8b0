//! Workbook Synthesizer - serializes cleaned data, pivots and charts to xlsx
//!
//! Format-specific binary serialization stays behind the narrow
//! `WorkbookSynthesizer` trait so the rest of the pipeline is testable
//! without constructing real workbook bytes.

use crate::charts::{ChartRecommendation, ChartType};
use crate::error::{PipelineError, Result};
use crate::relations::PivotTable;
use crate::table::{CanonicalTable, Value};
use rust_xlsxwriter::{
    Chart, ChartType as XlsxChartType, DocProperties, ExcelDateTime, Workbook, Worksheet,
    XlsxError,
};
use tracing::{debug, warn};

impl From<XlsxError> for PipelineError {
    fn from(error: XlsxError) -> Self {
        PipelineError::Workbook(error.to_string())
    }
}

/// Narrow serialization seam between the pipeline and the binary format.
pub trait WorkbookSynthesizer: Send + Sync {
    fn serialize(
        &self,
        table: &CanonicalTable,
        pivots: &[PivotTable],
        recommendations: &[ChartRecommendation],
    ) -> Result<Vec<u8>>;
}

/// xlsx implementation: cleaned table on one sheet, each pivot on its own
/// sheet, and a dashboard of native charts bound to the pivot ranges.
pub struct XlsxSynthesizer;

impl WorkbookSynthesizer for XlsxSynthesizer {
    fn serialize(
        &self,
        table: &CanonicalTable,
        pivots: &[PivotTable],
        recommendations: &[ChartRecommendation],
    ) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        // Fixed creation time keeps output byte-deterministic for identical content.
        let properties =
            DocProperties::new().set_creation_datetime(&ExcelDateTime::from_ymd(2000, 1, 1)?);
        workbook.set_properties(&properties);

        write_cleaned_sheet(workbook.add_worksheet(), table)?;

        let mut pivot_sheets = Vec::new();
        for (idx, pivot) in pivots.iter().enumerate() {
            let sheet_name = pivot_sheet_name(idx, &pivot.title);
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet_name)?;
            write_pivot_sheet(worksheet, pivot)?;
            pivot_sheets.push(sheet_name);
        }

        write_dashboard(&mut workbook, pivots, &pivot_sheets, recommendations)?;

        Ok(workbook.save_to_buffer()?)
    }
}

fn write_cleaned_sheet(worksheet: &mut Worksheet, table: &CanonicalTable) -> Result<()> {
    worksheet.set_name("CleanedData")?;
    for (col, column) in table.columns.iter().enumerate() {
        worksheet.write_string(0, col as u16, &column.name)?;
    }
    for (row_idx, row) in table.rows.iter().enumerate() {
        for (col_idx, value) in row.iter().enumerate() {
            write_cell(worksheet, row_idx as u32 + 1, col_idx as u16, value)?;
        }
    }
    Ok(())
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Boolean(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Value::Integer(i) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        Value::Float(f) => {
            worksheet.write_number(row, col, *f)?;
        }
        Value::Date(d) => {
            worksheet.write_string(row, col, d.format("%Y-%m-%d").to_string())?;
        }
        Value::Text(s) => {
            worksheet.write_string(row, col, s)?;
        }
    }
    Ok(())
}

/// Headers in row 0, one group per row below; this fixed layout is what the
/// dashboard charts bind their ranges to.
fn write_pivot_sheet(worksheet: &mut Worksheet, pivot: &PivotTable) -> Result<()> {
    worksheet.write_string(0, 0, &pivot.index_column)?;
    for (idx, header) in pivot.column_headers.iter().enumerate() {
        worksheet.write_string(0, idx as u16 + 1, header)?;
    }
    for (row_idx, row) in pivot.rows.iter().enumerate() {
        worksheet.write_string(row_idx as u32 + 1, 0, &row.index_value)?;
        for (col_idx, value) in row.values.iter().enumerate() {
            worksheet.write_number(row_idx as u32 + 1, col_idx as u16 + 1, *value)?;
        }
    }
    Ok(())
}

fn write_dashboard(
    workbook: &mut Workbook,
    pivots: &[PivotTable],
    pivot_sheets: &[String],
    recommendations: &[ChartRecommendation],
) -> Result<()> {
    let dashboard = workbook.add_worksheet();
    dashboard.set_name("Dashboard")?;
    dashboard.write_string(0, 1, "Dashboard - Auto Generated")?;

    let mut placed = 0u32;
    for recommendation in recommendations {
        let Some(title) = &recommendation.pivot_title else {
            debug!(chart = ?recommendation.chart_type, "no pivot range for chart, skipping");
            continue;
        };
        let Some(position) = pivots.iter().position(|p| &p.title == title) else {
            continue;
        };
        let pivot = &pivots[position];
        let sheet = &pivot_sheets[position];

        match build_chart(recommendation.chart_type, pivot, sheet) {
            Ok(Some(chart)) => {
                let row = 2 + (placed / 2) * 16;
                let col = 1 + (placed % 2) as u16 * 8;
                if let Err(error) = dashboard.insert_chart(row, col, &chart) {
                    // One failed embedding never aborts the workbook.
                    warn!(%error, chart = ?recommendation.chart_type, "chart embedding failed, skipped");
                    continue;
                }
                placed += 1;
            }
            Ok(None) => {}
            Err(error) => {
                warn!(%error, chart = ?recommendation.chart_type, "chart construction failed, skipped");
            }
        }
    }
    Ok(())
}

/// Bind a chart to the sum (or count) column of a pivot sheet.
fn build_chart(
    chart_type: ChartType,
    pivot: &PivotTable,
    sheet: &str,
) -> Result<Option<Chart>> {
    if pivot.rows.is_empty() {
        return Ok(None);
    }
    let value_header = if pivot.column_headers.iter().any(|h| h == "sum") {
        "sum"
    } else {
        "count"
    };
    let Some(header_idx) = pivot.column_headers.iter().position(|h| h == value_header) else {
        return Ok(None);
    };
    let value_col = header_idx as u16 + 1;
    let last_row = pivot.rows.len() as u32;

    let xlsx_type = match chart_type {
        ChartType::Bar => XlsxChartType::Column,
        ChartType::Line => XlsxChartType::Line,
        ChartType::Pie => XlsxChartType::Pie,
        ChartType::Scatter => XlsxChartType::Scatter,
    };
    let mut chart = Chart::new(xlsx_type);
    chart
        .add_series()
        .set_categories((sheet, 1, 0, last_row, 0))
        .set_values((sheet, 1, value_col, last_row, value_col))
        .set_name(&format!("{} of {}", value_header, pivot.index_column));
    chart.title().set_name(&pivot.title);
    Ok(Some(chart))
}

/// Worksheet names are capped at 31 chars and a handful of characters are
/// forbidden; the index prefix keeps names unique after truncation.
fn pivot_sheet_name(idx: usize, title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' | '\'' => ' ',
            other => other,
        })
        .collect();
    let name = format!("Pivot {} {}", idx + 1, cleaned.trim());
    name.chars().take(31).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartRecommender;
    use crate::config::PipelineConfig;
    use crate::relations::RelationMiner;
    use crate::table::{ColumnDescriptor, ColumnType};

    fn sample_table() -> CanonicalTable {
        let rows = (0..6)
            .map(|i| {
                vec![
                    Value::Text(if i % 2 == 0 { "A" } else { "B" }.to_string()),
                    Value::Integer(10 * (i + 1)),
                ]
            })
            .collect();
        CanonicalTable::new(
            vec![
                ColumnDescriptor {
                    name: "category".to_string(),
                    inferred_type: ColumnType::String,
                    nullable: false,
                },
                ColumnDescriptor {
                    name: "amount".to_string(),
                    inferred_type: ColumnType::Integer,
                    nullable: false,
                },
            ],
            rows,
        )
    }

    #[test]
    fn test_serialize_produces_xlsx_bytes() {
        let table = sample_table();
        let config = PipelineConfig::default();
        let pivots = RelationMiner::new(config.clone()).mine(&table, 2).pivots;
        let recommendations = ChartRecommender::new(config).recommend(&table, &pivots);
        let bytes = XlsxSynthesizer
            .serialize(&table, &pivots, &recommendations)
            .unwrap();
        // xlsx files are zip archives
        assert_eq!(&bytes[0..2], b"PK");
    }

    #[test]
    fn test_serialization_is_deterministic_for_identical_content() {
        let table = sample_table();
        let config = PipelineConfig::default();
        let pivots = RelationMiner::new(config.clone()).mine(&table, 2).pivots;
        let recommendations = ChartRecommender::new(config).recommend(&table, &pivots);
        let first = XlsxSynthesizer
            .serialize(&table, &pivots, &recommendations)
            .unwrap();
        let second = XlsxSynthesizer
            .serialize(&table, &pivots, &recommendations)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sheet_names_are_sanitized_and_bounded() {
        let name = pivot_sheet_name(0, "amount by a/very:long*category[name]that keeps going");
        assert!(name.len() <= 31);
        assert!(!name.contains('/') && !name.contains(':') && !name.contains('*'));
    }

    #[test]
    fn test_unbindable_recommendations_are_tolerated() {
        let table = sample_table();
        let recommendation = ChartRecommendation {
            chart_type: ChartType::Scatter,
            score: 0.7,
            priority: crate::charts::Priority::High,
            description: "scatter".to_string(),
            reasoning: "two numeric columns".to_string(),
            pivot_title: None,
        };
        let bytes = XlsxSynthesizer.serialize(&table, &[], &[recommendation]).unwrap();
        assert!(!bytes.is_empty());
    }
}
