//! Table Ingestion & Normalizer - raw upload bytes to a canonical table
//!
//! Parses CSV and Excel payloads into a uniform string grid, cleans it the
//! same way regardless of source format, infers column types by majority
//! vote, and deduplicates exact-duplicate rows. Pure transform: no side
//! effects beyond the returned report.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::table::{CanonicalTable, ColumnDescriptor, ColumnType, Value};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::io::Cursor;
use tracing::{debug, info};

/// Raw upload as handed over by the transport boundary. Consumed by
/// ingestion and discarded afterwards.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub file_name: String,
    pub owner_id: String,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Csv,
    Excel,
}

/// Output of ingestion: the canonical table plus the cleanup facts the
/// insight engine consumes.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub table: CanonicalTable,
    pub source_sheets: Vec<String>,
    pub duplicates_removed: usize,
    /// Per-column count of values coerced to null under the inferred type.
    pub coerced_nulls: Vec<(String, usize)>,
    /// remove_fields entries that matched no source column (no-op, reported).
    pub unmatched_remove_fields: Vec<String>,
}

/// One sheet flattened to headers plus raw optional-string cells.
struct RawSheet {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

pub struct Ingestor {
    config: PipelineConfig,
}

impl Ingestor {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn ingest(&self, upload: &RawUpload, remove_fields: &[String]) -> Result<IngestReport> {
        if upload.bytes.len() > self.config.max_upload_bytes {
            return Err(PipelineError::UnsupportedInput(format!(
                "payload of {} bytes exceeds the {} byte ceiling",
                upload.bytes.len(),
                self.config.max_upload_bytes
            )));
        }

        let format = detect_format(&upload.media_type, &upload.file_name)?;
        let sheets = match format {
            SourceFormat::Csv => vec![parse_csv(&upload.bytes, &upload.file_name)?],
            SourceFormat::Excel => parse_excel(&upload.bytes)?,
        };

        let source_sheets: Vec<String> = sheets.iter().map(|s| s.name.clone()).collect();
        if sheets.is_empty() {
            return Err(PipelineError::EmptyTable(
                "no non-empty sheet in source".to_string(),
            ));
        }

        let (mut headers, mut rows) = concatenate_sheets(sheets);

        // Empty-string cells are nulls; fully-null rows and columns carry no data.
        drop_all_null_rows(&mut rows);
        drop_all_null_columns(&mut headers, &mut rows);

        let unmatched_remove_fields =
            remove_requested_fields(&mut headers, &mut rows, remove_fields);

        if headers.is_empty() {
            return Err(PipelineError::EmptyTable(
                "no usable columns after cleaning".to_string(),
            ));
        }
        if rows.is_empty() {
            return Err(PipelineError::EmptyTable(
                "no usable rows after cleaning".to_string(),
            ));
        }

        let (columns, typed_rows, coerced_nulls) =
            self.infer_and_coerce(&headers, &rows);

        let (deduped_rows, duplicates_removed) = dedup_rows(typed_rows);

        info!(
            rows = deduped_rows.len(),
            columns = columns.len(),
            duplicates_removed,
            "ingested table"
        );

        Ok(IngestReport {
            table: CanonicalTable::new(columns, deduped_rows),
            source_sheets,
            duplicates_removed,
            coerced_nulls,
            unmatched_remove_fields,
        })
    }

    /// Majority-vote type inference followed by coercion. Values that fail
    /// to parse under the inferred type become null and are counted.
    fn infer_and_coerce(
        &self,
        headers: &[String],
        rows: &[Vec<Option<String>>],
    ) -> (Vec<ColumnDescriptor>, Vec<Vec<Value>>, Vec<(String, usize)>) {
        let mut columns = Vec::with_capacity(headers.len());
        let mut column_types = Vec::with_capacity(headers.len());
        let mut coerced_nulls = Vec::new();

        for (idx, header) in headers.iter().enumerate() {
            let non_null: Vec<&str> = rows
                .iter()
                .filter_map(|row| row[idx].as_deref())
                .collect();
            let inferred = infer_column_type(&non_null, self.config.type_majority_ratio);
            debug!(column = %header, ?inferred, "inferred column type");
            column_types.push(inferred);
            columns.push(ColumnDescriptor {
                name: header.clone(),
                inferred_type: inferred,
                nullable: false,
            });
        }

        let mut coerced_counts = vec![0usize; headers.len()];
        let mut typed_rows = Vec::with_capacity(rows.len());
        for row in rows {
            let mut typed = Vec::with_capacity(headers.len());
            for (idx, cell) in row.iter().enumerate() {
                let value = match cell.as_deref() {
                    None => Value::Null,
                    Some(raw) => match coerce(raw, column_types[idx]) {
                        Some(v) => v,
                        None => {
                            coerced_counts[idx] += 1;
                            Value::Null
                        }
                    },
                };
                typed.push(value);
            }
            typed_rows.push(typed);
        }

        for (idx, column) in columns.iter_mut().enumerate() {
            column.nullable = typed_rows.iter().any(|row| row[idx].is_null());
            if coerced_counts[idx] > 0 {
                coerced_nulls.push((column.name.clone(), coerced_counts[idx]));
            }
        }

        (columns, typed_rows, coerced_nulls)
    }
}

fn detect_format(media_type: &str, file_name: &str) -> Result<SourceFormat> {
    let extension = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match media_type {
        "text/csv" | "application/csv" => return Ok(SourceFormat::Csv),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel" => return Ok(SourceFormat::Excel),
        _ => {}
    }
    match extension.as_str() {
        "csv" => Ok(SourceFormat::Csv),
        "xlsx" | "xls" => Ok(SourceFormat::Excel),
        _ => Err(PipelineError::UnsupportedInput(format!(
            "unsupported media type '{}' for '{}'",
            media_type, file_name
        ))),
    }
}

fn parse_csv(bytes: &[u8], file_name: &str) -> Result<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::Parse(format!("failed to read CSV headers: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| PipelineError::Parse(format!("failed to read CSV record: {}", e)))?;
        let row: Vec<Option<String>> = (0..headers.len())
            .map(|idx| normalize_cell(record.get(idx).unwrap_or("")))
            .collect();
        rows.push(row);
    }

    let name = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| file_name.to_string());
    Ok(RawSheet { name, headers, rows })
}

fn parse_excel(bytes: &[u8]) -> Result<Vec<RawSheet>> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| PipelineError::Parse(format!("failed to open workbook: {}", e)))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                return Err(PipelineError::Parse(format!(
                    "failed to read sheet '{}': {}",
                    name, e
                )))
            }
        };
        let mut row_iter = range.rows();
        let headers: Vec<String> = match row_iter.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| excel_cell(cell).unwrap_or_default().trim().to_string())
                .collect(),
            None => continue, // empty sheet
        };
        if headers.iter().all(|h| h.is_empty()) {
            continue;
        }

        let mut rows = Vec::new();
        for data_row in row_iter {
            let row: Vec<Option<String>> = (0..headers.len())
                .map(|idx| {
                    data_row
                        .get(idx)
                        .and_then(excel_cell)
                        .as_deref()
                        .and_then(normalize_cell_ref)
                })
                .collect();
            rows.push(row);
        }
        sheets.push(RawSheet { name, headers, rows });
    }
    Ok(sheets)
}

/// Flatten an Excel cell to its raw string form. Dates come back in
/// ISO format so that type inference treats them like CSV dates.
fn excel_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) => Some(Value::Float(*f).display()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(|d| d.format("%Y-%m-%d").to_string()),
        Data::DateTimeIso(s) => Some(s.clone()),
        Data::DurationIso(s) => Some(s.clone()),
        Data::Error(_) => None,
    }
}

/// Excel serial date: days since 1899-12-30.
fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(chrono::Days::new(serial.trunc() as u64))
}

fn normalize_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_cell_ref(raw: &str) -> Option<String> {
    normalize_cell(raw)
}

/// Concatenate sheets over the union of their headers; with more than one
/// non-empty sheet a `__sheet` tag column records provenance.
fn concatenate_sheets(sheets: Vec<RawSheet>) -> (Vec<String>, Vec<Vec<Option<String>>>) {
    if sheets.len() == 1 {
        let sheet = sheets.into_iter().next().unwrap();
        return (sheet.headers, sheet.rows);
    }

    let mut headers: Vec<String> = Vec::new();
    for sheet in &sheets {
        for header in &sheet.headers {
            if !headers.contains(header) {
                headers.push(header.clone());
            }
        }
    }
    headers.push("__sheet".to_string());

    let mut rows = Vec::new();
    for sheet in &sheets {
        for row in &sheet.rows {
            let mut merged: Vec<Option<String>> = headers
                .iter()
                .map(|header| {
                    sheet
                        .headers
                        .iter()
                        .position(|h| h == header)
                        .and_then(|idx| row.get(idx).cloned().flatten())
                })
                .collect();
            let last = merged.len() - 1;
            merged[last] = Some(sheet.name.clone());
            rows.push(merged);
        }
    }
    (headers, rows)
}

fn drop_all_null_rows(rows: &mut Vec<Vec<Option<String>>>) {
    rows.retain(|row| row.iter().any(|cell| cell.is_some()));
}

fn drop_all_null_columns(headers: &mut Vec<String>, rows: &mut [Vec<Option<String>>]) {
    let mut keep: Vec<bool> = (0..headers.len())
        .map(|idx| rows.iter().any(|row| row[idx].is_some()))
        .collect();
    // Unnamed header cells with no data below them are noise from ragged sheets.
    for (idx, header) in headers.iter().enumerate() {
        if header.is_empty() {
            keep[idx] = false;
        }
    }
    retain_columns(headers, rows, &keep);
}

/// Case-insensitive, whitespace-tolerant column removal. Names that match
/// nothing are returned so the caller can surface a low-severity notice.
fn remove_requested_fields(
    headers: &mut Vec<String>,
    rows: &mut [Vec<Option<String>>],
    remove_fields: &[String],
) -> Vec<String> {
    let mut unmatched = Vec::new();
    let mut keep = vec![true; headers.len()];
    for field in remove_fields {
        let wanted = field.trim().to_lowercase();
        if wanted.is_empty() {
            continue;
        }
        let mut matched = false;
        for (idx, header) in headers.iter().enumerate() {
            if header.trim().to_lowercase() == wanted {
                keep[idx] = false;
                matched = true;
            }
        }
        if !matched {
            unmatched.push(field.trim().to_string());
        }
    }
    retain_columns(headers, rows, &keep);
    unmatched
}

fn retain_columns(headers: &mut Vec<String>, rows: &mut [Vec<Option<String>>], keep: &[bool]) {
    if keep.iter().all(|k| *k) {
        return;
    }
    let mut idx = 0;
    headers.retain(|_| {
        let k = keep[idx];
        idx += 1;
        k
    });
    for row in rows.iter_mut() {
        let mut idx = 0;
        row.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
    }
}

/// Inference order: integer, float, boolean, date, then string fallback.
fn infer_column_type(non_null: &[&str], majority_ratio: f64) -> ColumnType {
    if non_null.is_empty() {
        return ColumnType::Unknown;
    }
    let threshold = (non_null.len() as f64 * majority_ratio).ceil() as usize;
    let candidates = [
        ColumnType::Integer,
        ColumnType::Float,
        ColumnType::Boolean,
        ColumnType::Date,
    ];
    for candidate in candidates {
        let parsed = non_null
            .iter()
            .filter(|raw| coerce(raw, candidate).is_some())
            .count();
        if parsed >= threshold {
            return candidate;
        }
    }
    ColumnType::String
}

fn coerce(raw: &str, column_type: ColumnType) -> Option<Value> {
    let trimmed = raw.trim();
    match column_type {
        ColumnType::Integer => trimmed.parse::<i64>().ok().map(Value::Integer),
        ColumnType::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),
        ColumnType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(Value::Boolean(true)),
            "false" | "no" => Some(Value::Boolean(false)),
            _ => None,
        },
        ColumnType::Date => parse_date(trimmed).map(Value::Date),
        ColumnType::String | ColumnType::Unknown => Some(Value::Text(trimmed.to_string())),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];
    const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(datetime.date());
        }
    }
    None
}

/// Collapse exact-duplicate rows to their first occurrence.
fn dedup_rows(rows: Vec<Vec<Value>>) -> (Vec<Vec<Value>>, usize) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    let mut removed = 0;
    for row in rows {
        let fingerprint = row
            .iter()
            .map(|v| if v.is_null() { "\u{0}".to_string() } else { v.display() })
            .collect::<Vec<_>>()
            .join("\u{1f}");
        if seen.insert(fingerprint) {
            kept.push(row);
        } else {
            removed += 1;
        }
    }
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn ingestor() -> Ingestor {
        Ingestor::new(PipelineConfig::default())
    }

    #[test]
    fn test_type_inference_and_coercion() {
        let report = ingestor()
            .ingest(
                &upload("category,amount,price,active,day\nA,10,1.5,true,2024-01-01\nB,20,2.5,false,2024-01-02\nC,30,x,yes,2024-01-03\n"),
                &[],
            )
            .unwrap();
        let table = &report.table;
        assert_eq!(table.column("category").unwrap().inferred_type, ColumnType::String);
        assert_eq!(table.column("amount").unwrap().inferred_type, ColumnType::Integer);
        assert_eq!(table.column("active").unwrap().inferred_type, ColumnType::Boolean);
        assert_eq!(table.column("day").unwrap().inferred_type, ColumnType::Date);
        // only 2 of 3 price values parse as float, below the 90% majority
        assert_eq!(table.column("price").unwrap().inferred_type, ColumnType::String);
    }

    #[test]
    fn test_failed_parse_becomes_null_and_is_counted() {
        // 10 values, 9 integers: majority vote assigns integer, "oops" nulls out
        let mut csv = "n\n".to_string();
        for i in 0..9 {
            csv.push_str(&format!("{}\n", i));
        }
        csv.push_str("oops\n");
        let report = ingestor().ingest(&upload(&csv), &[]).unwrap();
        assert_eq!(report.table.column("n").unwrap().inferred_type, ColumnType::Integer);
        assert_eq!(report.table.null_count(0), 1);
        assert_eq!(report.coerced_nulls, vec![("n".to_string(), 1)]);
    }

    #[test]
    fn test_remove_fields_is_case_insensitive_and_tolerates_absent_names() {
        let report = ingestor()
            .ingest(
                &upload("category,amount\nA,10\nB,20\n"),
                &[" CATEGORY ".to_string(), "ghost".to_string()],
            )
            .unwrap();
        assert!(report.table.column("category").is_none());
        assert_eq!(report.table.column_count(), 1);
        assert_eq!(report.unmatched_remove_fields, vec!["ghost".to_string()]);
    }

    #[test]
    fn test_dedup_preserves_first_occurrence_order() {
        let report = ingestor()
            .ingest(&upload("category,amount\nB,20\nA,10\nB,20\nA,10\n"), &[])
            .unwrap();
        assert_eq!(report.table.row_count(), 2);
        assert_eq!(report.duplicates_removed, 2);
        assert_eq!(report.table.rows[0][0].display(), "B");
        assert_eq!(report.table.rows[1][0].display(), "A");
    }

    #[test]
    fn test_all_null_rows_and_columns_are_dropped() {
        let report = ingestor()
            .ingest(&upload("a,b,c\n1,,\n,,\n2,,\n"), &[])
            .unwrap();
        assert_eq!(report.table.column_count(), 1);
        assert_eq!(report.table.row_count(), 2);
    }

    #[test]
    fn test_empty_table_after_cleaning_is_an_error() {
        let result = ingestor().ingest(&upload("a,b\n,\n,\n"), &[]);
        assert!(matches!(result, Err(PipelineError::EmptyTable(_))));
    }

    #[test]
    fn test_unsupported_media_type_is_rejected() {
        let mut bad = upload("a\n1\n");
        bad.media_type = "application/pdf".to_string();
        bad.file_name = "report.pdf".to_string();
        assert!(matches!(
            ingestor().ingest(&bad, &[]),
            Err(PipelineError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_size_ceiling_is_enforced() {
        let mut config = PipelineConfig::default();
        config.max_upload_bytes = 4;
        let result = Ingestor::new(config).ingest(&upload("a,b\n1,2\n"), &[]);
        assert!(matches!(result, Err(PipelineError::UnsupportedInput(_))));
    }

    #[test]
    fn test_reingest_is_deterministic() {
        let csv = "category,amount\nA,10\nB,20\nA,30\n";
        let first = ingestor().ingest(&upload(csv), &[]).unwrap();
        let second = ingestor().ingest(&upload(csv), &[]).unwrap();
        assert_eq!(first.table.records(), second.table.records());
    }
}
