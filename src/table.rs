//! Canonical Table - normalized, rectangular, typed row/column model
//!
//! Every downstream component branches on the `ColumnType` tag decided once
//! during ingestion instead of re-inspecting raw values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Column type assigned by majority-vote inference during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Unknown,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell, if it carries one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Canonical display form, used for group keys and dedup fingerprints.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                // Keep integral floats stable across platforms
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Column descriptor in source order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub inferred_type: ColumnType,
    pub nullable: bool,
}

/// The normalized table produced by ingestion. Rows are stored positionally,
/// aligned to `columns`, which makes the rectangular invariant structural:
/// a row cannot carry a key outside the descriptor set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

impl CanonicalTable {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Index of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Iterate the cells of one column in row order.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// Non-null numeric values of a column in row order.
    pub fn numeric_values(&self, idx: usize) -> Vec<f64> {
        self.column_values(idx).filter_map(|v| v.as_f64()).collect()
    }

    pub fn null_count(&self, idx: usize) -> usize {
        self.column_values(idx).filter(|v| v.is_null()).count()
    }

    /// Number of distinct non-null display values in a column.
    pub fn distinct_count(&self, idx: usize) -> usize {
        let mut seen = std::collections::HashSet::new();
        for value in self.column_values(idx) {
            if !value.is_null() {
                seen.insert(value.display());
            }
        }
        seen.len()
    }

    /// One row as a name -> JSON value record (API shape of the cleaned
    /// data). Key order follows the column descriptors; this relies on
    /// serde_json's `preserve_order` feature.
    pub fn row_record(&self, row_idx: usize) -> serde_json::Map<String, serde_json::Value> {
        let mut record = serde_json::Map::new();
        for (idx, column) in self.columns.iter().enumerate() {
            record.insert(column.name.clone(), self.rows[row_idx][idx].to_json());
        }
        record
    }

    /// All rows as records, preserving row order.
    pub fn records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.rows.len()).map(|i| self.row_record(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> CanonicalTable {
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
                    nullable: true,
                },
            ],
            vec![
                vec![Value::Text("A".to_string()), Value::Integer(10)],
                vec![Value::Text("B".to_string()), Value::Null],
                vec![Value::Text("A".to_string()), Value::Integer(30)],
            ],
        )
    }

    #[test]
    fn test_column_lookup_and_counts() {
        let table = sample_table();
        assert_eq!(table.column_index("amount"), Some(1));
        assert_eq!(table.column_index("missing"), None);
        assert_eq!(table.null_count(1), 1);
        assert_eq!(table.distinct_count(0), 2);
        assert_eq!(table.numeric_values(1), vec![10.0, 30.0]);
    }

    #[test]
    fn test_row_record_keys_match_descriptors() {
        let table = sample_table();
        let record = table.row_record(1);
        let keys: Vec<&String> = record.keys().collect();
        assert_eq!(keys, vec!["category", "amount"]);
        assert_eq!(record["amount"], serde_json::Value::Null);
    }

    #[test]
    fn test_value_display_is_canonical() {
        assert_eq!(Value::Float(3.0).display(), "3.0");
        assert_eq!(Value::Integer(3).display(), "3");
        assert_eq!(Value::Null.display(), "");
    }
}
