//! Relation Miner - mines (categorical, numeric) column pairs into pivot tables
//!
//! Candidates are bounded by the requested relation count; running out of
//! valid candidates is a reportable condition, never an error.

use crate::config::PipelineConfig;
use crate::table::{CanonicalTable, ColumnType, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Aggregate headers every pair pivot carries, in order.
pub const PAIR_AGGREGATES: [&str; 3] = ["count", "sum", "mean"];

/// One aggregated group row. `values` is positionally aligned with the
/// pivot's `column_headers`, so the keys-equal-headers invariant holds by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotRow {
    pub index_value: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotTable {
    pub title: String,
    pub index_column: String,
    /// Numeric source column the aggregates are computed over.
    pub value_column: String,
    pub column_headers: Vec<String>,
    pub rows: Vec<PivotRow>,
}

impl PivotTable {
    pub fn value(&self, row: &PivotRow, header: &str) -> Option<f64> {
        self.column_headers
            .iter()
            .position(|h| h == header)
            .map(|idx| row.values[idx])
    }

    /// Sum of one aggregate across all index groups.
    pub fn column_total(&self, header: &str) -> Option<f64> {
        let idx = self.column_headers.iter().position(|h| h == header)?;
        Some(self.rows.iter().map(|row| row.values[idx]).sum())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedRelations {
    pub pivots: Vec<PivotTable>,
    pub generated_relations: usize,
}

struct Candidate {
    categorical: usize,
    numeric: usize,
    score: f64,
}

pub struct RelationMiner {
    config: PipelineConfig,
}

impl RelationMiner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn mine(&self, table: &CanonicalTable, requested: usize) -> MinedRelations {
        if table.row_count() == 0 {
            return MinedRelations { pivots: vec![], generated_relations: 0 };
        }

        let categorical = self.categorical_columns(table);
        let numeric = self.numeric_columns(table);
        let candidates = self.rank_candidates(table, &categorical, &numeric);

        // No padding: zero valid pairs means zero relations, and the
        // shortfall is reported through the requested/generated counts.
        let pivots: Vec<PivotTable> = candidates
            .iter()
            .take(requested)
            .map(|c| aggregate_pair(table, c.categorical, c.numeric))
            .collect();

        let generated = pivots.len();
        debug!(requested, generated, "mined relations");
        MinedRelations { pivots, generated_relations: generated }
    }

    /// Columns usable as a group key: string/boolean columns, or discrete
    /// integer columns, with distinct count in [2, ceiling]. Columns whose
    /// distinct count approaches the row count are identifiers, but only
    /// once there are enough rows for the ratio to mean anything.
    fn categorical_columns(&self, table: &CanonicalTable) -> Vec<usize> {
        let rows = table.row_count();
        table
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, column)| {
                let eligible = matches!(
                    column.inferred_type,
                    ColumnType::String | ColumnType::Boolean | ColumnType::Integer
                );
                if !eligible {
                    return false;
                }
                let distinct = table.distinct_count(*idx);
                let identifier = rows >= self.config.identifier_min_rows
                    && (distinct as f64) >= self.config.identifier_ratio * rows as f64;
                distinct >= 2 && distinct <= self.config.cardinality_ceiling && !identifier
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn numeric_columns(&self, table: &CanonicalTable) -> Vec<usize> {
        table
            .columns
            .iter()
            .enumerate()
            .filter(|(idx, column)| {
                column.inferred_type.is_numeric() && variance(&table.numeric_values(*idx)) > 0.0
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Score = inverse distinct count x normalized variance rank; ties keep
    /// source column order (stable sort).
    fn rank_candidates(
        &self,
        table: &CanonicalTable,
        categorical: &[usize],
        numeric: &[usize],
    ) -> Vec<Candidate> {
        let mut by_variance: Vec<usize> = numeric.to_vec();
        by_variance.sort_by(|a, b| {
            variance(&table.numeric_values(*a))
                .partial_cmp(&variance(&table.numeric_values(*b)))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let variance_rank = |idx: usize| -> f64 {
            let position = by_variance.iter().position(|n| *n == idx).unwrap_or(0);
            (position + 1) as f64 / by_variance.len().max(1) as f64
        };

        let mut candidates = Vec::new();
        for &cat in categorical {
            for &num in numeric {
                if cat == num {
                    continue;
                }
                let inverse_cardinality = 1.0 / table.distinct_count(cat) as f64;
                candidates.push(Candidate {
                    categorical: cat,
                    numeric: num,
                    score: inverse_cardinality * variance_rank(num),
                });
            }
        }
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }
}

/// Aggregates are never NaN or negative zero.
fn normalize_aggregate(value: f64) -> f64 {
    if value.is_nan() || value == 0.0 {
        0.0
    } else {
        value
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Group rows by categorical value (first-occurrence order) and compute
/// count/sum/mean over the non-null numeric values of each group.
fn aggregate_pair(table: &CanonicalTable, cat: usize, num: usize) -> PivotTable {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<f64>> = std::collections::HashMap::new();

    for row in &table.rows {
        let key = match &row[cat] {
            Value::Null => continue,
            value => value.display(),
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        let bucket = groups.entry(key).or_default();
        if let Some(n) = row[num].as_f64() {
            bucket.push(n);
        }
    }

    let rows = order
        .into_iter()
        .map(|key| {
            let values = &groups[&key];
            let count = values.len() as f64;
            let sum: f64 = values.iter().sum();
            let mean = if values.is_empty() { 0.0 } else { sum / count };
            PivotRow {
                index_value: key,
                values: vec![
                    normalize_aggregate(count),
                    normalize_aggregate(sum),
                    normalize_aggregate(mean),
                ],
            }
        })
        .collect();

    PivotTable {
        title: format!("{} by {}", table.columns[num].name, table.columns[cat].name),
        index_column: table.columns[cat].name.clone(),
        value_column: table.columns[num].name.clone(),
        column_headers: PAIR_AGGREGATES.iter().map(|s| s.to_string()).collect(),
        rows,
    }
}
