//! Insight Engine - heuristic statistical findings over the canonical table
//!
//! Deterministic: identical input yields the same ordered insight list.
//! Categories are emitted in a fixed order (data quality, outliers,
//! correlation, trend, distribution), columns in source order within each.

use crate::config::PipelineConfig;
use crate::table::{CanonicalTable, ColumnType};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    DataQuality,
    Outlier,
    Correlation,
    Trend,
    Distribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub category: InsightCategory,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Cleanup facts carried over from ingestion.
#[derive(Debug, Clone, Default)]
pub struct CleanupFacts {
    pub duplicates_removed: usize,
    pub unmatched_remove_fields: Vec<String>,
    /// Per-column count of values coerced to null under the inferred type.
    pub coerced_nulls: Vec<(String, usize)>,
}

pub struct InsightEngine {
    config: PipelineConfig,
}

impl InsightEngine {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, table: &CanonicalTable, facts: &CleanupFacts) -> Vec<Insight> {
        let mut insights = Vec::new();
        insights.extend(self.null_rate_insights(table));
        insights.extend(self.cleanup_insights(table, facts));
        insights.extend(self.outlier_insights(table));
        insights.extend(self.correlation_insights(table));
        insights.extend(self.trend_insights(table));
        insights.extend(self.distribution_insights(table));
        insights
    }

    fn null_rate_insights(&self, table: &CanonicalTable) -> Vec<Insight> {
        let rows = table.row_count();
        if rows == 0 {
            return vec![];
        }
        table
            .columns
            .iter()
            .enumerate()
            .filter_map(|(idx, column)| {
                let ratio = table.null_count(idx) as f64 / rows as f64;
                if ratio <= self.config.null_rate_threshold {
                    return None;
                }
                Some(Insight {
                    category: InsightCategory::DataQuality,
                    title: "High null rate".to_string(),
                    message: format!(
                        "Column '{}' is {:.1}% null",
                        column.name,
                        ratio * 100.0
                    ),
                    severity: Severity::Warning,
                    confidence: ratio,
                    recommendation: Some(
                        "Consider imputing missing values or dropping the column".to_string(),
                    ),
                })
            })
            .collect()
    }

    fn cleanup_insights(&self, table: &CanonicalTable, facts: &CleanupFacts) -> Vec<Insight> {
        let mut insights = Vec::new();
        if facts.duplicates_removed > 0 {
            let before = table.row_count() + facts.duplicates_removed;
            insights.push(Insight {
                category: InsightCategory::DataQuality,
                title: "Duplicate rows removed".to_string(),
                message: format!(
                    "Collapsed {} exact-duplicate rows ({:.1}% of the source)",
                    facts.duplicates_removed,
                    facts.duplicates_removed as f64 / before as f64 * 100.0
                ),
                severity: Severity::Info,
                confidence: 1.0,
                recommendation: None,
            });
        }
        for field in &facts.unmatched_remove_fields {
            insights.push(Insight {
                category: InsightCategory::DataQuality,
                title: "Removed field not found".to_string(),
                message: format!(
                    "Field '{}' was requested for removal but is not present in the source",
                    field
                ),
                severity: Severity::Info,
                confidence: 1.0,
                recommendation: None,
            });
        }
        for (column, count) in &facts.coerced_nulls {
            insights.push(Insight {
                category: InsightCategory::DataQuality,
                title: "Values coerced to null".to_string(),
                message: format!(
                    "Column '{}' had {} value(s) that did not parse under its inferred type",
                    column, count
                ),
                severity: Severity::Info,
                confidence: 1.0,
                recommendation: Some(
                    "Check the source for mixed formats in this column".to_string(),
                ),
            });
        }
        insights
    }

    fn outlier_insights(&self, table: &CanonicalTable) -> Vec<Insight> {
        let sigma = self.config.outlier_sigma;
        table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.inferred_type.is_numeric())
            .filter_map(|(idx, column)| {
                let values = table.numeric_values(idx);
                if values.len() < 3 {
                    return None;
                }
                let mean = mean(&values);
                let std_dev = std_dev(&values, mean);
                if std_dev == 0.0 {
                    return None;
                }
                let mut outliers = 0usize;
                let mut max_z = 0.0f64;
                for value in &values {
                    let z = ((value - mean) / std_dev).abs();
                    if z > sigma {
                        outliers += 1;
                    }
                    max_z = max_z.max(z);
                }
                if outliers == 0 {
                    return None;
                }
                let severity = if max_z > 2.0 * sigma {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                Some(Insight {
                    category: InsightCategory::Outlier,
                    title: "Outliers detected".to_string(),
                    message: format!(
                        "Column '{}' has {} value(s) beyond {:.1} standard deviations (max {:.1} sigma)",
                        column.name, outliers, sigma, max_z
                    ),
                    severity,
                    confidence: (max_z / (2.0 * sigma)).min(0.95),
                    recommendation: Some(
                        "Review extreme values for data-entry errors or genuine anomalies"
                            .to_string(),
                    ),
                })
            })
            .collect()
    }

    fn correlation_insights(&self, table: &CanonicalTable) -> Vec<Insight> {
        let numeric: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.inferred_type.is_numeric())
            .map(|(idx, _)| idx)
            .collect();

        let mut insights = Vec::new();
        for pair in numeric.iter().combinations(2) {
            let (a, b) = (*pair[0], *pair[1]);
            let Some(r) = pearson(table, a, b) else { continue };
            if r.abs() < self.config.correlation_threshold {
                continue;
            }
            let direction = if r > 0.0 { "positive" } else { "negative" };
            insights.push(Insight {
                category: InsightCategory::Correlation,
                title: "Correlated columns".to_string(),
                message: format!(
                    "'{}' and '{}' show a {} correlation (r = {:.2})",
                    table.columns[a].name, table.columns[b].name, direction, r
                ),
                severity: Severity::Info,
                confidence: r.abs().min(1.0),
                recommendation: None,
            });
        }
        insights
    }

    /// Bucket the first three numeric columns over the first date column and
    /// flag monotonic movement of the bucket means.
    fn trend_insights(&self, table: &CanonicalTable) -> Vec<Insight> {
        let Some(date_idx) = table
            .columns
            .iter()
            .position(|c| c.inferred_type == ColumnType::Date)
        else {
            return vec![];
        };

        let numeric: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.inferred_type.is_numeric())
            .map(|(idx, _)| idx)
            .take(3)
            .collect();

        let mut insights = Vec::new();
        for num_idx in numeric {
            let mut buckets: HashMap<chrono::NaiveDate, Vec<f64>> = HashMap::new();
            for row in &table.rows {
                let (Some(date), Some(value)) = (row[date_idx].as_date(), row[num_idx].as_f64())
                else {
                    continue;
                };
                buckets.entry(date).or_default().push(value);
            }
            if buckets.len() < self.config.trend_min_buckets {
                continue;
            }
            let mut dates: Vec<chrono::NaiveDate> = buckets.keys().copied().collect();
            dates.sort();
            let means: Vec<f64> = dates.iter().map(|d| mean(&buckets[d])).collect();

            let Some(direction) = monotonic_direction(&means) else { continue };
            let (slope, r_squared) = linear_fit(&means);
            if slope == 0.0 || r_squared < self.config.trend_min_r_squared {
                continue;
            }
            insights.push(Insight {
                category: InsightCategory::Trend,
                title: format!("{} trend detected", capitalize(direction)),
                message: format!(
                    "'{}' is monotonically {} over '{}' across {} time buckets (R\u{b2} = {:.2})",
                    table.columns[num_idx].name,
                    direction,
                    table.columns[date_idx].name,
                    dates.len(),
                    r_squared
                ),
                severity: Severity::Info,
                confidence: r_squared.min(0.95),
                recommendation: Some(format!(
                    "Investigate the drivers behind the {} movement of '{}'",
                    direction, table.columns[num_idx].name
                )),
            });
        }
        insights
    }

    fn distribution_insights(&self, table: &CanonicalTable) -> Vec<Insight> {
        let mut insights = Vec::new();

        // Dominant category per categorical column
        for (idx, column) in table.columns.iter().enumerate() {
            if column.inferred_type != ColumnType::String {
                continue;
            }
            let mut counts: HashMap<String, usize> = HashMap::new();
            let mut order: Vec<String> = Vec::new();
            let mut total = 0usize;
            for value in table.column_values(idx) {
                if value.is_null() {
                    continue;
                }
                let key = value.display();
                if !counts.contains_key(&key) {
                    order.push(key.clone());
                }
                *counts.entry(key).or_insert(0) += 1;
                total += 1;
            }
            if total == 0 || counts.len() < 2 {
                continue;
            }
            let top = order
                .iter()
                .max_by_key(|key| counts[*key])
                .cloned()
                .unwrap_or_default();
            let share = counts[&top] as f64 / total as f64;
            if share > self.config.dominant_category_ratio {
                insights.push(Insight {
                    category: InsightCategory::Distribution,
                    title: "Dominant category".to_string(),
                    message: format!(
                        "Column '{}' is dominated by '{}' ({:.1}% of values)",
                        column.name,
                        top,
                        share * 100.0
                    ),
                    severity: Severity::Info,
                    confidence: 0.9,
                    recommendation: Some(
                        "Consider stratified analysis; the category balance is skewed".to_string(),
                    ),
                });
            }
        }

        // High variability per numeric column (coefficient of variation)
        for (idx, column) in table.columns.iter().enumerate() {
            if !column.inferred_type.is_numeric() {
                continue;
            }
            let values = table.numeric_values(idx);
            if values.len() < 2 {
                continue;
            }
            let m = mean(&values);
            if m == 0.0 {
                continue;
            }
            let cv = std_dev(&values, m) / m.abs() * 100.0;
            if cv > self.config.variability_threshold {
                insights.push(Insight {
                    category: InsightCategory::Distribution,
                    title: "High variability".to_string(),
                    message: format!(
                        "Column '{}' shows high variability (CV = {:.1}%)",
                        column.name, cv
                    ),
                    severity: Severity::Info,
                    confidence: 0.8,
                    recommendation: Some(
                        "Consider segmenting the data or investigating sources of spread"
                            .to_string(),
                    ),
                });
            }
        }

        insights
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Pearson correlation over rows where both columns are non-null.
pub(crate) fn pearson(table: &CanonicalTable, a: usize, b: usize) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = table
        .rows
        .iter()
        .filter_map(|row| Some((row[a].as_f64()?, row[b].as_f64()?)))
        .collect();
    if pairs.len() < 3 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in &pairs {
        covariance += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(covariance / (var_a.sqrt() * var_b.sqrt()))
}

/// "increasing" / "decreasing" when the series moves in one direction only
/// (plateaus allowed, at least one strict step).
fn monotonic_direction(values: &[f64]) -> Option<&'static str> {
    let mut increasing = false;
    let mut decreasing = false;
    for window in values.windows(2) {
        if window[1] > window[0] {
            increasing = true;
        } else if window[1] < window[0] {
            decreasing = true;
        }
    }
    match (increasing, decreasing) {
        (true, false) => Some("increasing"),
        (false, true) => Some("decreasing"),
        _ => None,
    }
}

/// Least-squares fit of values against their index; returns (slope, r-squared).
fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, 0.0);
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = mean(values);
    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        ss_xy += dx * dy;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
    }
    if ss_xx == 0.0 || ss_yy == 0.0 {
        return (0.0, 0.0);
    }
    let slope = ss_xy / ss_xx;
    let r_squared = (ss_xy * ss_xy) / (ss_xx * ss_yy);
    (slope, r_squared)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{ColumnDescriptor, Value};
    use chrono::NaiveDate;

    fn descriptor(name: &str, inferred_type: ColumnType) -> ColumnDescriptor {
        ColumnDescriptor { name: name.to_string(), inferred_type, nullable: true }
    }

    fn engine() -> InsightEngine {
        InsightEngine::new(PipelineConfig::default())
    }

    fn date(day: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(2024, 1, day).unwrap())
    }

    #[test]
    fn test_null_rate_above_threshold_warns_with_ratio_confidence() {
        let table = CanonicalTable::new(
            vec![descriptor("sparse", ColumnType::Integer)],
            vec![
                vec![Value::Integer(1)],
                vec![Value::Null],
                vec![Value::Null],
                vec![Value::Integer(4)],
            ],
        );
        let insights = engine().analyze(&table, &CleanupFacts::default());
        let null_insight = insights
            .iter()
            .find(|i| i.title == "High null rate")
            .expect("null-rate insight");
        assert_eq!(null_insight.severity, Severity::Warning);
        assert!((null_insight.confidence - 0.5).abs() < 1e-9);
        assert!(null_insight.message.contains("50.0%"));
    }

    #[test]
    fn test_outlier_detection_flags_extreme_values() {
        let mut rows: Vec<Vec<Value>> = (0..20).map(|_| vec![Value::Float(10.0)]).collect();
        rows.push(vec![Value::Float(11.0)]);
        rows.push(vec![Value::Float(9.0)]);
        rows.push(vec![Value::Float(500.0)]);
        let table = CanonicalTable::new(vec![descriptor("metric", ColumnType::Float)], rows);
        let insights = engine().analyze(&table, &CleanupFacts::default());
        let outlier = insights
            .iter()
            .find(|i| i.category == InsightCategory::Outlier)
            .expect("outlier insight");
        assert!(matches!(outlier.severity, Severity::Warning | Severity::Error));
        assert!(outlier.message.contains("metric"));
    }

    #[test]
    fn test_correlated_columns_are_reported_with_magnitude_confidence() {
        let rows: Vec<Vec<Value>> = (0..10)
            .map(|i| vec![Value::Float(i as f64), Value::Float(2.0 * i as f64 + 1.0)])
            .collect();
        let table = CanonicalTable::new(
            vec![descriptor("x", ColumnType::Float), descriptor("y", ColumnType::Float)],
            rows,
        );
        let insights = engine().analyze(&table, &CleanupFacts::default());
        let correlation = insights
            .iter()
            .find(|i| i.category == InsightCategory::Correlation)
            .expect("correlation insight");
        assert!(correlation.confidence > 0.99);
        assert!(correlation.message.contains("positive"));
    }

    #[test]
    fn test_trend_requires_date_column() {
        let table = CanonicalTable::new(
            vec![
                descriptor("day", ColumnType::Date),
                descriptor("amount", ColumnType::Integer),
            ],
            vec![
                vec![date(1), Value::Integer(10)],
                vec![date(2), Value::Integer(20)],
                vec![date(3), Value::Integer(30)],
                vec![date(4), Value::Integer(40)],
            ],
        );
        let insights = engine().analyze(&table, &CleanupFacts::default());
        let trend = insights
            .iter()
            .find(|i| i.category == InsightCategory::Trend)
            .expect("trend insight");
        assert!(trend.message.contains("increasing"));
        assert!(trend.recommendation.is_some());

        // Same numbers without the date column: no trend insight
        let without_date = CanonicalTable::new(
            vec![descriptor("amount", ColumnType::Integer)],
            vec![
                vec![Value::Integer(10)],
                vec![Value::Integer(20)],
                vec![Value::Integer(30)],
                vec![Value::Integer(40)],
            ],
        );
        let insights = engine().analyze(&without_date, &CleanupFacts::default());
        assert!(insights.iter().all(|i| i.category != InsightCategory::Trend));
    }

    #[test]
    fn test_cleanup_facts_produce_info_insights() {
        let table = CanonicalTable::new(
            vec![descriptor("a", ColumnType::Integer)],
            vec![vec![Value::Integer(1)]],
        );
        let facts = CleanupFacts {
            duplicates_removed: 3,
            unmatched_remove_fields: vec!["ghost".to_string()],
            coerced_nulls: vec![("a".to_string(), 2)],
        };
        let insights = engine().analyze(&table, &facts);
        assert!(insights.iter().any(|i| i.title == "Duplicate rows removed"));
        let unmatched = insights
            .iter()
            .find(|i| i.title == "Removed field not found")
            .expect("unmatched remove_fields insight");
        assert_eq!(unmatched.severity, Severity::Info);
        assert!(unmatched.message.contains("ghost"));
        let coerced = insights
            .iter()
            .find(|i| i.title == "Values coerced to null")
            .expect("coerced-null insight");
        assert!(coerced.message.contains("2 value(s)"));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let rows: Vec<Vec<Value>> = (0..15)
            .map(|i| {
                vec![
                    Value::Text(if i % 4 == 0 { "A" } else { "B" }.to_string()),
                    Value::Float(i as f64 * 1.7),
                    Value::Float(i as f64 * -0.9 + 30.0),
                ]
            })
            .collect();
        let table = CanonicalTable::new(
            vec![
                descriptor("group", ColumnType::String),
                descriptor("up", ColumnType::Float),
                descriptor("down", ColumnType::Float),
            ],
            rows,
        );
        let first = engine().analyze(&table, &CleanupFacts::default());
        let second = engine().analyze(&table, &CleanupFacts::default());
        let render = |insights: &[Insight]| {
            insights
                .iter()
                .map(|i| format!("{:?}|{}|{}", i.category, i.title, i.message))
                .collect::<Vec<_>>()
        };
        assert_eq!(render(&first), render(&second));
    }
}
