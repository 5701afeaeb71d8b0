//! Chart Recommender - scores chart candidates per column-type combination
//!
//! Each combination maps to a chart type with a base score, discounted on
//! cardinality mismatch and boosted when the pair also backs a mined pivot.

use crate::config::PipelineConfig;
use crate::relations::PivotTable;
use crate::table::{CanonicalTable, ColumnType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRecommendation {
    pub chart_type: ChartType,
    pub score: f64,
    pub priority: Priority,
    pub description: String,
    pub reasoning: String,
    /// Pivot this chart can be bound to in the workbook, when one matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pivot_title: Option<String>,
}

fn priority_for(score: f64) -> Priority {
    if score >= 0.7 {
        Priority::High
    } else if score >= 0.4 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub struct ChartRecommender {
    config: PipelineConfig,
}

impl ChartRecommender {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn recommend(
        &self,
        table: &CanonicalTable,
        pivots: &[PivotTable],
    ) -> Vec<ChartRecommendation> {
        let mut recommendations = Vec::new();

        let date_columns: Vec<&str> = typed_columns(table, |t| t == ColumnType::Date);
        let numeric_columns: Vec<&str> = typed_columns(table, |t| t.is_numeric());
        let categorical_columns: Vec<&str> = typed_columns(table, |t| t == ColumnType::String);

        // date x numeric -> line
        if let (Some(date), Some(numeric)) = (date_columns.first(), numeric_columns.first()) {
            let score = clamp(0.85);
            recommendations.push(ChartRecommendation {
                chart_type: ChartType::Line,
                score,
                priority: priority_for(score),
                description: "Shows how a measure moves over time".to_string(),
                reasoning: format!("Date column '{}' paired with numeric '{}'", date, numeric),
                pivot_title: None,
            });
        }

        // categorical x numeric -> bar, boosted when a pivot backs the pair
        if let Some(pivot) = pivots.first() {
            let mut score = 0.8;
            score += 0.1; // the pair was selected by the relation miner
            let score = clamp(score);
            recommendations.push(ChartRecommendation {
                chart_type: ChartType::Bar,
                score,
                priority: priority_for(score),
                description: "Compares a measure across categories".to_string(),
                reasoning: format!(
                    "'{}' grouped by '{}' is a mined relation",
                    pivot.value_column, pivot.index_column
                ),
                pivot_title: Some(pivot.title.clone()),
            });
        } else if let (Some(cat), Some(numeric)) =
            (categorical_columns.first(), numeric_columns.first())
        {
            let score = clamp(0.8);
            recommendations.push(ChartRecommendation {
                chart_type: ChartType::Bar,
                score,
                priority: priority_for(score),
                description: "Compares a measure across categories".to_string(),
                reasoning: format!("Categorical '{}' paired with numeric '{}'", cat, numeric),
                pivot_title: None,
            });
        }

        // numeric x numeric -> scatter, boosted by correlation magnitude
        if numeric_columns.len() >= 2 {
            let a = table.column_index(numeric_columns[0]).unwrap_or(0);
            let b = table.column_index(numeric_columns[1]).unwrap_or(0);
            let correlation = crate::insights::pearson(table, a, b).unwrap_or(0.0);
            let score = clamp(0.7 + 0.1 * correlation.abs());
            let reasoning = if correlation.abs() >= self.config.correlation_threshold {
                format!(
                    "Numeric columns '{}' and '{}' are correlated (r = {:.2})",
                    numeric_columns[0], numeric_columns[1], correlation
                )
            } else {
                format!(
                    "Numeric columns '{}' and '{}' available",
                    numeric_columns[0], numeric_columns[1]
                )
            };
            recommendations.push(ChartRecommendation {
                chart_type: ChartType::Scatter,
                score,
                priority: priority_for(score),
                description: "Reveals the relationship between two measures".to_string(),
                reasoning,
                pivot_title: None,
            });
        }

        // single categorical distribution -> pie, discouraged at high cardinality
        if let Some(cat) = categorical_columns.first() {
            let idx = table.column_index(cat).unwrap_or(0);
            let distinct = table.distinct_count(idx);
            if distinct >= 2 {
                let mut score = 0.6;
                if distinct > self.config.pie_category_limit {
                    score -= 0.3;
                }
                let score = clamp(score);
                let pivot_title = pivots
                    .iter()
                    .find(|p| p.index_column == *cat)
                    .map(|p| p.title.clone());
                recommendations.push(ChartRecommendation {
                    chart_type: ChartType::Pie,
                    score,
                    priority: priority_for(score),
                    description: "Shows the share of each category".to_string(),
                    reasoning: format!("Categorical '{}' has {} distinct values", cat, distinct),
                    pivot_title,
                });
            }
        }

        recommendations.retain(|r| r.score >= self.config.chart_score_floor);
        recommendations.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations.truncate(self.config.max_chart_recommendations);
        recommendations
    }
}

fn typed_columns(table: &CanonicalTable, predicate: impl Fn(ColumnType) -> bool) -> Vec<&str> {
    table
        .columns
        .iter()
        .filter(|c| predicate(c.inferred_type))
        .map(|c| c.name.as_str())
        .collect()
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}
