//! Derives insights from a result table, per intent kind.
//!
//! Works only on the already-capped table; it never re-queries. Every ratio
//! goes through one guarded helper, so a zero denominator comes out as
//! `Finding::Undefined` instead of a NaN or a panic. An empty table where a
//! ranking was expected is a no-data answer, not an error; the
//! `AnalysisDegenerate` error is reserved for tables whose shape does not
//! match the intent at all.

use crate::error::{AssistantError, Result};
use crate::intent::{IntentKind, Metric, QueryIntent};
use crate::result_table::{ResultTable, Scalar};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub label: String,
    pub value: f64,
    /// Share of the ranked total, one decimal. None when the total is zero
    /// or shares do not apply to the metric.
    pub share_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finding {
    Count(i64),
    Number(f64),
    /// Rounded to one decimal.
    Percent(f64),
    Undefined,
    Label(String),
    Ranked(Vec<RankedEntry>),
    Trend(TrendDirection),
}

/// Named findings for one turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Insight {
    findings: BTreeMap<String, Finding>,
}

impl Insight {
    pub fn insert(&mut self, name: &str, finding: Finding) {
        self.findings.insert(name.to_string(), finding);
    }

    pub fn get(&self, name: &str) -> Option<&Finding> {
        self.findings.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Buckets whose counts stay within this relative band count as flat.
const FLAT_TOLERANCE: f64 = 0.05;

pub struct ResultAnalyzer;

impl ResultAnalyzer {
    pub fn analyze(intent: &QueryIntent, table: &ResultTable) -> Result<Insight> {
        let mut insight = Insight::default();
        match intent.kind {
            IntentKind::AggregateCount => Self::analyze_aggregate(intent, table, &mut insight)?,
            IntentKind::TopN | IntentKind::Distribution => {
                Self::analyze_ranking(intent, table, &mut insight)?
            }
            IntentKind::RateOrPercentage => Self::analyze_rate(table, &mut insight)?,
            IntentKind::Comparison => Self::analyze_comparison(intent, table, &mut insight)?,
            IntentKind::TimeFiltered => Self::analyze_time(table, &mut insight),
            IntentKind::FreeformDetailed => Self::analyze_freeform(intent, table, &mut insight)?,
        }
        Ok(insight)
    }

    fn analyze_aggregate(
        intent: &QueryIntent,
        table: &ResultTable,
        insight: &mut Insight,
    ) -> Result<()> {
        match &intent.metric {
            Metric::Count => {
                let total = table
                    .value(0, "total")
                    .and_then(Scalar::as_i64)
                    .ok_or_else(|| shape_error("aggregate result is missing its total"))?;
                insight.insert("total", Finding::Count(total));
            }
            Metric::Average(_) => match table.value(0, "average") {
                Some(Scalar::Null) | None => insight.insert("average", Finding::Undefined),
                Some(v) => {
                    let avg = v
                        .as_f64()
                        .ok_or_else(|| shape_error("average is not numeric"))?;
                    insight.insert("average", Finding::Number(round1(avg)));
                }
            },
        }
        Ok(())
    }

    fn analyze_ranking(
        intent: &QueryIntent,
        table: &ResultTable,
        insight: &mut Insight,
    ) -> Result<()> {
        let entries = Self::ranked_entries(intent, table)?;
        if entries.is_empty() {
            insight.insert("no_data", Finding::Label("no rows matched".to_string()));
            insight.insert("ranking", Finding::Ranked(Vec::new()));
            return Ok(());
        }

        insight.insert("top_category", Finding::Label(entries[0].label.clone()));
        insight.insert("top_value", Finding::Number(entries[0].value));
        match entries[0].share_percent {
            Some(share) => insight.insert("top_share_percent", Finding::Percent(share)),
            None => insight.insert("top_share_percent", Finding::Undefined),
        }
        if entries.len() > 1 {
            insight.insert("second_category", Finding::Label(entries[1].label.clone()));
            insight.insert(
                "lead_over_second",
                Finding::Number(entries[0].value - entries[1].value),
            );
        }
        insight.insert("ranking", Finding::Ranked(entries));
        Ok(())
    }

    fn analyze_rate(table: &ResultTable, insight: &mut Insight) -> Result<()> {
        if table.is_empty() {
            return Err(shape_error("rate result has no rows"));
        }
        // SUM over zero matching rows comes back NULL.
        let numerator = match table.value(0, "numerator") {
            Some(Scalar::Null) => 0,
            Some(v) => v
                .as_i64()
                .ok_or_else(|| shape_error("rate numerator is not numeric"))?,
            None => return Err(shape_error("rate result is missing its numerator")),
        };
        let denominator = table
            .value(0, "denominator")
            .and_then(Scalar::as_i64)
            .ok_or_else(|| shape_error("rate result is missing its denominator"))?;

        insight.insert("numerator", Finding::Count(numerator));
        insight.insert("denominator", Finding::Count(denominator));
        insight.insert(
            "percentage",
            percent(numerator as f64, denominator as f64),
        );
        Ok(())
    }

    fn analyze_comparison(
        intent: &QueryIntent,
        table: &ResultTable,
        insight: &mut Insight,
    ) -> Result<()> {
        let entries = Self::ranked_entries(intent, table)?;
        match entries.len() {
            0 => {
                insight.insert("no_data", Finding::Label("no rows matched".to_string()));
            }
            1 => {
                insight.insert("group_a", Finding::Label(entries[0].label.clone()));
                insight.insert("group_a_count", Finding::Count(entries[0].value as i64));
                insight.insert(
                    "missing_group",
                    Finding::Label("only one of the compared groups has data".to_string()),
                );
            }
            _ => {
                let (a, b) = (&entries[0], &entries[1]);
                insight.insert("group_a", Finding::Label(a.label.clone()));
                insight.insert("group_a_count", Finding::Count(a.value as i64));
                insight.insert("group_b", Finding::Label(b.label.clone()));
                insight.insert("group_b_count", Finding::Count(b.value as i64));
                insight.insert("delta", Finding::Number(a.value - b.value));
                insight.insert(
                    "relative_change_percent",
                    percent(a.value - b.value, b.value),
                );
            }
        }
        Ok(())
    }

    fn analyze_time(table: &ResultTable, insight: &mut Insight) {
        // Bucketed shape: (bucket, request_count) in bucket order.
        if table.columns.len() == 2 && table.row_count() >= 2 {
            let first = &table.rows[0];
            let last = &table.rows[table.row_count() - 1];
            let first_value = first[1].as_f64().unwrap_or(0.0);
            let last_value = last[1].as_f64().unwrap_or(0.0);

            let base = first_value.max(1.0);
            let direction = if ((last_value - first_value) / base).abs() < FLAT_TOLERANCE {
                TrendDirection::Flat
            } else if last_value > first_value {
                TrendDirection::Rising
            } else {
                TrendDirection::Falling
            };
            insight.insert("trend_direction", Finding::Trend(direction));
            insight.insert("first_bucket", Finding::Label(first[0].to_string()));
            insight.insert("first_bucket_count", Finding::Count(first_value as i64));
            insight.insert("last_bucket", Finding::Label(last[0].to_string()));
            insight.insert("last_bucket_count", Finding::Count(last_value as i64));
            let total: f64 = table.rows.iter().filter_map(|r| r[1].as_f64()).sum();
            insight.insert("total", Finding::Count(total as i64));
        } else if table.columns.len() == 2 && table.row_count() == 1 {
            let only = table.rows[0][1].as_i64().unwrap_or(0);
            insight.insert("total", Finding::Count(only));
        } else if let Some(total) = table.value(0, "total").and_then(Scalar::as_i64) {
            insight.insert("total", Finding::Count(total));
        } else {
            insight.insert("no_data", Finding::Label("no rows matched".to_string()));
        }
    }

    fn analyze_freeform(
        intent: &QueryIntent,
        table: &ResultTable,
        insight: &mut Insight,
    ) -> Result<()> {
        if intent.dimension.is_some() {
            return Self::analyze_ranking(intent, table, insight);
        }
        let total = table
            .value(0, "total")
            .and_then(Scalar::as_i64)
            .ok_or_else(|| shape_error("summary result is missing its total"))?;
        insight.insert("total", Finding::Count(total));
        for name in ["average_days_to_close", "min_days_to_close", "max_days_to_close"] {
            match table.value(0, name) {
                Some(Scalar::Null) | None => insight.insert(name, Finding::Undefined),
                Some(v) => match v.as_f64() {
                    Some(value) => insight.insert(name, Finding::Number(round1(value))),
                    None => insight.insert(name, Finding::Undefined),
                },
            }
        }
        Ok(())
    }

    /// Rows of (dimension, value) in table order, with shares of the total
    /// when the metric is a count.
    fn ranked_entries(intent: &QueryIntent, table: &ResultTable) -> Result<Vec<RankedEntry>> {
        let dim = intent
            .dimension
            .as_deref()
            .ok_or_else(|| shape_error("ranking without a dimension"))?;
        let dim_idx = table
            .column_index(dim)
            .ok_or_else(|| shape_error("result is missing the grouped column"))?;
        let value_column = match &intent.metric {
            Metric::Count => "request_count",
            Metric::Average(_) => "average",
        };
        let value_idx = table
            .column_index(value_column)
            .ok_or_else(|| shape_error("result is missing the ranked value"))?;

        let values: Vec<(String, f64)> = table
            .rows
            .iter()
            .map(|row| {
                (
                    row[dim_idx].to_string(),
                    row[value_idx].as_f64().unwrap_or(0.0),
                )
            })
            .collect();

        let shares_apply = matches!(intent.metric, Metric::Count);
        let total: f64 = values.iter().map(|(_, v)| v).sum();
        Ok(values
            .into_iter()
            .map(|(label, value)| RankedEntry {
                share_percent: if shares_apply && total > 0.0 {
                    Some(round1(value / total * 100.0))
                } else {
                    None
                },
                label,
                value,
            })
            .collect())
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn percent(numerator: f64, denominator: f64) -> Finding {
    if denominator == 0.0 {
        return Finding::Undefined;
    }
    let ratio = numerator / denominator * 100.0;
    if ratio.is_finite() {
        Finding::Percent(round1(ratio))
    } else {
        Finding::Undefined
    }
}

fn shape_error(detail: &str) -> AssistantError {
    AssistantError::AnalysisDegenerate(detail.to_string())
}
