//! Final answer text and chart selection.
//!
//! Simple answers state the headline number or ranking in a sentence or
//! two; detailed answers add secondary observations drawn from the insight.
//! The executed statement is always appended verbatim for transparency, and
//! a caveat sentence is added whenever the result was truncated at the row
//! cap.

use crate::analyzer::{Finding, Insight, TrendDirection};
use crate::intent::{Complexity, IntentKind, Metric, QueryIntent};
use crate::result_table::ResultTable;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A pie stays readable only up to this many slices; beyond it, bar.
const PIE_CARDINALITY_MAX: usize = 8;
/// Most labels a chart descriptor carries.
const CHART_LABEL_MAX: usize = 20;
/// Most entries spelled out in a detailed ranking sentence.
const RANKING_PREVIEW_MAX: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Bar,
    Pie,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDescriptor {
    pub chart_type: ChartType,
    pub x_field: String,
    pub y_field: String,
    pub labels: Vec<String>,
}

pub struct ResponseComposer;

impl ResponseComposer {
    pub fn compose(
        intent: &QueryIntent,
        insight: &Insight,
        table: &ResultTable,
        executed_query: &str,
    ) -> (String, Option<ChartDescriptor>) {
        let mut parts: Vec<String> = Vec::new();

        if insight.get("no_data").is_some() {
            parts.push("No data matched your question.".to_string());
        } else {
            parts.push(Self::headline(intent, insight));
            if intent.complexity == Complexity::Detailed {
                parts.extend(Self::secondary_observations(intent, insight));
            }
        }

        if table.truncated {
            parts.push(format!(
                "Note: the result hit the {}-row cap; figures reflect only the first {} rows.",
                table.row_count(),
                table.row_count()
            ));
        }

        parts.push(format!("Query used: {}", executed_query));
        (parts.join("\n"), Self::select_chart(intent, table))
    }

    fn headline(intent: &QueryIntent, insight: &Insight) -> String {
        match intent.kind {
            IntentKind::AggregateCount => match &intent.metric {
                Metric::Count => match count_of(insight, "total") {
                    Some(n) => format!("A total of {} service requests match.", group_digits(n)),
                    None => "No total could be computed.".to_string(),
                },
                Metric::Average(column) => match insight.get("average") {
                    Some(Finding::Number(v)) => {
                        format!("The average {} is {}.", humanize(column), v)
                    }
                    _ => format!(
                        "The average {} is undefined because no rows matched.",
                        humanize(column)
                    ),
                },
            },

            IntentKind::TopN | IntentKind::Distribution | IntentKind::FreeformDetailed
                if insight.get("top_category").is_some() =>
            {
                let top = label_of(insight, "top_category").unwrap_or_default();
                let value = number_of(insight, "top_value").unwrap_or(0.0);
                match insight.get("top_share_percent") {
                    Some(Finding::Percent(share)) => format!(
                        "'{}' leads with {} requests, {}% of the ranked total.",
                        top,
                        group_digits(value as i64),
                        share
                    ),
                    _ => format!("'{}' leads with a value of {}.", top, value),
                }
            }

            IntentKind::RateOrPercentage => {
                let numerator = count_of(insight, "numerator").unwrap_or(0);
                let denominator = count_of(insight, "denominator").unwrap_or(0);
                match insight.get("percentage") {
                    Some(Finding::Percent(p)) => format!(
                        "{}% of the matching service requests satisfy the condition ({} of {}).",
                        p,
                        group_digits(numerator),
                        group_digits(denominator)
                    ),
                    _ => "The percentage is undefined because no rows matched the base condition."
                        .to_string(),
                }
            }

            IntentKind::Comparison => {
                if insight.get("missing_group").is_some() {
                    let a = label_of(insight, "group_a").unwrap_or_default();
                    let n = count_of(insight, "group_a_count").unwrap_or(0);
                    return format!(
                        "Only '{}' has data ({} requests); the other compared group has none.",
                        a,
                        group_digits(n)
                    );
                }
                let a = label_of(insight, "group_a").unwrap_or_default();
                let b = label_of(insight, "group_b").unwrap_or_default();
                let na = count_of(insight, "group_a_count").unwrap_or(0);
                let nb = count_of(insight, "group_b_count").unwrap_or(0);
                match insight.get("relative_change_percent") {
                    Some(Finding::Percent(rel)) => format!(
                        "'{}' has {} requests versus {} for '{}', {}% more.",
                        a,
                        group_digits(na),
                        group_digits(nb),
                        b,
                        rel
                    ),
                    _ => format!(
                        "'{}' has {} requests; '{}' has none, so a relative change cannot be computed.",
                        a,
                        group_digits(na),
                        b
                    ),
                }
            }

            IntentKind::TimeFiltered => match insight.get("trend_direction") {
                Some(Finding::Trend(direction)) => {
                    let first = count_of(insight, "first_bucket_count").unwrap_or(0);
                    let last = count_of(insight, "last_bucket_count").unwrap_or(0);
                    let word = match direction {
                        TrendDirection::Rising => "rising",
                        TrendDirection::Falling => "falling",
                        TrendDirection::Flat => "flat",
                    };
                    format!(
                        "Requests are {} across the period: {} in the first bucket versus {} in the last.",
                        word,
                        group_digits(first),
                        group_digits(last)
                    )
                }
                _ => match count_of(insight, "total") {
                    Some(n) => format!(
                        "There were {} service requests in the selected period.",
                        group_digits(n)
                    ),
                    None => "No data matched the selected period.".to_string(),
                },
            },

            IntentKind::FreeformDetailed => {
                let total = count_of(insight, "total").unwrap_or(0);
                match insight.get("average_days_to_close") {
                    Some(Finding::Number(avg)) => format!(
                        "There are {} matching requests; resolution takes {} days on average.",
                        group_digits(total),
                        avg
                    ),
                    _ => format!("There are {} matching requests.", group_digits(total)),
                }
            }

            _ => "No data matched your question.".to_string(),
        }
    }

    fn secondary_observations(intent: &QueryIntent, insight: &Insight) -> Vec<String> {
        let mut parts = Vec::new();

        if let (Some(second), Some(lead)) = (
            label_of(insight, "second_category"),
            number_of(insight, "lead_over_second"),
        ) {
            parts.push(format!(
                "'{}' follows in second place, {} requests behind.",
                second,
                group_digits(lead as i64)
            ));
        }

        if let Some(Finding::Ranked(entries)) = insight.get("ranking") {
            if entries.len() > 2 {
                let preview = entries
                    .iter()
                    .take(RANKING_PREVIEW_MAX)
                    .map(|e| match e.share_percent {
                        Some(share) => format!("{} ({}%)", e.label, share),
                        None => format!("{} ({})", e.label, e.value),
                    })
                    .join(", ");
                parts.push(format!("Leading entries: {}.", preview));
            }
        }

        if let Some(Finding::Trend(_)) = insight.get("trend_direction") {
            if let Some(total) = count_of(insight, "total") {
                parts.push(format!(
                    "{} requests fall inside the period overall.",
                    group_digits(total)
                ));
            }
        }

        if intent.kind == IntentKind::FreeformDetailed && intent.dimension.is_none() {
            if let (Some(min), Some(max)) = (
                number_of(insight, "min_days_to_close"),
                number_of(insight, "max_days_to_close"),
            ) {
                parts.push(format!(
                    "Resolution times span {} to {} days.",
                    min, max
                ));
            }
        }

        parts
    }

    /// Top-n gets a bar; a small distribution gets a pie, a large one a bar;
    /// everything else carries no chart.
    fn select_chart(intent: &QueryIntent, table: &ResultTable) -> Option<ChartDescriptor> {
        let dimension = intent.dimension.clone()?;
        if table.is_empty() {
            return None;
        }
        let chart_type = match intent.kind {
            IntentKind::TopN => ChartType::Bar,
            IntentKind::Distribution => {
                if table.row_count() <= PIE_CARDINALITY_MAX {
                    ChartType::Pie
                } else {
                    ChartType::Bar
                }
            }
            _ => return None,
        };

        let y_field = match &intent.metric {
            Metric::Count => "request_count",
            Metric::Average(_) => "average",
        };
        let dim_idx = table.column_index(&dimension)?;
        let labels = table
            .rows
            .iter()
            .take(CHART_LABEL_MAX)
            .map(|row| row[dim_idx].to_string())
            .collect();

        Some(ChartDescriptor {
            chart_type,
            x_field: dimension,
            y_field: y_field.to_string(),
            labels,
        })
    }
}

fn label_of<'a>(insight: &'a Insight, name: &str) -> Option<&'a str> {
    match insight.get(name) {
        Some(Finding::Label(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn count_of(insight: &Insight, name: &str) -> Option<i64> {
    match insight.get(name) {
        Some(Finding::Count(n)) => Some(*n),
        _ => None,
    }
}

fn number_of(insight: &Insight, name: &str) -> Option<f64> {
    match insight.get(name) {
        Some(Finding::Number(v)) => Some(*v),
        _ => None,
    }
}

fn humanize(column: &str) -> String {
    column.replace('_', " ")
}

/// 1234567 -> "1,234,567".
fn group_digits(n: i64) -> String {
    let digits = n.abs().to_string();
    let grouped = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .join(",");
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
