//! Structured query intent.
//!
//! The backend's JSON reply is parsed into `RawIntent` and then re-validated
//! field by field against the table schema before anything downstream sees
//! it. The backend is an untrusted input source, not a planner: a reply that
//! references an unknown column or operator fails the turn here, before any
//! statement is synthesized.

use crate::error::{AssistantError, Result};
use crate::schema::{ColumnType, TableSchema};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default result count for a top-N question that did not state one.
pub const DEFAULT_TOP_N: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    AggregateCount,
    TopN,
    Distribution,
    TimeFiltered,
    RateOrPercentage,
    Comparison,
    FreeformDetailed,
}

impl IntentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "aggregate_count" => Some(Self::AggregateCount),
            "top_n" => Some(Self::TopN),
            "distribution" => Some(Self::Distribution),
            "time_filtered" => Some(Self::TimeFiltered),
            "rate_or_percentage" => Some(Self::RateOrPercentage),
            "comparison" => Some(Self::Comparison),
            "freeform_detailed" => Some(Self::FreeformDetailed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AggregateCount => "aggregate_count",
            Self::TopN => "top_n",
            Self::Distribution => "distribution",
            Self::TimeFiltered => "time_filtered",
            Self::RateOrPercentage => "rate_or_percentage",
            Self::Comparison => "comparison",
            Self::FreeformDetailed => "freeform_detailed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Detailed,
}

impl Complexity {
    /// Phrasing-cue heuristic. The cue list is configuration, not code;
    /// any cue word in the question upgrades the answer to detailed.
    pub fn infer(question: &str, cues: &[String]) -> Self {
        let q = question.to_lowercase();
        if cues.iter().any(|cue| q.contains(cue.as_str())) {
            Complexity::Detailed
        } else {
            Complexity::Simple
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    In,
    Between,
    DateRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<FilterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Metric {
    Count,
    Average(String),
}

/// Immutable per-turn description of what the question asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryIntent {
    pub kind: IntentKind,
    /// Categorical column the question groups by.
    pub dimension: Option<String>,
    pub metric: Metric,
    /// Predicates applied to every sub-aggregate of the turn.
    pub filters: Vec<Filter>,
    /// Rate questions only: the numerator predicate. The denominator is the
    /// filtered total without it.
    pub condition: Option<Filter>,
    /// Top-N questions only.
    pub limit: Option<i64>,
    pub complexity: Complexity,
}

/// Shape of the backend's JSON reply, before local validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIntent {
    pub kind: Option<String>,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub metric_column: Option<String>,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub condition: Option<RawFilter>,
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFilter {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl QueryIntent {
    /// Re-validate a backend reply against the schema. Every failure is an
    /// `IntentInvalid` that short-circuits the turn with a clarification.
    pub fn from_raw(
        raw: RawIntent,
        question: &str,
        schema: &TableSchema,
        detail_cues: &[String],
    ) -> Result<Self> {
        let kind_str = raw
            .kind
            .ok_or_else(|| AssistantError::IntentInvalid("backend omitted the question kind".to_string()))?;
        let kind = IntentKind::parse(&kind_str)
            .ok_or_else(|| AssistantError::IntentInvalid(format!("unknown question kind '{}'", kind_str)))?;

        let dimension = match raw.dimension {
            Some(d) if !d.trim().is_empty() => {
                let d = d.trim().to_lowercase();
                let column = schema
                    .column(&d)
                    .ok_or_else(|| unknown_column_error(schema, &d))?;
                if !column.groupable {
                    return Err(AssistantError::IntentInvalid(format!(
                        "column '{}' cannot be grouped by",
                        d
                    )));
                }
                Some(d)
            }
            _ => None,
        };

        let metric = match raw.metric.as_deref().map(str::trim) {
            None | Some("") | Some("count") => Metric::Count,
            Some("average") | Some("avg") => {
                let column = raw.metric_column.ok_or_else(|| {
                    AssistantError::IntentInvalid("average metric requires a metric_column".to_string())
                })?;
                let column = column.trim().to_lowercase();
                let col = schema
                    .column(&column)
                    .ok_or_else(|| unknown_column_error(schema, &column))?;
                if !matches!(col.column_type, ColumnType::Integer | ColumnType::Real) {
                    return Err(AssistantError::IntentInvalid(format!(
                        "column '{}' is not numeric and cannot be averaged",
                        column
                    )));
                }
                Metric::Average(column)
            }
            Some(other) => {
                return Err(AssistantError::IntentInvalid(format!("unknown metric '{}'", other)))
            }
        };

        let filters = raw
            .filters
            .into_iter()
            .map(|f| Filter::from_raw(f, schema))
            .collect::<Result<Vec<_>>>()?;
        let condition = raw.condition.map(|f| Filter::from_raw(f, schema)).transpose()?;

        let limit = match (kind, raw.limit) {
            (IntentKind::TopN, Some(n)) if n > 0 => Some(n),
            (IntentKind::TopN, Some(n)) => {
                return Err(AssistantError::IntentInvalid(format!(
                    "limit must be positive, got {}",
                    n
                )))
            }
            (IntentKind::TopN, None) => Some(DEFAULT_TOP_N),
            _ => None,
        };

        Ok(Self {
            kind,
            dimension,
            metric,
            filters,
            condition,
            limit,
            complexity: Complexity::infer(question, detail_cues),
        })
    }

    /// Compact one-line description kept in the session context window.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.kind.as_str().to_string()];
        if let Some(ref d) = self.dimension {
            parts.push(format!("by {}", d));
        }
        if let Metric::Average(ref c) = self.metric {
            parts.push(format!("avg {}", c));
        }
        if !self.filters.is_empty() {
            parts.push(format!("{} filter(s)", self.filters.len()));
        }
        if let Some(n) = self.limit {
            parts.push(format!("limit {}", n));
        }
        parts.join(", ")
    }
}

impl Filter {
    pub fn from_raw(raw: RawFilter, schema: &TableSchema) -> Result<Self> {
        let column_name = raw.column.trim().to_lowercase();
        let column = schema
            .column(&column_name)
            .ok_or_else(|| unknown_column_error(schema, &column_name))?;

        let op = match raw.operator.trim().to_lowercase().as_str() {
            "=" | "eq" | "equals" => FilterOp::Eq,
            "in" => FilterOp::In,
            "between" => FilterOp::Between,
            "date_range" | "daterange" => FilterOp::DateRange,
            other => {
                return Err(AssistantError::IntentInvalid(format!(
                    "unsupported operator '{}' on column '{}'",
                    other, column_name
                )))
            }
        };

        let values = match raw.value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(json_to_filter_value)
                .collect::<Result<Vec<_>>>()?,
            serde_json::Value::Null => Vec::new(),
            single => vec![json_to_filter_value(single)?],
        };

        let filter = Filter {
            column: column_name,
            op,
            values,
        };
        filter.check_shape(column.column_type)?;
        Ok(filter)
    }

    fn check_shape(&self, column_type: ColumnType) -> Result<()> {
        let arity_ok = match self.op {
            FilterOp::Eq => self.values.len() == 1,
            FilterOp::In => !self.values.is_empty(),
            FilterOp::Between | FilterOp::DateRange => self.values.len() == 2,
        };
        if !arity_ok {
            return Err(AssistantError::IntentInvalid(format!(
                "operator on column '{}' has the wrong number of values ({})",
                self.column,
                self.values.len()
            )));
        }

        if self.op == FilterOp::DateRange && column_type != ColumnType::Date {
            return Err(AssistantError::IntentInvalid(format!(
                "date_range is only valid on date columns, '{}' is not one",
                self.column
            )));
        }
        if self.op == FilterOp::Between
            && !matches!(
                column_type,
                ColumnType::Integer | ColumnType::Real | ColumnType::Date
            )
        {
            return Err(AssistantError::IntentInvalid(format!(
                "between is not valid on column '{}'",
                self.column
            )));
        }

        for value in &self.values {
            let compatible = match (column_type, value) {
                (ColumnType::Text, FilterValue::Text(_)) => true,
                (ColumnType::Integer | ColumnType::Real, FilterValue::Number(_)) => true,
                (ColumnType::Boolean, FilterValue::Bool(_)) => true,
                (ColumnType::Boolean, FilterValue::Number(n)) => *n == 0.0 || *n == 1.0,
                (ColumnType::Date, FilterValue::Text(s)) => {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                }
                _ => false,
            };
            if !compatible {
                return Err(AssistantError::IntentInvalid(format!(
                    "value {:?} does not fit column '{}'",
                    value, self.column
                )));
            }
        }
        Ok(())
    }
}

fn json_to_filter_value(v: serde_json::Value) -> Result<FilterValue> {
    match v {
        serde_json::Value::Bool(b) => Ok(FilterValue::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(FilterValue::Number)
            .ok_or_else(|| AssistantError::IntentInvalid("non-finite number in filter".to_string())),
        serde_json::Value::String(s) => Ok(FilterValue::Text(s)),
        other => Err(AssistantError::IntentInvalid(format!(
            "unsupported filter value: {}",
            other
        ))),
    }
}

fn unknown_column_error(schema: &TableSchema, name: &str) -> AssistantError {
    match schema.closest_column(name) {
        Some(suggestion) => AssistantError::IntentInvalid(format!(
            "unknown column '{}' (did you mean '{}'?)",
            name, suggestion
        )),
        None => AssistantError::IntentInvalid(format!("unknown column '{}'", name)),
    }
}
