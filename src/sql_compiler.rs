//! Deterministic statement synthesis from a validated intent.
//!
//! Each intent kind maps to one fixed template. Column identifiers come only
//! from the schema the intent was validated against; every filter value and
//! the limit are bound parameters, never concatenated text. Anything the
//! templates cannot express fails with `UnsupportedIntent` and is reported
//! back as a clarification request.

use crate::error::{AssistantError, Result};
use crate::intent::{Filter, FilterOp, FilterValue, IntentKind, Metric, QueryIntent, DEFAULT_TOP_N};
use crate::result_table::Scalar;
use crate::schema::{ColumnType, TableSchema};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Parameterized statement plus its bound values, keyed `$p0..$pN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub statement: String,
    pub params: Vec<(String, Scalar)>,
}

/// Select-list aliases the templates may emit. The validator allow-lists
/// exactly these, so a template change here must be mirrored there.
pub const OUTPUT_ALIASES: &[&str] = &[
    "total",
    "average",
    "request_count",
    "numerator",
    "denominator",
    "average_days_to_close",
    "min_days_to_close",
    "max_days_to_close",
];

struct ParamSink {
    params: Vec<(String, Scalar)>,
}

impl ParamSink {
    fn new() -> Self {
        Self { params: Vec::new() }
    }

    fn bind(&mut self, value: Scalar) -> String {
        let name = format!("$p{}", self.params.len());
        self.params.push((name.clone(), value));
        name
    }
}

pub struct SqlCompiler {
    schema: TableSchema,
}

impl SqlCompiler {
    pub fn new(schema: TableSchema) -> Self {
        Self { schema }
    }

    pub fn compile(&self, intent: &QueryIntent) -> Result<CandidateQuery> {
        let mut sink = ParamSink::new();
        let table = &self.schema.table;
        let where_clause = self.build_where(&intent.filters, &mut sink)?;

        let statement = match intent.kind {
            IntentKind::AggregateCount => {
                let select = match &intent.metric {
                    Metric::Count => "COUNT(*) AS total".to_string(),
                    Metric::Average(c) => format!("AVG({}) AS average", c),
                };
                format!("SELECT {} FROM {}{}", select, table, where_clause)
            }

            IntentKind::TopN => {
                let dim = self.require_dimension(intent, "a top-n question needs a column to rank by")?;
                let (expr, alias) = metric_expr(&intent.metric);
                let limit = sink.bind(Scalar::Int(intent.limit.unwrap_or(DEFAULT_TOP_N)));
                format!(
                    "SELECT {dim}, {expr} AS {alias} FROM {table}{where_clause} \
                     GROUP BY {dim} ORDER BY {alias} DESC LIMIT {limit}"
                )
            }

            IntentKind::Distribution => {
                let dim =
                    self.require_dimension(intent, "a distribution needs a column to break down by")?;
                let (expr, alias) = metric_expr(&intent.metric);
                format!(
                    "SELECT {dim}, {expr} AS {alias} FROM {table}{where_clause} \
                     GROUP BY {dim} ORDER BY {alias} DESC"
                )
            }

            IntentKind::TimeFiltered => {
                if !intent.filters.iter().any(|f| self.is_time_restriction(f)) {
                    return Err(AssistantError::UnsupportedIntent(
                        "a time-filtered question needs a date restriction".to_string(),
                    ));
                }
                match &intent.dimension {
                    Some(dim) => format!(
                        "SELECT {dim}, COUNT(*) AS request_count FROM {table}{where_clause} \
                         GROUP BY {dim} ORDER BY {dim} ASC"
                    ),
                    None => format!("SELECT COUNT(*) AS total FROM {}{}", table, where_clause),
                }
            }

            IntentKind::RateOrPercentage => {
                let condition = intent.condition.as_ref().ok_or_else(|| {
                    AssistantError::UnsupportedIntent(
                        "a rate question needs the condition being measured".to_string(),
                    )
                })?;
                let cond_sql = self.render_filter(condition, &mut sink)?;
                format!(
                    "SELECT SUM(CASE WHEN {cond_sql} THEN 1 ELSE 0 END) AS numerator, \
                     COUNT(*) AS denominator FROM {table}{where_clause}"
                )
            }

            IntentKind::Comparison => {
                let dim = self
                    .require_dimension(intent, "a comparison needs the column whose values are compared")?;
                let has_pair = intent
                    .filters
                    .iter()
                    .any(|f| f.column == dim && f.op == FilterOp::In && f.values.len() == 2);
                if !has_pair {
                    return Err(AssistantError::UnsupportedIntent(format!(
                        "a comparison needs exactly two values of '{}' in an 'in' filter",
                        dim
                    )));
                }
                format!(
                    "SELECT {dim}, COUNT(*) AS request_count FROM {table}{where_clause} \
                     GROUP BY {dim} ORDER BY request_count DESC"
                )
            }

            IntentKind::FreeformDetailed => match &intent.dimension {
                Some(dim) => format!(
                    "SELECT {dim}, COUNT(*) AS request_count, \
                     AVG(days_to_close) AS average_days_to_close FROM {table}{where_clause} \
                     GROUP BY {dim} ORDER BY request_count DESC"
                ),
                None => format!(
                    "SELECT COUNT(*) AS total, AVG(days_to_close) AS average_days_to_close, \
                     MIN(days_to_close) AS min_days_to_close, \
                     MAX(days_to_close) AS max_days_to_close FROM {table}{where_clause}"
                ),
            },
        };

        Ok(CandidateQuery {
            statement,
            params: sink.params,
        })
    }

    fn require_dimension<'a>(&self, intent: &'a QueryIntent, reason: &str) -> Result<&'a str> {
        intent
            .dimension
            .as_deref()
            .ok_or_else(|| AssistantError::UnsupportedIntent(reason.to_string()))
    }

    /// A restriction that anchors the question in time: a date-typed column,
    /// or one of the derived calendar columns.
    fn is_time_restriction(&self, filter: &Filter) -> bool {
        if matches!(filter.column.as_str(), "year_created" | "month_created") {
            return true;
        }
        self.schema
            .column(&filter.column)
            .map(|c| c.column_type == ColumnType::Date)
            .unwrap_or(false)
    }

    fn build_where(&self, filters: &[Filter], sink: &mut ParamSink) -> Result<String> {
        if filters.is_empty() {
            return Ok(String::new());
        }
        let rendered = filters
            .iter()
            .map(|f| self.render_filter(f, sink))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!(" WHERE {}", rendered.join(" AND ")))
    }

    fn render_filter(&self, filter: &Filter, sink: &mut ParamSink) -> Result<String> {
        let column = self.schema.column(&filter.column).ok_or_else(|| {
            AssistantError::IntentInvalid(format!("unknown column '{}'", filter.column))
        })?;
        let column_type = column.column_type;
        let col = &filter.column;

        Ok(match filter.op {
            FilterOp::Eq => {
                let p = sink.bind(scalar_for(column_type, &filter.values[0]));
                format!("{col} = {p}")
            }
            FilterOp::In => {
                let placeholders: Vec<String> = filter
                    .values
                    .iter()
                    .map(|v| sink.bind(scalar_for(column_type, v)))
                    .collect();
                format!("{col} IN ({})", placeholders.join(", "))
            }
            FilterOp::Between => {
                let lo = sink.bind(scalar_for(column_type, &filter.values[0]));
                let hi = sink.bind(scalar_for(column_type, &filter.values[1]));
                format!("{col} BETWEEN {lo} AND {hi}")
            }
            FilterOp::DateRange => {
                let start = sink.bind(scalar_for(column_type, &filter.values[0]));
                let end = sink.bind(scalar_for(column_type, &filter.values[1]));
                format!("{col} >= {start} AND {col} <= {end}")
            }
        })
    }
}

fn metric_expr(metric: &Metric) -> (String, &'static str) {
    match metric {
        Metric::Count => ("COUNT(*)".to_string(), "request_count"),
        Metric::Average(c) => (format!("AVG({})", c), "average"),
    }
}

fn scalar_for(column_type: ColumnType, value: &FilterValue) -> Scalar {
    match (column_type, value) {
        (ColumnType::Integer, FilterValue::Number(n)) if n.fract() == 0.0 => Scalar::Int(*n as i64),
        (ColumnType::Boolean, FilterValue::Number(n)) => Scalar::Int(*n as i64),
        (_, FilterValue::Number(n)) => Scalar::Real(*n),
        (_, FilterValue::Bool(b)) => Scalar::Bool(*b),
        (ColumnType::Date, FilterValue::Text(s)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Scalar::Date)
            .unwrap_or_else(|_| Scalar::Text(s.clone())),
        (_, FilterValue::Text(s)) => Scalar::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Complexity;

    fn compiler() -> SqlCompiler {
        SqlCompiler::new(TableSchema::service_requests())
    }

    fn base_intent(kind: IntentKind) -> QueryIntent {
        QueryIntent {
            kind,
            dimension: None,
            metric: Metric::Count,
            filters: Vec::new(),
            condition: None,
            limit: None,
            complexity: Complexity::Simple,
        }
    }

    #[test]
    fn top_n_template_binds_limit() {
        let mut intent = base_intent(IntentKind::TopN);
        intent.dimension = Some("complaint_type".to_string());
        intent.limit = Some(10);
        let candidate = compiler().compile(&intent).unwrap();
        assert_eq!(
            candidate.statement,
            "SELECT complaint_type, COUNT(*) AS request_count FROM service_requests \
             GROUP BY complaint_type ORDER BY request_count DESC LIMIT $p0"
        );
        assert_eq!(candidate.params, vec![("$p0".to_string(), Scalar::Int(10))]);
    }

    #[test]
    fn filter_values_are_parameters_not_text() {
        let mut intent = base_intent(IntentKind::AggregateCount);
        intent.filters = vec![Filter {
            column: "borough".to_string(),
            op: FilterOp::Eq,
            values: vec![FilterValue::Text("BROOKLYN".to_string())],
        }];
        let candidate = compiler().compile(&intent).unwrap();
        assert!(!candidate.statement.contains("BROOKLYN"));
        assert!(candidate.statement.contains("borough = $p0"));
        assert_eq!(
            candidate.params,
            vec![("$p0".to_string(), Scalar::Text("BROOKLYN".to_string()))]
        );
    }

    #[test]
    fn rate_template_has_numerator_and_denominator() {
        let mut intent = base_intent(IntentKind::RateOrPercentage);
        intent.condition = Some(Filter {
            column: "days_to_close".to_string(),
            op: FilterOp::Between,
            values: vec![FilterValue::Number(0.0), FilterValue::Number(3.0)],
        });
        let candidate = compiler().compile(&intent).unwrap();
        assert!(candidate
            .statement
            .contains("SUM(CASE WHEN days_to_close BETWEEN $p0 AND $p1 THEN 1 ELSE 0 END) AS numerator"));
        assert!(candidate.statement.contains("COUNT(*) AS denominator"));
        assert_eq!(candidate.params.len(), 2);
    }

    #[test]
    fn rate_without_condition_is_unsupported() {
        let intent = base_intent(IntentKind::RateOrPercentage);
        assert!(matches!(
            compiler().compile(&intent),
            Err(AssistantError::UnsupportedIntent(_))
        ));
    }

    #[test]
    fn top_n_without_dimension_is_unsupported() {
        let intent = base_intent(IntentKind::TopN);
        assert!(matches!(
            compiler().compile(&intent),
            Err(AssistantError::UnsupportedIntent(_))
        ));
    }

    #[test]
    fn comparison_requires_a_two_value_in_filter() {
        let mut intent = base_intent(IntentKind::Comparison);
        intent.dimension = Some("borough".to_string());
        assert!(matches!(
            compiler().compile(&intent),
            Err(AssistantError::UnsupportedIntent(_))
        ));

        intent.filters = vec![Filter {
            column: "borough".to_string(),
            op: FilterOp::In,
            values: vec![
                FilterValue::Text("BROOKLYN".to_string()),
                FilterValue::Text("QUEENS".to_string()),
            ],
        }];
        let candidate = compiler().compile(&intent).unwrap();
        assert!(candidate.statement.contains("borough IN ($p0, $p1)"));
    }

    #[test]
    fn time_filtered_requires_a_date_restriction() {
        let intent = base_intent(IntentKind::TimeFiltered);
        assert!(matches!(
            compiler().compile(&intent),
            Err(AssistantError::UnsupportedIntent(_))
        ));

        let mut intent = base_intent(IntentKind::TimeFiltered);
        intent.filters = vec![Filter {
            column: "created_date".to_string(),
            op: FilterOp::DateRange,
            values: vec![
                FilterValue::Text("2024-01-01".to_string()),
                FilterValue::Text("2024-06-30".to_string()),
            ],
        }];
        let candidate = compiler().compile(&intent).unwrap();
        assert!(candidate
            .statement
            .contains("created_date >= $p0 AND created_date <= $p1"));
    }

    #[test]
    fn date_values_bind_as_dates() {
        let mut intent = base_intent(IntentKind::TimeFiltered);
        intent.filters = vec![Filter {
            column: "created_date".to_string(),
            op: FilterOp::DateRange,
            values: vec![
                FilterValue::Text("2024-01-01".to_string()),
                FilterValue::Text("2024-06-30".to_string()),
            ],
        }];
        let candidate = compiler().compile(&intent).unwrap();
        assert!(matches!(candidate.params[0].1, Scalar::Date(_)));
    }
}
