//! Safety properties: everything the compiler can produce passes the
//! validator, and tampered statements never execute.

mod common;

use civicsight::assistant::{Assistant, ResponseStatus};
use civicsight::error::AssistantError;
use civicsight::intent::{
    Complexity, Filter, FilterOp, FilterValue, IntentKind, Metric, QueryIntent,
};
use civicsight::query_validator::QueryValidator;
use civicsight::schema::TableSchema;
use civicsight::sql_compiler::{CandidateQuery, SqlCompiler};
use civicsight::sql_engine::SqlEngine;
use common::{fixture_database, standard_rows, test_config, FixtureRow, ScriptedBackend};
use std::sync::Arc;
use std::time::Duration;

fn intent(kind: IntentKind) -> QueryIntent {
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

fn eq(column: &str, value: FilterValue) -> Filter {
    Filter {
        column: column.to_string(),
        op: FilterOp::Eq,
        values: vec![value],
    }
}

fn date_range(column: &str, start: &str, end: &str) -> Filter {
    Filter {
        column: column.to_string(),
        op: FilterOp::DateRange,
        values: vec![
            FilterValue::Text(start.to_string()),
            FilterValue::Text(end.to_string()),
        ],
    }
}

/// A broad sweep over the compiler's output space: every statement it can
/// synthesize must pass the validator.
fn intent_space() -> Vec<QueryIntent> {
    let mut intents = Vec::new();
    let filter_sets: Vec<Vec<Filter>> = vec![
        Vec::new(),
        vec![eq("borough", FilterValue::Text("BROOKLYN".to_string()))],
        vec![Filter {
            column: "complaint_type".to_string(),
            op: FilterOp::In,
            values: vec![
                FilterValue::Text("Noise".to_string()),
                FilterValue::Text("Heating".to_string()),
                FilterValue::Text("Water Leak".to_string()),
            ],
        }],
        vec![Filter {
            column: "days_to_close".to_string(),
            op: FilterOp::Between,
            values: vec![FilterValue::Number(0.0), FilterValue::Number(7.0)],
        }],
        vec![
            date_range("created_date", "2023-01-01", "2023-12-31"),
            eq("is_closed", FilterValue::Bool(true)),
        ],
    ];

    for filters in &filter_sets {
        let mut i = intent(IntentKind::AggregateCount);
        i.filters = filters.clone();
        intents.push(i.clone());
        i.metric = Metric::Average("days_to_close".to_string());
        intents.push(i);

        for dimension in ["complaint_type", "agency", "borough", "zip_code", "status"] {
            for limit in [1, 10, 1000] {
                let mut i = intent(IntentKind::TopN);
                i.dimension = Some(dimension.to_string());
                i.limit = Some(limit);
                i.filters = filters.clone();
                intents.push(i);
            }
            let mut i = intent(IntentKind::Distribution);
            i.dimension = Some(dimension.to_string());
            i.filters = filters.clone();
            intents.push(i);

            let mut i = intent(IntentKind::FreeformDetailed);
            i.dimension = Some(dimension.to_string());
            i.filters = filters.clone();
            intents.push(i);
        }

        let mut i = intent(IntentKind::RateOrPercentage);
        i.filters = filters.clone();
        i.condition = Some(Filter {
            column: "days_to_close".to_string(),
            op: FilterOp::Between,
            values: vec![FilterValue::Number(0.0), FilterValue::Number(3.0)],
        });
        intents.push(i);
    }

    let mut i = intent(IntentKind::TimeFiltered);
    i.filters = vec![date_range("created_date", "2023-01-01", "2023-06-30")];
    intents.push(i.clone());
    i.dimension = Some("year_created".to_string());
    intents.push(i);

    let mut i = intent(IntentKind::Comparison);
    i.dimension = Some("borough".to_string());
    i.filters = vec![Filter {
        column: "borough".to_string(),
        op: FilterOp::In,
        values: vec![
            FilterValue::Text("BROOKLYN".to_string()),
            FilterValue::Text("QUEENS".to_string()),
        ],
    }];
    intents.push(i);

    let mut i = intent(IntentKind::FreeformDetailed);
    i.filters = vec![eq("is_closed", FilterValue::Bool(true))];
    intents.push(i);

    intents
}

#[test]
fn every_synthesized_statement_passes_the_validator() {
    let schema = TableSchema::service_requests();
    let compiler = SqlCompiler::new(schema.clone());
    let validator = QueryValidator::new(&schema, 1000);

    for intent in intent_space() {
        let candidate = compiler
            .compile(&intent)
            .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", intent.kind, e));
        validator.validate(&candidate).unwrap_or_else(|e| {
            panic!("validator rejected template output: {}\n{}", e, candidate.statement)
        });
    }
}

#[test]
fn tampered_statements_are_rejected() {
    let schema = TableSchema::service_requests();
    let compiler = SqlCompiler::new(schema.clone());
    let validator = QueryValidator::new(&schema, 1000);

    let mut base = intent(IntentKind::TopN);
    base.dimension = Some("complaint_type".to_string());
    base.limit = Some(10);
    let candidate = compiler.compile(&base).unwrap();

    let tampered = [
        format!("{}; DROP TABLE service_requests", candidate.statement),
        candidate.statement.replace("complaint_type", "sqlite_master"),
        format!("{} UNION SELECT borough, agency FROM service_requests", candidate.statement),
        candidate.statement.replace("service_requests", "other_table"),
        candidate
            .statement
            .replace("GROUP BY", "WHERE borough = 'BROOKLYN' GROUP BY"),
    ];
    for statement in tampered {
        let mutated = CandidateQuery {
            statement: statement.clone(),
            params: candidate.params.clone(),
        };
        assert!(
            matches!(
                validator.validate(&mutated),
                Err(AssistantError::QueryRejected(_))
            ),
            "should have rejected: {}",
            statement
        );
    }
}

#[tokio::test]
async fn engine_binds_named_parameters() {
    let database = fixture_database("binding", &standard_rows());
    let schema = TableSchema::service_requests();
    let engine = SqlEngine::new(database, schema.clone(), 100, Duration::from_secs(5));

    let mut i = intent(IntentKind::AggregateCount);
    i.filters = vec![eq("borough", FilterValue::Text("QUEENS".to_string()))];
    let candidate = SqlCompiler::new(schema).compile(&i).unwrap();
    let table = engine.execute(&candidate).await.unwrap();

    // 3 noise + 3 parking + 2 water leaks seeded in Queens.
    assert_eq!(
        table.value(0, "total"),
        Some(&civicsight::result_table::Scalar::Int(8))
    );
    assert!(!table.truncated);
}

#[tokio::test]
async fn row_cap_truncates_and_flags() {
    let mut rows = Vec::new();
    for i in 0..10 {
        rows.push(FixtureRow {
            complaint_type: match i {
                0 => "t0", 1 => "t1", 2 => "t2", 3 => "t3", 4 => "t4",
                5 => "t5", 6 => "t6", 7 => "t7", 8 => "t8", _ => "t9",
            },
            ..Default::default()
        });
    }
    let database = fixture_database("rowcap", &rows);
    let schema = TableSchema::service_requests();
    let engine = SqlEngine::new(database, schema.clone(), 5, Duration::from_secs(5));

    let mut i = intent(IntentKind::Distribution);
    i.dimension = Some("complaint_type".to_string());
    let candidate = SqlCompiler::new(schema).compile(&i).unwrap();
    let table = engine.execute(&candidate).await.unwrap();

    assert_eq!(table.row_count(), 5);
    assert!(table.truncated);
}

#[tokio::test]
async fn truncation_caveat_reaches_the_answer() {
    let mut rows = Vec::new();
    for i in 0..10 {
        rows.push(FixtureRow {
            zip_code: match i {
                0 => "z0", 1 => "z1", 2 => "z2", 3 => "z3", 4 => "z4",
                5 => "z5", 6 => "z6", 7 => "z7", 8 => "z8", _ => "z9",
            },
            ..Default::default()
        });
    }
    let database = fixture_database("caveat", &rows);
    let mut config = test_config(database);
    config.row_cap = 3;

    let reply = r#"{"kind": "distribution", "dimension": "zip_code"}"#;
    let backend = Arc::new(ScriptedBackend::new(&[reply]));
    let assistant = Assistant::new(config, backend);

    let response = assistant
        .submit_question("Break requests down by zip code", "s1")
        .await;
    assert_eq!(response.status, ResponseStatus::Ok);
    assert!(response.answer.contains("row cap"), "answer: {}", response.answer);
}

#[tokio::test]
async fn engine_results_are_idempotent() {
    let database = fixture_database("idempotent-engine", &standard_rows());
    let schema = TableSchema::service_requests();
    let engine = SqlEngine::new(database, schema.clone(), 100, Duration::from_secs(5));

    let mut i = intent(IntentKind::TopN);
    i.dimension = Some("complaint_type".to_string());
    i.limit = Some(10);
    let candidate = SqlCompiler::new(schema).compile(&i).unwrap();

    let first = engine.execute(&candidate).await.unwrap();
    let second = engine.execute(&candidate).await.unwrap();
    assert_eq!(first, second);

    let insight_a = civicsight::analyzer::ResultAnalyzer::analyze(&i, &first).unwrap();
    let insight_b = civicsight::analyzer::ResultAnalyzer::analyze(&i, &second).unwrap();
    assert_eq!(insight_a, insight_b);
}
