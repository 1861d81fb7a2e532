//! Shared fixtures: a scripted language backend and a seeded SQLite file.
#![allow(dead_code)]

use async_trait::async_trait;
use civicsight::config::Config;
use civicsight::error::{AssistantError, Result};
use civicsight::llm::LanguageBackend;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Backend that replays canned JSON replies in order and records the
/// prompts it was given.
pub struct ScriptedBackend {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| AssistantError::BackendUnavailable("script exhausted".to_string()))
    }
}

#[derive(Clone, Copy)]
pub struct FixtureRow {
    pub complaint_type: &'static str,
    pub borough: &'static str,
    pub zip_code: &'static str,
    pub days_to_close: i64,
    pub is_closed: bool,
    pub year_created: i64,
}

impl Default for FixtureRow {
    fn default() -> Self {
        Self {
            complaint_type: "Noise",
            borough: "BROOKLYN",
            zip_code: "11201",
            days_to_close: 2,
            is_closed: true,
            year_created: 2023,
        }
    }
}

/// Create a seeded database under the system temp dir; the path is unique
/// per call so tests do not interfere.
pub fn fixture_database(name: &str, rows: &[FixtureRow]) -> PathBuf {
    let dir = std::env::temp_dir().join("civicsight_tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}-{}.db", name, uuid::Uuid::new_v4()));

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE service_requests (
            unique_key INTEGER PRIMARY KEY,
            created_date TEXT,
            closed_date TEXT,
            complaint_type TEXT,
            agency TEXT,
            borough TEXT,
            zip_code TEXT,
            status TEXT,
            days_to_close INTEGER,
            is_closed INTEGER,
            has_coordinates INTEGER,
            year_created INTEGER,
            month_created INTEGER,
            response_category TEXT,
            resolution_speed TEXT
        );",
    )
    .unwrap();

    for (i, row) in rows.iter().enumerate() {
        conn.execute(
            "INSERT INTO service_requests (
                unique_key, created_date, closed_date, complaint_type, agency, borough,
                zip_code, status, days_to_close, is_closed, has_coordinates,
                year_created, month_created, response_category, resolution_speed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                i as i64 + 1,
                format!("{}-06-15", row.year_created),
                if row.is_closed {
                    Some(format!("{}-06-20", row.year_created))
                } else {
                    None
                },
                row.complaint_type,
                "DEP",
                row.borough,
                row.zip_code,
                if row.is_closed { "Closed" } else { "Open" },
                row.days_to_close,
                row.is_closed as i64,
                1i64,
                row.year_created,
                6i64,
                "Inspection",
                if row.days_to_close <= 3 { "WITHIN_3_DAYS" } else { "OVER_3_DAYS" },
            ],
        )
        .unwrap();
    }

    path
}

pub fn test_config(database_path: PathBuf) -> Config {
    let mut config = Config::from_env();
    config.database_path = database_path;
    config.row_cap = 10_000;
    config.max_limit = 1_000;
    config.query_timeout = Duration::from_secs(5);
    config.backend_timeout = Duration::from_secs(5);
    config.context_window = 8;
    config.detail_cues = vec![
        "detailed".to_string(),
        "comprehensive".to_string(),
        "trends".to_string(),
        "insights".to_string(),
    ];
    config
}

/// Mixed workload: 6 noise, 4 heating, 3 parking, 2 water leaks spread over
/// two boroughs and several zip codes.
pub fn standard_rows() -> Vec<FixtureRow> {
    let mut rows = Vec::new();
    for i in 0..6 {
        rows.push(FixtureRow {
            complaint_type: "Noise",
            borough: if i % 2 == 0 { "BROOKLYN" } else { "QUEENS" },
            zip_code: "11201",
            days_to_close: i,
            ..Default::default()
        });
    }
    for i in 0..4 {
        rows.push(FixtureRow {
            complaint_type: "Heating",
            borough: "BROOKLYN",
            zip_code: "11205",
            days_to_close: 4 + i,
            ..Default::default()
        });
    }
    for _ in 0..3 {
        rows.push(FixtureRow {
            complaint_type: "Illegal Parking",
            borough: "QUEENS",
            zip_code: "11101",
            ..Default::default()
        });
    }
    for _ in 0..2 {
        rows.push(FixtureRow {
            complaint_type: "Water Leak",
            borough: "QUEENS",
            zip_code: "11102",
            days_to_close: 9,
            is_closed: false,
            ..Default::default()
        });
    }
    rows
}
