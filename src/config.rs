//! Runtime configuration loaded from the environment.
//!
//! Everything tunable lives here: backend endpoint, timeouts, the row cap,
//! and the phrasing-cue keyword list that upgrades a turn to a detailed
//! answer. Values come from `.env` / process environment with defaults
//! suitable for local use.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DETAIL_CUES: &str = "detailed,comprehensive,trends,insights,breakdown,analysis";

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite file holding the service_requests table.
    pub database_path: PathBuf,

    /// OpenAI-compatible chat-completions endpoint.
    pub api_key: String,
    pub base_url: String,
    pub model: String,

    /// Wall-clock bound on one backend completion call.
    pub backend_timeout: Duration,

    /// Wall-clock bound on one database execution.
    pub query_timeout: Duration,

    /// Hard cap on rows returned by the executor.
    pub row_cap: usize,

    /// Largest LIMIT the validator will accept.
    pub max_limit: i64,

    /// How many prior turns a session remembers.
    pub context_window: usize,

    /// Words that upgrade a question to a detailed answer.
    pub detail_cues: Vec<String>,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            database_path: PathBuf::from(env_or("CIVICSIGHT_DATABASE_PATH", "data/service_requests.db")),
            api_key: env_or("OPENAI_API_KEY", "dummy-api-key"),
            base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            model: env_or("CIVICSIGHT_MODEL", "gpt-4o-mini"),
            backend_timeout: Duration::from_millis(env_parsed("CIVICSIGHT_BACKEND_TIMEOUT_MS", 20_000)),
            query_timeout: Duration::from_millis(env_parsed("CIVICSIGHT_QUERY_TIMEOUT_MS", 10_000)),
            row_cap: env_parsed("CIVICSIGHT_ROW_CAP", 10_000),
            max_limit: env_parsed("CIVICSIGHT_MAX_LIMIT", 1_000),
            context_window: env_parsed("CIVICSIGHT_CONTEXT_WINDOW", 8),
            detail_cues: env_or("CIVICSIGHT_DETAIL_CUES", DEFAULT_DETAIL_CUES)
                .split(',')
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
