//! Fixed schema descriptor for the service-request table.
//!
//! The assistant answers questions against exactly one read-only table.
//! This module is the single source of truth for which columns exist, how
//! they are typed, and which ones a question may group by. The extractor,
//! the compiler, and the validator all consult it; nothing the language
//! backend produces is trusted until it resolves against this set.

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// The one table the assistant may query.
pub const TABLE_NAME: &str = "service_requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// Whether a question may group by this column.
    pub groupable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// The built-in municipal service-request schema.
    pub fn service_requests() -> Self {
        let col = |name: &str, column_type: ColumnType, groupable: bool| Column {
            name: name.to_string(),
            column_type,
            groupable,
        };
        Self {
            table: TABLE_NAME.to_string(),
            columns: vec![
                col("unique_key", ColumnType::Integer, false),
                col("created_date", ColumnType::Date, false),
                col("closed_date", ColumnType::Date, false),
                col("complaint_type", ColumnType::Text, true),
                col("agency", ColumnType::Text, true),
                col("borough", ColumnType::Text, true),
                col("zip_code", ColumnType::Text, true),
                col("status", ColumnType::Text, true),
                col("days_to_close", ColumnType::Integer, false),
                col("is_closed", ColumnType::Boolean, true),
                col("has_coordinates", ColumnType::Boolean, true),
                col("year_created", ColumnType::Integer, true),
                col("month_created", ColumnType::Integer, true),
                col("response_category", ColumnType::Text, true),
                col("resolution_speed", ColumnType::Text, true),
            ],
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn is_groupable(&self, name: &str) -> bool {
        self.column(name).map(|c| c.groupable).unwrap_or(false)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Closest known column to a name the backend hallucinated.
    /// Returns the best candidate above a fixed similarity floor, used to
    /// phrase clarification messages ("did you mean ...?").
    pub fn closest_column(&self, name: &str) -> Option<&str> {
        let needle = name.to_lowercase();
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), jaro_winkler(&needle, &c.name)))
            .filter(|(_, score)| *score >= 0.78)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
    }
}
