//! Static allow-list validation of candidate statements.
//!
//! This is the sole safety boundary between synthesis and execution. It is
//! deliberately independent of the compiler's templates: a template bug can
//! not bypass it. Two passes run in order: a token-level allow-list scan
//! (denied keywords, terminators, string literals, comments, unknown
//! identifiers, undeclared parameters), then a structural parse asserting
//! exactly one read-only SELECT over the single known table. Any failure
//! rejects the whole turn; rejection is never downgraded to a different
//! query.

use crate::error::{AssistantError, Result};
use crate::result_table::Scalar;
use crate::schema::TableSchema;
use crate::sql_compiler::{CandidateQuery, OUTPUT_ALIASES};
use lazy_static::lazy_static;
use sqlparser::ast::{Expr, SetExpr, Statement, TableFactor, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::HashSet;

lazy_static! {
    /// Keywords that must never appear anywhere in a statement, regardless
    /// of how the parser would interpret them.
    static ref DENIED_KEYWORDS: HashSet<&'static str> = [
        "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "MERGE", "TRUNCATE",
        "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "TRIGGER", "GRANT", "REVOKE", "INTO",
        "UNION", "EXCEPT", "INTERSECT", "EXEC", "EXECUTE",
    ]
    .into_iter()
    .collect();
}

/// Function names the templates may call.
const ALLOWED_FUNCTIONS: &[&str] = &["count", "sum", "avg", "min", "max"];

pub struct QueryValidator {
    table: String,
    allowed_idents: HashSet<String>,
    max_limit: i64,
}

impl QueryValidator {
    pub fn new(schema: &TableSchema, max_limit: i64) -> Self {
        let mut allowed_idents: HashSet<String> =
            schema.columns.iter().map(|c| c.name.to_lowercase()).collect();
        allowed_idents.insert(schema.table.to_lowercase());
        allowed_idents.extend(OUTPUT_ALIASES.iter().map(|a| a.to_string()));
        allowed_idents.extend(ALLOWED_FUNCTIONS.iter().map(|f| f.to_string()));
        Self {
            table: schema.table.to_lowercase(),
            allowed_idents,
            max_limit,
        }
    }

    /// Approve a candidate or reject the turn.
    pub fn validate(&self, candidate: &CandidateQuery) -> Result<()> {
        let declared: HashSet<&str> = candidate.params.iter().map(|(n, _)| n.as_str()).collect();
        self.scan_tokens(&candidate.statement, &declared)?;
        self.check_structure(candidate)
    }

    fn scan_tokens(&self, sql: &str, declared: &HashSet<&str>) -> Result<()> {
        // GenericDialect tokenizes `$p0` as a placeholder; SQLite's own
        // dialect would absorb the `$` into an identifier.
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| reject(format!("statement does not tokenize: {}", e)))?;

        let mut select_count = 0usize;
        for token in &tokens {
            match token {
                Token::SemiColon => {
                    return Err(reject("statement terminator is not allowed".to_string()))
                }
                Token::SingleQuotedString(_) | Token::DoubleQuotedString(_) => {
                    return Err(reject(
                        "string literals are not allowed; values must be bound parameters".to_string(),
                    ))
                }
                Token::Whitespace(Whitespace::SingleLineComment { .. })
                | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                    return Err(reject("comments are not allowed".to_string()))
                }
                Token::Placeholder(name) => {
                    if !declared.contains(name.as_str()) {
                        return Err(reject(format!("undeclared parameter '{}'", name)));
                    }
                }
                Token::Word(word) => {
                    let upper = word.value.to_uppercase();
                    if DENIED_KEYWORDS.contains(upper.as_str()) {
                        return Err(reject(format!("disallowed keyword '{}'", upper)));
                    }
                    if upper == "SELECT" {
                        select_count += 1;
                    }
                    if word.quote_style.is_some() {
                        return Err(reject(format!(
                            "quoted identifier '{}' is not allowed",
                            word.value
                        )));
                    }
                    if word.keyword == Keyword::NoKeyword {
                        let lower = word.value.to_lowercase();
                        if !self.allowed_idents.contains(&lower) && !declared.contains(lower.as_str())
                        {
                            return Err(reject(format!("unknown identifier '{}'", word.value)));
                        }
                    }
                }
                _ => {}
            }
        }

        if select_count != 1 {
            return Err(reject(format!(
                "expected exactly one SELECT, found {}",
                select_count
            )));
        }
        Ok(())
    }

    fn check_structure(&self, candidate: &CandidateQuery) -> Result<()> {
        let statements = Parser::parse_sql(&GenericDialect {}, &candidate.statement)
            .map_err(|e| reject(format!("statement does not parse: {}", e)))?;
        if statements.len() != 1 {
            return Err(reject(format!(
                "expected exactly one statement, found {}",
                statements.len()
            )));
        }

        let query = match &statements[0] {
            Statement::Query(q) => q,
            _ => return Err(reject("only SELECT statements may execute".to_string())),
        };
        if query.with.is_some() {
            return Err(reject("WITH clauses are not allowed".to_string()));
        }

        let select = match query.body.as_ref() {
            SetExpr::Select(s) => s,
            _ => return Err(reject("only a plain SELECT body is allowed".to_string())),
        };
        if select.into.is_some() {
            return Err(reject("SELECT INTO is not allowed".to_string()));
        }
        if select.projection.is_empty() {
            return Err(reject("empty select list".to_string()));
        }
        if select.from.len() != 1 {
            return Err(reject("statement must read exactly one table".to_string()));
        }

        let table_ref = &select.from[0];
        if !table_ref.joins.is_empty() {
            return Err(reject("joins are not allowed".to_string()));
        }
        match &table_ref.relation {
            TableFactor::Table { name, alias, .. } => {
                if alias.is_some() {
                    return Err(reject("table aliases are not allowed".to_string()));
                }
                let name = name.to_string().to_lowercase();
                if name != self.table {
                    return Err(reject(format!("unknown table '{}'", name)));
                }
            }
            _ => return Err(reject("derived table sources are not allowed".to_string())),
        }

        if query.offset.is_some() {
            return Err(reject("OFFSET is not allowed".to_string()));
        }
        self.check_limit(query.limit.as_ref(), candidate)
    }

    fn check_limit(&self, limit: Option<&Expr>, candidate: &CandidateQuery) -> Result<()> {
        let expr = match limit {
            None => return Ok(()),
            Some(expr) => expr,
        };
        let value = match expr {
            Expr::Value(Value::Number(n, _)) => n
                .parse::<i64>()
                .map_err(|_| reject(format!("limit '{}' is not an integer", n)))?,
            Expr::Value(Value::Placeholder(name)) => {
                let bound = candidate
                    .params
                    .iter()
                    .find(|(p, _)| p == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| reject(format!("limit parameter '{}' is not bound", name)))?;
                match bound {
                    Scalar::Int(v) => *v,
                    _ => return Err(reject("limit parameter must be an integer".to_string())),
                }
            }
            _ => return Err(reject("limit must be a literal or a bound parameter".to_string())),
        };

        if value < 1 || value > self.max_limit {
            return Err(reject(format!(
                "limit {} is outside the allowed range 1..={}",
                value, self.max_limit
            )));
        }
        Ok(())
    }
}

fn reject(reason: String) -> AssistantError {
    AssistantError::QueryRejected(reason)
}
