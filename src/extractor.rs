//! Intent extraction from raw question text.
//!
//! Builds a constrained prompt enumerating the allowed kinds, columns, and
//! operators, sends it to the language backend, and parses the JSON reply
//! into a locally re-validated `QueryIntent`.

use crate::error::{AssistantError, Result};
use crate::intent::{QueryIntent, RawIntent};
use crate::llm::{strip_code_fences, LanguageBackend};
use crate::schema::TableSchema;
use std::sync::Arc;
use tracing::{debug, info};

pub struct IntentExtractor {
    backend: Arc<dyn LanguageBackend>,
    schema: TableSchema,
    detail_cues: Vec<String>,
}

impl IntentExtractor {
    pub fn new(backend: Arc<dyn LanguageBackend>, schema: TableSchema, detail_cues: Vec<String>) -> Self {
        Self {
            backend,
            schema,
            detail_cues,
        }
    }

    /// Extract a validated intent. `context` is the rendered rolling window
    /// of prior turns; `hint` carries the rejection reason on the one
    /// permitted re-attempt.
    pub async fn extract(
        &self,
        question: &str,
        context: Option<&str>,
        hint: Option<&str>,
    ) -> Result<QueryIntent> {
        let prompt = self.build_prompt(question, context, hint);
        let reply = self.backend.complete(&prompt).await?;
        let cleaned = strip_code_fences(&reply);
        debug!(reply = cleaned, "backend intent reply");

        let raw: RawIntent = serde_json::from_str(cleaned).map_err(|e| {
            AssistantError::IntentInvalid(format!("backend returned malformed intent: {}", e))
        })?;

        let intent = QueryIntent::from_raw(raw, question, &self.schema, &self.detail_cues)?;
        info!(kind = intent.kind.as_str(), "intent extracted");
        Ok(intent)
    }

    fn build_prompt(&self, question: &str, context: Option<&str>, hint: Option<&str>) -> String {
        let columns: Vec<String> = self
            .schema
            .columns
            .iter()
            .map(|c| {
                format!(
                    "- {} ({:?}{})",
                    c.name,
                    c.column_type,
                    if c.groupable { ", groupable" } else { "" }
                )
            })
            .collect();

        let mut prompt = format!(
            r#"You are a query-intent extractor for municipal service-request analytics.
Convert the user's question into a JSON intent. Return ONLY valid JSON, no markdown, no explanations.

AVAILABLE COLUMNS (table: {table}):
{columns}

ALLOWED KINDS:
- aggregate_count: a single total or average
- top_n: ranked list of the most frequent values of a groupable column (set "limit")
- distribution: full breakdown over a groupable column
- time_filtered: counts restricted to a date range, optionally bucketed by year_created or month_created
- rate_or_percentage: share of rows matching a condition (put the condition in "condition")
- comparison: two values of one groupable column side by side (use an "in" filter with exactly two values)
- freeform_detailed: anything broader; summary statistics

ALLOWED OPERATORS: "eq", "in", "between", "date_range" (date_range only on date columns, values as YYYY-MM-DD)

OUTPUT FORMAT:
{{
  "kind": "top_n",
  "dimension": "complaint_type",
  "metric": "count",
  "metric_column": null,
  "filters": [{{"column": "borough", "operator": "eq", "value": "BROOKLYN"}}],
  "condition": null,
  "limit": 10
}}

RULES:
1. Use only the listed columns and operators. Never invent names.
2. "metric" is "count" or "average"; "average" requires a numeric "metric_column" (e.g. days_to_close).
3. For rate_or_percentage, "condition" holds the numerator predicate; shared restrictions go in "filters".
4. Omit "dimension" unless the question groups by something.
5. Return ONLY the JSON object.

USER QUESTION: "{question}"
"#,
            table = self.schema.table,
            columns = columns.join("\n"),
            question = question,
        );

        if let Some(context) = context {
            if !context.is_empty() {
                prompt.push_str(&format!("\nCONVERSATION SO FAR:\n{}\n", context));
            }
        }

        if let Some(hint) = hint {
            prompt.push_str(&format!(
                "\nThe previous attempt was rejected: {}. Produce a corrected intent.\n",
                hint
            ));
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedBackend {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<&str>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageBackend for ScriptedBackend {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AssistantError::BackendUnavailable("script exhausted".to_string()))
        }
    }

    fn extractor(replies: Vec<&str>) -> (IntentExtractor, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new(replies));
        let extractor = IntentExtractor::new(
            backend.clone(),
            TableSchema::service_requests(),
            vec!["detailed".to_string()],
        );
        (extractor, backend)
    }

    #[tokio::test]
    async fn parses_fenced_reply() {
        let (extractor, _) = extractor(vec![
            "```json\n{\"kind\": \"top_n\", \"dimension\": \"complaint_type\", \"limit\": 5}\n```",
        ]);
        let intent = extractor
            .extract("What are the top 5 complaint types?", None, None)
            .await
            .unwrap();
        assert_eq!(intent.limit, Some(5));
    }

    #[tokio::test]
    async fn malformed_reply_is_intent_invalid() {
        let (extractor, _) = extractor(vec!["this is not json"]);
        let err = extractor.extract("anything", None, None).await.unwrap_err();
        assert!(matches!(err, AssistantError::IntentInvalid(_)));
    }

    #[tokio::test]
    async fn hint_and_context_reach_the_prompt() {
        let (extractor, backend) = extractor(vec![
            "{\"kind\": \"aggregate_count\"}",
        ]);
        extractor
            .extract(
                "how many requests?",
                Some("Q: top types -> top_n; A: Noise leads"),
                Some("limit above maximum"),
            )
            .await
            .unwrap();
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("CONVERSATION SO FAR"));
        assert!(prompts[0].contains("limit above maximum"));
    }
}
