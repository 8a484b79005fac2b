use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{CallPolicy, Origin, RetrievalQuery};
use crate::error::ProviderError;
use crate::llm::{GenerationRequest, LanguageModelClient};
use crate::prompts::QUERY_PLANNER_PROMPT;

const PLANNER_MAX_OUTPUT: u32 = 300;
const PLANNER_TEMPERATURE: f64 = 0.2;

/// Output of the planning stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    /// Queries to run, one per store.
    pub query: RetrievalQuery,
    /// Slots that fell back to the enhanced prompt.
    pub fallback_slots: Vec<Origin>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerOutput {
    #[serde(default, alias = "internal")]
    internal_query: Option<String>,
    #[serde(default, alias = "external", alias = "web_query")]
    external_query: Option<String>,
}

/// Stage 2: derives one document-index query and one web query.
#[derive(Clone)]
pub struct QueryPlanner {
    llm: Arc<dyn LanguageModelClient>,
    policy: CallPolicy,
}

impl QueryPlanner {
    /// Create a planner that calls `llm` under `policy`.
    pub fn new(llm: Arc<dyn LanguageModelClient>, policy: CallPolicy) -> Self {
        Self { llm, policy }
    }

    /// Plan both queries. Never fails and never yields an empty slot.
    pub async fn plan(&self, enhanced_prompt: &str) -> QueryPlan {
        let start = Instant::now();
        let request = GenerationRequest::new(QUERY_PLANNER_PROMPT, enhanced_prompt)
            .with_max_output(PLANNER_MAX_OUTPUT)
            .with_temperature(PLANNER_TEMPERATURE);

        let completion = self
            .policy
            .call("plan", || self.llm.generate(request.clone()))
            .await
            .map_err(ProviderError::from);

        let plan = match completion {
            Ok(text) => parse_plan(&text, enhanced_prompt),
            Err(e) => {
                warn!(error = %e, "Query planning failed, using enhanced prompt for both queries");
                QueryPlan {
                    query: RetrievalQuery {
                        internal_query: enhanced_prompt.to_string(),
                        external_query: enhanced_prompt.to_string(),
                    },
                    fallback_slots: vec![Origin::Internal, Origin::External],
                }
            }
        };

        info!(
            latency_ms = start.elapsed().as_millis(),
            fallback_slots = plan.fallback_slots.len(),
            "Retrieval queries planned"
        );
        plan
    }
}

/// Parse the planner completion, tolerating missing or malformed structure.
///
/// JSON (bare or fenced) is tried first, then `internal:` / `external:`
/// labelled lines. Any slot left empty takes the enhanced prompt.
pub fn parse_plan(completion: &str, enhanced_prompt: &str) -> QueryPlan {
    let parsed = extract_json_from_completion(completion)
        .ok()
        .and_then(|json| serde_json::from_str::<PlannerOutput>(json).ok())
        .unwrap_or_else(|| {
            debug!("Planner output is not JSON, trying labelled lines");
            parse_labelled_lines(completion)
        });

    let mut fallback_slots = Vec::new();
    let mut resolve = |slot: Option<String>, origin: Origin| -> String {
        match slot.as_deref().map(clean_query).filter(|q| !q.is_empty()) {
            Some(q) => q.to_string(),
            None => {
                warn!(slot = %origin, "Planner slot unusable, using enhanced prompt");
                fallback_slots.push(origin);
                enhanced_prompt.to_string()
            }
        }
    };

    let internal_query = resolve(parsed.internal_query, Origin::Internal);
    let external_query = resolve(parsed.external_query, Origin::External);

    QueryPlan {
        query: RetrievalQuery {
            internal_query,
            external_query,
        },
        fallback_slots,
    }
}

fn clean_query(raw: &str) -> &str {
    raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`').trim()
}

fn parse_labelled_lines(completion: &str) -> PlannerOutput {
    let mut output = PlannerOutput::default();

    for line in completion.lines() {
        let line = line.trim().trim_start_matches(['-', '*', ' ']);
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().to_lowercase();

        if label.starts_with("internal") && output.internal_query.is_none() {
            output.internal_query = Some(value.to_string());
        } else if (label.starts_with("external") || label.starts_with("web"))
            && output.external_query.is_none()
        {
            output.external_query = Some(value.to_string());
        }
    }

    output
}

/// Extract JSON from a completion string, handling markdown code blocks.
fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}
