//! Oracle-backed strategy: consult an external advisory service.
//!
//! The request is a condensed description of the page (truncated element
//! summaries, never the full DOM) plus a short tail of prior decisions. The
//! response is expected to be the JSON shape of [`Decision`], possibly
//! wrapped in code fences or surrounding prose — [`parse_decision`] digs it
//! out defensively. A response that cannot be parsed surfaces as
//! `OracleMalformed`, which the iteration controller records and absorbs
//! into an empty decision with the goal unchanged; it never aborts a run.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use learning_store::LearningState;
use once_cell::sync::Lazy;
use page_perceiver::PageState;
use regex::Regex;
use serde::Serialize;
use sitescout_core_types::{Decision, ExploreError};
use tracing::{debug, warn};

use crate::filters::finalize;
use crate::{DecisionPolicy, DEFAULT_MAX_ACTIONS};

/// Elements summarized per category in the condensed request.
const SUMMARY_PER_CATEGORY: usize = 12;

/// Prior actions included in the request history tail.
const HISTORY_WINDOW: usize = 6;

/// Condensed page + session description sent to the advisory service.
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub page_url: String,
    pub title: String,
    /// Category name -> up to [`SUMMARY_PER_CATEGORY`] element summaries,
    /// each "label | primary locator".
    pub element_summaries: BTreeMap<String, Vec<String>>,
    pub recent_history: Vec<String>,
    pub current_goal: String,
    pub iteration: u32,
    pub estimated_coverage: u8,
}

impl OracleRequest {
    pub fn build(page: &PageState, state: &LearningState, goal: &str) -> Self {
        let mut element_summaries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for element in &page.elements {
            let bucket = element_summaries
                .entry(element.category.name().to_string())
                .or_default();
            if bucket.len() >= SUMMARY_PER_CATEGORY {
                continue;
            }
            let locator = element
                .locators
                .first()
                .map(|l| l.to_string())
                .unwrap_or_default();
            bucket.push(format!("{} | {}", element.label(), locator));
        }

        let recent_history = state
            .action_log
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .map(|entry| {
                format!(
                    "#{} {} on {} -> {}",
                    entry.iteration,
                    entry.kind,
                    entry.page_key,
                    if entry.result.success { "ok" } else { "failed" }
                )
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Self {
            page_url: page.url.clone(),
            title: page.title.clone(),
            element_summaries,
            recent_history,
            current_goal: goal.to_string(),
            iteration: state.iteration,
            estimated_coverage: state.estimated_coverage,
        }
    }
}

/// Transport to the advisory service. Returns the raw response text.
#[async_trait]
pub trait OracleClient: Send + Sync {
    async fn advise(&self, request: &OracleRequest) -> Result<String, ExploreError>;
}

/// HTTP transport: one POST endpoint, JSON request, text response.
pub struct HttpOracleClient {
    client: reqwest::Client,
    endpoint: String,
    bearer: Option<String>,
}

impl HttpOracleClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bearer: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[async_trait]
impl OracleClient for HttpOracleClient {
    async fn advise(&self, request: &OracleRequest) -> Result<String, ExploreError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(60))
            .json(request);
        if let Some(token) = &self.bearer {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| ExploreError::oracle_malformed(format!("advisory request failed: {err}")))?;
        response
            .text()
            .await
            .map_err(|err| ExploreError::oracle_malformed(format!("advisory body unreadable: {err}")))
    }
}

/// Deterministic client for tests and offline development.
#[derive(Debug, Default, Clone)]
pub struct MockOracleClient {
    pub response: String,
}

impl MockOracleClient {
    pub fn replying(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl OracleClient for MockOracleClient {
    async fn advise(&self, _request: &OracleRequest) -> Result<String, ExploreError> {
        Ok(self.response.clone())
    }
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]+?)```").expect("static regex"));

/// Extract a [`Decision`] from possibly-wrapped response text.
///
/// Tries, in order: the whole text as JSON, the first fenced code block, and
/// a brace-balanced scan for the first JSON object. `fallback_goal` fills an
/// empty `new_goal` so a parse success never loses the goal.
pub fn parse_decision(text: &str, fallback_goal: &str) -> Result<Decision, ExploreError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExploreError::oracle_malformed("empty response"));
    }

    let candidates = [
        Some(trimmed.to_string()),
        FENCED_JSON
            .captures(trimmed)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string()),
        first_json_object(trimmed),
    ];

    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<Decision>(&candidate) {
            Ok(mut decision) => {
                if decision.new_goal.trim().is_empty() {
                    decision.new_goal = fallback_goal.to_string();
                }
                return Ok(decision.sanitize());
            }
            Err(err) => debug!("decision candidate rejected: {err}"),
        }
    }

    Err(ExploreError::oracle_malformed(format!(
        "no decision object in {} bytes of response",
        trimmed.len()
    )))
}

/// First brace-balanced JSON object in `text`, string- and escape-aware.
fn first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Oracle-backed next-action strategy.
pub struct OraclePolicy<C: OracleClient> {
    client: C,
    max_actions: usize,
}

impl<C: OracleClient> OraclePolicy<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            max_actions: DEFAULT_MAX_ACTIONS,
        }
    }

    pub fn with_max_actions(mut self, max: usize) -> Self {
        self.max_actions = max;
        self
    }
}

#[async_trait]
impl<C: OracleClient> DecisionPolicy for OraclePolicy<C> {
    async fn decide(
        &self,
        page: &PageState,
        state: &LearningState,
        goal: &str,
    ) -> Result<Decision, ExploreError> {
        let request = OracleRequest::build(page, state, goal);
        let raw = self.client.advise(&request).await?;
        let decision = match parse_decision(&raw, goal) {
            Ok(decision) => decision,
            Err(err) => {
                warn!("oracle response rejected: {err}");
                return Err(err);
            }
        };
        Ok(finalize(decision, page, state, self.max_actions))
    }

    fn name(&self) -> &'static str {
        "oracle"
    }
}
