//! Ticket reference extraction and verification
//!
//! Extraction scans PR title + body for identifiers matching the configured
//! pattern; verification resolves them against an optional ticket store
//! (Linear). The system keeps working without the store: every reference
//! is then marked unverified, with reduced confidence downstream.

use crate::findings::{Category, Finding};
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

const LINEAR_GRAPHQL_URL: &str = "https://api.linear.app/graphql";
const LOOKUP_ATTEMPTS: u32 = 3;
const LOOKUP_BACKOFF_BASE: Duration = Duration::from_millis(500);
const LOOKUP_TIMEOUT_SECS: u64 = 30;

/// Resolution state of a ticket reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    /// Resolved against the store.
    Verified,
    /// Store not configured or unreachable; existence unknown.
    Unverified,
    /// Store answered: no such ticket.
    Missing,
}

/// Resolved metadata for a verified ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMeta {
    pub title: String,
    pub state: String,
    pub team: Option<String>,
}

/// A ticket identifier found in the PR text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketReference {
    pub id: String,
    pub state: TicketState,
    pub meta: Option<TicketMeta>,
}

impl TicketReference {
    fn unresolved(id: String) -> Self {
        Self {
            id,
            state: TicketState::Unverified,
            meta: None,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.state == TicketState::Verified
    }
}

/// Extract ticket references from PR text.
///
/// First-occurrence order, case as written, de-duplicated. An empty result
/// is not an error here; the orchestrator turns absence into a finding.
pub fn extract_references(pattern: &Regex, text: &str) -> Vec<TicketReference> {
    let mut seen = std::collections::HashSet::new();
    let mut refs = Vec::new();
    for m in pattern.find_iter(text) {
        let id = m.as_str().to_string();
        if seen.insert(id.clone()) {
            refs.push(TicketReference::unresolved(id));
        }
    }
    refs
}

/// Lookup interface to the external ticket store.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Resolve one identifier. `Ok(None)` means the store answered and the
    /// ticket does not exist; `Err` means the store could not be reached.
    async fn lookup(&self, id: &str) -> Result<Option<TicketMeta>>;
}

/// Outcome of verifying all extracted references.
#[derive(Debug, Default)]
pub struct VerificationOutcome {
    pub references: Vec<TicketReference>,
    pub findings: Vec<Finding>,
}

impl VerificationOutcome {
    pub fn verified_count(&self) -> usize {
        self.references.iter().filter(|r| r.is_verified()).count()
    }
}

/// Verify references against the store, if one is configured.
///
/// Store lookups retry with exponential backoff; after the attempts are
/// exhausted the reference is downgraded to unverified and the failure is
/// recorded as a finding. Network trouble is never fatal to the run.
pub async fn verify(
    store: Option<&dyn TicketStore>,
    references: Vec<TicketReference>,
) -> VerificationOutcome {
    let mut outcome = VerificationOutcome::default();

    let Some(store) = store else {
        for mut reference in references {
            reference.state = TicketState::Unverified;
            outcome.findings.push(Finding::warning(
                Category::Ticket,
                format!("{} — unverified (ticket store not configured)", reference.id),
            ));
            outcome.references.push(reference);
        }
        return outcome;
    };

    for mut reference in references {
        match lookup_with_retry(store, &reference.id).await {
            Ok(Some(meta)) => {
                tracing::debug!(ticket = %reference.id, "ticket verified");
                outcome.findings.push(Finding::info(
                    Category::Ticket,
                    format!("{} — verified: {}", reference.id, meta.title),
                ));
                reference.state = TicketState::Verified;
                reference.meta = Some(meta);
            }
            Ok(None) => {
                outcome.findings.push(Finding::critical(
                    Category::Ticket,
                    format!("{} — not found in tracker", reference.id),
                ));
                reference.state = TicketState::Missing;
            }
            Err(err) => {
                tracing::warn!(ticket = %reference.id, %err, "ticket store unreachable");
                outcome.findings.push(Finding::warning(
                    Category::Ticket,
                    format!("{} — unverified (tracker unreachable)", reference.id),
                ));
                reference.state = TicketState::Unverified;
            }
        }
        outcome.references.push(reference);
    }

    outcome
}

async fn lookup_with_retry(store: &dyn TicketStore, id: &str) -> Result<Option<TicketMeta>> {
    let mut delay = LOOKUP_BACKOFF_BASE;
    let mut last_err = None;
    for attempt in 0..LOOKUP_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        match store.lookup(id).await {
            Ok(result) => return Ok(result),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("lookup failed")))
}

/// Linear GraphQL client.
pub struct LinearClient {
    client: reqwest::Client,
    api_key: String,
    /// Restrict verification to this team, when set.
    team_filter: Option<String>,
}

impl LinearClient {
    pub fn new(api_key: String, team_filter: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            team_filter,
        })
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchData {
    #[serde(rename = "searchIssues")]
    search_issues: SearchIssues,
}

#[derive(Deserialize)]
struct SearchIssues {
    nodes: Vec<IssueNode>,
}

#[derive(Deserialize)]
struct IssueNode {
    identifier: String,
    title: String,
    state: Option<IssueState>,
    team: Option<IssueTeam>,
}

#[derive(Deserialize)]
struct IssueState {
    name: String,
}

#[derive(Deserialize)]
struct IssueTeam {
    key: String,
}

#[async_trait]
impl TicketStore for LinearClient {
    async fn lookup(&self, id: &str) -> Result<Option<TicketMeta>> {
        let query = r#"
        query($term: String!) {
            searchIssues(term: $term, first: 5) {
                nodes { identifier title state { name } team { key } }
            }
        }"#;

        let resp = self
            .client
            .post(LINEAR_GRAPHQL_URL)
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({ "query": query, "variables": { "term": id } }))
            .send()
            .await
            .context("Failed to reach ticket store")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("ticket store returned {}", status);
        }

        let body: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse ticket store response")?;
        if !body.errors.is_empty() {
            anyhow::bail!("ticket store query errors: {}", body.errors.len());
        }

        let nodes = body.data.map(|d| d.search_issues.nodes).unwrap_or_default();

        // Only an exact identifier match verifies; a "closest match" from
        // the search endpoint is treated as a miss.
        let node = nodes.into_iter().find(|n| n.identifier == id);
        let Some(node) = node else { return Ok(None) };

        if let Some(filter) = &self.team_filter {
            let team_key = node.team.as_ref().map(|t| t.key.as_str());
            if team_key != Some(filter.as_str()) {
                return Ok(None);
            }
        }

        Ok(Some(TicketMeta {
            title: node.title,
            state: node.state.map(|s| s.name).unwrap_or_default(),
            team: node.team.map(|t| t.key),
        }))
    }
}
