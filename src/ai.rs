//! Semantic alignment judgement via OpenRouter
//!
//! The one non-deterministic boundary in the pipeline: given a diff summary
//! and candidate documents, an LLM judges whether the documents describe
//! the change. Everything upstream and downstream is deterministic, so a
//! different judging mechanism can be swapped in behind [`AlignmentJudge`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const JUDGE_MODEL: &str = "anthropic/claude-sonnet-4";
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Structured output of one alignment judgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentVerdict {
    pub aligned: bool,
    pub rationale: String,
    /// Specific mismatches, one line each.
    #[serde(default)]
    pub issues: Vec<String>,
}

/// Opaque judging capability with a narrow contract, so the judging
/// mechanism can change without touching orchestration or scoring.
#[async_trait]
pub trait AlignmentJudge: Send + Sync {
    /// Judge whether the candidate documents describe the change.
    async fn judge(&self, diff_summary: &str, documents: &str) -> Result<AlignmentVerdict>;

    /// Judge whether a diff is substantial (used by the exempt audit when
    /// the path-prefix policy alone can't decide).
    async fn is_substantial(&self, diff_summary: &str) -> Result<bool>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// OpenRouter-backed judge.
pub struct OpenRouterJudge {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterJudge {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, api_key })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: JUDGE_MODEL.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            max_tokens: 2048,
            stream: false,
        };

        let response = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Analysis request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("Analysis API error {}", status);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse analysis response")?;

        chat_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .context("Empty analysis response")
    }
}

#[async_trait]
impl AlignmentJudge for OpenRouterJudge {
    async fn judge(&self, diff_summary: &str, documents: &str) -> Result<AlignmentVerdict> {
        let system = r#"You are auditing whether requirement/spec documents describe a code change.

Output format (JSON only):
{
  "aligned": true/false,
  "rationale": "One or two sentences",
  "issues": ["spec says X but the diff implements Y"]
}

Rules:
- aligned=true when the documents substantively describe what the diff does.
- A document containing only a ticket id or boilerplate does not count.
- Only flag real mismatches, not missing detail."#;

        let user = format!(
            "Documents:\n{}\n\nChange summary:\n{}\n\nJudge the alignment:",
            documents, diff_summary
        );

        let response = self.chat(system, &user).await?;
        parse_verdict(&response)
    }

    async fn is_substantial(&self, diff_summary: &str) -> Result<bool> {
        let system = r#"Decide whether a diff is substantial.

Substantial: new or changed behavior, logic, data handling.
Not substantial: formatting, comments, renames, version bumps, CI config.

Answer with JSON only: {"substantial": true/false}"#;

        let response = self.chat(system, diff_summary).await?;
        let json = extract_json(&response)?;
        Ok(json
            .get("substantial")
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }
}

/// Parse the judge's response, tolerating prose around the JSON block.
fn parse_verdict(response: &str) -> Result<AlignmentVerdict> {
    let json = extract_json(response)?;
    Ok(AlignmentVerdict {
        aligned: json.get("aligned").and_then(|v| v.as_bool()).unwrap_or(false),
        rationale: json
            .get("rationale")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        issues: json
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn extract_json(response: &str) -> Result<serde_json::Value> {
    let start = response.find('{');
    let end = response.rfind('}');
    let slice = match (start, end) {
        (Some(s), Some(e)) if e > s => &response[s..=e],
        _ => response,
    };
    serde_json::from_str(slice).context("No JSON object in analysis response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_verdict() {
        let v = parse_verdict(r#"{"aligned": true, "rationale": "Spec matches.", "issues": []}"#)
            .unwrap();
        assert!(v.aligned);
        assert_eq!(v.rationale, "Spec matches.");
        assert!(v.issues.is_empty());
    }

    #[test]
    fn test_parse_verdict_with_surrounding_prose() {
        let response = "Here is my assessment:\n```json\n{\"aligned\": false, \"rationale\": \"Spec describes caching, diff adds auth.\", \"issues\": [\"caching never implemented\"]}\n```\nDone.";
        let v = parse_verdict(response).unwrap();
        assert!(!v.aligned);
        assert_eq!(v.issues, vec!["caching never implemented"]);
    }

    #[test]
    fn test_parse_verdict_missing_fields_defaults_to_misaligned() {
        let v = parse_verdict(r#"{"rationale": "unsure"}"#).unwrap();
        assert!(!v.aligned);
    }

    #[test]
    fn test_parse_verdict_no_json_is_error() {
        assert!(parse_verdict("I cannot judge this.").is_err());
    }

    #[test]
    fn test_extract_substantial_flag() {
        let json = extract_json(r#"{"substantial": false}"#).unwrap();
        assert_eq!(json.get("substantial").and_then(|v| v.as_bool()), Some(false));
    }
}
