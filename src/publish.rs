//! Report publishing
//!
//! One report comment per PR, edited in place. The comment carries a hidden
//! HTML marker embedding the publishing run's sequence number; a run only
//! writes over a comment whose sequence is not newer than its own, so a
//! stale investigation can never clobber the report of the run that
//! superseded it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

const MARKER_PREFIX: &str = "<!-- traceguard:";
const MARKER_SUFFIX: &str = " -->";
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// The live report comment as found on the PR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingReport {
    pub comment_id: u64,
    pub sequence: u64,
}

/// Destination for report bodies (the source host, or a dry-run logger).
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Locate the marked report comment, if one exists.
    async fn find_existing(&self) -> Result<Option<ExistingReport>>;
    async fn create(&self, body: &str) -> Result<()>;
    async fn update(&self, comment_id: u64, body: &str) -> Result<()>;
}

/// What a publish call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// A newer run owns the comment; this write was skipped.
    Superseded,
}

/// Publishes report bodies through a sink, retrying transient failures.
pub struct ReportPublisher<'a> {
    sink: &'a dyn ReportSink,
    sequence: u64,
}

impl<'a> ReportPublisher<'a> {
    pub fn new(sink: &'a dyn ReportSink, sequence: u64) -> Self {
        Self { sink, sequence }
    }

    /// Upsert the report comment with the given body.
    ///
    /// Safe to call repeatedly within a run; every call re-resolves the
    /// live comment so concurrent runs converge on last-writer-by-sequence.
    pub async fn publish(&self, body: &str) -> Result<PublishOutcome> {
        let marked = format!("{}\n{}", marker(self.sequence), body);

        let mut delay = PUBLISH_BACKOFF_BASE;
        let mut last_err = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            if attempt > 0 {
                sleep(delay).await;
                delay *= 2;
            }
            match self.try_publish(&marked).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, %err, "publish attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("publish failed")))
            .context("Failed to publish report")
    }

    async fn try_publish(&self, marked_body: &str) -> Result<PublishOutcome> {
        match self.sink.find_existing().await? {
            Some(existing) if existing.sequence > self.sequence => {
                tracing::info!(
                    ours = self.sequence,
                    theirs = existing.sequence,
                    "report owned by a newer run, skipping write"
                );
                Ok(PublishOutcome::Superseded)
            }
            Some(existing) => {
                self.sink.update(existing.comment_id, marked_body).await?;
                Ok(PublishOutcome::Published)
            }
            None => {
                self.sink.create(marked_body).await?;
                Ok(PublishOutcome::Published)
            }
        }
    }
}

/// The hidden marker embedded at the top of every published body.
pub fn marker(sequence: u64) -> String {
    format!("{}{}{}", MARKER_PREFIX, sequence, MARKER_SUFFIX)
}

/// Extract the sequence from a marked comment body, if it carries one.
pub fn parse_sequence(body: &str) -> Option<u64> {
    let start = body.find(MARKER_PREFIX)? + MARKER_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(MARKER_SUFFIX)?;
    rest[..end].trim().parse().ok()
}

/// Sink used when no write credential is available: logs instead of posting.
pub struct DryRunSink;

#[async_trait]
impl ReportSink for DryRunSink {
    async fn find_existing(&self) -> Result<Option<ExistingReport>> {
        Ok(None)
    }

    async fn create(&self, body: &str) -> Result<()> {
        tracing::info!(bytes = body.len(), "dry run: report not posted");
        Ok(())
    }

    async fn update(&self, _comment_id: u64, body: &str) -> Result<()> {
        tracing::info!(bytes = body.len(), "dry run: report not posted");
        Ok(())
    }
}
