//! Batch runs over the configured targets.
//!
//! Targets are processed strictly one after another, each with its own
//! freshly opened accessor. A failure while handling one target is recorded
//! in its summary row and the batch moves on.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use tracing::{error, info, warn};

use crate::browser::{authenticate, AccessorFactory, DocumentAccessor};
use crate::config::{Config, ConfigError, Credentials, ScrapeLimits};
use crate::export::SummaryWriter;
use crate::targets::Target;
use crate::timeline::{harvest_timeline, FieldExtractor, HarvestError, PostRecord};

/// Summary outcome for a run that finished without any record.
pub const NO_RECORDS_OUTCOME: &str = "No tweets found";

/// Where harvested records go.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store `records` for `target` and return a locator for the stored data.
    async fn persist(&self, target: &Target, records: &[PostRecord]) -> Result<String>;
}

/// One summary row per processed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub name: String,
    pub handle: String,
    /// Output locator, [`NO_RECORDS_OUTCOME`], or `Error: <reason>`.
    pub outcome: String,
    pub record_count: usize,
    /// Records with at least one media locator.
    pub media_record_count: usize,
}

impl RunSummary {
    fn saved(target: &Target, locator: String, records: &[PostRecord]) -> Self {
        Self {
            name: target.name.clone(),
            handle: target.handle.clone(),
            outcome: locator,
            record_count: records.len(),
            media_record_count: records.iter().filter(|r| r.has_media()).count(),
        }
    }

    fn empty(target: &Target) -> Self {
        Self {
            name: target.name.clone(),
            handle: target.handle.clone(),
            outcome: NO_RECORDS_OUTCOME.to_string(),
            record_count: 0,
            media_record_count: 0,
        }
    }

    fn failed(target: &Target, reason: impl Display) -> Self {
        Self {
            name: target.name.clone(),
            handle: target.handle.clone(),
            outcome: format!("Error: {reason}"),
            record_count: 0,
            media_record_count: 0,
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcome.starts_with("Error: ")
    }
}

/// Drives a batch of targets through open, login, harvest, persist, close.
pub struct SessionOrchestrator<F, S> {
    factory: F,
    sink: S,
    extractor: FieldExtractor,
    base_url: String,
    limits: ScrapeLimits,
    credentials: Option<Credentials>,
    delay_min: Duration,
    delay_max: Duration,
}

impl<F, S> SessionOrchestrator<F, S>
where
    F: AccessorFactory,
    S: RecordSink,
{
    /// # Errors
    ///
    /// Returns an error if the timeline base URL is not an absolute URL.
    pub fn new(factory: F, sink: S, config: &Config) -> Result<Self, ConfigError> {
        let extractor =
            FieldExtractor::new(config.base_url()).map_err(|e| ConfigError::InvalidValue {
                name: "TIMELINE_BASE_URL".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            factory,
            sink,
            extractor,
            base_url: config.base_url().to_string(),
            limits: config.limits.clone(),
            credentials: config.credentials.clone(),
            delay_min: config.target_delay_min,
            delay_max: config.target_delay_max.max(config.target_delay_min),
        })
    }

    /// Process every target in order, appending one summary row each.
    ///
    /// # Errors
    ///
    /// Returns an error only if the summary table cannot be written; target
    /// failures are recorded as rows instead.
    pub async fn run(
        &self,
        targets: &[Target],
        summary: &mut SummaryWriter,
    ) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::with_capacity(targets.len());

        for (i, target) in targets.iter().enumerate() {
            if i > 0 {
                let delay = self.next_delay();
                info!(?delay, "Waiting before next target");
                tokio::time::sleep(delay).await;
            }

            info!(name = %target.name, handle = %target.handle, "Processing target");
            let row = self.run_target(target).await;
            if row.is_failure() {
                error!(handle = %target.handle, outcome = %row.outcome, "Target failed");
            }
            summary.append(&row).await?;
            summaries.push(row);
        }

        let failed = summaries.iter().filter(|s| s.is_failure()).count();
        info!(targets = summaries.len(), failed, "Batch complete");
        Ok(summaries)
    }

    /// Handle a single target; never fails, faults become an `Error:` row.
    pub async fn run_target(&self, target: &Target) -> RunSummary {
        let mut accessor = match self.factory.open().await {
            Ok(accessor) => accessor,
            Err(e) => return RunSummary::failed(target, e),
        };

        let harvested = self.harvest(&mut accessor, target).await;

        if let Err(e) = accessor.close().await {
            warn!(handle = %target.handle, error = %e, "Failed to close accessor");
        }

        let records = match harvested {
            Ok(records) => records,
            Err(e) => return RunSummary::failed(target, e),
        };

        if records.is_empty() {
            info!(handle = %target.handle, "No records found");
            return RunSummary::empty(target);
        }

        match self.sink.persist(target, &records).await {
            Ok(locator) => RunSummary::saved(target, locator, &records),
            Err(e) => RunSummary::failed(target, format!("{e:#}")),
        }
    }

    async fn harvest(
        &self,
        accessor: &mut F::Accessor,
        target: &Target,
    ) -> Result<Vec<PostRecord>, HarvestError> {
        let outcome = authenticate(accessor, &self.base_url, self.credentials.as_ref()).await;
        info!(handle = %target.handle, ?outcome, "Login step finished");

        accessor.navigate(&target.timeline_url(&self.base_url)).await?;
        let harvest = harvest_timeline(accessor, &self.extractor, &self.limits).await?;
        Ok(harvest.records)
    }

    fn next_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let min_ms = u64::try_from(self.delay_min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.delay_max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }
}
