//! Scroll-driven collection of one timeline.
//!
//! [`PaginationMachine`] holds the counters and decides every transition;
//! [`harvest_timeline`] performs the side effects the machine asks for
//! against a [`DocumentAccessor`].

use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::extract::FieldExtractor;
use super::ledger::DedupLedger;
use super::record::PostRecord;
use crate::browser::{BrowserError, DocumentAccessor};
use crate::config::ScrapeLimits;
use crate::constants::{LOAD_MORE_TEXT, POST_SELECTOR, TIMELINE_READY_SELECTOR};

/// Fraction of the content height scrolled back to when nudging the page.
const OSCILLATION_FRACTION: f64 = 0.8;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("timeline could not be read: {0}")]
    Navigation(#[from] BrowserError),
}

/// Why a harvest stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// No post rendered within the load timeout.
    LoadTimeout,
    CeilingReached,
    ScrollBudgetExhausted,
    /// Repeated stalls and the page stopped growing.
    TimelineExhausted,
}

impl TerminationReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LoadTimeout => "load_timeout",
            Self::CeilingReached => "ceiling_reached",
            Self::ScrollBudgetExhausted => "scroll_budget_exhausted",
            Self::TimelineExhausted => "timeline_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationState {
    Loading,
    Scanning,
    AcceptingNew,
    Stalled,
    Recovering,
    Terminated(TerminationReason),
}

impl PaginationState {
    #[must_use]
    pub const fn is_terminated(self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Pagination counters and transition rules, free of any I/O.
#[derive(Debug, Clone)]
pub struct PaginationMachine {
    limits: ScrapeLimits,
    state: PaginationState,
    no_growth: u32,
    scroll_attempts: u32,
    last_height: Option<f64>,
}

impl PaginationMachine {
    #[must_use]
    pub fn new(limits: ScrapeLimits) -> Self {
        Self {
            limits,
            state: PaginationState::Loading,
            no_growth: 0,
            scroll_attempts: 0,
            last_height: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> PaginationState {
        self.state
    }

    #[must_use]
    pub const fn no_growth(&self) -> u32 {
        self.no_growth
    }

    #[must_use]
    pub const fn scroll_attempts(&self) -> u32 {
        self.scroll_attempts
    }

    /// The first post rendered.
    pub fn loaded(&mut self) -> PaginationState {
        self.state = PaginationState::Scanning;
        self.state
    }

    /// Nothing rendered within the load timeout.
    pub fn load_timed_out(&mut self) -> PaginationState {
        self.state = PaginationState::Terminated(TerminationReason::LoadTimeout);
        self.state
    }

    /// A scroll to the bottom is about to happen.
    pub fn begin_cycle(&mut self) {
        self.scroll_attempts += 1;
        self.state = PaginationState::Scanning;
    }

    /// Record the outcome of one scan and decide what happens next.
    ///
    /// Returns `Terminated`, `Recovering`, `AcceptingNew` or `Stalled`.
    pub fn observe_scan(
        &mut self,
        new_records: usize,
        total_records: usize,
        height: f64,
    ) -> PaginationState {
        let height_unchanged = self.last_height.is_some_and(|last| same_height(last, height));
        self.last_height = Some(height);

        let settled = if new_records > 0 {
            self.no_growth = 0;
            PaginationState::AcceptingNew
        } else {
            self.no_growth += 1;
            PaginationState::Stalled
        };

        self.state = if total_records >= self.limits.ceiling_records_per_target {
            PaginationState::Terminated(TerminationReason::CeilingReached)
        } else if self.no_growth >= self.limits.exhaustion_threshold && height_unchanged {
            PaginationState::Terminated(TerminationReason::TimelineExhausted)
        } else if self.scroll_attempts >= self.limits.max_scroll_attempts {
            PaginationState::Terminated(TerminationReason::ScrollBudgetExhausted)
        } else if self.no_growth >= self.limits.recovery_threshold
            && self.no_growth < self.limits.exhaustion_threshold
        {
            PaginationState::Recovering
        } else {
            settled
        };
        self.state
    }

    /// Record the outcome of a recovery action.
    ///
    /// The stall counter resets when a load-more control was activated or the
    /// content height moved; otherwise it is left as is so exhaustion stays
    /// reachable.
    pub fn recovered(&mut self, activated_control: bool, height: f64) -> PaginationState {
        let height_moved = self.last_height.is_some_and(|last| !same_height(last, height));
        if activated_control || height_moved {
            self.no_growth = 0;
        }
        self.last_height = Some(height);
        self.state = PaginationState::Scanning;
        self.state
    }
}

fn same_height(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.5
}

/// Result of collecting one timeline.
#[derive(Debug, Clone)]
pub struct TimelineHarvest {
    /// Accepted records in first-seen order.
    pub records: Vec<PostRecord>,
    pub termination: TerminationReason,
    pub scroll_attempts: u32,
}

/// Collect posts from the timeline currently loaded in `accessor`.
///
/// # Errors
///
/// Returns [`HarvestError::Navigation`] when the accessor fails for any
/// reason other than the initial load timing out.
pub async fn harvest_timeline<A>(
    accessor: &mut A,
    extractor: &FieldExtractor,
    limits: &ScrapeLimits,
) -> Result<TimelineHarvest, HarvestError>
where
    A: DocumentAccessor + ?Sized,
{
    let mut machine = PaginationMachine::new(limits.clone());
    let mut ledger = DedupLedger::new();
    let mut records: Vec<PostRecord> = Vec::new();

    match accessor
        .wait_for(TIMELINE_READY_SELECTOR, limits.load_timeout)
        .await
    {
        Ok(()) => {
            machine.loaded();
        }
        Err(e) if e.is_timeout() => {
            warn!(error = %e, "Timeline did not render any posts");
            machine.load_timed_out();
            return Ok(TimelineHarvest {
                records,
                termination: TerminationReason::LoadTimeout,
                scroll_attempts: 0,
            });
        }
        Err(e) => return Err(e.into()),
    }

    // The page as first rendered is scanned before any scrolling.
    let mut state = scan_and_observe(accessor, extractor, &mut machine, &mut ledger, &mut records).await?;

    loop {
        match state {
            PaginationState::Terminated(reason) => {
                info!(
                    records = records.len(),
                    scroll_attempts = machine.scroll_attempts(),
                    reason = reason.as_str(),
                    "Timeline harvest finished"
                );
                return Ok(TimelineHarvest {
                    records,
                    termination: reason,
                    scroll_attempts: machine.scroll_attempts(),
                });
            }
            PaginationState::Recovering => {
                debug!(no_growth = machine.no_growth(), "Timeline stalled, attempting recovery");
                let activated = recover(accessor, limits).await?;
                let height = accessor.content_height().await?;
                machine.recovered(activated, height);
            }
            _ => {}
        }

        machine.begin_cycle();
        let height = accessor.content_height().await?;
        accessor.scroll_to(height).await?;
        settle(limits).await;
        state = scan_and_observe(accessor, extractor, &mut machine, &mut ledger, &mut records).await?;
    }
}

async fn scan_and_observe<A>(
    accessor: &mut A,
    extractor: &FieldExtractor,
    machine: &mut PaginationMachine,
    ledger: &mut DedupLedger,
    records: &mut Vec<PostRecord>,
) -> Result<PaginationState, HarvestError>
where
    A: DocumentAccessor + ?Sized,
{
    let ceiling = machine.limits.ceiling_records_per_target;
    let candidates = accessor.query_all(POST_SELECTOR).await?;

    let mut new_records = 0;
    for candidate in &candidates {
        if records.len() >= ceiling {
            break;
        }
        let record = match extractor.extract(candidate) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Skipping candidate element");
                continue;
            }
        };
        if ledger.accept(&record.id) {
            records.push(record);
            new_records += 1;
        }
    }

    let height = accessor.content_height().await?;
    let state = machine.observe_scan(new_records, records.len(), height);
    debug!(
        candidates = candidates.len(),
        new_records,
        total = records.len(),
        scroll_attempts = machine.scroll_attempts(),
        no_growth = machine.no_growth(),
        ?state,
        "Scanned timeline"
    );
    Ok(state)
}

/// Try to make the timeline load more. Returns whether a load-more control
/// was activated.
async fn recover<A>(accessor: &mut A, limits: &ScrapeLimits) -> Result<bool, HarvestError>
where
    A: DocumentAccessor + ?Sized,
{
    if accessor.activate_text(LOAD_MORE_TEXT).await? {
        debug!("Activated load-more control");
        settle(limits).await;
        return Ok(true);
    }

    let height = accessor.content_height().await?;
    accessor.scroll_to(height * OSCILLATION_FRACTION).await?;
    settle(limits).await;
    let height = accessor.content_height().await?;
    accessor.scroll_to(height).await?;
    settle(limits).await;
    Ok(false)
}

/// Wait for lazily loaded content, with jitter so the cadence is not fixed.
async fn settle(limits: &ScrapeLimits) {
    let wait = limits.settle_interval + jitter(limits.settle_jitter);
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
