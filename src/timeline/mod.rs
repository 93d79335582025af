//! Incremental timeline scraping: extraction, deduplication and pagination.

pub mod extract;
pub mod ledger;
pub mod metrics;
pub mod pagination;
pub mod record;

pub use extract::{ExtractionFailure, FieldExtractor};
pub use ledger::DedupLedger;
pub use pagination::{
    harvest_timeline, HarvestError, PaginationMachine, PaginationState, TerminationReason,
    TimelineHarvest,
};
pub use record::{Metrics, PostRecord, PostTimestamp};
