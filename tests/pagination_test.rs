//! Integration tests for the scroll-driven harvest loop.

mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::{post, posts, ScriptedAccessor};
use timeline_harvester::browser::{BrowserError, CandidateElement, DocumentAccessor};
use timeline_harvester::config::{Config, ScrapeLimits};
use timeline_harvester::timeline::{
    harvest_timeline, FieldExtractor, HarvestError, PostRecord, TerminationReason,
};

fn limits() -> ScrapeLimits {
    Config::for_testing().limits
}

fn extractor() -> FieldExtractor {
    FieldExtractor::new("https://x.com").expect("valid base URL")
}

fn ids(records: &[PostRecord]) -> Vec<&str> {
    records.iter().map(|r| r.id.as_str()).collect()
}

#[tokio::test]
async fn test_overlapping_scans_accumulate_in_order() {
    let mut accessor = ScriptedAccessor::new(vec![
        posts(&["1", "2"]),
        posts(&["2", "3"]),
        posts(&["4"]),
    ]);

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits())
        .await
        .expect("harvest should succeed");

    assert_eq!(ids(&harvest.records), vec!["1", "2", "3", "4"]);
    assert_eq!(harvest.termination, TerminationReason::TimelineExhausted);
    assert!(harvest.scroll_attempts <= limits().max_scroll_attempts);
}

#[tokio::test]
async fn test_load_timeout_yields_no_records() {
    let mut accessor = ScriptedAccessor::blank();
    let log = accessor.log();

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits())
        .await
        .expect("load timeout is not an error");

    assert!(harvest.records.is_empty());
    assert_eq!(harvest.termination, TerminationReason::LoadTimeout);
    assert_eq!(harvest.scroll_attempts, 0);
    assert_eq!(log.lock().unwrap().queries, 0);
}

#[tokio::test]
async fn test_same_id_keeps_first_version() {
    let mut accessor = ScriptedAccessor::new(vec![
        vec![post("7", "original text")],
        vec![post("7", "edited text"), post("8", "other")],
    ]);

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits())
        .await
        .unwrap();

    assert_eq!(ids(&harvest.records), vec!["7", "8"]);
    assert_eq!(harvest.records[0].text, "original text");
}

#[tokio::test]
async fn test_ceiling_truncates_within_a_scan() {
    let mut limits = limits();
    limits.ceiling_records_per_target = 3;
    let mut accessor = ScriptedAccessor::new(vec![posts(&["1", "2"]), posts(&["3", "4", "5"])]);

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits)
        .await
        .unwrap();

    assert_eq!(ids(&harvest.records), vec!["1", "2", "3"]);
    assert_eq!(harvest.termination, TerminationReason::CeilingReached);
}

#[tokio::test]
async fn test_scroll_budget_bounds_an_endless_timeline() {
    let mut limits = limits();
    limits.max_scroll_attempts = 5;
    let scans: Vec<_> = (0..50)
        .map(|i| {
            let id = i.to_string();
            posts(&[id.as_str()])
        })
        .collect();
    let mut accessor = ScriptedAccessor::new(scans);

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits)
        .await
        .unwrap();

    assert_eq!(harvest.termination, TerminationReason::ScrollBudgetExhausted);
    assert_eq!(harvest.scroll_attempts, 5);
    // Initial scan plus one per scroll.
    assert_eq!(harvest.records.len(), 6);
}

#[tokio::test]
async fn test_unidentifiable_elements_are_skipped() {
    let junk = CandidateElement::new(
        r#"<article data-testid="tweet"><div>promoted</div></article>"#,
    );
    let mut accessor = ScriptedAccessor::new(vec![vec![junk, post("1", "real")]]);

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits())
        .await
        .unwrap();

    assert_eq!(ids(&harvest.records), vec!["1"]);
}

#[tokio::test]
async fn test_stalled_timeline_tries_load_more_then_oscillates() {
    let mut accessor = ScriptedAccessor::new(vec![posts(&["1"])]).with_load_more(1);
    let log = accessor.log();

    let harvest = harvest_timeline(&mut accessor, &extractor(), &limits())
        .await
        .unwrap();

    assert_eq!(ids(&harvest.records), vec!["1"]);
    assert_eq!(harvest.termination, TerminationReason::TimelineExhausted);

    let log = log.lock().unwrap();
    let load_more = log
        .activations
        .iter()
        .filter(|a| a.as_str() == "Show more")
        .count();
    // The first recovery finds the control and resets the stall count, so
    // later recoveries run; those fall back to scrolling.
    assert!(load_more >= 2, "expected repeated recovery, got {load_more}");
    assert!(log.scrolls.iter().any(|y| *y > 0.0 && *y < 1500.0 * 0.9));
}

#[tokio::test]
async fn test_accessor_fault_propagates() {
    struct Crashed;

    #[async_trait]
    impl DocumentAccessor for Crashed {
        async fn navigate(&mut self, _: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn wait_for(&mut self, _: &str, _: Duration) -> Result<(), BrowserError> {
            Err(BrowserError::Script("target crashed".to_string()))
        }
        async fn query_all(&mut self, _: &str) -> Result<Vec<CandidateElement>, BrowserError> {
            Ok(Vec::new())
        }
        async fn scroll_to(&mut self, _: f64) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn content_height(&mut self) -> Result<f64, BrowserError> {
            Ok(0.0)
        }
        async fn activate_text(&mut self, _: &str) -> Result<bool, BrowserError> {
            Ok(false)
        }
        async fn fill(&mut self, _: &str, _: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        async fn close(&mut self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    let result = harvest_timeline(&mut Crashed, &extractor(), &limits()).await;
    assert!(matches!(result, Err(HarvestError::Navigation(BrowserError::Script(_)))));
}
