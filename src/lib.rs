//! Timeline Harvester library.
//!
//! Collects the public post timelines of a fixed set of organizations by
//! driving a headless browser, then merges the exports and enriches posts
//! with image classification.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod browser;
pub mod config;
pub mod constants;
pub mod enrich;
pub mod export;
pub mod merge;
pub mod session;
pub mod targets;
pub mod timeline;
