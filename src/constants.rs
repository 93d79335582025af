//! Shared constants used across the application.

/// User agent string presented by the browser and the media downloader.
///
/// This is a realistic browser user agent, so timeline and media requests
/// look like normal browser traffic.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Selector matching every rendered post on a timeline.
pub const POST_SELECTOR: &str = "article[data-testid='tweet']";

/// Selector signalling that the timeline has rendered at least one entry.
pub const TIMELINE_READY_SELECTOR: &str = "article";

/// Visible text of the control that reveals more posts.
pub const LOAD_MORE_TEXT: &str = "Show more";
