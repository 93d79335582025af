//! Field extraction from one rendered post element.
//!
//! Each field is looked up through an ordered list of `(selector, read)`
//! strategies, most specific first. The first strategy that yields a value
//! wins, so a markup change that breaks one selector degrades to the next
//! instead of losing the field.

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;
use url::Url;

use super::metrics::{count_in_label, parse_count};
use super::record::{Metrics, PostRecord, PostTimestamp};
use crate::browser::CandidateElement;

/// Pattern to extract the post id from a permalink.
static STATUS_ID_PATTERN: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"/status/(\d+)").unwrap());

/// Substrings (lowercase) marking imagery that is not post content.
const EXCLUDED_MEDIA_MARKERS: &[&str] = &["profile", "avatar"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    #[error("no post identifier found in element")]
    NoIdentifier,
}

type Read<T> = fn(ElementRef<'_>, &Url) -> Option<T>;

/// One way of reading a field: elements matching `selector` are passed to
/// `read` in document order until it returns a value.
struct Strategy<T> {
    selector: Selector,
    read: Read<T>,
}

impl<T> Strategy<T> {
    fn new(css: &str, read: Read<T>) -> Self {
        Self {
            selector: Selector::parse(css).unwrap(),
            read,
        }
    }
}

fn first_match<T>(root: ElementRef<'_>, strategies: &[Strategy<T>], base: &Url) -> Option<T> {
    strategies.iter().find_map(|strategy| {
        root.select(&strategy.selector)
            .find_map(|element| (strategy.read)(element, base))
    })
}

/// `(id, permalink)`
type Identity = (String, String);

static IDENTITY_STRATEGIES: std::sync::LazyLock<Vec<Strategy<Identity>>> =
    std::sync::LazyLock::new(|| {
        vec![
            Strategy::new("time", identity_from_time_anchor),
            Strategy::new("a[href*='/status/']", identity_from_href),
        ]
    });

static TEXT_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("[data-testid='tweetText']").unwrap());

static TIME_SELECTOR: std::sync::LazyLock<Selector> =
    std::sync::LazyLock::new(|| Selector::parse("time[datetime]").unwrap());

static COUNTER_SELECTOR: std::sync::LazyLock<Selector> = std::sync::LazyLock::new(|| {
    Selector::parse("span[data-testid='app-text-transition-container']").unwrap()
});

static REPLY_STRATEGIES: std::sync::LazyLock<Vec<Strategy<u64>>> =
    std::sync::LazyLock::new(|| {
        vec![
            Strategy::new("[data-testid='reply']", positive_count),
            Strategy::new("[aria-label*='repl']", positive_count),
        ]
    });

static RESHARE_STRATEGIES: std::sync::LazyLock<Vec<Strategy<u64>>> =
    std::sync::LazyLock::new(|| {
        vec![
            Strategy::new("[data-testid='retweet']", positive_count),
            Strategy::new("[data-testid='unretweet']", positive_count),
            Strategy::new("[aria-label*='etweet']", positive_count),
        ]
    });

static FAVORITE_STRATEGIES: std::sync::LazyLock<Vec<Strategy<u64>>> =
    std::sync::LazyLock::new(|| {
        vec![
            Strategy::new("[data-testid='like']", positive_count),
            Strategy::new("[data-testid='unlike']", positive_count),
            Strategy::new("[aria-label*='like']", positive_count),
        ]
    });

static PHOTO_SELECTORS: std::sync::LazyLock<Vec<(Selector, &'static str)>> =
    std::sync::LazyLock::new(|| {
        vec![
            (Selector::parse("img[src*='pbs.twimg.com/media']").unwrap(), "src"),
            (Selector::parse("div[data-testid='tweetPhoto'] img").unwrap(), "src"),
        ]
    });

static VIDEO_THUMBNAIL_SELECTORS: std::sync::LazyLock<Vec<(Selector, &'static str)>> =
    std::sync::LazyLock::new(|| {
        vec![
            (Selector::parse("div[data-testid='videoPlayer'] img").unwrap(), "src"),
            (Selector::parse("video[poster]").unwrap(), "poster"),
        ]
    });

/// Turns rendered post markup into [`PostRecord`]s.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    base: Url,
}

impl FieldExtractor {
    /// Create an extractor resolving relative links against `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base_url)?,
        })
    }

    /// Extract a post from one candidate element.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionFailure::NoIdentifier`] when no strategy finds a
    /// post id; the element cannot be used.
    pub fn extract(&self, element: &CandidateElement) -> Result<PostRecord, ExtractionFailure> {
        let fragment = Html::parse_fragment(&element.outer_html);
        let root = fragment.root_element();

        let (id, permalink) =
            first_match(root, &IDENTITY_STRATEGIES, &self.base).ok_or(ExtractionFailure::NoIdentifier)?;

        let text = root
            .select(&TEXT_SELECTOR)
            .next()
            .map(visible_text)
            .unwrap_or_default();

        let timestamp = root
            .select(&TIME_SELECTOR)
            .find_map(|el| el.value().attr("datetime"))
            .filter(|raw| !raw.trim().is_empty())
            .map_or_else(PostTimestamp::missing, PostTimestamp::parse);

        let metrics = Metrics {
            replies: first_match(root, &REPLY_STRATEGIES, &self.base).unwrap_or(0),
            reshares: first_match(root, &RESHARE_STRATEGIES, &self.base).unwrap_or(0),
            favorites: first_match(root, &FAVORITE_STRATEGIES, &self.base).unwrap_or(0),
        };

        let mut media_urls = collect_media(root, &PHOTO_SELECTORS, &self.base);
        if media_urls.is_empty() {
            media_urls = collect_media(root, &VIDEO_THUMBNAIL_SELECTORS, &self.base);
        }

        Ok(PostRecord {
            id,
            permalink,
            text,
            timestamp,
            metrics,
            media_urls,
        })
    }
}

fn identity_from_time_anchor(time: ElementRef<'_>, base: &Url) -> Option<Identity> {
    time.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a")
        .and_then(|anchor| identity_from_href(anchor, base))
}

fn identity_from_href(anchor: ElementRef<'_>, base: &Url) -> Option<Identity> {
    let href = anchor.value().attr("href")?;
    let id = STATUS_ID_PATTERN.captures(href)?.get(1)?.as_str().to_string();
    let permalink = base.join(href).ok()?.to_string();
    Some((id, permalink))
}

/// Count shown on a metric control, from its counter or its label.
fn positive_count(marker: ElementRef<'_>, _base: &Url) -> Option<u64> {
    let from_counter = marker
        .select(&COUNTER_SELECTOR)
        .map(|counter| parse_count(&visible_text(counter)))
        .find(|count| *count > 0);

    from_counter
        .or_else(|| {
            marker
                .value()
                .attr("aria-label")
                .map(count_in_label)
                .filter(|count| *count > 0)
        })
}

/// Text content with inline emoji images rendered as their alt text.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) if el.name() == "img" => {
                if let Some(alt) = el.attr("alt") {
                    text.push_str(alt);
                }
            }
            _ => {}
        }
    }
    text.trim().to_string()
}

/// Whether a media locator points at account imagery rather than content.
#[must_use]
pub fn is_excluded_media(url: &str) -> bool {
    let lower = url.to_lowercase();
    EXCLUDED_MEDIA_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn collect_media(root: ElementRef<'_>, selectors: &[(Selector, &str)], base: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for (selector, attr) in selectors {
        for element in root.select(selector) {
            let Some(raw) = element.value().attr(attr).map(str::trim) else {
                continue;
            };
            if raw.is_empty() || raw.starts_with("data:") {
                continue;
            }
            let Ok(resolved) = base.join(raw) else {
                continue;
            };
            let resolved = resolved.to_string();
            if is_excluded_media(&resolved) {
                continue;
            }
            if seen.insert(resolved.clone()) {
                urls.push(resolved);
            }
        }
    }
    urls
}
