//! Scripted stand-ins for the browser and the record sink.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use timeline_harvester::browser::{
    AccessorFactory, BrowserError, CandidateElement, DocumentAccessor,
};
use timeline_harvester::constants::{LOAD_MORE_TEXT, POST_SELECTOR, TIMELINE_READY_SELECTOR};
use timeline_harvester::session::RecordSink;
use timeline_harvester::targets::Target;
use timeline_harvester::timeline::PostRecord;

/// Content height added for every scripted scan served.
pub const PAGE_GROWTH: f64 = 1000.0;

/// Rendered post markup with the given id and text.
pub fn post(id: &str, text: &str) -> CandidateElement {
    CandidateElement::new(format!(
        r#"<article data-testid="tweet">
            <a href="/acme/status/{id}"><time datetime="2025-04-0{day}T12:00:00.000Z">Apr</time></a>
            <div data-testid="tweetText">{text}</div>
            <div data-testid="like" aria-label="{id} Likes. Like"></div>
        </article>"#,
        day = id.len().min(9),
    ))
}

pub fn posts(ids: &[&str]) -> Vec<CandidateElement> {
    ids.iter().map(|id| post(id, &format!("post {id}"))).collect()
}

/// Everything the accessor was asked to do.
#[derive(Debug, Default)]
pub struct AccessorLog {
    pub navigations: Vec<String>,
    pub fills: Vec<(String, String)>,
    pub activations: Vec<String>,
    pub scrolls: Vec<f64>,
    pub queries: usize,
    pub closed: bool,
}

/// A fake page that serves a fixed sequence of scans.
///
/// Each `query_all` serves the next scripted scan and grows the page; once
/// the script runs out the last scan is repeated and the height stays put.
pub struct ScriptedAccessor {
    scans: VecDeque<Vec<CandidateElement>>,
    current: Vec<CandidateElement>,
    height: f64,
    present: HashSet<String>,
    controls: HashSet<String>,
    load_more_clicks: u32,
    fail_navigation: bool,
    log: Arc<Mutex<AccessorLog>>,
}

impl ScriptedAccessor {
    pub fn new(scans: Vec<Vec<CandidateElement>>) -> Self {
        Self {
            scans: scans.into(),
            current: Vec::new(),
            height: 0.0,
            present: [TIMELINE_READY_SELECTOR, POST_SELECTOR]
                .into_iter()
                .map(String::from)
                .collect(),
            controls: HashSet::new(),
            load_more_clicks: 0,
            fail_navigation: false,
            log: Arc::new(Mutex::new(AccessorLog::default())),
        }
    }

    /// A page on which no post ever renders.
    pub fn blank() -> Self {
        let mut accessor = Self::new(Vec::new());
        accessor.present.clear();
        accessor
    }

    /// Adds a working login form.
    pub fn with_login_form(mut self) -> Self {
        self.present.extend(
            [
                "input[name='text']",
                "input[name='password']",
                "a[aria-label='Home']",
            ]
            .into_iter()
            .map(String::from),
        );
        self.controls
            .extend(["Next", "Log in"].into_iter().map(String::from));
        self
    }

    /// Adds a login form whose password step never appears.
    pub fn with_broken_login_form(mut self) -> Self {
        self.present.insert("input[name='text']".to_string());
        self.controls.insert("Next".to_string());
        self
    }

    /// The load-more control can be activated `clicks` times, each growing
    /// the page without new posts.
    pub fn with_load_more(mut self, clicks: u32) -> Self {
        self.load_more_clicks = clicks;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<AccessorLog>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl DocumentAccessor for ScriptedAccessor {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.log.lock().unwrap().navigations.push(url.to_string());
        if self.fail_navigation {
            return Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        if self.present.contains(selector) {
            Ok(())
        } else {
            Err(BrowserError::Timeout {
                selector: selector.to_string(),
                waited: timeout,
            })
        }
    }

    async fn query_all(&mut self, _selector: &str) -> Result<Vec<CandidateElement>, BrowserError> {
        self.log.lock().unwrap().queries += 1;
        if let Some(next) = self.scans.pop_front() {
            self.current = next;
            self.height += PAGE_GROWTH;
        }
        Ok(self.current.clone())
    }

    async fn scroll_to(&mut self, y: f64) -> Result<(), BrowserError> {
        self.log.lock().unwrap().scrolls.push(y);
        Ok(())
    }

    async fn content_height(&mut self) -> Result<f64, BrowserError> {
        Ok(self.height)
    }

    async fn activate_text(&mut self, text: &str) -> Result<bool, BrowserError> {
        self.log.lock().unwrap().activations.push(text.to_string());
        if text == LOAD_MORE_TEXT && self.load_more_clicks > 0 {
            self.load_more_clicks -= 1;
            self.height += PAGE_GROWTH / 2.0;
            return Ok(true);
        }
        Ok(self.controls.contains(text))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), BrowserError> {
        self.log
            .lock()
            .unwrap()
            .fills
            .push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Hands out prepared accessors in order; `Err` entries fail to launch.
pub struct ScriptedFactory {
    accessors: Mutex<VecDeque<Result<ScriptedAccessor, String>>>,
}

impl ScriptedFactory {
    pub fn new(accessors: Vec<Result<ScriptedAccessor, String>>) -> Self {
        Self {
            accessors: Mutex::new(accessors.into()),
        }
    }
}

#[async_trait]
impl AccessorFactory for ScriptedFactory {
    type Accessor = ScriptedAccessor;

    async fn open(&self) -> Result<ScriptedAccessor, BrowserError> {
        let next = self.accessors.lock().unwrap().pop_front();
        match next {
            Some(Ok(accessor)) => Ok(accessor),
            Some(Err(message)) => Err(BrowserError::Launch(message)),
            None => Err(BrowserError::Launch("no accessor scripted".to_string())),
        }
    }
}

/// Keeps persisted runs in memory.
#[derive(Default, Clone)]
pub struct MemorySink {
    pub runs: Arc<Mutex<Vec<(String, Vec<PostRecord>)>>>,
    pub fail_for: Option<String>,
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn persist(&self, target: &Target, records: &[PostRecord]) -> anyhow::Result<String> {
        if self.fail_for.as_deref() == Some(target.handle.as_str()) {
            anyhow::bail!("disk full");
        }
        self.runs
            .lock()
            .unwrap()
            .push((target.handle.clone(), records.to_vec()));
        Ok(format!("memory://{}", target.handle))
    }
}
