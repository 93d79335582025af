//! Persisting harvested timelines: post tables, downloaded media and the
//! per-batch summary table.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::constants::BROWSER_USER_AGENT;
use crate::session::{RecordSink, RunSummary};
use crate::targets::Target;
use crate::timeline::PostRecord;

/// Timestamp embedded in every output file name.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Separator for list-valued cells.
pub const LIST_SEPARATOR: &str = "; ";

pub const SUMMARY_COLUMNS: [&str; 5] = [
    "Company Name",
    "Twitter Handle",
    "Tweets CSV File",
    "Tweet Count",
    "Images Count",
];

const DEFAULT_MEDIA_EXTENSION: &str = ".jpg";

/// Current local time formatted for file names.
#[must_use]
pub fn file_timestamp() -> String {
    Local::now().format(FILE_TIMESTAMP_FORMAT).to_string()
}

/// One row of a per-target post table.
#[derive(Debug, Serialize)]
struct PostRow<'a> {
    #[serde(rename = "S.No")]
    serial: usize,
    #[serde(rename = "Tweet_ID")]
    id: &'a str,
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Tweet_Text")]
    text: &'a str,
    #[serde(rename = "Likes")]
    favorites: u64,
    #[serde(rename = "Retweets")]
    reshares: u64,
    #[serde(rename = "Replies")]
    replies: u64,
    #[serde(rename = "Image_URLs")]
    media_urls: String,
    #[serde(rename = "Local_Images")]
    local_media: String,
}

/// Writes each target's records to `<handle>_tweets_<ts>.csv`, optionally
/// downloading attached media next to it.
#[derive(Debug, Clone)]
pub struct CsvSink {
    output_dir: PathBuf,
    downloader: Option<MediaDownloader>,
}

impl CsvSink {
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, downloader: Option<MediaDownloader>) -> Self {
        Self {
            output_dir: output_dir.into(),
            downloader,
        }
    }

    /// Build a sink from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client for media downloads cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let downloader = if config.download_media {
            Some(MediaDownloader::new(config.media_timeout)?)
        } else {
            None
        };
        Ok(Self::new(&config.output_dir, downloader))
    }

    async fn download_media(
        &self,
        records: &[PostRecord],
        image_dir: &Path,
    ) -> Vec<Vec<PathBuf>> {
        let mut local = Vec::with_capacity(records.len());
        for record in records {
            let paths = match &self.downloader {
                Some(downloader) if record.has_media() => {
                    downloader.download_record(record, image_dir).await
                }
                _ => Vec::new(),
            };
            local.push(paths);
        }
        local
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn persist(&self, target: &Target, records: &[PostRecord]) -> Result<String> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let ts = file_timestamp();
        let image_dir = self.output_dir.join(format!("{}_images_{ts}", target.handle));
        let table_path = self.output_dir.join(format!("{}_tweets_{ts}.csv", target.handle));

        let local_media = self.download_media(records, &image_dir).await;
        let downloaded: usize = local_media.iter().map(Vec::len).sum();

        let owned = records.to_vec();
        let path = table_path.clone();
        tokio::task::spawn_blocking(move || write_post_table(&path, &owned, &local_media))
            .await
            .context("Post table writer task failed")??;

        info!(
            handle = %target.handle,
            path = %table_path.display(),
            records = records.len(),
            media_files = downloaded,
            "Saved timeline"
        );
        Ok(table_path.display().to_string())
    }
}

/// Write records as a post table, numbering rows from 1.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_post_table(
    path: &Path,
    records: &[PostRecord],
    local_media: &[Vec<PathBuf>],
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    for (i, record) in records.iter().enumerate() {
        let local = local_media
            .get(i)
            .map(|paths| {
                paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(LIST_SEPARATOR)
            })
            .unwrap_or_default();

        writer.serialize(PostRow {
            serial: i + 1,
            id: &record.id,
            date: record.timestamp.to_string(),
            text: &record.text,
            favorites: record.metrics.favorites,
            reshares: record.metrics.reshares,
            replies: record.metrics.replies,
            media_urls: record.media_urls.join(LIST_SEPARATOR),
            local_media: local,
        })?;
    }

    writer.flush()?;
    Ok(())
}

/// Fetches media over HTTP with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: reqwest::Client,
}

impl MediaDownloader {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Download every media URL of `record` into `dir` as
    /// `tweet_<id>_img_<n><ext>`. Failures are logged and left out.
    pub async fn download_record(&self, record: &PostRecord, dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for (n, url) in record.media_urls.iter().enumerate() {
            let stem = format!("tweet_{}_img_{}", record.id, n + 1);
            match self.download(url, dir, &stem).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!(url = %url, error = %e, "Failed to download media"),
            }
        }
        paths
    }

    /// Download `url` into `dir/<stem><ext>`, choosing the extension from the
    /// URL or the response.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, or a
    /// filesystem error.
    pub async fn download(&self, url: &str, dir: &Path, stem: &str) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.context("Failed to read body")?;

        let ext = media_extension(url, content_type.as_deref());
        let path = dir.join(format!("{stem}{ext}"));
        write_file(&path, &bytes).await?;
        debug!(url = %url, path = %path.display(), bytes = bytes.len(), "Downloaded media");
        Ok(path)
    }

    /// Download `url` to exactly `path`.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-success status, or a
    /// filesystem error.
    pub async fn download_to(&self, url: &str, path: &Path) -> Result<()> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .context("Request failed")?
            .error_for_status()?
            .bytes()
            .await
            .context("Failed to read body")?;
        write_file(path, &bytes).await
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// File extension (with leading dot) for a downloaded media file.
///
/// Tried in order: the URL path, the `format` query parameter, the response
/// content type, then `.jpg`.
#[must_use]
pub fn media_extension(url: &str, content_type: Option<&str>) -> String {
    let parsed = Url::parse(url).ok();

    let from_path = parsed.as_ref().and_then(|u| {
        let last = u.path_segments()?.next_back()?;
        let ext = Path::new(last).extension()?.to_str()?;
        is_plain_extension(ext).then(|| ext.to_lowercase())
    });

    let from_query = || {
        parsed.as_ref().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "format")
                .map(|(_, v)| v.to_lowercase())
                .filter(|v| is_plain_extension(v))
        })
    };

    let from_content_type = || {
        let essence = content_type?.split(';').next()?.trim();
        let exts = mime_guess::get_mime_extensions_str(essence)?;
        exts.iter()
            .find(|e| **e == "jpg")
            .or_else(|| exts.first())
            .map(|e| (*e).to_string())
    };

    from_path
        .or_else(from_query)
        .or_else(from_content_type)
        .map_or_else(|| DEFAULT_MEDIA_EXTENSION.to_string(), |ext| format!(".{ext}"))
}

fn is_plain_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Per-batch summary table, one row appended and flushed per target.
pub struct SummaryWriter {
    path: PathBuf,
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl SummaryWriter {
    /// Create `company_tweets_summary_<ts>.csv` in `output_dir` and write the
    /// header.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub async fn create(output_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        let path = output_dir.join(format!("company_tweets_summary_{}.csv", file_timestamp()));

        let header_path = path.clone();
        let writer = tokio::task::spawn_blocking(move || -> Result<csv::Writer<File>> {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(&header_path)
                .with_context(|| format!("Failed to create {}", header_path.display()))?;
            writer.write_record(SUMMARY_COLUMNS)?;
            writer.flush()?;
            Ok(writer)
        })
        .await
        .context("Summary writer task failed")??;

        info!(path = %path.display(), "Summary table created");
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub async fn append(&mut self, summary: &RunSummary) -> Result<()> {
        let row = [
            summary.name.clone(),
            summary.handle.clone(),
            summary.outcome.clone(),
            summary.record_count.to_string(),
            summary.media_record_count.to_string(),
        ];
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| anyhow!("Summary writer lock poisoned"))?;
            writer.write_record(&row)?;
            writer.flush()?;
            Ok(())
        })
        .await
        .context("Summary writer task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{Metrics, PostTimestamp};

    fn record(id: &str, media: &[&str]) -> PostRecord {
        PostRecord {
            id: id.to_string(),
            permalink: format!("https://x.com/a/status/{id}"),
            text: format!("post {id}"),
            timestamp: PostTimestamp::parse("2025-03-01T08:00:00Z"),
            metrics: Metrics {
                replies: 1,
                reshares: 2,
                favorites: 3,
            },
            media_urls: media.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    #[test]
    fn test_media_extension_from_path() {
        assert_eq!(media_extension("https://cdn.example/a/b.PNG", None), ".png");
        assert_eq!(
            media_extension("https://cdn.example/a/b.webp?format=jpg", None),
            ".webp"
        );
    }

    #[test]
    fn test_media_extension_from_format_query() {
        assert_eq!(
            media_extension("https://pbs.twimg.com/media/AbC?format=png&name=small", None),
            ".png"
        );
    }

    #[test]
    fn test_media_extension_from_content_type() {
        assert_eq!(
            media_extension("https://pbs.twimg.com/media/AbC", Some("image/jpeg")),
            ".jpg"
        );
        assert_eq!(
            media_extension("https://pbs.twimg.com/media/AbC", Some("image/png; charset=binary")),
            ".png"
        );
    }

    #[test]
    fn test_media_extension_default() {
        assert_eq!(media_extension("https://pbs.twimg.com/media/AbC", None), ".jpg");
        assert_eq!(media_extension("not a url", None), ".jpg");
    }

    #[test]
    fn test_post_table_columns_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme_tweets_x.csv");
        let records = vec![
            record("1", &["https://m/1.jpg", "https://m/2.jpg"]),
            record("2", &[]),
        ];
        let local = vec![vec![PathBuf::from("imgs/tweet_1_img_1.jpg")], Vec::new()];
        write_post_table(&path, &records, &local).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec![
                "S.No",
                "Tweet_ID",
                "Date",
                "Tweet_Text",
                "Likes",
                "Retweets",
                "Replies",
                "Image_URLs",
                "Local_Images"
            ]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "1");
        assert_eq!(&rows[0][2], "2025-03-01 08:00:00");
        assert_eq!(&rows[0][4], "3");
        assert_eq!(&rows[0][5], "2");
        assert_eq!(&rows[0][6], "1");
        assert_eq!(&rows[0][7], "https://m/1.jpg; https://m/2.jpg");
        assert_eq!(&rows[0][8], "imgs/tweet_1_img_1.jpg");
        assert_eq!(&rows[1][0], "2");
        assert_eq!(&rows[1][7], "");
    }

    #[tokio::test]
    async fn test_summary_header_then_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = SummaryWriter::create(dir.path()).await.unwrap();
        let name = summary.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("company_tweets_summary_"));

        summary
            .append(&RunSummary {
                name: "Acme".to_string(),
                handle: "acme".to_string(),
                outcome: "No tweets found".to_string(),
                record_count: 0,
                media_record_count: 0,
            })
            .await
            .unwrap();

        // Rows are visible before the writer is dropped.
        let content = std::fs::read_to_string(summary.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Company Name,Twitter Handle,Tweets CSV File,Tweet Count,Images Count",
                "Acme,acme,No tweets found,0,0",
            ]
        );
    }

    #[tokio::test]
    async fn test_summary_rows_written_from_spawned_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = SummaryWriter::create(dir.path()).await.unwrap();
        let path = summary.path().to_path_buf();

        let handle = tokio::spawn(async move {
            for i in 0..3 {
                summary
                    .append(&RunSummary {
                        name: format!("Co {i}"),
                        handle: format!("co{i}"),
                        outcome: format!("out/co{i}_tweets.csv"),
                        record_count: i,
                        media_record_count: 0,
                    })
                    .await
                    .unwrap();
            }
        });
        handle.await.unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 4);
        assert!(content.ends_with("Co 2,co2,out/co2_tweets.csv,2,0\n"));
    }
}
