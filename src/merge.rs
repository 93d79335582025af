//! Merging per-target post tables into one consolidated table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::export::file_timestamp;

pub const MERGED_COLUMNS: [&str; 11] = [
    "Company_Name",
    "Company_Handle",
    "S.No",
    "Tweet_ID",
    "Date",
    "Tweet_Text",
    "Likes",
    "Retweets",
    "Replies",
    "Image_URLs",
    "Local_Images",
];

const ID_COLUMNS: &[&str] = &["Tweet_ID", "tweet_id", "Tweet ID"];
const SUMMARY_PREFIX: &str = "company_tweets_summary_";

/// One row of the merged table. Values stay as text so nothing read from
/// older exports is reinterpreted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergedRow {
    #[serde(rename = "Company_Name")]
    pub company_name: String,
    #[serde(rename = "Company_Handle")]
    pub company_handle: String,
    #[serde(rename = "S.No")]
    pub serial: String,
    #[serde(rename = "Tweet_ID")]
    pub id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Tweet_Text")]
    pub text: String,
    #[serde(rename = "Likes")]
    pub likes: String,
    #[serde(rename = "Retweets")]
    pub retweets: String,
    #[serde(rename = "Replies")]
    pub replies: String,
    #[serde(rename = "Image_URLs")]
    pub image_urls: String,
    #[serde(rename = "Local_Images")]
    pub local_images: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub output: PathBuf,
    pub files_merged: usize,
    pub rows: usize,
}

/// Default merged-table path, `all_company_tweets_<ts>.csv`.
#[must_use]
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!("all_company_tweets_{}.csv", file_timestamp()))
}

/// Merge every `*_tweets_*.csv` table in `input_dir` into `output`.
///
/// Returns `Ok(None)` when there is nothing to merge.
///
/// # Errors
///
/// Returns an error if the input directory cannot be listed or the output
/// cannot be written. Individual unreadable tables are skipped.
pub fn merge_exports(input_dir: &Path, output: &Path) -> Result<Option<MergeReport>> {
    let tables = find_post_tables(input_dir)?;
    if tables.is_empty() {
        warn!(dir = %input_dir.display(), "No post tables found to merge");
        return Ok(None);
    }
    info!(count = tables.len(), "Found post tables to merge");

    let names = latest_summary(input_dir)
        .map(|path| load_company_names(&path))
        .unwrap_or_default();

    let mut rows = Vec::new();
    let mut files_merged = 0;
    for table in &tables {
        let handle = handle_from_file_name(table);
        let name = names.get(&handle).cloned().unwrap_or_else(|| handle.clone());
        info!(name = %name, handle = %handle, "Merging table");

        match read_post_table(table, &name, &handle) {
            Ok(Some(mut table_rows)) => {
                rows.append(&mut table_rows);
                files_merged += 1;
            }
            Ok(None) => warn!(path = %table.display(), "Skipping table without an id column"),
            Err(e) => warn!(path = %table.display(), error = ?e, "Failed to read table"),
        }
    }

    sort_and_renumber(&mut rows);
    write_merged(output, &rows)?;

    info!(
        output = %output.display(),
        rows = rows.len(),
        files = files_merged,
        "Merge complete"
    );
    Ok(Some(MergeReport {
        output: output.to_path_buf(),
        files_merged,
        rows: rows.len(),
    }))
}

fn find_post_tables(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    let mut tables: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| {
                    name.contains("_tweets_")
                        && name.ends_with(".csv")
                        && !name.to_lowercase().contains("summary")
                })
        })
        .collect();
    tables.sort();
    Ok(tables)
}

/// Handle encoded in a table file name: everything before `_tweets_`.
fn handle_from_file_name(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    name.split("_tweets_").next().unwrap_or(name).to_string()
}

/// The summary table with the greatest file name.
fn latest_summary(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(SUMMARY_PREFIX) && name.ends_with(".csv"))
        })
        .max()
}

/// Handle to display name, from the summary table's first two columns.
fn load_company_names(summary: &Path) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let mut reader = match csv::Reader::from_path(summary) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = %summary.display(), error = %e, "Failed to read summary table");
            return names;
        }
    };
    for record in reader.records().filter_map(Result::ok) {
        if let (Some(name), Some(handle)) = (record.get(0), record.get(1)) {
            names.entry(handle.to_string()).or_insert_with(|| name.to_string());
        }
    }
    names
}

/// Read one post table, reconciling historical column names.
///
/// Returns `Ok(None)` when the table has no recognizable id column.
fn read_post_table(path: &Path, name: &str, handle: &str) -> Result<Option<Vec<MergedRow>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let columns: HashMap<String, usize> = reader
        .headers()
        .context("Failed to read header")?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_string(), i))
        .collect();

    if !ID_COLUMNS.iter().any(|c| columns.contains_key(*c)) {
        return Ok(None);
    }

    let field = |record: &csv::StringRecord, variants: &[&str], default: &str| -> String {
        variants
            .iter()
            .find_map(|v| columns.get(*v).and_then(|&i| record.get(i)))
            .unwrap_or(default)
            .to_string()
    };

    let mut rows = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), row = n + 1, error = %e, "Skipping malformed row");
                continue;
            }
        };
        rows.push(MergedRow {
            company_name: name.to_string(),
            company_handle: handle.to_string(),
            serial: field(&record, &["S.No"], ""),
            id: field(&record, ID_COLUMNS, ""),
            date: field(&record, &["Date", "timestamp"], ""),
            text: field(&record, &["Tweet_Text", "text"], ""),
            likes: field(&record, &["Likes", "likes"], "0"),
            retweets: field(&record, &["Retweets", "retweets"], "0"),
            replies: field(&record, &["Replies", "replies"], "0"),
            image_urls: field(&record, &["Image_URLs", "photos"], ""),
            local_images: field(&record, &["Local_Images"], ""),
        });
    }
    Ok(Some(rows))
}

/// Newest first by date text, then serial numbers from 1.
fn sort_and_renumber(rows: &mut [MergedRow]) {
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    for (i, row) in rows.iter_mut().enumerate() {
        row.serial = (i + 1).to_string();
    }
}

fn write_merged(path: &Path, rows: &[MergedRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(MERGED_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a merged table back.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a row is malformed.
pub fn read_merged(path: &Path) -> Result<Vec<MergedRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<MergedRow>, _>>()
        .with_context(|| format!("Malformed row in {}", path.display()))
}
