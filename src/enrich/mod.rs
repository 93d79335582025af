//! Enrichment of merged posts with image presence and demographic
//! classification.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::{file_timestamp, MediaDownloader, LIST_SEPARATOR};
use crate::merge::{read_merged, MergedRow};

pub mod classifier;

pub use classifier::{Category, Classification, CommandClassifier, VisionClassifier};

/// Seed for picking the sample of posts without images, so reruns agree.
const SAMPLE_SEED: u64 = 42;

pub const ENRICHED_COLUMNS: [&str; 12] = [
    "tweet_url",
    "text",
    "likes_count",
    "reshares_count",
    "num_images",
    "human_present",
    "detected_gender",
    "image_file_paths",
    "company_name",
    "company_handle",
    "tweet_id",
    "date",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedRow {
    pub tweet_url: String,
    pub text: String,
    pub likes_count: String,
    pub reshares_count: String,
    pub num_images: usize,
    pub human_present: String,
    pub detected_gender: String,
    pub image_file_paths: String,
    pub company_name: String,
    pub company_handle: String,
    pub tweet_id: String,
    pub date: String,
}

impl EnrichedRow {
    fn new(row: &MergedRow, base_url: &str, images: &[PathBuf], summary: Classification) -> Self {
        Self {
            tweet_url: format!(
                "{}/{}/status/{}",
                base_url.trim_end_matches('/'),
                row.company_handle,
                row.id
            ),
            text: row.text.clone(),
            likes_count: row.likes.clone(),
            reshares_count: row.retweets.clone(),
            num_images: images.len(),
            human_present: if summary.person_present { "yes" } else { "no" }.to_string(),
            detected_gender: summary.category.to_string(),
            image_file_paths: images
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            company_name: row.company_name.clone(),
            company_handle: row.company_handle.clone(),
            tweet_id: row.id.clone(),
            date: row.date.clone(),
        }
    }
}

/// Combine per-image results into one verdict for a post.
///
/// Only images with a person contribute a category. Any `both`, or `male`
/// alongside `female`, gives `both`.
#[must_use]
pub fn aggregate(results: &[Classification]) -> Classification {
    let with_people: Vec<Category> = results
        .iter()
        .filter(|c| c.person_present)
        .map(|c| c.category)
        .collect();

    let has = |category| with_people.contains(&category);
    let category = if has(Category::Both) || (has(Category::Male) && has(Category::Female)) {
        Category::Both
    } else if has(Category::Male) {
        Category::Male
    } else if has(Category::Female) {
        Category::Female
    } else {
        Category::Unknown
    };

    Classification {
        person_present: !with_people.is_empty(),
        category,
    }
}

/// Deterministic sample of at most `n` rows.
#[must_use]
pub fn sample_rows<'a>(rows: &[&'a MergedRow], n: usize) -> Vec<&'a MergedRow> {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    rows.choose_multiple(&mut rng, n.min(rows.len()))
        .copied()
        .collect()
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    pub base_url: String,
    /// Where images without a local copy are downloaded.
    pub temp_dir: PathBuf,
    pub no_image_sample: usize,
}

impl EnrichOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url().to_string(),
            temp_dir: config.enrich_temp_dir.clone(),
            no_image_sample: config.no_image_sample,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichReport {
    pub output: PathBuf,
    pub rows: usize,
    pub with_people: usize,
}

/// Default enriched-table path, `enhanced_tweets_<ts>.csv`.
#[must_use]
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!("enhanced_tweets_{}.csv", file_timestamp()))
}

pub struct Enricher<C> {
    classifier: C,
    downloader: Option<MediaDownloader>,
    options: EnrichOptions,
}

impl<C: VisionClassifier> Enricher<C> {
    #[must_use]
    pub fn new(classifier: C, downloader: Option<MediaDownloader>, options: EnrichOptions) -> Self {
        Self {
            classifier,
            downloader,
            options,
        }
    }

    /// Enrich the merged table at `input` and write the result to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input cannot be read or the output written.
    pub async fn enrich_file(&self, input: &Path, output: &Path) -> Result<EnrichReport> {
        let input_path = input.to_path_buf();
        let rows = tokio::task::spawn_blocking(move || read_merged(&input_path))
            .await
            .context("Merged table reader task failed")??;
        info!(input = %input.display(), rows = rows.len(), "Loaded merged table");

        let enriched = self.enrich_rows(&rows).await;
        let row_count = enriched.len();
        let with_people = enriched.iter().filter(|r| r.human_present == "yes").count();

        let output_path = output.to_path_buf();
        tokio::task::spawn_blocking(move || write_enriched(&output_path, &enriched))
            .await
            .context("Enriched table writer task failed")??;

        info!(
            output = %output.display(),
            rows = row_count,
            with_people,
            "Enrichment complete"
        );
        Ok(EnrichReport {
            output: output.to_path_buf(),
            rows: row_count,
            with_people,
        })
    }

    /// Classify every row with images and add a sample of rows without,
    /// newest first.
    pub async fn enrich_rows(&self, rows: &[MergedRow]) -> Vec<EnrichedRow> {
        let (with_images, without_images): (Vec<&MergedRow>, Vec<&MergedRow>) =
            rows.iter().partition(|r| !r.image_urls.trim().is_empty());
        info!(
            with_images = with_images.len(),
            without_images = without_images.len(),
            "Classifying posts"
        );

        let mut enriched = Vec::with_capacity(with_images.len() + self.options.no_image_sample);
        for (i, row) in with_images.iter().enumerate() {
            if i == 0 || (i + 1) % 10 == 0 || i + 1 == with_images.len() {
                info!(
                    progress = i + 1,
                    total = with_images.len(),
                    company = %row.company_name,
                    "Classifying post images"
                );
            }
            enriched.push(self.enrich_row(row).await);
        }

        for row in sample_rows(&without_images, self.options.no_image_sample) {
            enriched.push(EnrichedRow::new(
                row,
                &self.options.base_url,
                &[],
                Classification::unknown(),
            ));
        }

        enriched.sort_by(|a, b| b.date.cmp(&a.date));
        enriched
    }

    async fn enrich_row(&self, row: &MergedRow) -> EnrichedRow {
        let images = self.image_paths(row).await;
        let mut results = Vec::with_capacity(images.len());
        for image in &images {
            results.push(self.classify_image(image).await);
        }
        EnrichedRow::new(row, &self.options.base_url, &images, aggregate(&results))
    }

    /// Existing local copies, or fresh downloads when there are none.
    async fn image_paths(&self, row: &MergedRow) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for local in split_list(&row.local_images) {
            let path = PathBuf::from(local);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                paths.push(path);
            } else {
                warn!(path = %path.display(), "Local image not found");
            }
        }
        if !paths.is_empty() {
            return paths;
        }

        let Some(downloader) = &self.downloader else {
            return paths;
        };
        for (n, url) in split_list(&row.image_urls).enumerate() {
            let path = self
                .options
                .temp_dir
                .join(format!("{}_img_{}.jpg", row.id, n + 1));
            match downloader.download_to(url, &path).await {
                Ok(()) => paths.push(path),
                Err(e) => warn!(url = %url, error = %e, "Failed to download image"),
            }
        }
        paths
    }

    /// Classify one image; unreadable images and classifier faults count as
    /// no person, unknown category.
    async fn classify_image(&self, path: &Path) -> Classification {
        if let Err(e) = ensure_decodable(path).await {
            warn!(image = %path.display(), error = %e, "Could not read image");
            return Classification::unknown();
        }

        match self.classifier.classify(path).await {
            Ok(result) => {
                debug!(image = %path.display(), ?result, "Classified image");
                result
            }
            Err(e) => {
                warn!(image = %path.display(), error = %e, "Classifier failed");
                Classification::unknown()
            }
        }
    }
}

/// Fail unless the file holds an image the `image` crate can decode.
async fn ensure_decodable(path: &Path) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    tokio::task::spawn_blocking(move || image::load_from_memory(&data).map(|_| ()))
        .await?
        .context("Failed to decode image")
}

fn write_enriched(path: &Path, rows: &[EnrichedRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(ENRICHED_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
