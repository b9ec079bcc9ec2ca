use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    imagen::{GenerationError, ImageGenerator},
    models::{BatchRecord, BatchSummary, GenerateOptions, WorkItem},
    storage::{ObjectStore, StorageError},
};

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to read work items from {}: {source}", .path.display())]
    Csv { path: PathBuf, #[source] source: csv::Error },
    #[error("failed to write results to {}: {source}", .path.display())]
    Write { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to serialize results: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single work item failed. Never aborts the batch.
#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub fn parse_work_items<R: Read>(reader: R) -> Result<Vec<WorkItem>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .collect()
}

pub fn read_work_items(path: &Path) -> Result<Vec<WorkItem>, BatchError> {
    let to_err = |source| BatchError::Csv { path: path.to_path_buf(), source };
    let file = std::fs::File::open(path).map_err(|e| to_err(csv::Error::from(e)))?;
    parse_work_items(file).map_err(to_err)
}

/// Storage key for an item: `{image_type}/{target_url}.png` with the leading
/// slash dropped and remaining slashes turned into dashes. Characters that
/// would end or escape a URL path (`?`, `#`, `%`) become dashes too.
pub fn object_path(item: &WorkItem) -> String {
    let target = item.target_url.strip_prefix('/').unwrap_or(&item.target_url);
    format!("{}/{}.png", item.image_type, target.replace(['/', '?', '#', '%'], "-"))
}

pub fn write_results(path: &Path, records: &[BatchRecord]) -> Result<(), BatchError> {
    let to_err = |source| BatchError::Write { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(to_err)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(records)?).map_err(to_err)?;
    info!("💾 Results saved to: {}", path.display());
    Ok(())
}

/// Processes work items one at a time: generate, upload, record.
pub struct BatchDriver {
    generator: Arc<dyn ImageGenerator>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    bucket: String,
    options: GenerateOptions,
    item_delay: Duration,
}

impl BatchDriver {
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            store,
            clock,
            bucket: bucket.into(),
            options: GenerateOptions::default(),
            item_delay: DEFAULT_ITEM_DELAY,
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Reads the CSV and runs every row. Only an unreadable CSV is returned as
    /// an error; storage and generation failures end up in the records.
    pub async fn process_csv(&self, csv_path: &Path) -> Result<Vec<BatchRecord>, BatchError> {
        let items = read_work_items(csv_path)?;
        if let Err(e) = self.store.ensure_bucket(&self.bucket).await {
            warn!("⚠️ Could not prepare bucket {}: {}", self.bucket, e);
        }
        Ok(self.run(&items).await)
    }

    pub async fn run(&self, items: &[WorkItem]) -> Vec<BatchRecord> {
        info!("🚀 Processing {} entries with model {}", items.len(), self.generator.model());
        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            info!("[{}/{}] {}", index + 1, items.len(), item.target_url);
            records.push(self.process_item(item).await);
            if index + 1 < items.len() {
                self.clock.sleep(self.item_delay).await;
            }
        }

        let summary = BatchSummary::from_records(&records);
        info!(
            "✅ Batch processing complete. {}/{} images generated successfully ({} failed).",
            summary.succeeded, summary.total, summary.failed
        );
        records
    }

    async fn process_item(&self, item: &WorkItem) -> BatchRecord {
        let started = self.clock.now();
        let outcome = self.generate_and_upload(item).await;
        let processing_time_ms = self.clock.now().saturating_sub(started).as_millis() as u64;

        match outcome {
            Ok((image_url, storage_url)) => {
                info!("Uploaded {} in {:.1}s", storage_url, processing_time_ms as f64 / 1000.0);
                BatchRecord {
                    entry: item.clone(),
                    image_url,
                    storage_url: Some(storage_url),
                    success: true,
                    error: None,
                    timestamp: Utc::now(),
                    processing_time_ms,
                }
            }
            Err(e) => {
                error!("❌ Error processing entry {}: {}", item.target_url, e);
                BatchRecord {
                    entry: item.clone(),
                    image_url: String::new(),
                    storage_url: None,
                    success: false,
                    error: Some(e.to_string()),
                    timestamp: Utc::now(),
                    processing_time_ms,
                }
            }
        }
    }

    async fn generate_and_upload(&self, item: &WorkItem) -> Result<(String, String), ItemError> {
        info!("Prompt: {}", item.prompt);
        let generated = self.generator.generate(&item.prompt, &self.options).await?;

        let metadata = BTreeMap::from([
            ("original_url".to_string(), item.original_url.clone()),
            ("target_url".to_string(), item.target_url.clone()),
            ("image_type".to_string(), item.image_type.clone()),
            ("prompt".to_string(), item.prompt.clone()),
            ("generation_date".to_string(), Utc::now().to_rfc3339()),
        ]);
        let storage_url = self
            .store
            .upload(&generated.image_url, &object_path(item), &self.bucket, &metadata)
            .await?;
        Ok((generated.image_url, storage_url))
    }
}
