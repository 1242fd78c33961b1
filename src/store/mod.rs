// Result Store: a directory of append-only JSON-lines partitions, one per
// (run, round, shard). Readers take the union of every `.jsonl` file present.

mod partition;

pub use partition::{PartitionWriter, parse_partition};

use crate::domain::{AnnotationOutcome, RecordId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

const PARTITION_EXTENSION: &str = "jsonl";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("result store directory {} is unavailable: {source}", .path.display())]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("partition {} could not be read: {source}", .path.display())]
    PartitionUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("partition {} is corrupt at line {line}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode outcome: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
    run_id: String,
}

impl ResultStore {
    /// Open (creating if needed) a store rooted at `dir` with a fresh run id.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_run_id(dir, Uuid::new_v4().simple().to_string()).await
    }

    pub async fn open_with_run_id(
        dir: impl Into<PathBuf>,
        run_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::DirectoryUnavailable {
                path: dir.clone(),
                source,
            })?;

        Ok(Self {
            dir,
            run_id: run_id.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn partition_path(&self, round: u32, shard: usize) -> PathBuf {
        self.dir.join(format!(
            "{}-r{round:03}-s{shard:03}.{PARTITION_EXTENSION}",
            self.run_id
        ))
    }

    /// Open the partition for `shard` in `round`. The caller becomes its only writer.
    pub async fn create_partition(
        &self,
        round: u32,
        shard: usize,
    ) -> Result<PartitionWriter, StoreError> {
        PartitionWriter::open(self.partition_path(round, shard)).await
    }

    /// Every partition file currently in the store, sorted by name.
    pub async fn partitions(&self) -> Result<Vec<PathBuf>, StoreError> {
        let unavailable = |source| StoreError::DirectoryUnavailable {
            path: self.dir.clone(),
            source,
        };

        let mut entries = fs::read_dir(&self.dir).await.map_err(unavailable)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(unavailable)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(PARTITION_EXTENSION) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Read every outcome from every partition.
    ///
    /// Fails if any single partition cannot be read; a partial view is never returned.
    pub async fn load_outcomes(&self) -> Result<Vec<AnnotationOutcome>, StoreError> {
        let paths = self.partitions().await?;
        let mut outcomes = Vec::new();

        for path in &paths {
            let content = fs::read_to_string(path).await.map_err(|source| {
                StoreError::PartitionUnreadable {
                    path: path.clone(),
                    source,
                }
            })?;
            let parsed = parse_partition(path, &content)?;
            debug!("Loaded {} outcomes from {}", parsed.len(), path.display());
            outcomes.extend(parsed);
        }

        debug!(
            "Loaded {} outcomes from {} partitions",
            outcomes.len(),
            paths.len()
        );
        Ok(outcomes)
    }

    /// Write one Success outcome per id in `order` to `output`, skipping ids
    /// without one. Among duplicates the earliest recorded Success is kept.
    ///
    /// Returns the number of lines written.
    pub async fn export_consolidated(
        &self,
        order: &[RecordId],
        output: &Path,
    ) -> Result<usize, StoreError> {
        let mut best: HashMap<RecordId, AnnotationOutcome> = HashMap::new();
        for outcome in self.load_outcomes().await? {
            if !outcome.is_success() {
                continue;
            }
            match best.get(&outcome.id) {
                Some(existing) if existing.recorded_at <= outcome.recorded_at => {}
                _ => {
                    best.insert(outcome.id.clone(), outcome);
                }
            }
        }

        let mut buffer = Vec::new();
        let mut written = 0;
        for id in order {
            if let Some(outcome) = best.get(id) {
                serde_json::to_writer(&mut buffer, outcome)?;
                buffer.push(b'\n');
                written += 1;
            }
        }

        let write_error = |source| StoreError::Write {
            path: output.to_path_buf(),
            source,
        };
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let mut file = fs::File::create(output).await.map_err(write_error)?;
        file.write_all(&buffer).await.map_err(write_error)?;
        file.sync_all().await.map_err(write_error)?;

        info!(
            "Exported {} consolidated outcomes to {}",
            written,
            output.display()
        );
        Ok(written)
    }
}
