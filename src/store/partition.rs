use super::StoreError;
use crate::domain::AnnotationOutcome;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Append-only output partition owned by a single worker.
///
/// The writer owns its file handle outright; it is neither `Clone` nor shared,
/// so two workers can never write the same partition.
#[derive(Debug)]
pub struct PartitionWriter {
    path: PathBuf,
    file: File,
    written: usize,
}

impl PartitionWriter {
    pub(crate) async fn open(path: PathBuf) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of outcomes appended through this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Append one outcome as a single line and sync it to disk.
    pub async fn append(&mut self, outcome: &AnnotationOutcome) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(outcome)?;
        line.push(b'\n');

        let result: std::io::Result<()> = async {
            self.file.write_all(&line).await?;
            self.file.flush().await?;
            self.file.sync_data().await
        }
        .await;

        result.map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        self.written += 1;
        Ok(())
    }
}

/// Parse the contents of one partition.
///
/// A final line without a trailing newline that fails to parse is a write cut
/// short by a crash and is skipped. Any other unparseable line is corruption.
pub fn parse_partition(path: &Path, content: &str) -> Result<Vec<AnnotationOutcome>, StoreError> {
    let torn_tail_possible = !content.is_empty() && !content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let last = lines.len().saturating_sub(1);

    let mut outcomes = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<AnnotationOutcome>(line) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if torn_tail_possible && index == last => {
                warn!(
                    "Skipping truncated final line {} of {}: {}",
                    index + 1,
                    path.display(),
                    e
                );
            }
            Err(source) => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source,
                });
            }
        }
    }

    Ok(outcomes)
}
