//! # Blob Storage
//!
//! Where uploaded originals and their page representations live. Stages only
//! see the [`BlobStore`] trait; [`LocalBlobStore`] keeps blobs under a
//! configured root directory.

pub mod documents;

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{PipelineError, PipelineResult};

pub use documents::{detect_file_type, paginate, FileType, PageBlob};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`, replacing any previous blob
    async fn put(&self, path: &str, bytes: &[u8]) -> PipelineResult<()>;

    /// Read the blob at `path`
    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>>;
}

/// Storage path of an uploaded original. The file's position in the upload
/// keeps same-named files apart.
pub fn original_path(
    project_id: &str,
    document_id: &str,
    file_index: usize,
    file_name: &str,
) -> String {
    format!(
        "{}/{}/original/{}-{}",
        sanitize_segment(project_id),
        sanitize_segment(document_id),
        file_index,
        sanitize_segment(file_name)
    )
}

/// Storage path of one page representation (1-based page number)
pub fn page_path(
    project_id: &str,
    document_id: &str,
    file_index: usize,
    page: usize,
    extension: &str,
) -> String {
    format!(
        "{}/{}/pages/{}/page-{}.{}",
        sanitize_segment(project_id),
        sanitize_segment(document_id),
        file_index,
        page,
        extension
    )
}

/// Keep a caller-supplied name usable as a single path segment
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "_".to_string(),
        s => s.to_string(),
    }
}

/// Filesystem-backed blob store
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative blob path, refusing anything that escapes the root
    fn resolve(&self, path: &str) -> PipelineResult<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || path.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "Invalid storage path: {}",
                path
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> PipelineResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::UpstreamService(format!(
                    "Failed to create storage directory {:?}: {}",
                    parent, e
                ))
            })?;
        }
        fs::write(&target, bytes).await.map_err(|e| {
            PipelineError::UpstreamService(format!("Failed to write blob {}: {}", path, e))
        })?;
        tracing::debug!(path, bytes = bytes.len(), "Blob stored");
        Ok(())
    }

    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                PipelineError::NotFound(format!("Blob not found: {}", path))
            }
            _ => PipelineError::UpstreamService(format!("Failed to read blob {}: {}", path, e)),
        })
    }
}
