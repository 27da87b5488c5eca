//! Upload stage: persist originals, derive page representations, and return
//! the manifest the Extract stage works from.

use serde_json::json;
use uuid::Uuid;

use super::context::{PipelineContext, UploadInput, UploadOutput, UploadedDocument, UploadedFile};
use super::orchestrator::Orchestrator;
use super::stage::StageReporter;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::Step;
use crate::storage::{self, detect_file_type, paginate, BlobStore, FileType};

impl Orchestrator {
    #[tracing::instrument(skip(self, input), fields(project_id = %input.project_id))]
    pub async fn upload(&self, input: UploadInput) -> PipelineResult<UploadOutput> {
        let document_id = input
            .document_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let reporter = StageReporter::begin(
            &self.progress,
            &document_id,
            Step::Upload,
            format!("Uploading {} file(s)", input.files.len()),
        );
        let result = self.upload_files(&reporter, &document_id, input).await;
        reporter.finish(result, |output| {
            (
                format!(
                    "Uploaded {} file(s), {} page(s)",
                    output.context.documents.len(),
                    output.total_pages
                ),
                Some(json!({
                    "files": output.context.documents.len(),
                    "totalPages": output.total_pages,
                })),
            )
        })
    }

    async fn upload_files(
        &self,
        reporter: &StageReporter<'_>,
        document_id: &str,
        input: UploadInput,
    ) -> PipelineResult<UploadOutput> {
        self.validate_upload(&input)?;
        let blobs = self.blobs()?;

        let total = input.files.len() as u32;
        let mut documents = Vec::with_capacity(input.files.len());
        for (index, file) in input.files.iter().enumerate() {
            reporter.progress(index as u32, total, format!("Storing {}", file.file_name));
            let doc = store_file(blobs.as_ref(), &input.project_id, document_id, index, file).await?;
            tracing::info!(
                file = %doc.original_name,
                file_type = ?doc.file_type,
                pages = doc.page_count,
                "File uploaded"
            );
            documents.push(doc);
        }

        let total_pages = documents.iter().map(|d| d.page_count).sum();
        Ok(UploadOutput {
            context: PipelineContext {
                document_id: document_id.to_string(),
                project_id: input.project_id,
                documents,
            },
            total_pages,
        })
    }

    fn validate_upload(&self, input: &UploadInput) -> PipelineResult<()> {
        let limits = &self.config.limits;
        if input.project_id.trim().is_empty() {
            return Err(PipelineError::InvalidInput("projectId is required".into()));
        }
        if input.files.is_empty() {
            return Err(PipelineError::InvalidInput("No files uploaded".into()));
        }
        if input.files.len() > limits.max_files {
            return Err(PipelineError::InvalidInput(format!(
                "Too many files: {} (limit {})",
                input.files.len(),
                limits.max_files
            )));
        }
        for file in &input.files {
            if file.bytes.is_empty() {
                return Err(PipelineError::InvalidInput(format!(
                    "File {} is empty",
                    file.file_name
                )));
            }
            if file.bytes.len() as u64 > limits.max_file_bytes {
                return Err(PipelineError::InvalidInput(format!(
                    "File {} is {} bytes (limit {})",
                    file.file_name,
                    file.bytes.len(),
                    limits.max_file_bytes
                )));
            }
        }
        Ok(())
    }
}

/// Store one original plus its page representations
async fn store_file(
    blobs: &dyn BlobStore,
    project_id: &str,
    document_id: &str,
    index: usize,
    file: &UploadedFile,
) -> PipelineResult<UploadedDocument> {
    let storage_path = storage::original_path(project_id, document_id, index, &file.file_name);
    blobs.put(&storage_path, &file.bytes).await?;

    let detected = detect_file_type(&file.file_name, &file.bytes);
    let (file_type, pages) = paginate(&file.file_name, detected, &file.bytes);

    let mut image_paths = Vec::with_capacity(pages.len());
    for (page_index, page) in pages.iter().enumerate() {
        let path = storage::page_path(
            project_id,
            document_id,
            index,
            page_index + 1,
            &page.extension,
        );
        blobs.put(&path, &page.bytes).await?;
        image_paths.push(path);
    }

    let page_count = match file_type {
        FileType::Pdf | FileType::Image => image_paths.len().max(1),
        FileType::Text | FileType::Document => 1,
    };

    Ok(UploadedDocument {
        original_name: file.file_name.clone(),
        storage_path,
        file_type,
        page_count,
        image_paths,
        extracted_content: None,
    })
}
