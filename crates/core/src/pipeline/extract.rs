//! Extract stage: turn every uploaded file into text. Plain text is read
//! directly, PDF pages use their text layer or OCR, images are OCR'd, and
//! other formats go to the model whole.

use serde_json::json;
use std::sync::Arc;

use super::content::extracted_content;
use super::context::{ExtractOutput, ExtractionMethod, ExtractedContent, PipelineContext, UploadedDocument};
use super::orchestrator::Orchestrator;
use super::stage::StageReporter;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Attachment, GenerativeModel};
use crate::progress::Step;
use crate::skills::{extraction_skill, recover};
use crate::storage::documents::{mime_type_for, pdf_text_layer};
use crate::storage::{BlobStore, FileType};

impl Orchestrator {
    #[tracing::instrument(skip(self, context), fields(document_id = %context.document_id))]
    pub async fn extract(&self, context: PipelineContext) -> PipelineResult<ExtractOutput> {
        let reporter = StageReporter::begin(
            &self.progress,
            &context.document_id,
            Step::Extract,
            format!("Extracting text from {} file(s)", context.documents.len()),
        );
        let result = self.extract_documents(&reporter, context).await;
        reporter.finish(result, |output| {
            let chars: usize = output
                .context
                .documents
                .iter()
                .filter_map(|d| d.extracted_content.as_ref())
                .map(|c| c.metadata.char_count)
                .sum();
            (
                format!("Extracted text from {} file(s)", output.total_extracted),
                Some(json!({
                    "totalExtracted": output.total_extracted,
                    "characters": chars,
                })),
            )
        })
    }

    async fn extract_documents(
        &self,
        reporter: &StageReporter<'_>,
        mut context: PipelineContext,
    ) -> PipelineResult<ExtractOutput> {
        if context.documents.is_empty() {
            return Err(PipelineError::InvalidInput("No documents to extract".into()));
        }
        let blobs = self.blobs()?;
        // Created on first use so text-only jobs need no model credential
        let mut cached_model: Option<Arc<dyn GenerativeModel>> = None;

        let total = context.documents.len() as u32;
        for (index, doc) in context.documents.iter_mut().enumerate() {
            reporter.progress_with(
                index as u32,
                total,
                format!("Extracting {}", doc.original_name),
                json!({ "file": doc.original_name, "fileType": doc.file_type }),
            );

            let content = match doc.file_type {
                FileType::Text => read_text(blobs.as_ref(), doc).await?,
                _ => {
                    let model = match cached_model.clone() {
                        Some(model) => model,
                        None => {
                            let model = self.model()?;
                            cached_model = Some(Arc::clone(&model));
                            model
                        }
                    };
                    let extracted = self.extract_with_model(blobs.as_ref(), model.as_ref(), doc).await?;
                    if extracted.blank_pages > 0 {
                        reporter.progress_with(
                            index as u32,
                            total,
                            format!(
                                "{}: {} page(s) had no readable text",
                                doc.original_name, extracted.blank_pages
                            ),
                            json!({
                                "file": doc.original_name,
                                "fallback": true,
                                "blankPages": extracted.blank_pages,
                            }),
                        );
                    }
                    extracted.content
                }
            };

            tracing::info!(
                file = %doc.original_name,
                method = ?content.metadata.method,
                chars = content.metadata.char_count,
                "File extracted"
            );
            doc.extracted_content = Some(content);
        }

        let total_extracted = context.documents.len();
        Ok(ExtractOutput {
            context,
            total_extracted,
        })
    }

    async fn extract_with_model(
        &self,
        blobs: &dyn BlobStore,
        model: &dyn GenerativeModel,
        doc: &UploadedDocument,
    ) -> PipelineResult<ModelExtraction> {
        let ctx = self.skill_context(model);

        match doc.file_type {
            FileType::Pdf | FileType::Image if !doc.image_paths.is_empty() => {
                let total = doc.image_paths.len();
                let mut pages = Vec::with_capacity(total);
                let mut used_model = false;
                let mut blank_pages = 0;

                for (i, path) in doc.image_paths.iter().enumerate() {
                    let bytes = blobs.get(path).await?;
                    let layer = match doc.file_type {
                        FileType::Pdf => pdf_text_layer(&bytes),
                        _ => None,
                    };
                    let text = match layer {
                        Some(text) => text,
                        None => {
                            used_model = true;
                            let mime = page_mime(doc, path);
                            let ocr = extraction_skill::ocr_page(
                                &ctx,
                                &doc.original_name,
                                i + 1,
                                total,
                                Attachment::new(mime, bytes),
                            )
                            .await;
                            let page = recover(ocr, "page OCR", String::new)?;
                            if page.used_fallback {
                                blank_pages += 1;
                            }
                            page.value
                        }
                    };
                    if !text.is_empty() {
                        pages.push(text);
                    }
                }

                let method = if used_model {
                    ExtractionMethod::Ocr
                } else {
                    ExtractionMethod::TextLayer
                };
                Ok(ModelExtraction {
                    content: extracted_content(pages.join("\n\n"), total, method),
                    blank_pages,
                })
            }
            _ => {
                let bytes = blobs.get(&doc.storage_path).await?;
                let mime = mime_type_for(&doc.original_name, doc.file_type);
                let extracted = extraction_skill::extract_document(
                    &ctx,
                    &doc.original_name,
                    Attachment::new(mime, bytes),
                )
                .await;
                let text = recover(extracted, "document extraction", String::new)?;
                Ok(ModelExtraction {
                    content: extracted_content(
                        text.value,
                        doc.page_count,
                        ExtractionMethod::DocumentModel,
                    ),
                    blank_pages: if text.used_fallback { doc.page_count } else { 0 },
                })
            }
        }
    }
}

/// Model-read content plus how many pages came back empty
struct ModelExtraction {
    content: ExtractedContent,
    blank_pages: usize,
}

async fn read_text(blobs: &dyn BlobStore, doc: &UploadedDocument) -> PipelineResult<ExtractedContent> {
    let bytes = blobs.get(&doc.storage_path).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    Ok(extracted_content(text, doc.page_count, ExtractionMethod::Direct))
}

fn page_mime(doc: &UploadedDocument, page_path: &str) -> String {
    match doc.file_type {
        FileType::Pdf => "application/pdf".to_string(),
        _ => mime_type_for(page_path, FileType::Image),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::context::{UploadInput, UploadedFile};
    use crate::progress::{ProgressStore, StepStatus};
    use crate::storage::documents::tests::create_multipage_pdf;
    use crate::testing::{
        FakeModel, MemoryBlobStore, MemoryRepository, DOCUMENT_MARKER, OCR_MARKER,
    };

    fn orchestrator(model: Option<FakeModel>) -> Orchestrator {
        let orchestrator = Orchestrator::new(
            Arc::new(ProgressStore::default()),
            Arc::new(MemoryRepository::new()),
            PipelineConfig::default(),
        )
        .with_blob_store(Arc::new(MemoryBlobStore::new()));
        match model {
            Some(model) => orchestrator.with_model(Arc::new(model)),
            None => orchestrator,
        }
    }

    async fn uploaded(orchestrator: &Orchestrator, files: Vec<(&str, Vec<u8>)>) -> PipelineContext {
        orchestrator
            .upload(UploadInput {
                project_id: "proj".into(),
                document_id: Some("doc-1".into()),
                files: files
                    .into_iter()
                    .map(|(name, bytes)| UploadedFile {
                        file_name: name.into(),
                        bytes,
                    })
                    .collect(),
            })
            .await
            .unwrap()
            .context
    }

    #[tokio::test]
    async fn test_text_files_need_no_model() {
        // No model override and no API key configured
        let orchestrator = orchestrator(None);
        let context = uploaded(&orchestrator, vec![("a.md", b"# Title\nBody".to_vec())]).await;

        let output = orchestrator.extract(context).await.unwrap();
        let content = output.context.documents[0].extracted_content.as_ref().unwrap();
        assert_eq!(content.metadata.method, ExtractionMethod::Direct);
        assert_eq!(content.sections[0].heading, "Title");
        assert_eq!(output.total_extracted, 1);
    }

    #[tokio::test]
    async fn test_pdf_pages_use_text_layer_or_ocr() {
        let model = FakeModel::new().reply_when(OCR_MARKER, "Scanned page text");
        let orchestrator = orchestrator(Some(model));
        let long = "The system shall archive every signed contract for seven years";
        let pdf = create_multipage_pdf(&[long, "Fig 2"]);
        let context = uploaded(&orchestrator, vec![("contract.pdf", pdf)]).await;

        let output = orchestrator.extract(context).await.unwrap();
        let content = output.context.documents[0].extracted_content.as_ref().unwrap();
        assert_eq!(content.metadata.method, ExtractionMethod::Ocr);
        assert_eq!(content.metadata.page_count, 2);
        assert!(content.text.contains("Scanned page text"));
    }

    #[tokio::test]
    async fn test_images_and_documents_go_to_model() {
        let model = FakeModel::new()
            .reply_when(OCR_MARKER, "Whiteboard notes")
            .reply_when(DOCUMENT_MARKER, "Word document body");
        let orchestrator = orchestrator(Some(model));
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let docx = b"PK\x03\x04word/document.xml".to_vec();
        let context = uploaded(&orchestrator, vec![("board.png", png), ("brief.docx", docx)]).await;

        let output = orchestrator.extract(context).await.unwrap();
        let docs = &output.context.documents;
        assert_eq!(docs[0].extracted_content.as_ref().unwrap().text, "Whiteboard notes");
        let word = docs[1].extracted_content.as_ref().unwrap();
        assert_eq!(word.text, "Word document body");
        assert_eq!(word.metadata.method, ExtractionMethod::DocumentModel);
    }

    #[tokio::test]
    async fn test_single_file_failure_fails_the_stage() {
        let model = FakeModel::new().fail_when(
            OCR_MARKER,
            PipelineError::UpstreamService("model overloaded".into()),
        );
        let orchestrator = orchestrator(Some(model));
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let context = uploaded(
            &orchestrator,
            vec![("a.txt", b"fine".to_vec()), ("board.png", png)],
        )
        .await;

        let err = orchestrator.extract(context).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_service_error");
        let last = orchestrator.progress().history("doc-1").pop().unwrap();
        assert_eq!((last.step, last.status), (Step::Extract, StepStatus::Error));
    }

    #[tokio::test]
    async fn test_missing_model_key_is_configuration_error() {
        let mut config = PipelineConfig::default();
        config.model.api_key_env = Some("REQFLOW_UNSET_KEY_FOR_EXTRACT_TESTS".into());
        let orchestrator = Orchestrator::new(
            Arc::new(ProgressStore::default()),
            Arc::new(MemoryRepository::new()),
            config,
        )
        .with_blob_store(Arc::new(MemoryBlobStore::new()));
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let context = uploaded(&orchestrator, vec![("board.png", png)]).await;

        let err = orchestrator.extract(context).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
        let last = orchestrator.progress().history("doc-1").pop().unwrap();
        assert_eq!((last.step, last.status), (Step::Extract, StepStatus::Error));
    }

    #[tokio::test]
    async fn test_blank_page_is_skipped_not_fatal() {
        let model = FakeModel::new().reply_when(OCR_MARKER, "   ");
        let orchestrator = orchestrator(Some(model));
        let long = "The system shall archive every signed contract for seven years";
        let pdf = create_multipage_pdf(&[long, ""]);
        let context = uploaded(
            &orchestrator,
            vec![("notes.txt", b"Retention notes".to_vec()), ("contract.pdf", pdf)],
        )
        .await;

        let output = orchestrator.extract(context).await.unwrap();
        assert_eq!(output.total_extracted, 2);
        let content = output.context.documents[1].extracted_content.as_ref().unwrap();
        assert_eq!(content.metadata.page_count, 2);

        let history = orchestrator.progress().history("doc-1");
        let flagged = history
            .iter()
            .find(|e| e.details.as_ref().is_some_and(|d| d["fallback"] == true))
            .unwrap();
        assert_eq!(flagged.step, Step::Extract);
        assert_eq!(flagged.status, StepStatus::Processing);
        assert_eq!(flagged.details.as_ref().unwrap()["file"], "contract.pdf");
        let last = history.last().unwrap();
        assert_eq!((last.step, last.status), (Step::Extract, StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_empty_document_reply_falls_back_to_no_text() {
        let model = FakeModel::new().reply_when(DOCUMENT_MARKER, "```\n```");
        let orchestrator = orchestrator(Some(model));
        let docx = b"PK\x03\x04word/document.xml".to_vec();
        let context = uploaded(&orchestrator, vec![("blank.docx", docx)]).await;

        let output = orchestrator.extract(context).await.unwrap();
        let content = output.context.documents[0].extracted_content.as_ref().unwrap();
        assert!(content.text.is_empty());
        assert_eq!(content.metadata.method, ExtractionMethod::DocumentModel);
        let fallback_events = orchestrator
            .progress()
            .history("doc-1")
            .iter()
            .filter(|e| e.details.as_ref().is_some_and(|d| d["fallback"] == true))
            .count();
        assert_eq!(fallback_events, 1);
    }

    #[tokio::test]
    async fn test_extensionless_image_is_sent_with_its_real_type() {
        let model = Arc::new(FakeModel::new().reply_when(OCR_MARKER, "Whiteboard notes"));
        let orchestrator = Orchestrator::new(
            Arc::new(ProgressStore::default()),
            Arc::new(MemoryRepository::new()),
            PipelineConfig::default(),
        )
        .with_blob_store(Arc::new(MemoryBlobStore::new()))
        .with_model(model.clone());
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        let context = uploaded(&orchestrator, vec![("whiteboard", png)]).await;
        assert!(context.documents[0].image_paths[0].ends_with(".png"));

        orchestrator.extract(context).await.unwrap();
        assert_eq!(model.attachment_mimes(), vec!["image/png".to_string()]);
    }
}
