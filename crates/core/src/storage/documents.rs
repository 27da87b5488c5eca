//! # Document Handling
//!
//! File type detection and page representations for uploaded files.
//! PDFs are split into single-page PDFs, images are their own single page,
//! text needs no pages, and anything else goes to the model whole.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Minimum characters on a page before its embedded text layer is trusted
const MIN_TEXT_LAYER_CHARS: usize = 40;

/// Detected type of an uploaded file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Plain text, read directly
    Text,
    /// PDF, paginated and read page by page
    Pdf,
    /// Raster image, one page
    Image,
    /// Any other format, sent to the model as-is
    Document,
}

/// One page representation ready to store
#[derive(Debug, Clone)]
pub struct PageBlob {
    pub bytes: Vec<u8>,
    /// Page file extension; the page's MIME type is derived from it
    pub extension: String,
}

/// Extension of a raster image recognised by its magic bytes
fn sniff_image_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}

/// Detect a file's type from magic bytes first, then its extension
pub fn detect_file_type(name: &str, bytes: &[u8]) -> FileType {
    if bytes.starts_with(b"%PDF") {
        return FileType::Pdf;
    }
    if sniff_image_extension(bytes).is_some() {
        return FileType::Image;
    }
    // Zip containers (docx, xlsx, pptx, odt) and legacy OLE (doc, xls)
    if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
        return FileType::Document;
    }

    let guessed = mime_guess::from_path(name).first();
    if let Some(mime) = guessed {
        let essence = mime.essence_str();
        if essence == "application/pdf" {
            return FileType::Pdf;
        }
        if mime.type_() == mime_guess::mime::IMAGE {
            return FileType::Image;
        }
        if mime.type_() == mime_guess::mime::TEXT
            || matches!(essence, "application/json" | "application/xml")
        {
            return FileType::Text;
        }
        return FileType::Document;
    }

    if looks_like_text(bytes) {
        FileType::Text
    } else {
        FileType::Document
    }
}

fn looks_like_text(bytes: &[u8]) -> bool {
    !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok()
}

/// MIME type to send with a file of this type
pub fn mime_type_for(name: &str, file_type: FileType) -> String {
    match file_type {
        FileType::Pdf => "application/pdf".to_string(),
        FileType::Text => "text/plain".to_string(),
        FileType::Image | FileType::Document => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Derive the page representation of a file.
///
/// Returns the effective file type (a PDF that cannot be parsed is demoted
/// to [`FileType::Document`]) and its pages.
pub fn paginate(
    name: &str,
    file_type: FileType,
    bytes: &[u8],
) -> (FileType, Vec<PageBlob>) {
    match file_type {
        FileType::Pdf => match split_pdf_pages(bytes) {
            Ok(pages) if !pages.is_empty() => (
                FileType::Pdf,
                pages
                    .into_iter()
                    .map(|bytes| PageBlob {
                        bytes,
                        extension: "pdf".to_string(),
                    })
                    .collect(),
            ),
            Ok(_) => (FileType::Document, Vec::new()),
            Err(e) => {
                tracing::warn!(file = name, "PDF could not be paginated, sending whole: {}", e);
                (FileType::Document, Vec::new())
            }
        },
        FileType::Image => {
            let extension = sniff_image_extension(bytes)
                .map(str::to_string)
                .or_else(|| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
                .unwrap_or_else(|| "img".to_string());
            (
                FileType::Image,
                vec![PageBlob {
                    bytes: bytes.to_vec(),
                    extension,
                }],
            )
        }
        FileType::Text | FileType::Document => (file_type, Vec::new()),
    }
}

/// Split a PDF into one single-page PDF per page, in page order
pub fn split_pdf_pages(bytes: &[u8]) -> PipelineResult<Vec<Vec<u8>>> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| PipelineError::InvalidInput(format!("Failed to parse PDF: {}", e)))?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();

    let mut out = Vec::with_capacity(pages.len());
    for &page in &pages {
        let others: Vec<u32> = pages.iter().copied().filter(|p| *p != page).collect();
        let mut single = doc.clone();
        single.delete_pages(&others);
        single.prune_objects();

        let mut buffer = Vec::new();
        single
            .save_to(&mut buffer)
            .map_err(|e| PipelineError::InvalidInput(format!("Failed to write page {}: {}", page, e)))?;
        out.push(buffer);
    }

    tracing::debug!(pages = out.len(), "PDF split into pages");
    Ok(out)
}

/// Embedded text of a single-page PDF, if it has a usable text layer
pub fn pdf_text_layer(bytes: &[u8]) -> Option<String> {
    let doc = lopdf::Document::load_mem(bytes).ok()?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let text = doc.extract_text(&pages).ok()?;
    usable_text(&text)
}

/// Trimmed text when it carries enough characters to skip OCR
fn usable_text(text: &str) -> Option<String> {
    let meaningful = text.chars().filter(|c| c.is_alphanumeric()).count();
    (meaningful >= MIN_TEXT_LAYER_CHARS).then(|| text.trim().to_string())
}
