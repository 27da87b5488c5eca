//! Text handling shared by the Extract and Analyze stages: splitting text
//! into sections and merging per-file content into one body.

use regex::Regex;
use std::sync::OnceLock;

use super::context::{ExtractionMethod, ExtractionMetadata, ExtractedContent, Section, UploadedDocument};

const MAX_HEADING_CHARS: usize = 80;

fn numbered_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d+(\.\d+)*\.?\s+\S").expect("numbered heading pattern is valid")
    })
}

/// Heading text if `line` looks like a heading
fn heading_of(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
        return None;
    }

    if line.starts_with('#') {
        let text = line.trim_start_matches('#').trim();
        return (!text.is_empty()).then(|| text.to_string());
    }

    // "2.3 Scope" but not "1. The user logs in and sees the dashboard."
    if numbered_heading().is_match(line) && !line.ends_with(['.', ',', ';', ':']) {
        return Some(line.to_string());
    }

    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase()) {
        return Some(line.to_string());
    }
    None
}

/// Split text into sections at Markdown, numbered and ALL-CAPS headings.
/// Text before the first heading becomes a section with an empty heading.
pub fn sectionize(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut heading = String::new();
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |heading: &mut String, body: &mut Vec<&str>| {
        let content = body.join("\n").trim().to_string();
        if !heading.is_empty() || !content.is_empty() {
            sections.push(Section {
                heading: std::mem::take(heading),
                content,
            });
        }
        body.clear();
    };

    for line in text.lines() {
        match heading_of(line) {
            Some(next) => {
                flush(&mut heading, &mut body);
                heading = next;
            }
            None => body.push(line),
        }
    }
    flush(&mut heading, &mut body);
    sections
}

/// Build the extracted view of one file's text
pub fn extracted_content(text: String, page_count: usize, method: ExtractionMethod) -> ExtractedContent {
    let metadata = ExtractionMetadata {
        char_count: text.chars().count(),
        word_count: text.split_whitespace().count(),
        page_count,
        method,
    };
    ExtractedContent {
        sections: sectionize(&text),
        text,
        metadata,
    }
}

/// Separator line that precedes each file's text in merged content
pub fn document_separator(name: &str) -> String {
    format!("\n\n--- Document: {} ---\n\n", name)
}

/// Concatenate the extracted text of every document, marking boundaries
pub fn merge_documents(documents: &[UploadedDocument]) -> String {
    let mut merged = String::new();
    for doc in documents {
        if let Some(content) = &doc.extracted_content {
            merged.push_str(&document_separator(&doc.original_name));
            merged.push_str(content.text.trim());
        }
    }
    merged.trim_start().to_string()
}

/// All non-empty section headings, in document order
pub fn section_headings(documents: &[UploadedDocument]) -> Vec<&str> {
    documents
        .iter()
        .filter_map(|d| d.extracted_content.as_ref())
        .flat_map(|c| c.sections.iter())
        .map(|s| s.heading.as_str())
        .filter(|h| !h.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileType;

    fn doc(name: &str, text: &str) -> UploadedDocument {
        UploadedDocument {
            original_name: name.into(),
            storage_path: format!("p/d/original/{}", name),
            file_type: FileType::Text,
            page_count: 1,
            image_paths: vec![],
            extracted_content: Some(extracted_content(text.into(), 1, ExtractionMethod::Direct)),
        }
    }

    #[test]
    fn test_sectionize_recognizes_heading_styles() {
        let text = "Intro line\n# Overview\nBody one\n2.1 Scope\nBody two\nSECURITY\nBody three\n1. The user logs in.\n";
        let sections = sectionize(text);
        let headings: Vec<&str> = sections.iter().map(|s| s.heading.as_str()).collect();

        assert_eq!(headings, vec!["", "Overview", "2.1 Scope", "SECURITY"]);
        assert_eq!(sections[0].content, "Intro line");
        assert_eq!(sections[3].content, "Body three\n1. The user logs in.");
    }

    #[test]
    fn test_sectionize_plain_text_is_one_section() {
        let sections = sectionize("just some words\nand more");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "");
        assert!(sectionize("").is_empty());
    }

    #[test]
    fn test_metadata_counts() {
        let content = extracted_content("one two  three".into(), 2, ExtractionMethod::Ocr);
        assert_eq!(content.metadata.word_count, 3);
        assert_eq!(content.metadata.char_count, 14);
        assert_eq!(content.metadata.page_count, 2);
    }

    #[test]
    fn test_merge_marks_document_boundaries() {
        let merged = merge_documents(&[doc("a.txt", "alpha\n"), doc("b.md", "# B\nbeta")]);
        assert_eq!(
            merged,
            "--- Document: a.txt ---\n\nalpha\n\n--- Document: b.md ---\n\n# B\nbeta"
        );
        assert_eq!(section_headings(&[doc("b.md", "# B\nbeta")]), vec!["B"]);
    }
}
