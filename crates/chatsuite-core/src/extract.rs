//! Upload validation, text extraction and chunking.

use std::io::{Cursor, Read};

use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use zip::ZipArchive;

use crate::error::{Error, Result};

const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Csv,
    Docx,
    PlainText,
}

impl FileKind {
    /// Match a MIME type, ignoring parameters such as `; charset=utf-8`.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(Self::Pdf),
            "text/csv" => Some(Self::Csv),
            DOCX_CONTENT_TYPE => Some(Self::Docx),
            "text/plain" => Some(Self::PlainText),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
            Self::Docx => DOCX_CONTENT_TYPE,
            Self::PlainText => "text/plain",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Csv => "csv",
            Self::Docx => "docx",
            Self::PlainText => "txt",
        }
    }
}

/// Check size and type before anything is stored.
///
/// `max_bytes` is inclusive: a file of exactly `max_bytes` is accepted.
pub fn validate_upload(content_type: &str, size: u64, max_bytes: u64) -> Result<FileKind> {
    if size > max_bytes {
        return Err(Error::FileTooLarge {
            size,
            limit: max_bytes,
        });
    }
    FileKind::from_content_type(content_type)
        .ok_or_else(|| Error::UnsupportedFileType(content_type.to_string()))
}

/// Extract readable text from an upload.
pub fn extract_text(kind: FileKind, bytes: &[u8]) -> Result<String> {
    let raw = match kind {
        FileKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|err| Error::Extraction(format!("pdf parse failed: {err}")))?,
        FileKind::Docx => extract_docx(bytes)?,
        FileKind::Csv | FileKind::PlainText => String::from_utf8_lossy(bytes).into_owned(),
    };
    Ok(normalize_text(&raw))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| Error::Extraction(format!("invalid docx archive: {err}")))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|err| Error::Extraction(format!("docx has no document body: {err}")))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    parse_docx_xml(&xml)
}

fn parse_docx_xml(xml: &str) -> Result<String> {
    let mut reader = XmlReader::from_str(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|err| Error::Extraction(format!("docx text: {err}")))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => return Err(Error::Extraction(format!("docx xml: {err}"))),
            Ok(_) => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// Normalize line endings, trim line ends and squeeze blank runs.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// A window of extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub idx: usize,
    pub content: String,
    /// Character offset of the first character.
    pub start: usize,
    /// Character offset one past the last character.
    pub end: usize,
}

/// Split text into windows of `size` characters sharing `overlap` characters.
///
/// Blank windows are skipped; indices stay dense.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<TextChunk> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let content: String = chars[start..end].iter().collect();
        if !content.trim().is_empty() {
            chunks.push(TextChunk {
                idx: chunks.len(),
                content,
                start,
                end,
            });
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MAX: u64 = 4 * 1024 * 1024;

    #[test]
    fn accepts_exactly_the_limit() {
        let kind = validate_upload("application/pdf", MAX, MAX).expect("accepted");
        assert_eq!(kind, FileKind::Pdf);
    }

    #[test]
    fn rejects_one_byte_over_the_limit() {
        let err = validate_upload("application/pdf", MAX + 1, MAX).expect_err("rejected");
        assert_eq!(err.code(), "FILE_TOO_LARGE");
    }

    #[test]
    fn rejects_unknown_types() {
        let err = validate_upload("image/png", 10, MAX).expect_err("rejected");
        assert_eq!(err.code(), "UNSUPPORTED_FILE_TYPE");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(
            FileKind::from_content_type("text/plain; charset=utf-8"),
            Some(FileKind::PlainText)
        );
        assert_eq!(FileKind::from_content_type("TEXT/CSV"), Some(FileKind::Csv));
    }

    #[test]
    fn plain_text_is_normalized() {
        let text = extract_text(FileKind::PlainText, b"line one  \r\n\r\n\r\n\r\nline two\n")
            .expect("extract");
        assert_eq!(text, "line one\n\nline two");
    }

    #[test]
    fn docx_body_text_is_extracted() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Quarterly report</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Revenue &amp; costs</w:t></w:r><w:r><w:tab/><w:t>up</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let mut bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut bytes));
            writer
                .start_file("word/document.xml", zip::write::FileOptions::default())
                .expect("start");
            writer.write_all(xml.as_bytes()).expect("write");
            writer.finish().expect("finish");
        }

        let text = extract_text(FileKind::Docx, &bytes).expect("extract");
        assert_eq!(text, "Quarterly report\nRevenue & costs\tup");
    }

    #[test]
    fn invalid_docx_is_an_extraction_error() {
        let err = extract_text(FileKind::Docx, b"not a zip").expect_err("error");
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn chunks_overlap_and_cover_text() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, 4, 1);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["abcd", "defg", "ghij"]);
        assert_eq!(chunks.last().map(|c| c.end), Some(10));
        assert!(chunks.iter().enumerate().all(|(i, c)| c.idx == i));
    }

    #[test]
    fn chunking_handles_degenerate_inputs() {
        assert!(chunk_text("", 10, 2).is_empty());
        assert!(chunk_text("abc", 0, 0).is_empty());
        // Overlap larger than the window still advances.
        assert_eq!(chunk_text("abcdef", 2, 5).len(), 5);
    }
}
