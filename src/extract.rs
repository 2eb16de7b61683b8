//! Built-in Extraction Gateway.
//!
//! Decodes a file's bytes into plain text, dispatching on the format hint
//! (the lower-cased extension):
//!
//! | Hint | Decoder |
//! |------|---------|
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` `<w:t>` runs, one line per paragraph |
//! | `pptx` | `ppt/slides/slideN.xml` `<a:t>` runs, slides in order |
//! | `xlsx` | shared-string cells of every worksheet |
//! | `json` | email export: subject, body (or bodyPreview), from |
//! | `txt`, `md` | UTF-8, lossy |
//!
//! Anything else is `UnsupportedFormat`. A decoder error, or text shorter
//! than `min_text_chars` once trimmed, is `Corrupt`. Both are permanent:
//! the same bytes will fail the same way next time.

use std::io::{Cursor, Read};

use docvault_core::gateway::{ExtractionError, Extractor};
use quick_xml::events::Event;

use crate::config::ExtractionConfig;

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Format hints this extractor can decode.
pub const SUPPORTED_FORMATS: &[&str] = &["pdf", "docx", "pptx", "xlsx", "json", "txt", "md"];

pub struct BuiltinExtractor {
    min_text_chars: usize,
    max_file_bytes: u64,
}

impl BuiltinExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            min_text_chars: config.min_text_chars,
            max_file_bytes: config.max_file_bytes,
        }
    }
}

impl Extractor for BuiltinExtractor {
    fn extract(&self, bytes: &[u8], format_hint: &str) -> Result<String, ExtractionError> {
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(ExtractionError::UnsupportedFormat(format!(
                "{} bytes exceeds the {} byte limit",
                bytes.len(),
                self.max_file_bytes
            )));
        }

        let text = match format_hint {
            "pdf" => extract_pdf(bytes)?,
            "docx" => extract_docx(bytes)?,
            "pptx" => extract_pptx(bytes)?,
            "xlsx" => extract_xlsx(bytes)?,
            "json" => extract_json_email(bytes)?,
            "txt" | "md" => String::from_utf8_lossy(bytes).into_owned(),
            other => return Err(ExtractionError::UnsupportedFormat(other.to_string())),
        };

        let text = text.trim();
        if text.chars().count() < self.min_text_chars {
            return Err(ExtractionError::Corrupt(format!(
                "extracted text shorter than {} characters",
                self.min_text_chars
            )));
        }
        Ok(text.to_string())
    }
}

fn corrupt(e: impl std::fmt::Display) -> ExtractionError {
    ExtractionError::Corrupt(e.to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractionError> {
    // pdf-extract panics on some malformed inputs.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| corrupt("PDF decoder panicked"))?
        .map_err(|e| corrupt(format!("PDF: {}", e)))
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_zip(bytes: &[u8]) -> Result<Archive<'_>, ExtractionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(format!("ZIP: {}", e)))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractionError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| corrupt(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| corrupt(format!("{}: {}", name, e)))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(corrupt(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries matching `<prefix>N.xml`, sorted by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<t>` element, starting a new line at
/// the end of each `break_on` element.
fn collect_t_text(xml: &[u8], break_on: &[u8]) -> Result<String, ExtractionError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == break_on && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(format!("XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_t_text(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_zip(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_t_text(&xml, b"p")?;
        if !text.trim().is_empty() {
            slides.push(text.trim().to_string());
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let cells = sheet_shared_cells(&xml, &shared_strings)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, ExtractionError> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(format!("XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Text of shared-string cells (`t="s"`) in one worksheet.
fn sheet_shared_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ExtractionError> {
    let mut cells: Vec<&str> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v && shared => {
                let v = te.unescape().unwrap_or_default();
                if let Some(s) = v.trim().parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                    cells.push(s);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt(format!("XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

/// Email exported as JSON (Outlook / Graph style).
fn extract_json_email(bytes: &[u8]) -> Result<String, ExtractionError> {
    let data: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| corrupt(format!("JSON: {}", e)))?;
    let obj = data
        .as_object()
        .ok_or_else(|| corrupt("JSON email export must be an object"))?;

    let mut parts = Vec::new();
    if let Some(subject) = obj.get("subject").and_then(as_text) {
        parts.push(format!("Subject: {}", subject));
    }
    if let Some(body) = obj
        .get("body")
        .and_then(as_text)
        .or_else(|| obj.get("bodyPreview").and_then(as_text))
    {
        parts.push(body);
    }
    if let Some(from) = obj.get("from").and_then(sender) {
        parts.push(format!("From: {}", from));
    }
    if parts.is_empty() {
        return Err(corrupt("JSON has no subject, body, or from field"));
    }
    Ok(parts.join("\n\n"))
}

/// A string, or an object carrying its text under `content`.
fn as_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(o) => o.get("content").and_then(as_text),
        _ => None,
    }
}

fn sender(v: &serde_json::Value) -> Option<String> {
    if let Some(s) = v.as_str() {
        return Some(s.to_string());
    }
    let addr = v.get("emailAddress").unwrap_or(v);
    let name = addr.get("name").and_then(|n| n.as_str());
    let email = addr.get("address").and_then(|a| a.as_str());
    match (name, email) {
        (Some(n), Some(e)) => Some(format!("{} <{}>", n, e)),
        (Some(n), None) => Some(n.to_string()),
        (None, Some(e)) => Some(e.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(min: usize) -> BuiltinExtractor {
        BuiltinExtractor::new(&ExtractionConfig {
            min_text_chars: min,
            max_file_bytes: 1024,
        })
    }

    #[test]
    fn unsupported_format_is_permanent() {
        let err = extractor(0).extract(b"MZ", "exe").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
        assert!(err.is_permanent());
    }

    #[test]
    fn oversized_file_is_unsupported() {
        let err = extractor(0).extract(&[b'a'; 2048], "txt").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_is_corrupt() {
        let err = extractor(0).extract(b"not a pdf", "pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }

    #[test]
    fn invalid_zip_is_corrupt() {
        for hint in ["docx", "pptx", "xlsx"] {
            let err = extractor(0).extract(b"not a zip", hint).unwrap_err();
            assert!(matches!(err, ExtractionError::Corrupt(_)), "{hint}");
        }
    }

    #[test]
    fn short_text_is_corrupt() {
        let err = extractor(50).extract(b"  tiny  ", "txt").unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
        assert_eq!(extractor(3).extract(b"  tiny  ", "md").unwrap(), "tiny");
    }

    #[test]
    fn json_email_fields() {
        let json = br#"{
            "subject": "Quarterly numbers",
            "bodyPreview": "Please find attached",
            "from": {"emailAddress": {"name": "Sam", "address": "sam@example.com"}}
        }"#;
        let text = extractor(0).extract(json, "json").unwrap();
        assert_eq!(
            text,
            "Subject: Quarterly numbers\n\nPlease find attached\n\nFrom: Sam <sam@example.com>"
        );

        let body_wins = br#"{"body": {"content": "full body"}, "bodyPreview": "preview"}"#;
        assert_eq!(extractor(0).extract(body_wins, "json").unwrap(), "full body");

        let err = extractor(0).extract(b"[1, 2]", "json").unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = collect_t_text(xml, b"p").unwrap();
        assert_eq!(text, "Hello world\nSecond & last\n");
    }
}
