//! Multi-format text extraction for book documents (PDF, EPUB, plain text).
//!
//! Extraction never fails the caller. Each sub-unit (a PDF page, an EPUB
//! spine item) is extracted independently; a sub-unit that cannot be parsed
//! is logged and contributes empty text. The whole document is always read,
//! so report completeness does not depend on an arbitrary page limit.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::DocumentFormat;

/// Maximum decompressed bytes to read from a single EPUB entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements whose text never belongs in the extracted body.
const SKIPPED_ELEMENTS: &[&[u8]] = &[b"head", b"script", b"style", b"svg"];

/// Elements that end a paragraph in XHTML content.
const BLOCK_ELEMENTS: &[&[u8]] = &[
    b"p", b"div", b"section", b"article", b"blockquote", b"br", b"h1", b"h2", b"h3", b"h4",
    b"h5", b"h6", b"li", b"tr", b"pre", b"hr", b"dt", b"dd", b"figcaption", b"aside",
];

/// Failure of one sub-unit. Never escapes this module.
#[derive(Debug, Error)]
enum ExtractError {
    #[error("PDF parse failed: {0}")]
    Pdf(String),
    #[error("EPUB archive error: {0}")]
    Archive(String),
    #[error("EPUB markup error: {0}")]
    Markup(String),
}

/// Extracts normalized text from a staged document on disk.
///
/// A file that cannot be read yields empty text.
pub fn extract_file(path: &Path, format: DocumentFormat) -> String {
    match std::fs::read(path) {
        Ok(bytes) => extract_text(&bytes, format),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read staged document");
            String::new()
        }
    }
}

/// Extracts normalized text from in-memory document bytes.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> String {
    let raw = match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Epub => extract_epub(bytes),
        DocumentFormat::PlainText => String::from_utf8_lossy(bytes).into_owned(),
    };
    let text = normalize(&raw);
    debug!(?format, chars = text.chars().count(), "extracted document text");
    text
}

/// Normalizes line endings and blank-line runs.
///
/// `\r\n`, `\r` and form feeds become `\n`, trailing whitespace is trimmed per
/// line, and three or more consecutive newlines collapse to one blank line.
pub fn normalize(raw: &str) -> String {
    let unified = raw
        .replace("\r\n", "\n")
        .replace(['\r', '\x0c'], "\n")
        .replace('\0', "");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
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

// ============ PDF ============

fn extract_pdf(bytes: &[u8]) -> String {
    // pdf-extract panics on some malformed inputs; treat that like an error.
    let whole = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes));
    match whole {
        Ok(Ok(pages)) => pages.join("\n"),
        Ok(Err(e)) => {
            warn!(error = %e, "whole-document PDF extraction failed, retrying page by page");
            extract_pdf_per_page(bytes)
        }
        Err(_) => {
            warn!("PDF extractor panicked, retrying page by page");
            extract_pdf_per_page(bytes)
        }
    }
}

/// Page-isolated fallback: a page that fails contributes nothing.
fn extract_pdf_per_page(bytes: &[u8]) -> String {
    let doc = match lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
    {
        Ok(doc) => doc,
        Err(e) => {
            warn!(error = %e, "unreadable PDF, no text extracted");
            return String::new();
        }
    };

    // get_pages is a BTreeMap keyed by page number, so iteration is in order.
    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut out = String::new();
    for page in page_numbers {
        match doc.extract_text(&[page]) {
            Ok(text) => {
                out.push_str(&text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            Err(e) => warn!(page, error = %e, "skipping unreadable PDF page"),
        }
    }
    out
}

// ============ EPUB ============

type EpubArchive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn extract_epub(bytes: &[u8]) -> String {
    let mut archive = match zip::ZipArchive::new(std::io::Cursor::new(bytes)) {
        Ok(a) => a,
        Err(e) => {
            warn!(error = %e, "unreadable EPUB archive, no text extracted");
            return String::new();
        }
    };

    let items = match spine_items(&mut archive) {
        Ok(items) if !items.is_empty() => items,
        Ok(_) => content_entries_by_name(&archive),
        Err(e) => {
            warn!(error = %e, "EPUB package unreadable, reading content files in archive order");
            content_entries_by_name(&archive)
        }
    };

    let text = read_sections(&mut archive, &items);
    if !text.trim().is_empty() {
        return text;
    }

    let by_name = content_entries_by_name(&archive);
    if by_name == items {
        return text;
    }
    warn!("EPUB spine yielded no text, reading content files in archive order");
    read_sections(&mut archive, &by_name)
}

fn read_sections(archive: &mut EpubArchive<'_>, items: &[String]) -> String {
    let mut sections = Vec::with_capacity(items.len());
    for name in items {
        let text = read_entry(archive, name).and_then(|xml| xhtml_to_text(&xml));
        match text {
            Ok(text) => sections.push(text),
            Err(e) => warn!(item = %name, error = %e, "skipping unreadable EPUB item"),
        }
    }
    sections.join("\n\n")
}

fn read_entry(archive: &mut EpubArchive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Archive(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Resolves the reading order: container.xml → OPF → manifest + spine.
fn spine_items(archive: &mut EpubArchive<'_>) -> Result<Vec<String>, ExtractError> {
    let container = read_entry(archive, "META-INF/container.xml")?;
    let opf_path = first_attribute(&container, b"rootfile", b"full-path")?
        .ok_or_else(|| ExtractError::Markup("container.xml has no rootfile".to_string()))?;
    let opf = read_entry(archive, &opf_path)?;

    let base = match opf_path.rfind('/') {
        Some(pos) => &opf_path[..=pos],
        None => "",
    };

    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(opf.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    let id = attribute(&e, b"id");
                    let href = attribute(&e, b"href");
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&e, b"idref") {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Markup(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(spine
        .iter()
        .filter_map(|idref| manifest.get(idref))
        .map(|href| resolve_href(base, href))
        .collect())
}

/// Fallback reading order when the package document is missing or broken.
fn content_entries_by_name(archive: &EpubArchive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| {
            let lower = n.to_ascii_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        })
        .map(|s| s.to_string())
        .collect();
    names.sort();
    names
}

/// Joins a manifest href onto the OPF directory, dropping fragments and `..` segments.
fn resolve_href(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut parts: Vec<String> = base
        .split('/')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            // OPF hrefs are URL-encoded; zip entry names are not.
            other => parts.push(
                urlencoding::decode(other)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| other.to_string()),
            ),
        }
    }
    parts.join("/")
}

fn attribute(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn first_attribute(xml: &[u8], element: &[u8], key: &[u8]) -> Result<Option<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == element => {
                return Ok(attribute(&e, key));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(ExtractError::Markup(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

/// Flattens an XHTML document into paragraphs separated by blank lines.
fn xhtml_to_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().check_end_names = false;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut skip_depth = 0usize;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if SKIPPED_ELEMENTS.contains(&name.as_ref()) {
                    skip_depth += 1;
                } else if BLOCK_ELEMENTS.contains(&name.as_ref()) {
                    flush_paragraph(&mut current, &mut paragraphs);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if SKIPPED_ELEMENTS.contains(&name.as_ref()) {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if BLOCK_ELEMENTS.contains(&name.as_ref()) {
                    flush_paragraph(&mut current, &mut paragraphs);
                }
            }
            Ok(Event::Empty(e)) => {
                if BLOCK_ELEMENTS.contains(&e.local_name().as_ref()) {
                    flush_paragraph(&mut current, &mut paragraphs);
                }
            }
            Ok(Event::Text(te)) if skip_depth == 0 => {
                // XHTML entities like &nbsp; are unknown to XML; keep the raw text then.
                let text = te
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&te).into_owned());
                current.push_str(&text);
                current.push(' ');
            }
            Ok(Event::CData(cd)) if skip_depth == 0 => {
                current.push_str(&String::from_utf8_lossy(&cd));
                current.push(' ');
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Markup(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    flush_paragraph(&mut current, &mut paragraphs);
    Ok(paragraphs.join("\n\n"))
}

fn flush_paragraph(current: &mut String, paragraphs: &mut Vec<String>) {
    let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        paragraphs.push(collapsed);
    }
    current.clear();
}
