//! Text extraction from staged files.
//!
//! The decoder is picked from the file extension by [`DocumentFormat::from_path`],
//! a closed set with plain text as the fallback:
//!
//! | Extension | Format |
//! |-----------|--------|
//! | `.pdf` | [`DocumentFormat::Pdf`] |
//! | `.docx`, `.doc` | [`DocumentFormat::Structured`] (word) |
//! | `.pptx` | [`DocumentFormat::Structured`] (presentation) |
//! | `.xlsx` | [`DocumentFormat::Structured`] (spreadsheet) |
//! | anything else | [`DocumentFormat::Text`] (UTF-8) |
//!
//! A `.doc` holding a legacy binary (OLE2) Word document is rejected with
//! [`DecodeError::Unsupported`]; only OOXML content is read.
//!
//! Extraction yields one or more text segments (one per page-like unit for
//! office formats) which [`decode_file`] joins with blank lines.

use std::io::Read;
use std::path::Path;

use crate::error::DecodeError;

/// Maximum sheets to read from an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to read per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Signature of an OLE2 compound file (legacy `.doc`, `.xls`, `.ppt`).
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Separator placed between extracted segments.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Office Open XML document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Word,
    Presentation,
    Spreadsheet,
}

/// How a staged file is turned into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// UTF-8 text: `.txt`, `.md`, `.log`, and the fallback for anything unknown.
    Text,
    Pdf,
    Structured(OfficeKind),
}

impl DocumentFormat {
    /// Pick the format from the (case-insensitive) file extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => DocumentFormat::Pdf,
            Some("docx" | "doc") => DocumentFormat::Structured(OfficeKind::Word),
            Some("pptx") => DocumentFormat::Structured(OfficeKind::Presentation),
            Some("xlsx") => DocumentFormat::Structured(OfficeKind::Spreadsheet),
            _ => DocumentFormat::Text,
        }
    }
}

/// Read `path` and extract its text segments.
pub fn extract_segments(path: &Path) -> Result<Vec<String>, DecodeError> {
    let bytes = std::fs::read(path)?;
    extract_bytes(&bytes, DocumentFormat::from_path(path))
}

/// Extract text segments from in-memory content of a known format.
pub fn extract_bytes(bytes: &[u8], format: DocumentFormat) -> Result<Vec<String>, DecodeError> {
    if matches!(format, DocumentFormat::Structured(_)) && bytes.starts_with(OLE2_MAGIC) {
        return Err(DecodeError::Unsupported(
            "legacy binary Office format; convert to .docx/.pptx/.xlsx",
        ));
    }
    match format {
        DocumentFormat::Text => Ok(vec![String::from_utf8(bytes.to_vec())?]),
        DocumentFormat::Pdf => extract_pdf(bytes).map(|text| vec![text]),
        DocumentFormat::Structured(OfficeKind::Word) => extract_docx(bytes).map(|text| vec![text]),
        DocumentFormat::Structured(OfficeKind::Presentation) => extract_pptx(bytes),
        DocumentFormat::Structured(OfficeKind::Spreadsheet) => extract_xlsx(bytes),
    }
}

/// Extract and join all segments of `path` into one document text.
pub fn decode_file(path: &Path) -> Result<String, DecodeError> {
    let segments = extract_segments(path)?;
    Ok(segments
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(SEGMENT_SEPARATOR))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, DecodeError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DecodeError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, DecodeError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| DecodeError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, DecodeError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| DecodeError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(DecodeError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, ordered by `n`.
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

fn extract_docx(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut archive = open_archive(bytes)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    if slides.is_empty() {
        return Err(DecodeError::Ooxml("no slides found".to_string()));
    }
    slides
        .iter()
        .map(|name| {
            let xml = read_zip_entry_bounded(&mut archive, name)?;
            collect_text_runs(&xml)
        })
        .collect()
}

/// Concatenate the text of every `<*:t>` element, one line per `<*:p>`
/// paragraph so paragraph structure survives for the chunker.
fn collect_text_runs(xml: &[u8]) -> Result<String, DecodeError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| DecodeError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == b"p" && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecodeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        read_shared_strings(&mut archive)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut out = Vec::new();
    for name in sheets.iter().take(XLSX_MAX_SHEETS) {
        let xml = read_zip_entry_bounded(&mut archive, name)?;
        out.push(extract_sheet_cells(&xml, &shared_strings)?);
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, DecodeError> {
    use quick_xml::events::Event;

    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                if let Some(ref mut s) = current {
                    let text = te.unescape().map_err(|e| DecodeError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecodeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one sheet, space separated. Shared strings are resolved;
/// inline and numeric values are kept as written.
fn extract_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, DecodeError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().map_err(|e| DecodeError::Ooxml(e.to_string()))?;
                let value = raw.trim();
                if shared {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecodeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
