//! Extension-dispatched document loading.
//!
//! Turns a file on disk into plain UTF-8 text: `pdf` through pdf-extract,
//! `docx`/`doc` and `pptx` through their OOXML text runs, `txt` read
//! directly (lossy UTF-8). Unrecognized extensions fail with a
//! configuration error before any pipeline work starts; a file that cannot
//! be parsed fails with a content error.
//!
//! Legacy binary `.doc` is routed through the DOCX reader; a true pre-OOXML
//! file is not a ZIP archive and fails as a content error rather than
//! extracting garbage.

use std::io::Read;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};

/// Maximum decompressed bytes read from one ZIP entry (zip-bomb bound).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum slides processed from one pptx.
const PPTX_MAX_SLIDES: usize = 500;

/// Extensions [`load`] accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "doc", "pptx", "txt"];

/// Read `path` and extract its text, dispatching on the file extension.
pub fn load(path: &Path) -> PipelineResult<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let bytes = std::fs::read(path)
        .map_err(|e| PipelineError::Content(format!("failed to read {}: {e}", path.display())))?;
    extract(&extension, &bytes)
}

/// Extract text from in-memory bytes for the given (lowercase) extension.
pub fn extract(extension: &str, bytes: &[u8]) -> PipelineResult<String> {
    match extension {
        "pdf" => extract_pdf(bytes),
        "docx" | "doc" => extract_docx(bytes),
        "pptx" => extract_pptx(bytes),
        "txt" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(PipelineError::Config(format!(
            "unsupported file type: {other:?} (supported: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> PipelineResult<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| PipelineError::Content(format!("PDF extraction failed: {e}")))
}

fn ooxml_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Content(format!("OOXML extraction failed: {e}"))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> PipelineResult<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err(format!(
            "ZIP entry {name} exceeds size limit ({MAX_XML_ENTRY_BYTES} bytes)"
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> PipelineResult<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    if archive.by_name("word/document.xml").is_err() {
        return Err(ooxml_err("word/document.xml not found"));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_t_elements(&xml)
}

fn extract_pptx(bytes: &[u8]) -> PipelineResult<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut out = String::new();
    for name in slide_names.into_iter().take(PPTX_MAX_SLIDES) {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_t_elements(&xml)?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenate the character data of every `<w:t>`/`<a:t>` text run.
fn collect_t_elements(xml: &[u8]) -> PipelineResult<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
