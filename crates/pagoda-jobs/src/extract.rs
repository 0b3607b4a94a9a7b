//! Text extraction.
//!
//! Format is auto-detected from the filename; each extractor pushes
//! character runs into the caller's sink (the parent buffer of the
//! splitter). Plain-text formats stream straight from the source without
//! buffering the whole object; container formats (PDF, OOXML, OpenDocument,
//! EPUB) need whole-file access for their parsers.

use std::io::Read;

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use pagoda_core::{Error, Result};
use pagoda_store::{open_source, read_source_bytes};

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb
/// protection).
const MAX_ZIP_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Streaming read size for plain-text sources.
const STREAM_BUF_BYTES: usize = 8192;

/// Extraction strategy for a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocKind {
    /// Streamed as UTF-8: txt, md, json, csv, rtf.
    PlainText,
    Pdf,
    /// OOXML word processing: `word/document.xml`.
    Docx,
    /// OOXML spreadsheet: `xl/sharedStrings.xml` + sheets.
    Xlsx,
    /// OOXML presentation: `ppt/slides/*.xml`.
    Pptx,
    /// OpenDocument (odt/ods/odp): `content.xml`.
    OpenDocument,
    /// EPUB: every XHTML entry.
    Epub,
    /// HTML/XML tag stripping.
    Markup,
    /// Formats with no native extractor (legacy binary office, iWork).
    Unsupported(String),
}

/// Pick the extraction strategy from the filename.
pub fn detect_kind(file_name: &str) -> DocKind {
    let Some(ext) = pagoda_core::file_extension(file_name) else {
        return DocKind::PlainText;
    };
    match ext.as_str() {
        "txt" | "md" | "json" | "csv" | "rtf" => DocKind::PlainText,
        "pdf" => DocKind::Pdf,
        "docx" => DocKind::Docx,
        "xlsx" => DocKind::Xlsx,
        "pptx" => DocKind::Pptx,
        "odt" | "ods" | "odp" => DocKind::OpenDocument,
        "epub" => DocKind::Epub,
        "html" | "htm" | "xml" => DocKind::Markup,
        other => DocKind::Unsupported(other.to_string()),
    }
}

/// Extract text from the source object, pushing character runs into
/// `on_chars`. The caller invokes its end-of-stream handling afterwards.
pub async fn extract_text<F: FnMut(&str)>(
    file_path: &str,
    file_name: &str,
    mut on_chars: F,
) -> Result<()> {
    match detect_kind(file_name) {
        DocKind::PlainText => stream_plain_text(file_path, &mut on_chars).await,
        DocKind::Pdf => {
            let bytes = read_source_bytes(file_path).await?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| Error::Extraction(format!("pdf: {e}")))?;
            on_chars(&text);
            Ok(())
        }
        DocKind::Docx => {
            let bytes = read_source_bytes(file_path).await?;
            extract_docx(&bytes, &mut on_chars)
        }
        DocKind::Xlsx => {
            let bytes = read_source_bytes(file_path).await?;
            extract_xlsx(&bytes, &mut on_chars)
        }
        DocKind::Pptx => {
            let bytes = read_source_bytes(file_path).await?;
            extract_pptx(&bytes, &mut on_chars)
        }
        DocKind::OpenDocument => {
            let bytes = read_source_bytes(file_path).await?;
            extract_zip_entry_markup(&bytes, &["content.xml"], &mut on_chars)
        }
        DocKind::Epub => {
            let bytes = read_source_bytes(file_path).await?;
            extract_epub(&bytes, &mut on_chars)
        }
        DocKind::Markup => {
            let bytes = read_source_bytes(file_path).await?;
            strip_markup(&bytes, &mut on_chars);
            Ok(())
        }
        DocKind::Unsupported(ext) => Err(Error::Extraction(format!(
            "no text extractor for .{ext} files"
        ))),
    }
}

/// Stream a UTF-8 source in fixed-size reads, carrying incomplete
/// sequences across read boundaries. Invalid bytes are dropped rather than
/// failing the whole document.
async fn stream_plain_text<F: FnMut(&str)>(file_path: &str, on_chars: &mut F) -> Result<()> {
    let mut reader = open_source(file_path).await?;
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; STREAM_BUF_BYTES];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        match std::str::from_utf8(&pending) {
            Ok(valid) => {
                on_chars(valid);
                pending.clear();
            }
            Err(e) => {
                let valid_len = e.valid_up_to();
                if valid_len > 0 {
                    on_chars(std::str::from_utf8(&pending[..valid_len]).unwrap());
                }
                match e.error_len() {
                    // Incomplete trailing sequence: keep it for the next read.
                    None => {
                        pending.drain(..valid_len);
                    }
                    // Invalid bytes: skip them.
                    Some(bad) => {
                        pending.drain(..valid_len + bad);
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        on_chars(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("zip: {e}")))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| Error::Extraction(format!("zip entry {name}: {e}")))?;
    let mut data = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut data)
        .map_err(|e| Error::Extraction(format!("zip entry {name}: {e}")))?;
    Ok(data)
}

/// Pull character data out of XML/HTML, with paragraph-ish breaks at block
/// element boundaries so the splitter sees real paragraphs.
fn strip_markup<F: FnMut(&str) + ?Sized>(bytes: &[u8], on_chars: &mut F) {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if name == b"script" || name == b"style" {
                    skip_depth += 1;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if name == b"script" || name == b"style" {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if matches!(
                    name.as_slice(),
                    b"p" | b"div" | b"li" | b"tr" | b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6"
                ) {
                    on_chars("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref().eq_ignore_ascii_case(b"br") {
                    on_chars("\n");
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if skip_depth == 0 {
                    if let Ok(text) = t.unescape() {
                        on_chars(&text);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Markup parse error; keeping extracted prefix");
                break;
            }
        }
        buf.clear();
    }
}

/// OOXML word processing: text runs live in `<w:t>`, paragraphs end at
/// `</w:p>`.
fn extract_docx<F: FnMut(&str)>(bytes: &[u8], on_chars: &mut F) -> Result<()> {
    let mut archive = open_zip(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => on_chars("\n\n"),
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(t)) => {
                if in_text {
                    if let Ok(text) = t.unescape() {
                        on_chars(&text);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Extraction(format!("docx xml: {e}"))),
        }
        buf.clear();
    }
    Ok(())
}

/// OOXML spreadsheet: shared strings carry the cell text.
fn extract_xlsx<F: FnMut(&str)>(bytes: &[u8], on_chars: &mut F) -> Result<()> {
    let mut archive = open_zip(bytes)?;
    let xml = match read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => xml,
        // A sheet of pure numbers has no shared strings; nothing to index.
        Err(_) => return Ok(()),
    };

    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = true;
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text = false;
                    on_chars("\n");
                }
            }
            Ok(quick_xml::events::Event::Text(t)) => {
                if in_text {
                    if let Ok(text) = t.unescape() {
                        on_chars(&text);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::Extraction(format!("xlsx xml: {e}"))),
        }
        buf.clear();
    }
    Ok(())
}

/// OOXML presentation: every slide's `<a:t>` runs, one blank line between
/// slides.
fn extract_pptx<F: FnMut(&str)>(bytes: &[u8], on_chars: &mut F) -> Result<()> {
    let mut archive = open_zip(bytes)?;

    let mut slide_names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .filter(|name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"))
        .collect();
    slide_names.sort();

    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
        let mut buf = Vec::new();
        let mut in_text = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(quick_xml::events::Event::Start(e)) => {
                    if e.local_name().as_ref() == b"t" {
                        in_text = true;
                    }
                }
                Ok(quick_xml::events::Event::End(e)) => {
                    if e.local_name().as_ref() == b"t" {
                        in_text = false;
                        on_chars("\n");
                    }
                }
                Ok(quick_xml::events::Event::Text(t)) => {
                    if in_text {
                        if let Ok(text) = t.unescape() {
                            on_chars(&text);
                        }
                    }
                }
                Ok(quick_xml::events::Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::Extraction(format!("pptx xml: {e}"))),
            }
            buf.clear();
        }
        on_chars("\n\n");
    }
    Ok(())
}

/// Strip the markup of named ZIP entries (OpenDocument `content.xml`).
fn extract_zip_entry_markup<F: FnMut(&str)>(
    bytes: &[u8],
    entries: &[&str],
    on_chars: &mut F,
) -> Result<()> {
    let mut archive = open_zip(bytes)?;
    for entry in entries {
        let xml = read_zip_entry_bounded(&mut archive, entry)?;
        strip_markup(&xml, on_chars);
    }
    Ok(())
}

/// EPUB: strip every XHTML content entry in archive order.
fn extract_epub<F: FnMut(&str)>(bytes: &[u8], on_chars: &mut F) -> Result<()> {
    let mut archive = open_zip(bytes)?;

    let mut names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .filter(|name| {
            name.ends_with(".xhtml") || name.ends_with(".html") || name.ends_with(".htm")
        })
        .collect();
    names.sort();

    if names.is_empty() {
        debug!("EPUB carries no XHTML entries");
        return Ok(());
    }

    for name in names {
        let html = read_zip_entry_bounded(&mut archive, &name)?;
        strip_markup(&html, on_chars);
        on_chars("\n\n");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<F: FnOnce(&mut dyn FnMut(&str))>(f: F) -> String {
        let mut out = String::new();
        f(&mut |s: &str| out.push_str(s));
        out
    }

    #[test]
    fn kind_detection() {
        assert_eq!(detect_kind("a.txt"), DocKind::PlainText);
        assert_eq!(detect_kind("a.MD"), DocKind::PlainText);
        assert_eq!(detect_kind("a.pdf"), DocKind::Pdf);
        assert_eq!(detect_kind("a.docx"), DocKind::Docx);
        assert_eq!(detect_kind("a.xlsx"), DocKind::Xlsx);
        assert_eq!(detect_kind("a.pptx"), DocKind::Pptx);
        assert_eq!(detect_kind("a.odt"), DocKind::OpenDocument);
        assert_eq!(detect_kind("a.epub"), DocKind::Epub);
        assert_eq!(detect_kind("a.html"), DocKind::Markup);
        assert_eq!(detect_kind("a.doc"), DocKind::Unsupported("doc".into()));
    }

    #[test]
    fn markup_stripping_keeps_text_and_breaks() {
        let html = b"<html><head><style>p{color:red}</style></head>\
                     <body><p>Hello</p><p>World</p><script>var x=1;</script></body></html>";
        let out = collect(|sink| strip_markup(html, sink));
        assert!(out.contains("Hello"));
        assert!(out.contains("World"));
        assert!(!out.contains("color"));
        assert!(!out.contains("var x"));
        assert!(out.contains("\n\n"));
    }

    #[test]
    fn markup_stripping_unescapes_entities() {
        let html = b"<p>fish &amp; chips</p>";
        let out = collect(|sink| strip_markup(html, sink));
        assert!(out.contains("fish & chips"));
    }

    #[test]
    fn docx_extraction_reads_text_runs() {
        // Minimal OOXML document built in memory.
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
            let options = zip::write::SimpleFileOptions::default();
            use std::io::Write;
            writer.start_file("word/document.xml", options).unwrap();
            writer
                .write_all(
                    br#"<?xml version="1.0"?>
                    <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
                      <w:body>
                        <w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
                        <w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>
                      </w:body>
                    </w:document>"#,
                )
                .unwrap();
            writer.finish().unwrap();
        }

        let mut out = String::new();
        extract_docx(&zip_bytes, &mut |s: &str| out.push_str(s)).unwrap();
        assert!(out.contains("First paragraph."));
        assert!(out.contains("Second paragraph."));
        assert!(out.contains("\n\n"));
    }

    #[test]
    fn xlsx_without_shared_strings_is_empty() {
        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
            let options = zip::write::SimpleFileOptions::default();
            use std::io::Write;
            writer.start_file("xl/workbook.xml", options).unwrap();
            writer.write_all(b"<workbook/>").unwrap();
            writer.finish().unwrap();
        }

        let mut out = String::new();
        extract_xlsx(&zip_bytes, &mut |s: &str| out.push_str(s)).unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn plain_text_streams_from_local_file() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all("héllo wörld\n\nsecond".as_bytes()).unwrap();

        let mut out = String::new();
        extract_text(tmp.path().to_str().unwrap(), "note.txt", |s| {
            out.push_str(s)
        })
        .await
        .unwrap();
        assert_eq!(out, "héllo wörld\n\nsecond");
    }

    #[tokio::test]
    async fn unsupported_format_is_an_extraction_error() {
        let err = extract_text("/tmp/ignored.doc", "legacy.doc", |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
