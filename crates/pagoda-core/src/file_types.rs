//! Upload file-type policy.
//!
//! The gate runs on the first chunk only (§ upload coordinator): a supported
//! extension passes, a known binary/media extension gets a specific
//! "unsupported" message, and anything else gets generic guidance. Neither
//! list is exhaustive of the universe — this is policy, not taxonomy.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Document extensions accepted for ingestion (lowercase).
pub static SUPPORTED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "md", // office/text
        "odt", "ods", "odp", // OpenDocument
        "html", "htm", "xml", "json", "csv", // markup/data
        "epub", // ebooks
        "pages", "numbers", "keynote", // Apple iWork
    ]
    .into_iter()
    .collect()
});

/// Extensions rejected with a specific "unsupported" message (lowercase).
pub static DENIED_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Images
        "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "tiff", "ico", "psd",
        // Audio
        "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", // Video
        "mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "m4v", "3gp", // Archives
        "zip", "rar", "7z", "tar", "gz", "bz2", "xz", // Executables / packages
        "exe", "msi", "dmg", "pkg", "deb", "rpm", // Fonts
        "ttf", "otf", "woff", "woff2", "eot", // CAD
        "dwg", "dxf", "step", "iges", // Databases
        "db", "sqlite", "mdb", "accdb", // Raw binaries
        "bin", "dat", "iso", "img",
    ]
    .into_iter()
    .collect()
});

/// Outcome of the first-chunk gate.
#[derive(Debug, Clone)]
pub struct FileTypeCheck {
    pub allowed: bool,
    pub message: String,
    /// Human label such as "PDF document" or "EXE file".
    pub file_type: String,
    pub extension: Option<String>,
}

/// Lowercased extension of `file_name`, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    let name = file_name.trim();
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(name[dot + 1..].to_ascii_lowercase())
}

/// Human-readable label for an extension.
pub fn type_label(extension: &str) -> String {
    match extension {
        "pdf" => "PDF document".to_string(),
        "doc" | "docx" => "Word document".to_string(),
        "xls" | "xlsx" => "Excel spreadsheet".to_string(),
        "ppt" | "pptx" => "PowerPoint presentation".to_string(),
        "txt" => "plain text file".to_string(),
        "rtf" => "rich text file".to_string(),
        "md" => "Markdown document".to_string(),
        "odt" => "OpenDocument text".to_string(),
        "ods" => "OpenDocument spreadsheet".to_string(),
        "odp" => "OpenDocument presentation".to_string(),
        "html" | "htm" => "HTML document".to_string(),
        "xml" => "XML document".to_string(),
        "json" => "JSON document".to_string(),
        "csv" => "CSV file".to_string(),
        "epub" => "EPUB book".to_string(),
        "pages" => "Apple Pages document".to_string(),
        "numbers" => "Apple Numbers document".to_string(),
        "keynote" => "Apple Keynote document".to_string(),
        other => format!("{} file", other.to_ascii_uppercase()),
    }
}

/// Run the gate against a filename.
pub fn check_file_type(file_name: &str) -> FileTypeCheck {
    let Some(extension) = file_extension(file_name) else {
        return FileTypeCheck {
            allowed: false,
            message: "The file has no recognizable extension; upload a document such as PDF, Word, Excel, or PowerPoint".to_string(),
            file_type: "unknown".to_string(),
            extension: None,
        };
    };

    let file_type = type_label(&extension);

    if SUPPORTED_EXTENSIONS.contains(extension.as_str()) {
        return FileTypeCheck {
            allowed: true,
            message: "supported".to_string(),
            file_type,
            extension: Some(extension),
        };
    }

    if DENIED_EXTENSIONS.contains(extension.as_str()) {
        return FileTypeCheck {
            allowed: false,
            message: format!("{file_type} uploads are not supported by the knowledge base"),
            file_type,
            extension: Some(extension),
        };
    }

    FileTypeCheck {
        allowed: false,
        message: format!(
            "{file_type} is not a recognized document type; upload a document such as PDF, Word, Excel, or PowerPoint"
        ),
        file_type,
        extension: Some(extension),
    }
}

/// Human labels of all supported types, for the enumeration endpoint.
pub fn supported_type_labels() -> Vec<String> {
    let mut labels: Vec<String> = SUPPORTED_EXTENSIONS.iter().map(|e| type_label(e)).collect();
    labels.sort();
    labels.dedup();
    labels
}

/// All supported extensions, sorted.
pub fn supported_extensions() -> Vec<String> {
    let mut exts: Vec<String> = SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    exts.sort();
    exts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extension_passes() {
        let check = check_file_type("report.pdf");
        assert!(check.allowed);
        assert_eq!(check.file_type, "PDF document");
        assert_eq!(check.extension.as_deref(), Some("pdf"));
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        assert!(check_file_type("REPORT.PDF").allowed);
        assert!(check_file_type("notes.Md").allowed);
    }

    #[test]
    fn denied_extension_gets_specific_message() {
        let check = check_file_type("malware.exe");
        assert!(!check.allowed);
        assert!(check.file_type.starts_with("EXE"));
        assert!(check.message.contains("not supported"));
    }

    #[test]
    fn unknown_extension_gets_guidance() {
        let check = check_file_type("scene.blend");
        assert!(!check.allowed);
        assert!(check.message.contains("PDF"));
        assert_eq!(check.file_type, "BLEND file");
    }

    #[test]
    fn missing_extension_is_rejected() {
        assert!(!check_file_type("README").allowed);
        assert!(!check_file_type("archive.").allowed);
        assert!(!check_file_type(".bashrc").allowed);
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(file_extension("a.b.c.TXT").as_deref(), Some("txt"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn supported_and_denied_sets_are_disjoint() {
        for ext in SUPPORTED_EXTENSIONS.iter() {
            assert!(
                !DENIED_EXTENSIONS.contains(ext),
                "extension {ext} appears in both sets"
            );
        }
    }

    #[test]
    fn supported_set_matches_documented_policy() {
        for ext in [
            "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "md", "odt", "ods",
            "odp", "html", "htm", "xml", "json", "csv", "epub", "pages", "numbers", "keynote",
        ] {
            assert!(SUPPORTED_EXTENSIONS.contains(ext), "missing {ext}");
        }
        assert_eq!(SUPPORTED_EXTENSIONS.len(), 22);
    }
}
