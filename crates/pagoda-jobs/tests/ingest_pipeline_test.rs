//! End-to-end extraction and splitting over real files, without external
//! services.

use std::io::Write;

use pagoda_jobs::{extract_text, search_doc_id, split_text, TwoLevelSplitter};

fn normalized(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[tokio::test]
async fn text_file_flows_through_extraction_and_splitting() {
    let body = "Quarterly engineering report.\n\n\
                The ingestion pipeline handled forty thousand documents this \
                quarter. Latency stayed under budget. Two incidents were \
                resolved without data loss.\n\n\
                Next quarter we plan to double the worker pool.";

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(body.as_bytes()).unwrap();
    let path = tmp.path().to_str().unwrap().to_string();

    let mut passages: Vec<String> = Vec::new();
    {
        let mut splitter = TwoLevelSplitter::new(1024 * 1024, 120, |p| passages.push(p));
        extract_text(&path, "report.txt", |chars| splitter.on_chars(chars))
            .await
            .unwrap();
        splitter.on_end();
    }

    assert!(passages.len() >= 2, "expected multiple passages");
    for passage in &passages {
        assert!(!passage.is_empty());
        assert!(passage.chars().count() <= 240, "passage far over target");
    }
    assert_eq!(normalized(&passages.concat()), normalized(body));
}

#[tokio::test]
async fn docx_flows_through_extraction_and_splitting() {
    let mut zip_bytes = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut zip_bytes));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("word/document.xml", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?>
                <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
                  <w:body>
                    <w:p><w:r><w:t>Minutes of the weekly sync.</w:t></w:r></w:p>
                    <w:p><w:r><w:t>Everyone agreed to ship on Thursday.</w:t></w:r></w:p>
                  </w:body>
                </w:document>"#,
            )
            .unwrap();
        writer.finish().unwrap();
    }

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&zip_bytes).unwrap();
    let path = tmp.path().to_str().unwrap().to_string();

    let mut text = String::new();
    extract_text(&path, "minutes.docx", |chars| text.push_str(chars))
        .await
        .unwrap();

    assert!(text.contains("Minutes of the weekly sync."));
    assert!(text.contains("ship on Thursday"));

    let passages = split_text(&text, 1000);
    assert_eq!(passages.len(), 1);
}

#[test]
fn passage_identity_is_stable_across_runs() {
    // The ids the indexer would write for these passages never change, so
    // a redelivered task overwrites rather than duplicates.
    let md5 = "0cc175b9c0f1b6a831c399e269772661";
    let first = (1..=5).map(|i| search_doc_id(md5, i)).collect::<Vec<_>>();
    let second = (1..=5).map(|i| search_doc_id(md5, i)).collect::<Vec<_>>();
    assert_eq!(first, second);

    let unique: std::collections::HashSet<_> = first.iter().collect();
    assert_eq!(unique.len(), 5);
}
