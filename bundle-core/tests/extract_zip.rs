mod common;

use std::fs;

use code_bundle_core::contract::Extractor;
use code_bundle_core::extract::{extract_zip, ExtractError, ZipExtractor};
use tempfile::tempdir;

#[test]
fn extracts_files_and_directories() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("upload.zip");
    common::write_zip(
        &archive,
        &[
            ("project/", ""),
            ("project/Main.java", "class Main {}"),
            ("project/docs/brief.pdf", "%PDF-1.5"),
        ],
    );
    let destination = dir.path().join("extracted");

    let summary = extract_zip(&archive, &destination).unwrap();

    assert_eq!(summary.files, 2);
    assert_eq!(summary.directories, 1);
    assert!(summary.skipped.is_empty());
    assert_eq!(
        fs::read_to_string(destination.join("project/Main.java")).unwrap(),
        "class Main {}"
    );
    assert!(destination.join("project/docs/brief.pdf").is_file());
}

#[test]
fn traversal_entries_stay_inside_the_destination() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("hostile.zip");
    common::write_zip(
        &archive,
        &[("../../escaped.java", "class Escaped {}")],
    );
    let destination = dir.path().join("jail");

    let summary = extract_zip(&archive, &destination).unwrap();

    assert!(!dir.path().join("escaped.java").exists());
    assert!(destination.join("escaped.java").is_file());
    assert_eq!(summary.files, 1);
}

#[test]
fn corrupt_archive_is_rejected() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("broken.zip");
    fs::write(&archive, b"this is not a zip archive").unwrap();

    let err = extract_zip(&archive, &dir.path().join("out")).unwrap_err();

    assert!(matches!(err, ExtractError::Zip(_)), "got {err:?}");
}

#[tokio::test]
async fn extractor_trait_runs_off_the_async_threads() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("upload.zip");
    common::write_zip(&archive, &[("A.java", "class A {}")]);
    let destination = dir.path().join("extracted");

    let summary = ZipExtractor::new()
        .extract(&archive, &destination)
        .await
        .unwrap();

    assert_eq!(summary.files, 1);
    assert!(destination.join("A.java").is_file());
}

#[tokio::test]
async fn extractor_trait_reports_missing_archive() {
    let dir = tempdir().unwrap();
    let result = ZipExtractor::new()
        .extract(&dir.path().join("missing.zip"), &dir.path().join("out"))
        .await;
    assert!(result.is_err());
}
