//! Command-line contract tests
//!
//! Runs the built binary against files in a temporary directory and checks
//! outputs, exit codes and the single stderr line.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use plughub_core::fixtures::{build_pdf, page_texts, png_bytes, PageSpec};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn engine(args: &[&Path]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plughub-engine"))
        .args(args)
        .output()
        .expect("engine binary runs")
}

fn file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[test]
fn lock_unlock_round_trip() {
    let dir = TempDir::new().unwrap();
    let input = file(&dir, "in.pdf", &build_pdf(&[PageSpec::text("Alpha"), PageSpec::text("Beta")]));
    let locked = dir.path().join("locked.pdf");
    let unlocked = dir.path().join("unlocked.pdf");

    let out = engine(&[Path::new("lock"), &input, &locked, Path::new("s3cret")]);
    assert!(out.status.success(), "{}", stderr(&out));

    let out = engine(&[Path::new("unlock"), &locked, &unlocked, Path::new("wrong")]);
    assert_eq!(out.status.code(), Some(65));
    assert_eq!(stderr(&out), "Invalid password for PDF.");

    let out = engine(&[Path::new("unlock"), &locked, &unlocked, Path::new("s3cret")]);
    assert!(out.status.success(), "{}", stderr(&out));
    let bytes = std::fs::read(&unlocked).unwrap();
    assert_eq!(page_texts(&bytes), vec![vec!["Alpha"], vec!["Beta"]]);
}

#[test]
fn split_writes_page_archive() {
    let dir = TempDir::new().unwrap();
    let input = file(&dir, "in.pdf", &build_pdf(&[PageSpec::blank(), PageSpec::blank(), PageSpec::blank()]));
    let output = dir.path().join("out.zip");

    let out = engine(&[
        Path::new("split"),
        &input,
        &output,
        Path::new("--pages"),
        Path::new("1, 3"),
    ]);
    assert!(out.status.success(), "{}", stderr(&out));

    let archive = zip::ZipArchive::new(Cursor::new(std::fs::read(output).unwrap())).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["page-1.pdf", "page-3.pdf"]);
}

#[test]
fn merge_and_images_to_pdf() {
    let dir = TempDir::new().unwrap();
    let a = file(&dir, "a.pdf", &build_pdf(&[PageSpec::text("A")]));
    let b = file(&dir, "b.pdf", &build_pdf(&[PageSpec::text("B")]));
    let merged = dir.path().join("merged.pdf");
    let out = engine(&[Path::new("merge"), &merged, &b, &a]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(page_texts(&std::fs::read(&merged).unwrap()), vec![vec!["B"], vec!["A"]]);

    let png = file(&dir, "shot.png", &png_bytes(12, 8));
    let converted = dir.path().join("converted.pdf");
    let out = engine(&[Path::new("images-to-pdf"), &converted, &png]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(std::fs::read(converted).unwrap().starts_with(b"%PDF-"));
}

/// Renders real pixels, or fails loudly when no renderer can be loaded
#[test]
fn pdf_to_images_never_writes_blank_pages() {
    let dir = TempDir::new().unwrap();
    let input = file(&dir, "in.pdf", &build_pdf(&[PageSpec::text("Alpha"), PageSpec::text("Beta")]));
    let images = dir.path().join("images.zip");

    let out = engine(&[Path::new("pdf-to-images"), &input, &images]);
    if !out.status.success() {
        assert_eq!(out.status.code(), Some(70));
        assert!(!stderr(&out).is_empty());
        assert!(!images.exists());
        return;
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(std::fs::read(images).unwrap())).unwrap();
    assert_eq!(archive.len(), 2);
    let mut png = Vec::new();
    archive.by_index(0).unwrap().read_to_end(&mut png).unwrap();
    let page = image::load_from_memory(&png).unwrap().to_rgba8();
    assert!(page.pixels().any(|pixel| pixel.0[..3] != [255, 255, 255]));
}

#[test]
fn redact_covers_substring_and_tolerates_no_hits() {
    let dir = TempDir::new().unwrap();
    let input = file(&dir, "in.pdf", &build_pdf(&[PageSpec::text("SSN: 123-45-6789")]));
    let output = dir.path().join("out.pdf");

    let out = engine(&[Path::new("redact"), &input, &output, Path::new("Nobody")]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(page_texts(&std::fs::read(&output).unwrap()), vec![vec!["SSN: 123-45-6789"]]);

    let out = engine(&[Path::new("redact"), &input, &output, Path::new("SSN")]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(
        page_texts(&std::fs::read(&output).unwrap()),
        vec![vec!["SSN: 123-45-6789", "[REDACTED]"]]
    );
}

#[test]
fn usage_and_missing_input_codes() {
    let dir = TempDir::new().unwrap();
    let out = engine(&[Path::new("lock")]);
    assert_eq!(out.status.code(), Some(64));
    assert_eq!(stderr(&out).lines().count(), 1);

    let out = engine(&[
        Path::new("lock"),
        &dir.path().join("missing.pdf"),
        &dir.path().join("out.pdf"),
        Path::new("pw"),
    ]);
    assert_eq!(out.status.code(), Some(66));
    assert_eq!(stderr(&out), "Source file missing.");
}
