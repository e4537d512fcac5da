//! Build context pipeline through the public API: pack a directory, rewrite
//! its manifest, read the result back.

use std::fs;
use std::io::Read;

use mbl_core::MblError;
use mbl_runtime::{pack, rewrite_entry, rewrite_manifest, IgnoreList};
use tempfile::TempDir;

const MANIFEST: &str = "FROM arm64v8/debian\nWORKDIR /app\nRUN apt-get update\nCMD [\"./app\"]\n";

fn entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(archive);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (name, data)
        })
        .collect()
}

fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("Dockerfile"), MANIFEST).unwrap();
    fs::create_dir_all(dir.path().join("src/lib")).unwrap();
    fs::write(dir.path().join("src/main.c"), "int main(void) { return 0; }").unwrap();
    fs::write(dir.path().join("src/lib/util.c"), "void util(void) {}").unwrap();
    fs::create_dir(dir.path().join(".git")).unwrap();
    fs::write(dir.path().join(".git/config"), "[core]").unwrap();
    fs::create_dir(dir.path().join("build")).unwrap();
    fs::write(dir.path().join("build/app.o"), [0u8; 32]).unwrap();
    dir
}

#[tokio::test]
async fn test_pack_and_rewrite_manifest() {
    let dir = source_tree();
    let ignore = IgnoreList::new([".git", "build"]);

    let archive = pack(dir.path(), ignore.into_predicate()).unwrap();
    let rewritten = rewrite_entry(archive, "Dockerfile", |content| {
        rewrite_manifest(&content, ".mbed/qemu-execve")
    });
    let bytes = rewritten.into_bytes().await.unwrap();

    let entries = entries(&bytes);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"Dockerfile"));
    assert!(names.contains(&"src/main.c"));
    assert!(names.contains(&"src/lib/util.c"));
    assert!(!names.iter().any(|n| n.starts_with(".git") || n.starts_with("build")));

    let manifest = &entries.iter().find(|(n, _)| n == "Dockerfile").unwrap().1;
    let manifest = String::from_utf8(manifest.clone()).unwrap();
    assert!(manifest.starts_with("FROM arm64v8/debian\nWORKDIR /app\nCOPY .mbed/qemu-execve"));
    assert!(manifest.contains("RUN [ \"cross-build-start\" ]\nRUN apt-get update"));
    assert!(manifest.ends_with("RUN [ \"cross-build-end\" ]\n"));

    let source = entries.iter().find(|(n, _)| n == "src/main.c").unwrap();
    assert_eq!(source.1, b"int main(void) { return 0; }");
}

#[tokio::test]
async fn test_rewrite_failure_surfaces_from_worker() {
    let dir = source_tree();
    fs::write(dir.path().join("Dockerfile"), "FROM scratch\nCMD [\"./app\"]\n").unwrap();

    let archive = pack(dir.path(), IgnoreList::default().into_predicate()).unwrap();
    let rewritten = rewrite_entry(archive, "Dockerfile", |content| {
        rewrite_manifest(&content, ".mbed/qemu-execve")
    });

    let result = rewritten.into_bytes().await;
    assert!(matches!(result, Err(MblError::ConfigError(_))));
}

#[tokio::test]
async fn test_missing_source_directory() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");

    let result = pack(&missing, IgnoreList::default().into_predicate());
    assert!(matches!(result, Err(MblError::NotFound(ref p)) if *p == missing));
}
