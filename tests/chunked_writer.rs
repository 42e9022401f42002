//! Chunked writer behavior: rollover, byte caps, ordering, idempotent close.

use shopcrawl::ChunkedWriter;
use std::path::Path;
use tempfile::TempDir;

/// Chunk files under `dir`, sorted by name, as (name, size, content).
fn sorted_chunks(dir: &Path) -> Vec<(String, u64, String)> {
    let mut chunks: Vec<(String, u64, String)> = std::fs::read_dir(dir)
        .expect("read chunk dir")
        .map(|entry| {
            let entry = entry.expect("dir entry");
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = entry.metadata().expect("metadata").len();
            let content = std::fs::read_to_string(entry.path()).expect("chunk content");
            (name, size, content)
        })
        .collect();
    chunks.sort();
    chunks
}

#[tokio::test]
async fn rolls_before_exceeding_the_cap_and_preserves_order() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("out");
    let mut writer = ChunkedWriter::with_max_chunk_bytes(out.join("product_urls_0000"), 64);

    let lines: Vec<String> = (0..10)
        .map(|i| format!("https://x.example/p/{i:03}\n"))
        .collect();
    for line in &lines {
        writer.write(line).await.expect("write");
    }
    writer.close().await.expect("close");

    let chunks = sorted_chunks(&out);
    assert!(chunks.len() > 1, "expected multiple chunks, got {chunks:?}");

    for (name, size, _) in &chunks {
        assert!(*size <= 64, "{name} is {size} bytes, over the cap");
        assert!(name.starts_with("product_urls_0000_"));
        assert!(name.ends_with(".txt"));
    }

    // Sequence numbers are contiguous from _0001 and FIFO order survives
    // across the chunk boundaries.
    let names: Vec<&str> = chunks.iter().map(|(name, _, _)| name.as_str()).collect();
    let expected_names: Vec<String> = (1..=chunks.len())
        .map(|i| format!("product_urls_0000_{i:04}.txt"))
        .collect();
    assert_eq!(names, expected_names);

    let concatenated: String = chunks.iter().map(|(_, _, content)| content.as_str()).collect();
    assert_eq!(concatenated, lines.concat());
}

#[tokio::test]
async fn oversized_write_gets_its_own_chunk_unsplit() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("out");
    let mut writer = ChunkedWriter::with_max_chunk_bytes(out.join("big"), 16);

    writer.write("0123456789\n").await.expect("write");
    let oversized = "x".repeat(40);
    writer.write(&oversized).await.expect("write oversized");
    writer.write("tail\n").await.expect("write tail");
    writer.close().await.expect("close");

    let chunks = sorted_chunks(&out);
    let contents: Vec<&str> = chunks.iter().map(|(_, _, content)| content.as_str()).collect();
    assert_eq!(contents, ["0123456789\n", oversized.as_str(), "tail\n"]);
}

#[tokio::test]
async fn close_is_idempotent_and_write_reopens() {
    let dir = TempDir::new().expect("tempdir");
    let out = dir.path().join("out");
    let mut writer = ChunkedWriter::with_max_chunk_bytes(out.join("log"), 1024);

    writer.close().await.expect("close with nothing open");

    writer.write("first\n").await.expect("write");
    writer.close().await.expect("close");
    writer.close().await.expect("second close");

    writer.write("second\n").await.expect("write after close");
    writer.close().await.expect("close");

    let chunks = sorted_chunks(&out);
    let names: Vec<&str> = chunks.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(names, ["log_0001.txt", "log_0002.txt"]);
}

#[tokio::test]
async fn bare_prefix_does_not_create_an_empty_directory() {
    let dir = TempDir::new().expect("tempdir");
    let original = std::env::current_dir().expect("cwd");
    std::env::set_current_dir(dir.path()).expect("enter tempdir");

    let mut writer = ChunkedWriter::new("loose_prefix");
    let result = async {
        writer.write("line\n").await?;
        writer.close().await
    }
    .await;

    std::env::set_current_dir(original).expect("restore cwd");
    result.expect("write with bare prefix");

    assert!(dir.path().join("loose_prefix_0001.txt").exists());
}
