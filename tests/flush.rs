//! Flush tests
//!
//! Upload, visibility wait and indexing against the in-memory backend.

mod common;

use anyhow::Result;
use bytes::Bytes;
use common::*;
use s3fs::backend::ObjectAcl;
use s3fs::S3fsError;
use test_case::test_case;

/// A flushed file is indexed with the backend's metadata and its parents
#[tokio::test]
async fn test_flush_indexes_file_and_ancestors() -> Result<()> {
    let harness = TestHarness::builder().versioned().build();

    let flushed = harness
        .flush()
        .flush("public://uploads/2024/photo.jpg", Bytes::from_static(b"jpegdata"))
        .await?;
    assert!(flushed);

    let record = harness
        .record("public://uploads/2024/photo.jpg")
        .await
        .expect("flushed record");
    assert_eq!(record.size, 8);
    assert_eq!(record.version, "v1");
    assert!(!record.is_dir);

    assert_dir_exists(&harness.engine, "public://uploads").await;
    assert_dir_exists(&harness.engine, "public://uploads/2024").await;

    let object = harness.backend.object("s3fs-public/uploads/2024/photo.jpg").unwrap();
    assert_eq!(object.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(object.acl, Some(ObjectAcl::PublicRead));
    Ok(())
}

/// Read-after-write lag within the wait budget is absorbed
#[tokio::test]
async fn test_flush_waits_for_visibility() -> Result<()> {
    let harness = TestHarness::builder().visibility_lag(2).build();

    assert!(harness.flush().flush("public://a.txt", Bytes::from_static(b"a")).await?);
    // Two invisible polls, one visible poll, then the metadata fetch
    assert_eq!(harness.backend.head_calls("s3fs-public/a.txt"), 4);
    assert_file_exists(&harness.engine, "public://a.txt").await;
    Ok(())
}

/// A wait timeout leaves the index untouched
#[tokio::test]
async fn test_flush_timeout_does_not_index() -> Result<()> {
    let harness = TestHarness::builder().visibility_lag(10).build();

    let flushed = harness
        .flush()
        .flush("public://slow/a.txt", Bytes::from_static(b"a"))
        .await?;
    assert!(!flushed);

    assert_eq!(harness.index_len().await, 0);
    assert_eq!(harness.backend.head_calls("s3fs-public/slow/a.txt"), 3);
    Ok(())
}

/// Transient HEAD errors while waiting are retried, not raised
#[tokio::test]
async fn test_flush_retries_transient_errors() -> Result<()> {
    let harness = TestHarness::new();
    harness.backend.fail_heads(2);

    assert!(harness.flush().flush("public://b.txt", Bytes::from_static(b"b")).await?);
    assert_file_exists(&harness.engine, "public://b.txt").await;
    Ok(())
}

/// A failed upload is an error and leaves the index untouched
#[tokio::test]
async fn test_flush_backend_failure() -> Result<()> {
    let harness = TestHarness::new();
    harness.backend.set_fail_writes(true);

    let result = harness.flush().flush("public://c.txt", Bytes::from_static(b"c")).await;
    assert!(matches!(result, Err(S3fsError::Backend(_))));
    assert_eq!(harness.index_len().await, 0);
    Ok(())
}

/// Private uploads are private and carry the configured headers
#[tokio::test]
async fn test_flush_private_attributes() -> Result<()> {
    let harness = TestHarness::builder()
        .config("root_folder: site\ncache_control: \"public, max-age=3600\"\nencryption: aws:kms")
        .build();

    assert!(harness.flush().flush("private://contracts/c.pdf", Bytes::from_static(b"%PDF")).await?);

    let object = harness.backend.object("site/s3fs-private/contracts/c.pdf").unwrap();
    assert_eq!(object.acl, Some(ObjectAcl::Private));
    assert_eq!(object.cache_control.as_deref(), Some("public, max-age=3600"));
    assert_eq!(object.server_side_encryption.as_deref(), Some("aws:kms"));
    Ok(())
}

/// Overwriting refreshes the version used in URLs
#[tokio::test]
async fn test_overwrite_updates_version_in_url() -> Result<()> {
    let harness = TestHarness::builder().versioned().build();
    let flush = harness.flush();

    flush.flush("public://logo.png", Bytes::from_static(b"1")).await?;
    flush.flush("public://logo.png", Bytes::from_static(b"22")).await?;

    let url = harness.urls().external_url_cached("public://logo.png").await?;
    assert_eq!(
        url,
        format!("{}/s3fs-public/logo.png?versionId=v2", BUCKET_URL)
    );
    assert_eq!(harness.record("public://logo.png").await.unwrap().size, 2);
    Ok(())
}

/// Flush then unlink round trip
#[tokio::test]
async fn test_flush_then_unlink() -> Result<()> {
    let harness = TestHarness::new();
    harness.flush().flush("public://tmp/x.bin", Bytes::from_static(b"x")).await?;

    assert!(harness.engine.unlink("public://tmp/x.bin").await?);
    assert_not_exists(&harness.engine, "public://tmp/x.bin").await;
    assert!(harness.backend.keys().is_empty());
    assert!(harness.engine.rmdir("public://tmp").await?);
    Ok(())
}

/// Common media types are stored with their real content type
#[test_case("public://media/clip.mp4", "video/mp4" ; "video")]
#[test_case("public://media/pic.webp", "image/webp" ; "webp image")]
#[test_case("public://media/arch.zip", "application/zip" ; "archive")]
#[test_case("public://media/song.mp3", "audio/mpeg" ; "audio")]
#[test_case("public://media/README", "application/octet-stream" ; "no extension")]
#[tokio::test]
async fn test_flush_content_type(uri: &str, expected: &str) -> Result<()> {
    let harness = TestHarness::new();
    assert!(harness.flush().flush(uri, Bytes::from_static(b"data")).await?);

    let key = uri.replace("public://", "s3fs-public/");
    let object = harness.backend.object(&key).expect("uploaded object");
    assert_eq!(object.content_type.as_deref(), Some(expected));
    Ok(())
}
