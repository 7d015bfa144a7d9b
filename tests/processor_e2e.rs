//! End-to-end runs of the cache layer over real storage.
//!
//! Uses the native backend, filesystem storage and the JSON file store, all
//! rooted in a temp directory.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imgfit::config::{ImgfitConfig, ShardConfig};
use imgfit::engine::EngineOperation;
use imgfit::hash::{children_key, request_key};
use imgfit::imaging::{Operation, TransformOptions};
use imgfit::processor::{Outcome, ProcessRequest, Processor};
use imgfit::storage::{FsStorage, Storage};
use imgfit::store::{JsonFileStore, KvStore};
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

fn jpeg(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 60])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    Bytes::from(out)
}

fn dimensions(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}

fn config(root: &Path, cascade: bool) -> ImgfitConfig {
    let mut config = ImgfitConfig::default();
    config.storage.source = root.join("source");
    config.storage.destination = root.join("cache");
    config.store.path = root.join("store.json");
    config.shard = ShardConfig {
        width: 2,
        depth: 2,
        rest_only: false,
    };
    config.options.enable_cascade_delete = cascade;
    config
}

fn thumbnail(path: &str, width: u32, height: u32) -> ProcessRequest {
    let opts = TransformOptions::sized(width, height, ImageFormat::Jpeg);
    let key = request_key(path, Operation::Thumbnail, &opts);
    ProcessRequest::new(
        key,
        path,
        vec![EngineOperation::new(Operation::Thumbnail, opts)],
    )
}

async fn seed(root: &Path, name: &str, width: u32, height: u32) {
    FsStorage::new(root.join("source"))
        .save(name, jpeg(width, height))
        .await
        .unwrap();
}

#[tokio::test]
async fn upload_caps_the_longer_edge() {
    let tmp = TempDir::new().unwrap();
    let processor = Processor::from_config(&config(tmp.path(), false));

    let (image, width, height) = processor
        .upload("panorama.jpg", jpeg(3000, 1800))
        .await
        .unwrap();

    assert_eq!((width, height), (2000, 1200));
    assert!(image.filepath.ends_with(".jpg"));
    let stored = processor.open_file(&image.filepath).await.unwrap();
    assert_eq!(dimensions(&stored), (2000, 1200));
}

#[tokio::test]
async fn thumbnail_is_generated_once_and_survives_restart() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "wide.jpg", 1600, 900).await;
    let config = config(tmp.path(), false);
    let processor = Processor::from_config(&config);

    let request = thumbnail("wide.jpg", 300, 200);
    let key = request.key.clone();

    let fresh = processor.process(request.clone()).await.unwrap();
    assert!(matches!(fresh, Outcome::Fresh { .. }));
    let fresh = fresh.into_image().unwrap();
    assert_eq!(dimensions(fresh.content()), (300, 200));
    assert_eq!(
        fresh.filepath,
        format!("{}/{}/{}.jpg", &key[0..2], &key[2..4], key)
    );
    assert!(tmp.path().join("cache").join(&fresh.filepath).is_file());

    // A new processor reloads the store from disk
    let restarted = Processor::from_config(&config);
    let cached = restarted.process(request).await.unwrap();
    assert!(matches!(cached, Outcome::Cached(_)));
    assert_eq!(cached.into_image().unwrap().content(), fresh.content());
}

#[tokio::test]
async fn conditional_request_short_circuits() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "wide.jpg", 1600, 900).await;
    let processor = Processor::from_config(&config(tmp.path(), false));

    let mut request = thumbnail("wide.jpg", 300, 200);
    request.if_none_match = Some(request.key.clone());

    assert!(processor.process(request).await.unwrap().is_not_modified());
    assert!(!tmp.path().join("cache").exists());
}

#[tokio::test]
async fn concurrent_misses_both_succeed() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "wide.jpg", 1600, 900).await;
    let processor = Processor::from_config(&config(tmp.path(), false));
    let request = thumbnail("wide.jpg", 300, 200);

    let (a, b) = tokio::join!(
        processor.process(request.clone()),
        processor.process(request.clone())
    );
    let (a, b) = (a.unwrap().into_image().unwrap(), b.unwrap().into_image().unwrap());

    assert_eq!(a.filepath, b.filepath);
    assert!(tmp.path().join("cache").join(&a.filepath).is_file());
    assert_eq!(
        processor.get_key(&request.key).await.unwrap(),
        Some(a.filepath)
    );
}

#[tokio::test]
async fn concurrent_misses_across_tasks() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "wide.jpg", 1600, 900).await;
    let processor = Processor::from_config(&config(tmp.path(), false));
    let request = thumbnail("wide.jpg", 120, 120);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let processor = processor.clone();
            let request = request.clone();
            tokio::spawn(async move { processor.process(request).await })
        })
        .collect();
    for handle in handles {
        let image = handle.await.unwrap().unwrap().into_image().unwrap();
        assert_eq!(dimensions(image.content()), (120, 120));
    }
    assert!(processor.key_exists(&request.key).await.unwrap());
}

#[tokio::test]
async fn deleting_a_source_cascades_to_its_variants() {
    let tmp = TempDir::new().unwrap();
    seed(tmp.path(), "wide.jpg", 1600, 900).await;
    seed(tmp.path(), "other.jpg", 400, 400).await;
    let config = config(tmp.path(), true);
    let processor = Processor::from_config(&config);

    let mut paths = Vec::new();
    for (w, h) in [(300, 200), (100, 100), (64, 0)] {
        let image = processor
            .process(thumbnail("wide.jpg", w, h))
            .await
            .unwrap()
            .into_image()
            .unwrap();
        paths.push(image.filepath);
    }
    let unrelated = processor
        .process(thumbnail("other.jpg", 50, 50))
        .await
        .unwrap()
        .into_image()
        .unwrap();

    assert_eq!(processor.delete("wide.jpg").await.unwrap(), 3);

    let cache = tmp.path().join("cache");
    for path in &paths {
        assert!(!cache.join(path).exists(), "{path} should be gone");
    }
    assert!(cache.join(&unrelated.filepath).is_file());
    assert!(!processor.file_exists("wide.jpg").await.unwrap());

    let store = JsonFileStore::open(&config.store.path);
    assert!(!store.exists(&children_key("wide.jpg")).await.unwrap());
    assert_eq!(store.read_set(&children_key("other.jpg")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn missing_source_is_reported() {
    let tmp = TempDir::new().unwrap();
    let processor = Processor::from_config(&config(tmp.path(), false));

    let err = processor
        .process(thumbnail("ghost.jpg", 10, 10))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost.jpg"));
}

#[tokio::test]
async fn format_change_without_resize_stores_matching_bytes() {
    let tmp = TempDir::new().unwrap();
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 80, Rgb([10, 20, 30])))
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    FsStorage::new(tmp.path().join("source"))
        .save("small.png", Bytes::from(png))
        .await
        .unwrap();
    let processor = Processor::from_config(&config(tmp.path(), false));

    let opts = TransformOptions::sized(400, 320, ImageFormat::Jpeg);
    let key = request_key("small.png", Operation::Resize, &opts);
    let image = processor
        .process(ProcessRequest::new(
            key,
            "small.png",
            vec![EngineOperation::new(Operation::Resize, opts)],
        ))
        .await
        .unwrap()
        .into_image()
        .unwrap();

    assert!(image.filepath.ends_with(".jpg"));
    assert_eq!(image.content_type(), "image/jpeg");
    let stored = std::fs::read(tmp.path().join("cache").join(&image.filepath)).unwrap();
    assert_eq!(image::guess_format(&stored).unwrap(), ImageFormat::Jpeg);
    assert_eq!(dimensions(&stored), (100, 80));
}
