//! Integration tests for the LoraManager public interface.
//!
//! These tests drive the composition root the way a front end would, with
//! remote enrichment disabled so nothing leaves the machine.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lora_core::lora::{normalize_path, spawn_debouncer, FileChange};
use lora_core::recipe::{RecipeImageSource, RecipeInput, RecipeRecord};
use lora_core::{
    LibrarySettings, LoraError, LoraManager, LoraQuery, RecipeQuery, SaveRecipeRequest,
};
use serde_json::json;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

async fn create_manager(root: &Path) -> LoraManager {
    LoraManager::builder()
        .with_settings(LibrarySettings::new(vec![root.to_path_buf()]))
        .auto_create_dirs(true)
        .with_file_monitor(false)
        .with_remote_metadata(false)
        .build()
        .await
        .expect("manager should build")
}

fn write(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 60, 30])))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_build_fails_for_missing_root() {
    let result = LoraManager::builder()
        .with_settings(LibrarySettings::new(vec!["/nonexistent/loras/root".into()]))
        .with_remote_metadata(false)
        .build()
        .await;
    assert!(matches!(result, Err(LoraError::Config { .. })));
}

#[tokio::test]
async fn test_build_fails_without_roots() {
    let result = LoraManager::builder().with_remote_metadata(false).build().await;
    assert!(matches!(result, Err(LoraError::Config { .. })));
}

#[tokio::test]
async fn test_auto_create_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("loras");
    let manager = create_manager(&root).await;
    assert!(root.is_dir());
    assert!(root.join("recipes").is_dir());
    assert_eq!(manager.settings().lora_roots, vec![root]);
}

#[tokio::test]
async fn test_queries_before_start_are_empty() {
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("a.safetensors"), b"Hello, World!");
    let manager = create_manager(temp_dir.path()).await;

    let page = manager.list_loras(&LoraQuery::default()).await.unwrap();
    assert_eq!(page.total, 0);
    assert!(!manager.lora_scanner().is_initialized());
}

#[tokio::test]
async fn test_scan_then_preview_appears() {
    let temp_dir = TempDir::new().unwrap();
    let model = temp_dir.path().join("a.safetensors");
    write(&model, b"Hello, World!");
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();

    let page = manager.list_loras(&LoraQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    let record = &page.items[0];
    assert_eq!(record.folder, "");
    assert_eq!(record.sha256, HELLO_SHA256);
    assert_eq!(record.preview_url, "");
    assert!(!temp_dir.path().join("a.metadata.json").exists());

    write(&temp_dir.path().join("a.png"), b"png");
    let summary = manager.refresh_loras().await.unwrap();
    assert_eq!(summary.total, 1);
    let page = manager.list_loras(&LoraQuery::default()).await.unwrap();
    assert!(page.items[0].preview_url.ends_with("a.png"));

    let by_hash = manager.get_lora_by_hash(HELLO_SHA256).unwrap();
    assert_eq!(by_hash.file_path, normalize_path(&model));
}

#[tokio::test]
async fn test_move_and_delete_through_manager() {
    let temp_dir = TempDir::new().unwrap();
    let model = temp_dir.path().join("a.safetensors");
    write(&model, b"Hello, World!");
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();

    let target = temp_dir.path().join("styles");
    let moved = manager.move_model(&model, &target).await;
    assert!(moved.is_success(), "{:?}", moved.error_message());
    let new_path = moved.data().unwrap().new_file_path.clone();
    assert_eq!(new_path, normalize_path(target.join("a.safetensors")));

    let record = manager.get_lora_by_hash(HELLO_SHA256).unwrap();
    assert_eq!(record.file_path, new_path);
    assert_eq!(record.folder, "styles");
    assert_eq!(manager.get_folders().await.unwrap(), vec!["styles".to_string()]);

    let failed = manager.move_model(&model, &target).await;
    assert!(!failed.is_success());

    let deleted = manager.delete_model(Path::new(&new_path)).await;
    assert!(deleted.is_success());
    assert!(deleted
        .data()
        .unwrap()
        .deleted_files
        .iter()
        .any(|f| f.ends_with("a.metadata.json")));
    assert!(manager.get_lora_by_hash(HELLO_SHA256).is_none());
}

#[tokio::test]
async fn test_save_recipe_with_two_loras() {
    let temp_dir = TempDir::new().unwrap();
    write(&temp_dir.path().join("ink.safetensors"), b"Hello, World!");
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();

    let metadata: RecipeInput = serde_json::from_value(json!({
        "base_model": "SDXL 1.0",
        "loras": [
            {"file_name": "ink", "hash": HELLO_SHA256.to_uppercase(), "weight": 0.6, "id": 11},
            {"file_name": "missing", "hash": "ffff", "weight": 1.0, "id": "22"}
        ],
        "gen_params": {"prompt": "ink portrait", "steps": 30}
    }))
    .unwrap();
    let saved = manager
        .save_recipe(SaveRecipeRequest {
            name: "Ink Study".to_string(),
            tags: vec!["ink".to_string()],
            image: Some(RecipeImageSource::Bytes(png_bytes(1024, 768))),
            metadata: Some(metadata),
        })
        .await;
    assert!(saved.is_success(), "{:?}", saved.error_message());
    let saved = saved.data().unwrap().clone();

    let expected_image = temp_dir
        .path()
        .join("recipes")
        .join(format!("{}.webp", saved.recipe_id));
    assert_eq!(saved.image_path, normalize_path(&expected_image));
    assert!(expected_image.is_file());

    let stored: RecipeRecord =
        serde_json::from_slice(&std::fs::read(&saved.json_path).unwrap()).unwrap();
    assert_eq!(stored.loras.len(), 2);
    assert_eq!(stored.loras[0].hash, HELLO_SHA256);

    let page = manager.list_recipes(&RecipeQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, saved.recipe_id);

    let detail = manager.get_recipe_detail(&saved.recipe_id).await.unwrap();
    assert!(detail.loras[0].in_library);
    assert!(detail.loras[0]
        .local_path
        .as_deref()
        .unwrap()
        .ends_with("ink.safetensors"));
    assert!(!detail.loras[1].in_library);

    let analysis = manager
        .analyze_recipe_image(RecipeImageSource::Bytes(std::fs::read(&expected_image).unwrap()))
        .await
        .unwrap();
    assert_eq!(analysis.recipe.unwrap()["title"], json!("Ink Study"));

    let tags = manager.get_recipe_top_tags(10).await.unwrap();
    assert_eq!(tags[0].name, "ink");

    let deleted = manager.delete_recipe(&saved.recipe_id).await;
    assert!(deleted.is_success());
    assert!(!expected_image.exists());
    assert_eq!(manager.list_recipes(&RecipeQuery::default()).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_recipes_reload_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();
    let saved = manager
        .save_recipe(SaveRecipeRequest {
            name: "Persisted".to_string(),
            tags: Vec::new(),
            image: Some(RecipeImageSource::Bytes(png_bytes(64, 64))),
            metadata: Some(RecipeInput::default()),
        })
        .await;
    assert!(saved.is_success());

    let fresh = create_manager(temp_dir.path()).await;
    fresh.initialize().await.unwrap();
    let page = fresh.list_recipes(&RecipeQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].title, "Persisted");
}

#[tokio::test]
async fn test_save_recipe_before_initialize_populates_cache() {
    let temp_dir = TempDir::new().unwrap();
    let manager = create_manager(temp_dir.path()).await;
    assert!(!manager.recipe_scanner().is_initialized());

    let saved = manager
        .save_recipe(SaveRecipeRequest {
            name: "Cold Start".to_string(),
            tags: Vec::new(),
            image: Some(RecipeImageSource::Bytes(png_bytes(32, 32))),
            metadata: Some(RecipeInput::default()),
        })
        .await;
    assert!(saved.is_success(), "{:?}", saved.error_message());

    assert!(manager.recipe_scanner().is_initialized());
    let page = manager.list_recipes(&RecipeQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].title, "Cold Start");
}

#[tokio::test]
async fn test_debounce_coalesces_repeated_adds() {
    let temp_dir = TempDir::new().unwrap();
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();

    let model = temp_dir.path().join("burst.safetensors");
    write(&model, b"Hello, World!");
    let literal = normalize_path(&model);

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let consumer = spawn_debouncer(
        manager.lora_scanner().clone(),
        rx,
        Duration::from_millis(50),
    );
    for _ in 0..5 {
        tx.send(FileChange::add(literal.clone())).await.unwrap();
    }
    drop(tx);
    consumer.await.unwrap();

    let page = manager.list_loras(&LoraQuery::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].file_path, literal);
}

#[tokio::test]
async fn test_debounce_last_action_wins() {
    let temp_dir = TempDir::new().unwrap();
    let model = temp_dir.path().join("gone.safetensors");
    write(&model, b"Hello, World!");
    let manager = create_manager(temp_dir.path()).await;
    manager.initialize().await.unwrap();
    let literal = normalize_path(&model);

    std::fs::remove_file(&model).unwrap();
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let consumer = spawn_debouncer(
        manager.lora_scanner().clone(),
        rx,
        Duration::from_millis(50),
    );
    tx.send(FileChange::add(literal.clone())).await.unwrap();
    tx.send(FileChange::remove(literal.clone())).await.unwrap();
    drop(tx);
    consumer.await.unwrap();

    assert_eq!(manager.list_loras(&LoraQuery::default()).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_start_and_shutdown_with_monitor() {
    let temp_dir = TempDir::new().unwrap();
    let manager = LoraManager::builder()
        .with_settings(LibrarySettings::new(vec![temp_dir.path().to_path_buf()]))
        .with_remote_metadata(false)
        .build()
        .await
        .unwrap();

    manager.start().unwrap();
    manager.start().unwrap();
    assert!(manager.is_watching());
    assert!(!manager.watched_paths().is_empty());

    manager.initialize().await.unwrap();
    assert!(manager.lora_scanner().is_initialized());
    assert!(manager.recipe_scanner().is_initialized());

    manager.shutdown().await;
    assert!(!manager.is_watching());
}
