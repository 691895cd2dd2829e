//! Recipe scanner.
//!
//! Recipes live as `{id}.recipe.json` plus an optimised preview image in the
//! `recipes` directory of the first LoRA root. The cache is built lazily with
//! the same single-flight protocol as the LoRA cache.

use super::cache::{merge_recipe, RecipeCache, RecipeSnapshot};
use super::exif::{append_recipe_metadata, extract_recipe_metadata, ImageMetadataStore};
use super::preview::optimize_image;
use super::types::{
    format_timestamp, ImageAnalysis, RecipeDetail, RecipeImageSource, RecipeLoraDetail,
    RecipeQuery, RecipeRecord, SaveRecipeRequest, SavedRecipe,
};
use crate::config::{LibrarySettings, NetworkConfig, RecipeConfig, RecipeImageFormat};
use crate::error::{LoraError, Result};
use crate::lora::{normalize_path, top_counts, LoraScanner, NameCount, SortBy};
use crate::metadata::{atomic_read_json, write_json_blocking, RECIPE_INDENT};
use crate::models::Paginated;
use crate::network::{build_http_client, download_bytes};
use crate::sync::SingleFlight;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct RecipeScanner {
    recipes_dir: Option<PathBuf>,
    image_format: RecipeImageFormat,
    lora_scanner: Arc<LoraScanner>,
    metadata_store: Arc<dyn ImageMetadataStore>,
    http: Client,
    cache: SingleFlight<Arc<RecipeCache>>,
}

impl RecipeScanner {
    pub fn new(
        settings: &LibrarySettings,
        lora_scanner: Arc<LoraScanner>,
        metadata_store: Arc<dyn ImageMetadataStore>,
    ) -> Result<Self> {
        Ok(Self {
            recipes_dir: settings.recipes_dir(),
            image_format: settings.recipe_image_format,
            lora_scanner,
            metadata_store,
            http: build_http_client(NetworkConfig::REQUEST_TIMEOUT)?,
            cache: SingleFlight::new("Recipe cache"),
        })
    }

    pub fn recipes_dir(&self) -> Option<&Path> {
        self.recipes_dir.as_deref()
    }

    fn require_recipes_dir(&self) -> Result<&Path> {
        self.recipes_dir().ok_or_else(|| LoraError::Config {
            message: "no LoRA root configured for recipes".to_string(),
        })
    }

    // ========================================
    // Cache lifecycle
    // ========================================

    /// Get the cache, loading every recipe file first when forced or never loaded.
    pub async fn get_cached_data(&self, force_refresh: bool) -> Result<Arc<RecipeCache>> {
        let dir = self.recipes_dir.clone();
        let cache = self
            .cache
            .get(force_refresh, move || load_recipes(dir))
            .await?;
        Ok(cache.unwrap_or_default())
    }

    /// Load the cache unless it exists, joining a load that is already running.
    pub async fn initialize(&self) -> Result<Arc<RecipeCache>> {
        let dir = self.recipes_dir.clone();
        let cache = self.cache.get_or_init(move || load_recipes(dir)).await?;
        Ok(cache.unwrap_or_default())
    }

    pub fn current_cache(&self) -> Option<Arc<RecipeCache>> {
        self.cache.current()
    }

    pub fn is_initialized(&self) -> bool {
        self.cache.current().is_some()
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    // ========================================
    // Queries
    // ========================================

    pub async fn get_paginated_data(&self, query: &RecipeQuery) -> Result<Paginated<RecipeRecord>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        Ok(run_recipe_query(&snapshot, query))
    }

    pub async fn get_recipe(&self, id: &str) -> Result<Option<RecipeRecord>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        Ok(snapshot.get(id).map(|r| (**r).clone()))
    }

    /// Recipe with every LoRA resolved against the local library.
    pub async fn get_recipe_detail(&self, id: &str) -> Result<RecipeDetail> {
        let recipe = self
            .get_recipe(id)
            .await?
            .ok_or_else(|| LoraError::RecipeNotFound { id: id.to_string() })?;

        let loras = recipe
            .loras
            .iter()
            .map(|lora| {
                let local_path = if lora.hash.is_empty() {
                    None
                } else {
                    self.lora_scanner.get_lora_path_by_hash(&lora.hash)
                };
                let preview_url = local_path
                    .as_ref()
                    .and_then(|_| self.lora_scanner.get_preview_url_by_hash(&lora.hash));
                RecipeLoraDetail {
                    lora: lora.clone(),
                    in_library: local_path.is_some(),
                    local_path,
                    preview_url,
                }
            })
            .collect();

        Ok(RecipeDetail {
            created_date_formatted: format_timestamp(recipe.created_date),
            modified_formatted: format_timestamp(recipe.modified),
            id: recipe.id,
            file_path: recipe.file_path,
            title: recipe.title,
            modified: recipe.modified,
            created_date: recipe.created_date,
            base_model: recipe.base_model,
            loras,
            gen_params: recipe.gen_params,
            tags: recipe.tags,
        })
    }

    pub async fn get_top_tags(&self, limit: usize) -> Result<Vec<NameCount>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for tag in snapshot.raw_data.iter().flat_map(|r| r.tags.iter()) {
            *counts.entry(tag.clone()).or_insert(0) += 1;
        }
        Ok(top_counts(&counts, limit))
    }

    pub async fn get_base_models(&self) -> Result<Vec<NameCount>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in snapshot.raw_data.iter().filter(|r| !r.base_model.is_empty()) {
            *counts.entry(record.base_model.clone()).or_insert(0) += 1;
        }
        Ok(top_counts(&counts, usize::MAX))
    }

    // ========================================
    // Mutations
    // ========================================

    /// Store a new recipe: optimised image, JSON file, embedded copy, cache entry.
    pub async fn save_recipe(&self, request: SaveRecipeRequest) -> Result<SavedRecipe> {
        let mut missing = Vec::new();
        if request.name.trim().is_empty() {
            missing.push("name");
        }
        if request.metadata.is_none() {
            missing.push("metadata");
        }
        if !missing.is_empty() {
            return Err(LoraError::Validation {
                field: missing.join(", "),
                message: "missing required fields".to_string(),
            });
        }
        let metadata = request.metadata.unwrap_or_default();

        let image = match request.image {
            Some(RecipeImageSource::Bytes(bytes)) => bytes,
            Some(RecipeImageSource::Url(url)) => download_bytes(&self.http, &url).await?,
            None => {
                return Err(LoraError::Validation {
                    field: "image".to_string(),
                    message: "no image data provided".to_string(),
                })
            }
        };

        let recipes_dir = self.require_recipes_dir()?.to_path_buf();
        tokio::fs::create_dir_all(&recipes_dir)
            .await
            .map_err(|e| LoraError::io_with_path(e, &recipes_dir))?;

        let format = self.image_format;
        let (optimized, extension) =
            tokio::task::spawn_blocking(move || optimize_image(&image, format))
                .await
                .map_err(|e| LoraError::Other(format!("Image task failed: {}", e)))??;

        let recipe_id = Uuid::new_v4().to_string();
        let image_path = recipes_dir.join(format!("{}{}", recipe_id, extension));
        let json_path = recipes_dir.join(format!("{}{}", recipe_id, RecipeConfig::JSON_SUFFIX));

        tokio::fs::write(&image_path, optimized)
            .await
            .map_err(|e| LoraError::io_with_path(e, &image_path))?;

        let now = now_secs();
        let gen_params = metadata.resolved_gen_params();
        let record = RecipeRecord {
            id: recipe_id.clone(),
            file_path: normalize_path(&image_path),
            title: request.name,
            modified: now,
            created_date: now,
            base_model: metadata.base_model,
            loras: metadata
                .loras
                .into_iter()
                .filter_map(|lora| lora.into_recipe_lora())
                .collect(),
            gen_params,
            tags: request.tags,
        };

        if let Err(e) = write_json_blocking(&json_path, &record, RECIPE_INDENT).await {
            if let Err(cleanup) = tokio::fs::remove_file(&image_path).await {
                warn!("Failed to remove {}: {}", image_path.display(), cleanup);
            }
            return Err(e);
        }

        let store = self.metadata_store.clone();
        let embed_path = image_path.clone();
        let embedded = record.clone();
        match tokio::task::spawn_blocking(move || {
            append_recipe_metadata(store.as_ref(), &embed_path, &embedded)
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not embed recipe in {}: {}", image_path.display(), e),
            Err(e) => warn!("Embed task for {} failed: {}", image_path.display(), e),
        }

        match self.initialize().await {
            Ok(cache) => cache.add_recipe(record).await,
            Err(e) => warn!("Recipe {} saved but the cache could not load: {}", recipe_id, e),
        }
        info!("Saved recipe {} to {}", recipe_id, recipes_dir.display());

        Ok(SavedRecipe {
            recipe_id,
            image_path: normalize_path(&image_path),
            json_path: normalize_path(&json_path),
        })
    }

    /// Remove a recipe's JSON and image, then drop it from the cache.
    pub async fn delete_recipe(&self, id: &str) -> Result<()> {
        let recipes_dir = self.require_recipes_dir()?;
        let json_path = recipes_dir.join(format!("{}{}", id, RecipeConfig::JSON_SUFFIX));
        let record: RecipeRecord = read_recipe_file(json_path.clone())
            .await?
            .ok_or_else(|| LoraError::RecipeNotFound { id: id.to_string() })?;

        tokio::fs::remove_file(&json_path)
            .await
            .map_err(|e| LoraError::io_with_path(e, &json_path))?;
        info!("Deleted recipe file {}", json_path.display());

        let image_path = Path::new(&record.file_path);
        if image_path.is_file() {
            match tokio::fs::remove_file(image_path).await {
                Ok(()) => info!("Deleted recipe image {}", image_path.display()),
                Err(e) => warn!("Failed to delete {}: {}", image_path.display(), e),
            }
        }

        if let Some(cache) = self.current_cache() {
            cache.remove_recipe(id).await;
        }
        Ok(())
    }

    /// Merge `patch` into a recipe and rewrite its JSON file.
    pub async fn update_recipe_metadata(
        &self,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<RecipeRecord> {
        let recipes_dir = self.require_recipes_dir()?;
        let json_path = recipes_dir.join(format!("{}{}", id, RecipeConfig::JSON_SUFFIX));
        let current: RecipeRecord = read_recipe_file(json_path.clone())
            .await?
            .ok_or_else(|| LoraError::RecipeNotFound { id: id.to_string() })?;

        let mut updated = merge_recipe(&current, patch)?;
        updated.modified = now_secs();
        write_json_blocking(&json_path, &updated, RECIPE_INDENT).await?;

        if let Some(cache) = self.current_cache() {
            cache.add_recipe(updated.clone()).await;
        }
        debug!("Updated recipe {}", id);
        Ok(updated)
    }

    /// Copy a recipe image into `dest_dir` under a title-derived name.
    pub async fn share_recipe(&self, id: &str, dest_dir: &Path) -> Result<PathBuf> {
        let recipe = self
            .get_recipe(id)
            .await?
            .ok_or_else(|| LoraError::RecipeNotFound { id: id.to_string() })?;
        let source = PathBuf::from(&recipe.file_path);
        if !source.is_file() {
            return Err(LoraError::FileNotFound(source));
        }
        let extension = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let name = format!(
            "recipe_{}{}",
            recipe.title.replace(' ', "_").to_lowercase(),
            extension
        );
        let target = dest_dir.join(name);
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| LoraError::io_with_path(e, &source))?;
        Ok(target)
    }

    /// Read the comment and any embedded recipe out of an image.
    pub async fn analyze_image(&self, source: RecipeImageSource) -> Result<ImageAnalysis> {
        let bytes = match source {
            RecipeImageSource::Bytes(bytes) => bytes,
            RecipeImageSource::Url(url) => download_bytes(&self.http, &url).await?,
        };
        let temp_path =
            std::env::temp_dir().join(format!("lora-analyze-{}.img", Uuid::new_v4()));
        tokio::fs::write(&temp_path, &bytes)
            .await
            .map_err(|e| LoraError::io_with_path(e, &temp_path))?;

        let analysis = self.analyze_image_file(&temp_path).await;
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            error!("Error deleting temporary file {}: {}", temp_path.display(), e);
        }
        analysis
    }

    pub async fn analyze_image_file(&self, path: &Path) -> Result<ImageAnalysis> {
        let store = self.metadata_store.clone();
        let owned = path.to_path_buf();
        let comment = tokio::task::spawn_blocking(move || store.extract_embedded_metadata(&owned))
            .await
            .map_err(|e| LoraError::Other(format!("Metadata task failed: {}", e)))?;

        let comment = match comment {
            Ok(comment) => comment.filter(|c| !c.is_empty()),
            Err(e) => {
                debug!("No embedded metadata in {}: {}", path.display(), e);
                None
            }
        };
        Ok(match comment {
            Some(comment) => ImageAnalysis {
                recipe: extract_recipe_metadata(&comment),
                comment: Some(comment),
                error: None,
            },
            None => ImageAnalysis {
                comment: None,
                recipe: None,
                error: Some("No metadata found in this image".to_string()),
            },
        })
    }
}

// ========================================
// Loading
// ========================================

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

async fn read_recipe_file(path: PathBuf) -> Result<Option<RecipeRecord>> {
    tokio::task::spawn_blocking(move || atomic_read_json(&path))
        .await
        .map_err(|e| LoraError::Other(format!("Recipe read task failed: {}", e)))?
}

async fn load_recipes(dir: Option<PathBuf>) -> Result<Arc<RecipeCache>> {
    let Some(dir) = dir else {
        return Ok(Arc::new(RecipeCache::default()));
    };
    let records = tokio::task::spawn_blocking(move || read_recipe_dir(&dir))
        .await
        .map_err(|e| LoraError::Other(format!("Recipe scan task failed: {}", e)))?;
    info!("Loaded {} recipes", records.len());
    Ok(Arc::new(RecipeCache::new(RecipeSnapshot::from_records(
        records,
    ))))
}

/// Every parseable `*.recipe.json` directly inside `dir`.
fn read_recipe_dir(dir: &Path) -> Vec<RecipeRecord> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("No recipes at {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().ends_with(RecipeConfig::JSON_SUFFIX))
                    .unwrap_or(false)
        })
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| match atomic_read_json::<RecipeRecord>(&path) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed recipe {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

// ========================================
// Query
// ========================================

fn matches_search(recipe: &RecipeRecord, query: &RecipeQuery, search: &str) -> bool {
    let options = &query.search_options;
    let contains = |text: &str| text.to_lowercase().contains(search);

    (options.title && contains(&recipe.title))
        || (options.tags && recipe.tags.iter().any(|t| contains(t)))
        || (options.lora_name && recipe.loras.iter().any(|l| contains(&l.file_name)))
        || (options.lora_model && recipe.loras.iter().any(|l| contains(&l.model_name)))
}

pub fn run_recipe_query(snapshot: &RecipeSnapshot, query: &RecipeQuery) -> Paginated<RecipeRecord> {
    let source = match query.sort_by {
        SortBy::Name => &snapshot.sorted_by_name,
        SortBy::Date => &snapshot.sorted_by_date,
    };
    let search = query
        .search
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let filtered: Vec<Arc<RecipeRecord>> = source
        .iter()
        .filter(|r| query.base_models.is_empty() || query.base_models.contains(&r.base_model))
        .filter(|r| query.tags.is_empty() || query.tags.iter().any(|t| r.tags.contains(t)))
        .filter(|r| match &search {
            Some(search) => matches_search(r, query, search),
            None => true,
        })
        .cloned()
        .collect();

    Paginated::from_slice(&filtered, query.page, query.page_size).map(|r| (*r).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::exif::WebpExifStore;
    use crate::recipe::types::{RecipeInput, RecipeLora};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([1, 2, 3])))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn scanner_for(root: &Path) -> RecipeScanner {
        let settings = LibrarySettings::new(vec![root.to_path_buf()]);
        let loras = Arc::new(LoraScanner::new(&settings, None));
        RecipeScanner::new(&settings, loras, Arc::new(WebpExifStore)).unwrap()
    }

    fn request(name: &str, metadata: serde_json::Value) -> SaveRecipeRequest {
        SaveRecipeRequest {
            name: name.to_string(),
            tags: vec!["portrait".to_string()],
            image: Some(RecipeImageSource::Bytes(png(960, 480))),
            metadata: Some(serde_json::from_value::<RecipeInput>(metadata).unwrap()),
        }
    }

    fn record(id: &str, title: &str, base_model: &str, created: f64) -> RecipeRecord {
        RecipeRecord {
            id: id.into(),
            file_path: format!("/l/recipes/{}.webp", id),
            title: title.into(),
            modified: created,
            created_date: created,
            base_model: base_model.into(),
            loras: vec![RecipeLora {
                file_name: format!("{}_lora", id),
                model_name: format!("{} model", title),
                ..Default::default()
            }],
            gen_params: Map::new(),
            tags: vec![format!("tag-{}", id)],
        }
    }

    #[tokio::test]
    async fn test_save_writes_files_and_embeds_recipe() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = scanner_for(temp_dir.path());
        scanner.get_cached_data(true).await.unwrap();

        let saved = scanner
            .save_recipe(request(
                "Ink Portrait",
                json!({
                    "base_model": "SDXL 1.0",
                    "loras": [{"file_name": "ink", "hash": "AB", "weight": 0.8, "id": 7}],
                    "gen_params": {"prompt": "a portrait"}
                }),
            ))
            .await
            .unwrap();

        assert!(saved.image_path.ends_with(&format!("recipes/{}.webp", saved.recipe_id)));
        let stored: RecipeRecord =
            serde_json::from_slice(&std::fs::read(&saved.json_path).unwrap()).unwrap();
        assert_eq!(stored.title, "Ink Portrait");
        assert_eq!(stored.loras[0].hash, "ab");
        assert_eq!(stored.loras[0].model_version_id, "7");
        let text = std::fs::read_to_string(&saved.json_path).unwrap();
        assert!(text.contains("\n    \"id\""));

        let img = image::open(&saved.image_path).unwrap();
        assert_eq!(img.width(), 480);

        let analysis = scanner
            .analyze_image_file(Path::new(&saved.image_path))
            .await
            .unwrap();
        assert_eq!(analysis.recipe.unwrap()["title"], json!("Ink Portrait"));

        let cache = scanner.current_cache().unwrap();
        assert!(cache.snapshot().get(&saved.recipe_id).is_some());
    }

    #[tokio::test]
    async fn test_save_requires_name_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = scanner_for(temp_dir.path());
        let mut req = request("", json!({}));
        req.metadata = None;
        match scanner.save_recipe(req).await {
            Err(LoraError::Validation { field, .. }) => assert_eq!(field, "name, metadata"),
            other => panic!("unexpected result: {other:?}"),
        }

        let mut req = request("x", json!({}));
        req.image = None;
        assert!(matches!(
            scanner.save_recipe(req).await,
            Err(LoraError::Validation { .. })
        ));
        assert!(!temp_dir.path().join("recipes").exists());
    }

    #[tokio::test]
    async fn test_bad_image_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = scanner_for(temp_dir.path());
        scanner.get_cached_data(true).await.unwrap();
        let mut req = request("x", json!({}));
        req.image = Some(RecipeImageSource::Bytes(b"nope".to_vec()));
        assert!(scanner.save_recipe(req).await.is_err());

        let recipes = temp_dir.path().join("recipes");
        assert_eq!(std::fs::read_dir(&recipes).unwrap().count(), 0);
        assert!(scanner.current_cache().unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_malformed_files() {
        let temp_dir = TempDir::new().unwrap();
        let recipes = temp_dir.path().join("recipes");
        std::fs::create_dir_all(&recipes).unwrap();
        std::fs::write(
            recipes.join("a.recipe.json"),
            serde_json::to_vec(&record("a", "Alpha", "SD 1.5", 1.0)).unwrap(),
        )
        .unwrap();
        std::fs::write(recipes.join("b.recipe.json"), b"{ not json").unwrap();
        std::fs::write(recipes.join("notes.json"), b"{}").unwrap();

        let scanner = scanner_for(temp_dir.path());
        assert!(scanner.get_cached_data(false).await.unwrap().snapshot().is_empty());
        let cache = scanner.get_cached_data(true).await.unwrap();
        assert_eq!(cache.snapshot().len(), 1);
        assert_eq!(scanner.get_recipe("a").await.unwrap().unwrap().title, "Alpha");
    }

    #[tokio::test]
    async fn test_delete_and_update() {
        let temp_dir = TempDir::new().unwrap();
        let scanner = scanner_for(temp_dir.path());
        scanner.get_cached_data(true).await.unwrap();
        let saved = scanner
            .save_recipe(request("Original", json!({"base_model": "SD 1.5"})))
            .await
            .unwrap();

        let patch = json!({"title": "Renamed"});
        let updated = scanner
            .update_recipe_metadata(&saved.recipe_id, patch.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        let on_disk: RecipeRecord =
            serde_json::from_slice(&std::fs::read(&saved.json_path).unwrap()).unwrap();
        assert_eq!(on_disk.title, "Renamed");

        let shared = scanner
            .share_recipe(&saved.recipe_id, temp_dir.path())
            .await
            .unwrap();
        assert!(shared.ends_with("recipe_renamed.webp"));

        scanner.delete_recipe(&saved.recipe_id).await.unwrap();
        assert!(!Path::new(&saved.json_path).exists());
        assert!(!Path::new(&saved.image_path).exists());
        assert!(scanner.get_recipe(&saved.recipe_id).await.unwrap().is_none());
        assert!(matches!(
            scanner.delete_recipe(&saved.recipe_id).await,
            Err(LoraError::RecipeNotFound { .. })
        ));
    }

    #[test]
    fn test_query_search_and_filters() {
        let snapshot = RecipeSnapshot::from_records(vec![
            record("a", "Alpha", "SD 1.5", 1.0),
            record("b", "Beta", "SDXL 1.0", 2.0),
            record("c", "Gamma", "SDXL 1.0", 3.0),
        ]);
        let ids = |page: Paginated<RecipeRecord>| -> Vec<String> {
            page.items.into_iter().map(|r| r.id).collect()
        };

        assert_eq!(ids(run_recipe_query(&snapshot, &RecipeQuery::default())), vec!["c", "b", "a"]);

        let query = RecipeQuery {
            base_models: vec!["SDXL 1.0".into()],
            sort_by: SortBy::Name,
            ..Default::default()
        };
        assert_eq!(ids(run_recipe_query(&snapshot, &query)), vec!["b", "c"]);

        let query = RecipeQuery {
            search: Some("B_LORA".into()),
            ..Default::default()
        };
        assert_eq!(ids(run_recipe_query(&snapshot, &query)), vec!["b"]);

        let mut query = RecipeQuery {
            search: Some("gamma model".into()),
            ..Default::default()
        };
        assert_eq!(ids(run_recipe_query(&snapshot, &query)), vec!["c"]);
        query.search_options.lora_model = false;
        assert!(ids(run_recipe_query(&snapshot, &query)).is_empty());

        let query = RecipeQuery {
            tags: vec!["tag-a".into()],
            ..Default::default()
        };
        assert_eq!(ids(run_recipe_query(&snapshot, &query)), vec!["a"]);
    }
}
