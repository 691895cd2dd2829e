//! Scanner and index manager for LoRA files.
//!
//! Owns the lazily built [`LoraCache`], rebuilds it with a full scan of every
//! root, answers queries from it and keeps it consistent with single-file
//! operations and watcher batches.

use super::builder::{persist_sidecar, MetadataBuilder};
use super::cache::{CacheSnapshot, LoraCache};
use super::files::{
    base_name, civitai_info_path, compute_folder, existing_previews, find_preview, find_root,
    is_model_file, normalize_path, sidecar_path,
};
use super::query::{run_query, LoraQuery};
use super::types::{top_counts, LoraMetadata, LoraMetadataPatch, NameCount};
use super::watcher::{real_path, FileAction, FileChange, IgnoreList};
use crate::config::{LibrarySettings, ScanConfig};
use crate::error::{LoraError, Result};
use crate::metadata::{atomic_read_json, write_json_blocking, SIDECAR_INDENT};
use crate::models::Paginated;
use crate::network::MetadataProvider;
use crate::sync::SingleFlight;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Index manager for every `.safetensors` file under the configured roots.
pub struct LoraScanner {
    roots: Vec<PathBuf>,
    show_only_sfw: bool,
    builder: MetadataBuilder,
    cache: SingleFlight<Arc<LoraCache>>,
    ignore: IgnoreList,
}

impl LoraScanner {
    pub fn new(settings: &LibrarySettings, provider: Option<Arc<dyn MetadataProvider>>) -> Self {
        Self {
            roots: settings.lora_roots.clone(),
            show_only_sfw: settings.show_only_sfw,
            builder: MetadataBuilder::new(provider),
            cache: SingleFlight::new("LoRA cache"),
            ignore: IgnoreList::new(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Paths registered here are not reported back by the file monitor.
    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }

    // ========================================
    // Cache lifecycle
    // ========================================

    /// Get the cache, scanning first when forced or when it was never built.
    ///
    /// Without a cache and without `force_refresh` this returns an empty cache
    /// immediately. Concurrent callers share one in-flight scan.
    pub async fn get_cached_data(&self, force_refresh: bool) -> Result<Arc<LoraCache>> {
        let roots = self.roots.clone();
        let builder = self.builder.clone();
        let cache = self
            .cache
            .get(force_refresh, move || scan_all(roots, builder))
            .await?;
        Ok(cache.unwrap_or_default())
    }

    /// Build the cache unless it exists, joining a scan that is already running.
    pub async fn initialize(&self) -> Result<Arc<LoraCache>> {
        let roots = self.roots.clone();
        let builder = self.builder.clone();
        let cache = self
            .cache
            .get_or_init(move || scan_all(roots, builder))
            .await?;
        Ok(cache.unwrap_or_default())
    }

    /// Cache as it is right now, without waiting for or starting a scan.
    pub fn current_cache(&self) -> Option<Arc<LoraCache>> {
        self.cache.current()
    }

    pub fn is_initialized(&self) -> bool {
        self.cache.current().is_some()
    }

    /// Drop the cache. The next forced access rebuilds it.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    // ========================================
    // Queries
    // ========================================

    pub async fn get_paginated_data(&self, query: &LoraQuery) -> Result<Paginated<LoraMetadata>> {
        let cache = self.get_cached_data(false).await?;
        Ok(run_query(&cache.snapshot(), query, self.show_only_sfw))
    }

    pub async fn get_folders(&self) -> Result<Vec<String>> {
        Ok(self.get_cached_data(false).await?.snapshot().folders.clone())
    }

    pub async fn get_top_tags(&self, limit: usize) -> Result<Vec<NameCount>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        Ok(top_counts(&snapshot.tag_counts, limit))
    }

    pub async fn get_base_models(&self, limit: usize) -> Result<Vec<NameCount>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in snapshot.raw_data.iter().filter(|r| !r.base_model.is_empty()) {
            *counts.entry(record.base_model.clone()).or_insert(0) += 1;
        }
        Ok(top_counts(&counts, limit))
    }

    /// First record whose `file_name` equals `name`.
    pub async fn get_lora_info_by_name(&self, name: &str) -> Result<Option<LoraMetadata>> {
        let snapshot = self.get_cached_data(false).await?.snapshot();
        Ok(snapshot
            .raw_data
            .iter()
            .find(|r| r.file_name == name)
            .map(|r| (**r).clone()))
    }

    pub fn get_lora_by_path(&self, file_path: &str) -> Option<LoraMetadata> {
        let snapshot = self.current_cache()?.snapshot();
        snapshot.get(&normalize_path(file_path)).map(|r| (**r).clone())
    }

    // ========================================
    // Hash index lookups
    // ========================================

    fn snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        self.current_cache().map(|cache| cache.snapshot())
    }

    pub fn has_lora_hash(&self, sha256: &str) -> bool {
        self.snapshot()
            .map(|s| s.hash_index.has_hash(sha256))
            .unwrap_or(false)
    }

    pub fn get_lora_path_by_hash(&self, sha256: &str) -> Option<String> {
        self.snapshot()?.hash_index.get_path(sha256).map(str::to_string)
    }

    pub fn get_lora_hash_by_path(&self, file_path: &str) -> Option<String> {
        self.snapshot()?
            .hash_index
            .get_hash(&normalize_path(file_path))
            .map(str::to_string)
    }

    /// Preview next to the file indexed under `sha256`, probing the preview list.
    pub fn get_preview_url_by_hash(&self, sha256: &str) -> Option<String> {
        let path = self.get_lora_path_by_hash(sha256)?;
        let preview = find_preview(Path::new(&path));
        (!preview.is_empty()).then_some(preview)
    }

    // ========================================
    // Single-file operations
    // ========================================

    /// Build the record for one file inside a configured root, without caching it.
    pub async fn scan_single_lora(&self, file_path: &Path) -> Result<Option<LoraMetadata>> {
        if !file_path.exists() {
            return Ok(None);
        }
        let literal = normalize_path(file_path);
        let root = find_root(&self.roots, &literal)
            .ok_or_else(|| LoraError::OutsideRoots(file_path.to_path_buf()))?;
        self.builder.build(file_path, root).await.map(Some)
    }

    /// Move a model with its sidecar and preview into `target_dir`.
    ///
    /// Returns the new normalized path. The cache is only touched after the
    /// model file itself has been moved.
    pub async fn move_model(&self, source: &Path, target_dir: &Path) -> Result<String> {
        let source_literal = normalize_path(source);
        if !is_model_file(source) {
            return Err(LoraError::Validation {
                field: "source".into(),
                message: format!("{} is not a model file", source_literal),
            });
        }
        if !source.is_file() {
            return Err(LoraError::FileNotFound(source.to_path_buf()));
        }

        let base = base_name(source);
        let target = target_dir.join(format!("{}{}", base, ScanConfig::MODEL_EXTENSION));
        let target_literal = normalize_path(&target);
        if target_literal == source_literal {
            return Ok(target_literal);
        }
        let target_root = find_root(&self.roots, &target_literal)
            .ok_or_else(|| LoraError::OutsideRoots(target_dir.to_path_buf()))?
            .clone();
        if target.exists() {
            return Err(LoraError::Validation {
                field: "target".into(),
                message: format!("{} already exists", target_literal),
            });
        }

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| LoraError::io_with_path(e, target_dir))?;

        let real_source = real_path(source);
        let real_target = real_path(&target);
        let size = tokio::fs::metadata(&real_source)
            .await
            .map_err(|e| LoraError::io_with_path(e, &real_source))?
            .len();
        self.ignore.add(&real_source, size);
        self.ignore.add(&real_target, size);

        move_file(&real_source, &real_target).await?;
        info!("Moved {} to {}", source_literal, target_literal);

        let source_sidecar = sidecar_path(source);
        let target_sidecar = sidecar_path(&target);
        let mut sidecar_moved = false;
        if source_sidecar.is_file() {
            match move_file(&source_sidecar, &target_sidecar).await {
                Ok(()) => sidecar_moved = true,
                Err(e) => warn!("Failed to move sidecar {}: {}", source_sidecar.display(), e),
            }
        }

        if let Some(preview) = existing_previews(source).first() {
            if let Some(name) = preview.file_name() {
                let destination = target_dir.join(name);
                if let Err(e) = move_file(preview, &destination).await {
                    warn!("Failed to move preview {}: {}", preview.display(), e);
                }
            }
        }

        let existing = self.get_lora_by_path(&source_literal);
        let sidecar: Option<LoraMetadata> = if sidecar_moved {
            match atomic_read_json(&target_sidecar) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Unreadable sidecar after move {}: {}", target_sidecar.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let mut record = match sidecar.or(existing) {
            Some(record) => record,
            None => self.builder.build(&target, &target_root).await?,
        };
        record.file_path = target_literal.clone();
        record.preview_url = find_preview(&target);
        record.folder = compute_folder(&target_root, &target_literal);

        persist_sidecar(&target, &record).await;

        if let Some(cache) = self.current_cache() {
            cache.replace(&source_literal, record).await;
        }
        Ok(target_literal)
    }

    /// Delete a model with its sidecars and previews, then drop it from the cache.
    ///
    /// Returns the files that were removed.
    pub async fn delete_model(&self, file_path: &Path) -> Result<Vec<String>> {
        if !file_path.is_file() {
            return Err(LoraError::FileNotFound(file_path.to_path_buf()));
        }
        let literal = normalize_path(file_path);
        let size = tokio::fs::metadata(file_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        self.ignore.add(file_path, size);

        tokio::fs::remove_file(file_path)
            .await
            .map_err(|e| LoraError::io_with_path(e, file_path))?;
        let mut deleted = vec![literal.clone()];

        let mut extras = vec![sidecar_path(file_path), civitai_info_path(file_path)];
        extras.extend(existing_previews(file_path));
        for extra in extras {
            if !extra.is_file() {
                continue;
            }
            match tokio::fs::remove_file(&extra).await {
                Ok(()) => deleted.push(normalize_path(&extra)),
                Err(e) => warn!("Failed to delete {}: {}", extra.display(), e),
            }
        }

        if let Some(cache) = self.current_cache() {
            cache.remove(&literal).await;
        }
        info!("Deleted {} ({} files)", literal, deleted.len());
        Ok(deleted)
    }

    /// Merge user edits into the sidecar and the cached record.
    pub async fn update_lora_metadata(
        &self,
        file_path: &Path,
        patch: &LoraMetadataPatch,
    ) -> Result<LoraMetadata> {
        let literal = normalize_path(file_path);
        let base = match self.get_lora_by_path(&literal) {
            Some(record) => Some(record),
            None => atomic_read_json::<LoraMetadata>(&sidecar_path(file_path))?,
        };
        let mut record = base.ok_or_else(|| LoraError::ModelNotFound {
            path: literal.clone(),
        })?;

        if !record.apply_patch(patch) {
            return Ok(record);
        }
        write_json_blocking(&sidecar_path(file_path), &record, SIDECAR_INDENT).await?;

        if let Some(cache) = self.current_cache() {
            let updated = record.clone();
            cache
                .try_mutate(|s| {
                    if s.get(&literal).is_none() {
                        return false;
                    }
                    s.upsert(updated);
                    true
                })
                .await;
        }
        Ok(record)
    }

    /// Point the cached record at a new preview. False when there is nothing to update.
    pub async fn update_preview_in_cache(&self, file_path: &str, preview_url: &str) -> bool {
        match self.current_cache() {
            Some(cache) => {
                cache
                    .update_preview_url(&normalize_path(file_path), &normalize_path(preview_url))
                    .await
            }
            None => false,
        }
    }

    /// Apply a debounced watcher batch with a single resort.
    ///
    /// Returns how many records were added or removed. Without a cache the
    /// batch is dropped since the pending full scan will see the files.
    pub async fn apply_file_changes(&self, changes: Vec<FileChange>) -> Result<usize> {
        let Some(cache) = self.current_cache() else {
            debug!("Dropping {} file changes before the first scan", changes.len());
            return Ok(0);
        };

        let mut removals: Vec<String> = Vec::new();
        let mut additions: Vec<LoraMetadata> = Vec::new();
        for change in changes {
            match change.action {
                FileAction::Remove => {
                    info!("Removing {} from cache", change.path);
                    removals.push(change.path);
                }
                FileAction::Add => match self.scan_single_lora(Path::new(&change.path)).await {
                    Ok(Some(record)) => additions.push(record),
                    Ok(None) => debug!("{} vanished before it could be scanned", change.path),
                    Err(e) => error!("Error processing add for {}: {}", change.path, e),
                },
            }
        }

        if removals.is_empty() && additions.is_empty() {
            return Ok(0);
        }

        let applied = cache
            .mutate(|s| {
                let mut applied = 0;
                for path in &removals {
                    if s.remove(path).is_some() {
                        applied += 1;
                    }
                }
                for record in additions {
                    s.upsert(record);
                    applied += 1;
                }
                applied
            })
            .await;
        Ok(applied)
    }
}

// ========================================
// Full scan
// ========================================

async fn scan_all(roots: Vec<PathBuf>, builder: MetadataBuilder) -> Result<Arc<LoraCache>> {
    let start = Instant::now();
    let results = join_all(roots.iter().map(|root| scan_root(root, &builder))).await;

    let mut records = Vec::new();
    for (root, result) in roots.iter().zip(results) {
        match result {
            Ok(found) => records.extend(found),
            Err(e) => error!("Error scanning directory {}: {}", root.display(), e),
        }
    }

    let snapshot = CacheSnapshot::from_records(records);
    info!(
        "LoRA cache initialization completed in {:.2} seconds, found {} loras",
        start.elapsed().as_secs_f64(),
        snapshot.len()
    );
    Ok(Arc::new(LoraCache::new(snapshot)))
}

async fn scan_root(root: &Path, builder: &MetadataBuilder) -> Result<Vec<LoraMetadata>> {
    let walk_root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || find_model_files(&walk_root))
        .await
        .map_err(|e| LoraError::Other(format!("Directory walk task failed: {}", e)))?;

    let mut records = Vec::with_capacity(files.len());
    for file in files {
        match builder.build(&file, root).await {
            Ok(record) => records.push(record),
            Err(e) => error!("Error processing {}: {}", file.display(), e),
        }
        tokio::task::yield_now().await;
    }
    Ok(records)
}

/// Every model file under `root`, following symlinks.
///
/// Each real directory is entered once, so link cycles and aliases end only
/// the branch that revisits a directory. Returned paths keep the literal
/// (unresolved) form.
pub fn find_model_files(root: &Path) -> Vec<PathBuf> {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            match entry.path().canonicalize() {
                Ok(real) => {
                    let first_visit = visited.insert(real);
                    if !first_visit {
                        debug!("Skipping already visited path: {}", entry.path().display());
                    }
                    first_visit
                }
                Err(e) => {
                    warn!("Cannot resolve {}: {}", entry.path().display(), e);
                    false
                }
            }
        });

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_model_file(entry.path()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => error!("Error scanning {}: {}", root.display(), e),
        }
    }
    files
}

/// Rename, falling back to copy + remove across file systems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    let target_existed = to.exists();
    if let Err(e) = tokio::fs::copy(from, to).await {
        if !target_existed {
            discard_partial_copy(to).await;
        }
        return Err(LoraError::io_with_path(e, from));
    }
    if let Err(e) = tokio::fs::remove_file(from).await {
        discard_partial_copy(to).await;
        return Err(LoraError::io_with_path(e, from));
    }
    Ok(())
}

async fn discard_partial_copy(to: &Path) {
    match tokio::fs::remove_file(to).await {
        Ok(()) => debug!("Removed partial copy {}", to.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial copy {}: {}", to.display(), e),
    }
}
