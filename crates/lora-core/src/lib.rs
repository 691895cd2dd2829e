//! LoRA Core - Headless index and cache for LoRA model libraries.
//!
//! Scans one or more root directories for `.safetensors` LoRA files, keeps a
//! queryable in-memory cache of their metadata in step with the file system,
//! and manages recipes (saved bundles of LoRAs and generation parameters).
//!
//! # Example
//!
//! ```rust,ignore
//! use lora_core::{LibrarySettings, LoraManager, LoraQuery};
//!
//! #[tokio::main]
//! async fn main() -> lora_core::Result<()> {
//!     let settings = LibrarySettings::new(vec!["/data/loras".into()]);
//!     let manager = LoraManager::new(settings).await?;
//!     manager.start()?;
//!     manager.initialize().await?;
//!
//!     let page = manager.list_loras(&LoraQuery::default().search("detail")).await?;
//!     println!("{} of {} LoRAs", page.items.len(), page.total);
//!
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lora;
pub mod metadata;
pub mod models;
pub mod network;
pub mod recipe;

mod api;
mod sync;

// Re-export commonly used types
pub use config::{LibrarySettings, RecipeImageFormat};
pub use error::{LoraError, Result};
pub use lora::{
    FileMonitor, LoraCache, LoraMetadata, LoraMetadataPatch, LoraQuery, LoraScanner, NameCount,
    SearchOptions, SortBy,
};
pub use models::{ApiResponse, Paginated, UnitResponse};
pub use network::{CivitaiClient, MetadataProvider};
pub use recipe::{
    ImageMetadataStore, RecipeCache, RecipeQuery, RecipeRecord, RecipeScanner, SaveRecipeRequest,
    WebpExifStore,
};

pub use api::LoraManagerBuilder;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Composition root owning the LoRA scanner, the recipe scanner and the file
/// monitor.
///
/// Nothing is scanned until [`LoraManager::start`] or the first forced
/// access; queries before that answer from an empty cache.
pub struct LoraManager {
    settings: LibrarySettings,
    lora_scanner: Arc<LoraScanner>,
    recipe_scanner: Arc<RecipeScanner>,
    enable_file_monitor: bool,
    monitor: Mutex<Option<FileMonitor>>,
    init_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LoraManager {
    /// Create a builder for LoraManager.
    pub fn builder() -> LoraManagerBuilder {
        LoraManagerBuilder::new()
    }

    /// Create a manager with default options for `settings`.
    pub async fn new(settings: LibrarySettings) -> Result<Self> {
        Self::builder().with_settings(settings).build().await
    }

    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    pub fn lora_scanner(&self) -> &Arc<LoraScanner> {
        &self.lora_scanner
    }

    pub fn recipe_scanner(&self) -> &Arc<RecipeScanner> {
        &self.recipe_scanner
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Kick off the initial scans in the background and start the file monitor.
    ///
    /// Calling it again while started is a no-op. Must be called inside a
    /// tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self
            .init_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            return Ok(());
        }

        let loras = self.lora_scanner.clone();
        tasks.push(tokio::spawn(async move {
            match loras.initialize().await {
                Ok(cache) => info!("LoRA cache ready with {} items", cache.snapshot().len()),
                Err(e) => error!("Initial LoRA scan failed: {}", e),
            }
        }));

        let recipes = self.recipe_scanner.clone();
        tasks.push(tokio::spawn(async move {
            match recipes.initialize().await {
                Ok(cache) => info!("Recipe cache ready with {} items", cache.snapshot().len()),
                Err(e) => error!("Initial recipe scan failed: {}", e),
            }
        }));

        if self.enable_file_monitor {
            let monitor = FileMonitor::start(self.lora_scanner.clone(), &self.settings)?;
            *self.monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor);
        }
        Ok(())
    }

    /// Wait until both caches exist, building them if nothing else is.
    pub async fn initialize(&self) -> Result<()> {
        self.lora_scanner.initialize().await?;
        self.recipe_scanner.initialize().await?;
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(FileMonitor::watched_paths)
            .unwrap_or_default()
    }

    /// Pick up symlinked directories added under the roots since start.
    pub fn rescan_links(&self) -> usize {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(FileMonitor::rescan_links)
            .unwrap_or(0)
    }

    /// Stop the monitor, let it flush pending changes, and abort unfinished scans.
    pub async fn shutdown(&self) {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(monitor) = monitor {
            monitor.stop();
            monitor.join().await;
        }

        let tasks: Vec<JoinHandle<()>> = self
            .init_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        info!("LoRA manager shut down");
    }
}
