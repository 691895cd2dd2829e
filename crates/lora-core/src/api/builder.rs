//! Builder for configuring LoraManager initialization.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::LibrarySettings;
use crate::error::{LoraError, Result};
use crate::lora::LoraScanner;
use crate::network::{CivitaiClient, MetadataProvider};
use crate::recipe::{ImageMetadataStore, RecipeScanner, WebpExifStore};
use crate::LoraManager;

/// Builder for configuring LoraManager initialization.
///
/// # Example
///
/// ```rust,ignore
/// use lora_core::{LibrarySettings, LoraManager};
///
/// let manager = LoraManager::builder()
///     .with_settings(LibrarySettings::new(vec!["/data/loras".into()]))
///     .auto_create_dirs(true)
///     .with_file_monitor(false)
///     .build()
///     .await?;
/// manager.start()?;
/// ```
pub struct LoraManagerBuilder {
    settings: LibrarySettings,
    auto_create_dirs: bool,
    enable_file_monitor: bool,
    enable_remote_metadata: bool,
    metadata_provider: Option<Arc<dyn MetadataProvider>>,
    image_metadata_store: Option<Arc<dyn ImageMetadataStore>>,
}

impl Default for LoraManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoraManagerBuilder {
    pub fn new() -> Self {
        Self {
            settings: LibrarySettings::default(),
            auto_create_dirs: false,
            enable_file_monitor: true,
            enable_remote_metadata: true,
            metadata_provider: None,
            image_metadata_store: None,
        }
    }

    pub fn with_settings(mut self, settings: LibrarySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Create missing LoRA roots and the recipes directory.
    ///
    /// Default: `false` (every root must exist)
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Watch the roots and patch the cache on file changes once started.
    ///
    /// Default: `true`
    pub fn with_file_monitor(mut self, enable: bool) -> Self {
        self.enable_file_monitor = enable;
        self
    }

    /// Use `provider` to enrich records instead of the Civitai client.
    pub fn with_metadata_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.metadata_provider = Some(provider);
        self
    }

    /// Enable or disable remote enrichment entirely.
    ///
    /// Default: `true`
    pub fn with_remote_metadata(mut self, enable: bool) -> Self {
        self.enable_remote_metadata = enable;
        self
    }

    /// Use `store` to read and write comments embedded in recipe images.
    pub fn with_image_metadata_store(mut self, store: Arc<dyn ImageMetadataStore>) -> Self {
        self.image_metadata_store = Some(store);
        self
    }

    fn create_directory_structure(settings: &LibrarySettings) -> Result<()> {
        let recipes_dir = settings.recipes_dir();
        let dirs = settings
            .lora_roots
            .iter()
            .map(PathBuf::as_path)
            .chain(recipes_dir.as_deref());

        for dir in dirs {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| LoraError::Io {
                    message: format!("Failed to create directory: {}", dir.display()),
                    path: Some(dir.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }
        Ok(())
    }

    fn resolve_provider(&mut self) -> Option<Arc<dyn MetadataProvider>> {
        if !self.enable_remote_metadata {
            return None;
        }
        if let Some(provider) = self.metadata_provider.take() {
            return Some(provider);
        }
        match CivitaiClient::new(self.settings.civitai_api_key.clone()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!("Failed to initialize Civitai client: {}", e);
                None
            }
        }
    }

    /// Build the LoraManager instance.
    pub async fn build(mut self) -> Result<LoraManager> {
        self.settings.validate()?;

        if self.auto_create_dirs {
            Self::create_directory_structure(&self.settings)?;
        } else if let Some(missing) = self.settings.lora_roots.iter().find(|r| !r.is_dir()) {
            return Err(LoraError::Config {
                message: format!("LoRA root does not exist: {}", missing.display()),
            });
        }

        let provider = self.resolve_provider();
        let lora_scanner = Arc::new(LoraScanner::new(&self.settings, provider));

        let store = self
            .image_metadata_store
            .take()
            .unwrap_or_else(|| Arc::new(WebpExifStore));
        let recipe_scanner = Arc::new(RecipeScanner::new(
            &self.settings,
            lora_scanner.clone(),
            store,
        )?);

        tracing::info!(
            "LoRA manager ready for {} root(s)",
            self.settings.lora_roots.len()
        );

        Ok(LoraManager {
            settings: self.settings,
            lora_scanner,
            recipe_scanner,
            enable_file_monitor: self.enable_file_monitor,
            monitor: Mutex::new(None),
            init_tasks: Mutex::new(Vec::new()),
        })
    }
}
