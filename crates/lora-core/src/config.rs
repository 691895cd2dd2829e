//! Centralized configuration for the LoRA library.
//!
//! Fixed parameters live as associated constants on unit structs. Values a
//! user may change at runtime are collected in [`LibrarySettings`], which can
//! be loaded from a `settings.json` file.

use crate::error::{LoraError, Result};
use crate::metadata::atomic_read_json;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory scanning and metadata discovery.
pub struct ScanConfig;

impl ScanConfig {
    pub const MODEL_EXTENSION: &'static str = ".safetensors";
    pub const METADATA_SUFFIX: &'static str = ".metadata.json";
    pub const CIVITAI_INFO_SUFFIX: &'static str = ".civitai.info";
    /// Probe order for preview files next to a model.
    pub const PREVIEW_EXTENSIONS: &'static [&'static str] = &[
        ".preview.png",
        ".preview.jpeg",
        ".preview.jpg",
        ".preview.mp4",
        ".png",
        ".jpeg",
        ".jpg",
        ".mp4",
    ];
    pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;
    pub const UNKNOWN_BASE_MODEL: &'static str = "Unknown";
    /// Preview rating at and above which items are hidden in safe mode.
    pub const NSFW_LEVEL_R: u32 = 4;
}

/// File-change watcher parameters.
pub struct WatcherConfig;

impl WatcherConfig {
    pub const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);
    pub const MIN_IGNORE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const ASSUMED_BYTES_PER_SEC: u64 = 1024 * 1024;
    pub const IGNORE_TIMEOUT_FACTOR: f64 = 1.5;
    pub const CHANNEL_CAPACITY: usize = 1024;
}

/// Recipe storage and preview optimisation.
pub struct RecipeConfig;

impl RecipeConfig {
    pub const DIR_NAME: &'static str = "recipes";
    pub const JSON_SUFFIX: &'static str = ".recipe.json";
    pub const TARGET_WIDTH: u32 = 480;
    pub const QUALITY: u8 = 85;
    pub const METADATA_MARKER: &'static str = "Recipe metadata: ";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CIVITAI_API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const USER_AGENT: &'static str = "LoRA-Manager/1.0";
}

/// Output format for optimised recipe previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeImageFormat {
    #[default]
    Webp,
    Jpeg,
    Png,
}

impl RecipeImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RecipeImageFormat::Webp => ".webp",
            RecipeImageFormat::Jpeg => ".jpg",
            RecipeImageFormat::Png => ".png",
        }
    }
}

/// User-adjustable settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// Directories scanned for LoRA files. The first one also hosts `recipes/`.
    pub lora_roots: Vec<PathBuf>,
    /// Hide items whose preview is rated R or above.
    pub show_only_sfw: bool,
    pub civitai_api_key: Option<String>,
    pub debounce_ms: u64,
    pub recipe_image_format: RecipeImageFormat,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            lora_roots: Vec::new(),
            show_only_sfw: false,
            civitai_api_key: None,
            debounce_ms: WatcherConfig::DEBOUNCE_DELAY.as_millis() as u64,
            recipe_image_format: RecipeImageFormat::default(),
        }
    }
}

impl LibrarySettings {
    pub fn new(lora_roots: Vec<PathBuf>) -> Self {
        Self {
            lora_roots,
            ..Self::default()
        }
    }

    /// Load settings from a JSON file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(atomic_read_json(path)?.unwrap_or_default())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Directory holding saved recipes.
    pub fn recipes_dir(&self) -> Option<PathBuf> {
        self.lora_roots
            .first()
            .map(|root| root.join(RecipeConfig::DIR_NAME))
    }

    /// Reject settings the scanner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.lora_roots.is_empty() {
            return Err(LoraError::Config {
                message: "at least one LoRA root directory is required".to_string(),
            });
        }
        Ok(())
    }
}
