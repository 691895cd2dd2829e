//! Recipe records and the request/response shapes around them.

use crate::lora::SortBy;
use chrono::{Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One LoRA referenced by a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeLora {
    pub file_name: String,
    /// Lower-case SHA-256, empty when unknown.
    pub hash: String,
    pub strength: f64,
    #[serde(rename = "modelVersionId", deserialize_with = "string_or_number")]
    pub model_version_id: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "modelVersionName")]
    pub model_version_name: String,
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
}

impl Default for RecipeLora {
    fn default() -> Self {
        Self {
            file_name: String::new(),
            hash: String::new(),
            strength: 1.0,
            model_version_id: String::new(),
            model_name: String::new(),
            model_version_name: String::new(),
            is_deleted: false,
        }
    }
}

/// A saved recipe as stored in `{id}.recipe.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: String,
    /// Saved preview image.
    pub file_path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub modified: f64,
    #[serde(default)]
    pub created_date: f64,
    #[serde(default)]
    pub base_model: String,
    #[serde(default)]
    pub loras: Vec<RecipeLora>,
    #[serde(default)]
    pub gen_params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl RecipeRecord {
    /// The portion of the record embedded in the preview image.
    pub fn embedded_summary(&self) -> Value {
        serde_json::json!({
            "title": self.title,
            "base_model": self.base_model,
            "loras": self.loras,
            "gen_params": self.gen_params,
            "tags": self.tags,
        })
    }
}

/// Accept ids written either as JSON strings or as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// ========================================
// Save request
// ========================================

/// Where the image of a new recipe comes from.
#[derive(Debug, Clone)]
pub enum RecipeImageSource {
    Bytes(Vec<u8>),
    Url(String),
}

/// A LoRA entry as submitted by a front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeLoraInput {
    pub file_name: String,
    #[serde(rename = "localPath")]
    pub local_path: String,
    pub hash: Option<String>,
    pub weight: Option<f64>,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "isDeleted")]
    pub is_deleted: bool,
    /// Deleted entries flagged for exclusion are dropped on save.
    pub exclude: bool,
}

impl RecipeLoraInput {
    /// Convert to the stored shape; `None` for excluded deleted entries.
    pub fn into_recipe_lora(self) -> Option<RecipeLora> {
        if self.is_deleted && self.exclude {
            return None;
        }
        let file_name = if self.file_name.is_empty() {
            std::path::Path::new(&self.local_path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            self.file_name
        };
        Some(RecipeLora {
            file_name,
            hash: self.hash.unwrap_or_default().to_lowercase(),
            strength: self.weight.unwrap_or(1.0),
            model_version_id: self.id,
            model_name: self.name,
            model_version_name: self.version,
            is_deleted: self.is_deleted,
        })
    }
}

/// Analysed image metadata submitted with a new recipe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeInput {
    pub base_model: String,
    pub loras: Vec<RecipeLoraInput>,
    pub gen_params: Map<String, Value>,
    pub raw_metadata: Option<Map<String, Value>>,
}

impl RecipeInput {
    /// Generation parameters, falling back to the known keys of `raw_metadata`.
    pub fn resolved_gen_params(&self) -> Map<String, Value> {
        if !self.gen_params.is_empty() {
            return self.gen_params.clone();
        }
        let Some(raw) = &self.raw_metadata else {
            return Map::new();
        };
        const KEYS: [&str; 9] = [
            "prompt",
            "negative_prompt",
            "checkpoint",
            "steps",
            "sampler",
            "cfg_scale",
            "seed",
            "size",
            "clip_skip",
        ];
        KEYS.iter()
            .map(|key| {
                let fallback = if *key == "checkpoint" {
                    Value::Object(Map::new())
                } else {
                    Value::String(String::new())
                };
                (key.to_string(), raw.get(*key).cloned().unwrap_or(fallback))
            })
            .collect()
    }
}

/// Everything needed to save a recipe.
#[derive(Debug, Clone)]
pub struct SaveRecipeRequest {
    pub name: String,
    pub tags: Vec<String>,
    pub image: Option<RecipeImageSource>,
    pub metadata: Option<RecipeInput>,
}

/// Where a saved recipe ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedRecipe {
    pub recipe_id: String,
    pub image_path: String,
    pub json_path: String,
}

// ========================================
// Detail view
// ========================================

/// A recipe LoRA annotated with what the local library knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeLoraDetail {
    #[serde(flatten)]
    pub lora: RecipeLora,
    #[serde(rename = "inLibrary")]
    pub in_library: bool,
    #[serde(rename = "localPath")]
    pub local_path: Option<String>,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDetail {
    pub id: String,
    pub file_path: String,
    pub title: String,
    pub modified: f64,
    pub created_date: f64,
    pub base_model: String,
    pub loras: Vec<RecipeLoraDetail>,
    pub gen_params: Map<String, Value>,
    pub tags: Vec<String>,
    pub created_date_formatted: String,
    pub modified_formatted: String,
}

/// Local time as `YYYY-MM-DD HH:MM:SS`; empty for unrepresentable values.
pub fn format_timestamp(secs: f64) -> String {
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9) as u32;
    Local
        .timestamp_opt(whole, nanos)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Result of reading a recipe back out of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    /// Raw UserComment text, when the image carries one.
    pub comment: Option<String>,
    /// Embedded recipe block written by a previous save.
    pub recipe: Option<Value>,
    pub error: Option<String>,
}

// ========================================
// Query
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeSearchOptions {
    pub title: bool,
    pub tags: bool,
    pub lora_name: bool,
    pub lora_model: bool,
}

impl Default for RecipeSearchOptions {
    fn default() -> Self {
        Self {
            title: true,
            tags: true,
            lora_name: true,
            lora_model: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeQuery {
    pub page: usize,
    pub page_size: usize,
    pub sort_by: SortBy,
    pub search: Option<String>,
    pub base_models: Vec<String>,
    pub tags: Vec<String>,
    pub search_options: RecipeSearchOptions,
}

impl Default for RecipeQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            sort_by: SortBy::Date,
            search: None,
            base_models: Vec::new(),
            tags: Vec::new(),
            search_options: RecipeSearchOptions::default(),
        }
    }
}
