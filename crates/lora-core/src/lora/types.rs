//! LoRA record and the patch types applied to it.

use crate::config::ScanConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One indexed `.safetensors` file.
///
/// This is also the on-disk shape of `name.metadata.json`. Everything except
/// the identity fields has a default so partial or older sidecars still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraMetadata {
    pub file_name: String,
    #[serde(default)]
    pub model_name: String,
    /// Absolute, forward-slash path. Unique key of the cache.
    pub file_path: String,
    #[serde(default)]
    pub size: u64,
    /// Modification time in seconds since the epoch.
    #[serde(default)]
    pub modified: f64,
    pub sha256: String,
    #[serde(default = "default_base_model")]
    pub base_model: String,
    #[serde(default)]
    pub from_civitai: bool,
    #[serde(default)]
    pub preview_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_nsfw_level: Option<u32>,
    /// Root-relative directory, `""` for files directly under a root.
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "modelDescription")]
    pub model_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub civitai: Option<Value>,
    #[serde(default)]
    pub civitai_deleted: bool,
}

fn default_base_model() -> String {
    ScanConfig::UNKNOWN_BASE_MODEL.to_string()
}

impl LoraMetadata {
    /// Civitai model id recorded in the version info, if any.
    pub fn civitai_model_id(&self) -> Option<u64> {
        let id = self.civitai.as_ref()?.get("modelId")?;
        id.as_u64()
            .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
    }

    /// Whether remote enrichment could still add something.
    pub fn needs_enrichment(&self) -> bool {
        !self.civitai_deleted
            && self.civitai_model_id().is_some()
            && (self.tags.is_empty() || self.model_description.is_empty())
    }

    /// Whether the preview is rated below the R threshold (or unrated).
    pub fn is_sfw(&self) -> bool {
        match self.preview_nsfw_level {
            None | Some(0) => true,
            Some(level) => level < ScanConfig::NSFW_LEVEL_R,
        }
    }

    /// Apply a user edit. Returns true when anything changed.
    pub fn apply_patch(&mut self, patch: &LoraMetadataPatch) -> bool {
        let before = self.clone();
        if let Some(name) = &patch.model_name {
            self.model_name = name.clone();
        }
        if let Some(base) = &patch.base_model {
            self.base_model = base.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(description) = &patch.model_description {
            self.model_description = description.clone();
        }
        if let Some(preview) = &patch.preview_url {
            self.preview_url = preview.clone();
        }
        if let Some(level) = patch.preview_nsfw_level {
            self.preview_nsfw_level = Some(level);
        }
        *self != before
    }
}

/// Fields a caller may edit on a record. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraMetadataPatch {
    pub model_name: Option<String>,
    pub base_model: Option<String>,
    pub tags: Option<Vec<String>>,
    #[serde(rename = "modelDescription")]
    pub model_description: Option<String>,
    pub preview_url: Option<String>,
    pub preview_nsfw_level: Option<u32>,
}

/// A `{name, count}` row of a frequency listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCount {
    pub name: String,
    pub count: usize,
}

/// Sort most frequent first, ties alphabetically, and keep `limit` rows.
pub(crate) fn top_counts<'a>(
    counts: impl IntoIterator<Item = (&'a String, &'a usize)>,
    limit: usize,
) -> Vec<NameCount> {
    let mut rows: Vec<NameCount> = counts
        .into_iter()
        .map(|(name, count)| NameCount {
            name: name.clone(),
            count: *count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    rows.truncate(limit);
    rows
}
