//! Builds a [`LoraMetadata`] for one model file.
//!
//! Sources are tried in order: an existing `name.metadata.json`, a
//! `name.civitai.info` downloaded by other tools, and finally the file
//! itself (size, mtime, hash). The result is then optionally enriched with
//! remote tags/description and given its root-relative folder.

use super::files::{
    base_name, civitai_info_path, compute_folder, find_preview, modified_secs, normalize_path,
    sidecar_path,
};
use super::hashing::compute_sha256_async;
use super::types::LoraMetadata;
use crate::config::ScanConfig;
use crate::error::{LoraError, Result};
use crate::metadata::{atomic_read_json, atomic_write_json, SIDECAR_INDENT};
use crate::network::MetadataProvider;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Produces metadata records from disk (and optionally the network).
#[derive(Clone)]
pub struct MetadataBuilder {
    provider: Option<Arc<dyn MetadataProvider>>,
}

impl MetadataBuilder {
    pub fn new(provider: Option<Arc<dyn MetadataProvider>>) -> Self {
        Self { provider }
    }

    /// Build the record for `file_path`, which was found under `root`.
    pub async fn build(&self, file_path: &Path, root: &Path) -> Result<LoraMetadata> {
        let path = file_path.to_path_buf();
        let local = tokio::task::spawn_blocking(move || load_local_metadata(&path))
            .await
            .map_err(|e| LoraError::Other(format!("Metadata load task failed: {}", e)))??;

        let mut metadata = match local {
            Some(metadata) => metadata,
            None => file_info(file_path).await?,
        };

        self.enrich(file_path, &mut metadata).await;
        metadata.folder = compute_folder(root, &metadata.file_path);
        Ok(metadata)
    }

    /// Fill missing tags/description from the provider. Never fails the build.
    async fn enrich(&self, file_path: &Path, metadata: &mut LoraMetadata) {
        let Some(provider) = &self.provider else {
            return;
        };
        if !metadata.needs_enrichment() {
            return;
        }
        let Some(model_id) = metadata.civitai_model_id() else {
            return;
        };

        debug!(
            "Fetching missing metadata for {} with model ID {}",
            file_path.display(),
            model_id
        );
        match provider.fetch_model_metadata(model_id).await {
            Ok((_, 404)) => {
                warn!(
                    "Model {} appears to be deleted from Civitai (404 response)",
                    model_id
                );
                metadata.civitai_deleted = true;
                persist_sidecar(file_path, metadata).await;
            }
            Ok((Some(remote), _)) => {
                let mut changed = false;
                if metadata.tags.is_empty() && !remote.tags.is_empty() {
                    metadata.tags = remote.tags;
                    changed = true;
                }
                if metadata.model_description.is_empty() {
                    if let Some(description) = remote.description.filter(|d| !d.is_empty()) {
                        metadata.model_description = description;
                        changed = true;
                    }
                }
                if changed {
                    persist_sidecar(file_path, metadata).await;
                }
            }
            Ok((None, status)) => {
                debug!("No metadata for model {} (status {})", model_id, status);
            }
            Err(e) => {
                error!(
                    "Failed to update metadata from Civitai for {}: {}",
                    file_path.display(),
                    e
                );
            }
        }
    }
}

/// Write the sidecar, logging instead of failing.
pub(crate) async fn persist_sidecar(file_path: &Path, metadata: &LoraMetadata) {
    let sidecar = sidecar_path(file_path);
    let record = metadata.clone();
    let result = tokio::task::spawn_blocking(move || {
        atomic_write_json(&sidecar, &record, SIDECAR_INDENT)
    })
    .await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Error saving metadata for {}: {}", file_path.display(), e),
        Err(e) => error!("Sidecar write task failed for {}: {}", file_path.display(), e),
    }
}

/// Sidecar or `.civitai.info` record, persisting it when it had to be created or fixed.
fn load_local_metadata(file_path: &Path) -> Result<Option<LoraMetadata>> {
    if let Some(metadata) = load_sidecar(file_path) {
        return Ok(Some(metadata));
    }

    let info_path = civitai_info_path(file_path);
    if !info_path.is_file() {
        return Ok(None);
    }

    let version_info: Value = match atomic_read_json(&info_path) {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(None),
        Err(e) => {
            error!(
                "Error creating metadata from .civitai.info for {}: {}",
                file_path.display(),
                e
            );
            return Ok(None);
        }
    };

    let fs_meta = std::fs::metadata(file_path).map_err(|e| LoraError::io_with_path(e, file_path))?;
    let Some(metadata) = from_civitai_info(&version_info, file_path, modified_secs(&fs_meta))
    else {
        return Ok(None);
    };

    if let Err(e) = atomic_write_json(&sidecar_path(file_path), &metadata, SIDECAR_INDENT) {
        error!("Error saving metadata for {}: {}", file_path.display(), e);
    }
    debug!("Created metadata from .civitai.info for {}", file_path.display());
    Ok(Some(metadata))
}

/// Read `name.metadata.json`. Missing or malformed sidecars yield `None`.
fn load_sidecar(file_path: &Path) -> Option<LoraMetadata> {
    let sidecar = sidecar_path(file_path);
    let mut metadata: LoraMetadata = match atomic_read_json(&sidecar) {
        Ok(Some(metadata)) => metadata,
        Ok(None) => return None,
        Err(e) => {
            warn!("Ignoring malformed sidecar {}: {}", sidecar.display(), e);
            return None;
        }
    };

    let mut needs_update = false;

    let actual_path = normalize_path(file_path);
    if metadata.file_path != actual_path {
        metadata.file_path = actual_path;
        needs_update = true;
    }

    let preview_url = metadata.preview_url.clone();
    if preview_url.is_empty() || !Path::new(&preview_url).exists() {
        let resolved = find_preview(file_path);
        if resolved != preview_url {
            metadata.preview_url = resolved;
            needs_update = true;
        }
    } else if preview_url != normalize_path(&preview_url) {
        metadata.preview_url = normalize_path(&preview_url);
        needs_update = true;
    }

    metadata.sha256 = metadata.sha256.to_lowercase();

    if needs_update {
        if let Err(e) = atomic_write_json(&sidecar, &metadata, SIDECAR_INDENT) {
            error!("Error saving metadata to {}: {}", sidecar.display(), e);
        }
    }
    Some(metadata)
}

/// Synthesize a record from a Civitai model-version document.
///
/// Uses the entry of `files` flagged `primary`; returns `None` without one.
pub fn from_civitai_info(version_info: &Value, file_path: &Path, modified: f64) -> Option<LoraMetadata> {
    let primary = version_info
        .get("files")?
        .as_array()?
        .iter()
        .find(|f| f.get("primary").and_then(Value::as_bool).unwrap_or(false))?;

    let sha256 = primary
        .get("hashes")
        .and_then(|h| h.get("SHA256"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let size = primary
        .get("sizeKB")
        .and_then(Value::as_f64)
        .map(|kb| (kb * 1024.0) as u64)
        .unwrap_or(0);
    let model_name = version_info
        .get("model")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| base_name(file_path));
    let base_model = version_info
        .get("baseModel")
        .and_then(Value::as_str)
        .unwrap_or(ScanConfig::UNKNOWN_BASE_MODEL)
        .to_string();

    Some(LoraMetadata {
        file_name: base_name(file_path),
        model_name,
        file_path: normalize_path(file_path),
        size,
        modified,
        sha256,
        base_model,
        from_civitai: true,
        preview_url: find_preview(file_path),
        preview_nsfw_level: None,
        folder: String::new(),
        tags: Vec::new(),
        model_description: String::new(),
        civitai: Some(version_info.clone()),
        civitai_deleted: false,
    })
}

/// Record computed purely from the file system.
pub async fn file_info(file_path: &Path) -> Result<LoraMetadata> {
    let fs_meta = tokio::fs::metadata(file_path)
        .await
        .map_err(|e| LoraError::io_with_path(e, file_path))?;
    let sha256 = compute_sha256_async(file_path).await?;
    let name = base_name(file_path);

    Ok(LoraMetadata {
        file_name: name.clone(),
        model_name: name,
        file_path: normalize_path(file_path),
        size: fs_meta.len(),
        modified: modified_secs(&fs_meta),
        sha256,
        base_model: ScanConfig::UNKNOWN_BASE_MODEL.to_string(),
        from_civitai: true,
        preview_url: find_preview(file_path),
        preview_nsfw_level: None,
        folder: String::new(),
        tags: Vec::new(),
        model_description: String::new(),
        civitai: None,
        civitai_deleted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RemoteModelMetadata;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedProvider {
        status: u16,
        metadata: Option<RemoteModelMetadata>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataProvider for FixedProvider {
        async fn fetch_model_metadata(
            &self,
            _model_id: u64,
        ) -> Result<(Option<RemoteModelMetadata>, u16)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.metadata.clone(), self.status))
        }
    }

    #[tokio::test]
    async fn test_build_from_file_system() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("a.safetensors");
        std::fs::write(&model, b"Hello, World!").unwrap();

        let builder = MetadataBuilder::new(None);
        let metadata = builder.build(&model, temp_dir.path()).await.unwrap();

        assert_eq!(metadata.file_name, "a");
        assert_eq!(metadata.model_name, "a");
        assert_eq!(metadata.folder, "");
        assert_eq!(metadata.size, 13);
        assert_eq!(metadata.base_model, "Unknown");
        assert!(metadata.from_civitai);
        assert_eq!(metadata.preview_url, "");
        assert_eq!(
            metadata.sha256,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_sidecar_preferred_and_preview_reresolved() {
        let temp_dir = TempDir::new().unwrap();
        let sub = temp_dir.path().join("style");
        std::fs::create_dir_all(&sub).unwrap();
        let model = sub.join("b.safetensors");
        std::fs::write(&model, b"bytes").unwrap();
        std::fs::write(sub.join("b.preview.png"), b"png").unwrap();
        std::fs::write(
            sidecar_path(&model),
            serde_json::to_string(&json!({
                "file_name": "b",
                "model_name": "Fancy B",
                "file_path": normalize_path(&model),
                "sha256": "ABCDEF",
                "base_model": "SDXL 1.0",
                "preview_url": "/gone/b.png"
            }))
            .unwrap(),
        )
        .unwrap();

        let metadata = MetadataBuilder::new(None)
            .build(&model, temp_dir.path())
            .await
            .unwrap();

        assert_eq!(metadata.model_name, "Fancy B");
        assert_eq!(metadata.sha256, "abcdef");
        assert_eq!(metadata.folder, "style");
        assert!(metadata.preview_url.ends_with("b.preview.png"));

        let persisted: LoraMetadata = atomic_read_json(&sidecar_path(&model)).unwrap().unwrap();
        assert!(persisted.preview_url.ends_with("b.preview.png"));
    }

    #[tokio::test]
    async fn test_malformed_sidecar_is_treated_as_absent() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("c.safetensors");
        std::fs::write(&model, b"c").unwrap();
        std::fs::write(sidecar_path(&model), "{ nope").unwrap();

        let metadata = MetadataBuilder::new(None)
            .build(&model, temp_dir.path())
            .await
            .unwrap();
        assert_eq!(metadata.file_name, "c");
        assert_eq!(metadata.sha256.len(), 64);
    }

    #[tokio::test]
    async fn test_civitai_info_synthesizes_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("d.safetensors");
        std::fs::write(&model, b"d").unwrap();
        std::fs::write(
            civitai_info_path(&model),
            serde_json::to_string(&json!({
                "id": 11,
                "modelId": 5,
                "baseModel": "SD 1.5",
                "model": {"name": "Dee"},
                "files": [
                    {"primary": false, "sizeKB": 1.0, "hashes": {"SHA256": "FFFF"}},
                    {"primary": true, "sizeKB": 2.0, "hashes": {"SHA256": "ABAB"}}
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let metadata = MetadataBuilder::new(None)
            .build(&model, temp_dir.path())
            .await
            .unwrap();
        assert_eq!(metadata.model_name, "Dee");
        assert_eq!(metadata.base_model, "SD 1.5");
        assert_eq!(metadata.sha256, "abab");
        assert_eq!(metadata.size, 2048);
        assert_eq!(metadata.civitai_model_id(), Some(5));
        assert!(sidecar_path(&model).exists());
    }

    #[tokio::test]
    async fn test_enrichment_404_marks_deleted_once() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("e.safetensors");
        std::fs::write(&model, b"e").unwrap();
        std::fs::write(
            sidecar_path(&model),
            serde_json::to_string(&json!({
                "file_name": "e",
                "file_path": normalize_path(&model),
                "sha256": "00",
                "civitai": {"modelId": 99}
            }))
            .unwrap(),
        )
        .unwrap();

        let provider = Arc::new(FixedProvider {
            status: 404,
            metadata: None,
            calls: AtomicUsize::new(0),
        });
        let builder = MetadataBuilder::new(Some(provider.clone()));

        let first = builder.build(&model, temp_dir.path()).await.unwrap();
        assert!(first.civitai_deleted);
        let second = builder.build(&model, temp_dir.path()).await.unwrap();
        assert!(second.civitai_deleted);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enrichment_fills_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("f.safetensors");
        std::fs::write(&model, b"f").unwrap();
        std::fs::write(
            sidecar_path(&model),
            serde_json::to_string(&json!({
                "file_name": "f",
                "file_path": normalize_path(&model),
                "sha256": "00",
                "modelDescription": "kept",
                "civitai": {"modelId": "12"}
            }))
            .unwrap(),
        )
        .unwrap();

        let provider = Arc::new(FixedProvider {
            status: 200,
            metadata: Some(RemoteModelMetadata {
                description: Some("remote".into()),
                tags: vec!["style".into()],
            }),
            calls: AtomicUsize::new(0),
        });
        let metadata = MetadataBuilder::new(Some(provider))
            .build(&model, temp_dir.path())
            .await
            .unwrap();
        assert_eq!(metadata.tags, vec!["style".to_string()]);
        assert_eq!(metadata.model_description, "kept");
    }
}
