//! Path conventions around a model file: sidecars, previews, roots and folders.

use crate::config::ScanConfig;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Render a path with forward slashes.
pub fn normalize_path(path: impl AsRef<Path>) -> String {
    path.as_ref().to_string_lossy().replace('\\', "/")
}

/// Whether the path names a LoRA model file.
pub fn is_model_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(ScanConfig::MODEL_EXTENSION))
        .unwrap_or(false)
}

/// File name without the model extension.
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn with_suffix(model_path: &Path, suffix: &str) -> PathBuf {
    let name = format!("{}{}", base_name(model_path), suffix);
    model_path.with_file_name(name)
}

/// `name.safetensors` -> `name.metadata.json`
pub fn sidecar_path(model_path: &Path) -> PathBuf {
    with_suffix(model_path, ScanConfig::METADATA_SUFFIX)
}

/// `name.safetensors` -> `name.civitai.info`
pub fn civitai_info_path(model_path: &Path) -> PathBuf {
    with_suffix(model_path, ScanConfig::CIVITAI_INFO_SUFFIX)
}

/// First existing preview for `base` inside `dir`, in probe order.
pub fn find_preview_path(base: &str, dir: &Path) -> Option<PathBuf> {
    ScanConfig::PREVIEW_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}{}", base, ext)))
        .find(|candidate| candidate.is_file())
}

/// Preview next to a model file as a normalized string, `""` when none exists.
pub fn find_preview(model_path: &Path) -> String {
    let dir = model_path.parent().unwrap_or_else(|| Path::new(""));
    find_preview_path(&base_name(model_path), dir)
        .map(normalize_path)
        .unwrap_or_default()
}

/// Every preview file that exists next to a model.
pub fn existing_previews(model_path: &Path) -> Vec<PathBuf> {
    let dir = model_path.parent().unwrap_or_else(|| Path::new(""));
    let base = base_name(model_path);
    ScanConfig::PREVIEW_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}{}", base, ext)))
        .filter(|candidate| candidate.is_file())
        .collect()
}

/// The preview's extension as found by the probe list (e.g. `.preview.png`).
pub fn preview_extension(model_path: &Path, preview: &Path) -> Option<&'static str> {
    let base = base_name(model_path);
    let name = preview.file_name()?.to_string_lossy().to_string();
    let rest = name.strip_prefix(&base)?;
    ScanConfig::PREVIEW_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| *ext == rest)
}

/// Configured root containing `file_path`, matched on the literal normalized prefix.
pub fn find_root<'a>(roots: &'a [PathBuf], file_path: &str) -> Option<&'a PathBuf> {
    let file_path = normalize_path(file_path);
    roots
        .iter()
        .filter(|root| {
            let root = normalize_path(root);
            let root = root.trim_end_matches('/');
            file_path
                .strip_prefix(root)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
        })
        // Nested roots: prefer the most specific one.
        .max_by_key(|root| normalize_path(root).len())
}

/// Root-relative parent directory of `file_path`, forward slashes, `""` at the root.
pub fn compute_folder(root: &Path, file_path: &str) -> String {
    let root = normalize_path(root);
    let root = root.trim_end_matches('/');
    let file_path = normalize_path(file_path);
    let relative = file_path
        .strip_prefix(root)
        .unwrap_or(file_path.as_str())
        .trim_start_matches('/');
    match relative.rfind('/') {
        Some(idx) => relative[..idx].to_string(),
        None => String::new(),
    }
}

/// Modification time as float seconds since the epoch.
pub fn modified_secs(metadata: &std::fs::Metadata) -> f64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
