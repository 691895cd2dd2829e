//! Atomic file operations for sidecar JSON persistence.
//!
//! Writes go to a temp file with a PID+TID suffix, are fsynced, and are then
//! renamed over the target so a reader never sees a half-written sidecar.

use crate::{LoraError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::debug;

/// Indentation used for model sidecars.
pub const SIDECAR_INDENT: &[u8] = b"  ";
/// Indentation used for recipe files.
pub const RECIPE_INDENT: &[u8] = b"    ";

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LoraError::io_with_path(e, path)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| LoraError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Serialize to pretty JSON with the given indentation. Non-ASCII text is kept as-is.
pub fn to_pretty_json<T: Serialize>(data: &T, indent: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut serializer).map_err(|e| LoraError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;
    Ok(buf)
}

/// Write data to a JSON file atomically, creating parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, indent: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.exists()) {
        fs::create_dir_all(parent).map_err(|e| LoraError::io_with_path(e, parent))?;
    }

    let serialized = to_pretty_json(data, indent)?;
    let temp_path = temp_path_for(path);
    write_synced(&temp_path, &serialized).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        LoraError::io_with_path(e, &temp_path)
    })?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(LoraError::io_with_path(e, path));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

/// Hidden sibling `.{name}.{pid}.{tid}.tmp` so concurrent writers never share a temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        process::id(),
        thread_id()
    ))
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Async wrapper that runs [`atomic_write_json`] on the blocking pool.
pub async fn write_json_blocking<T>(path: &Path, data: &T, indent: &'static [u8]) -> Result<()>
where
    T: Serialize + Clone + Send + 'static,
{
    let path = path.to_path_buf();
    let data = data.clone();
    tokio::task::spawn_blocking(move || atomic_write_json(&path, &data, indent))
        .await
        .map_err(|e| LoraError::Other(format!("Sidecar write task failed: {}", e)))?
}

fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.metadata.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &data, SIDECAR_INDENT).unwrap();
        let read_data: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read_data, Some(data));

        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_non_ascii_is_preserved_and_indent_applies() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("r.recipe.json");
        let data = TestData {
            name: "猫の絵".to_string(),
            value: 1,
        };

        atomic_write_json(&path, &data, RECIPE_INDENT).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("猫の絵"));
        assert!(text.contains("\n    \"name\""));
    }

    #[test]
    fn test_atomic_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let result: Option<TestData> = atomic_read_json(&path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_atomic_read_malformed_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<Option<TestData>> = atomic_read_json(&path);
        assert!(matches!(result, Err(LoraError::Json { .. })));
    }

    #[test]
    fn test_atomic_write_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.json");

        let data = TestData {
            name: "nested".to_string(),
            value: 99,
        };

        atomic_write_json(&path, &data, SIDECAR_INDENT).unwrap();
        assert!(path.exists());
    }
}
