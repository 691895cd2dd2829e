//! Bidirectional `sha256 <-> file_path` map.

use std::collections::HashMap;

/// At most one path per hash and one hash per path. A newer entry displaces
/// older ones on either side.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    by_hash: HashMap<String, String>,
    by_path: HashMap<String, String>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Empty keys are ignored. Hashes are stored lower-case.
    pub fn add(&mut self, sha256: &str, file_path: &str) {
        if sha256.is_empty() || file_path.is_empty() {
            return;
        }
        let sha256 = sha256.to_lowercase();

        if let Some(old_path) = self.by_hash.insert(sha256.clone(), file_path.to_string()) {
            if old_path != file_path {
                self.by_path.remove(&old_path);
            }
        }
        if let Some(old_hash) = self.by_path.insert(file_path.to_string(), sha256.clone()) {
            if old_hash != sha256 {
                self.by_hash.remove(&old_hash);
            }
        }
    }

    pub fn remove_by_path(&mut self, file_path: &str) {
        if let Some(hash) = self.by_path.remove(file_path) {
            if self.by_hash.get(&hash).map(String::as_str) == Some(file_path) {
                self.by_hash.remove(&hash);
            }
        }
    }

    pub fn remove_by_hash(&mut self, sha256: &str) {
        if let Some(path) = self.by_hash.remove(&sha256.to_lowercase()) {
            self.by_path.remove(&path);
        }
    }

    pub fn has_hash(&self, sha256: &str) -> bool {
        self.by_hash.contains_key(&sha256.to_lowercase())
    }

    pub fn get_path(&self, sha256: &str) -> Option<&str> {
        self.by_hash.get(&sha256.to_lowercase()).map(String::as_str)
    }

    pub fn get_hash(&self, file_path: &str) -> Option<&str> {
        self.by_path.get(file_path).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.by_hash.clear();
        self.by_path.clear();
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
