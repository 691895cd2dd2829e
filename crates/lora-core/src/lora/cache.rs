//! In-memory LoRA cache.
//!
//! Readers take an `Arc<CacheSnapshot>` and never block writers for longer
//! than a pointer swap. Writers are serialized by an async mutex, work on a
//! private copy of the current snapshot, resort it and publish it whole, so
//! the record list, both sorted views, the hash index and the tag counts
//! always change together.

use super::hash_index::HashIndex;
use super::types::LoraMetadata;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

/// Immutable view of the cache at one point in time.
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    pub raw_data: Vec<Arc<LoraMetadata>>,
    pub sorted_by_name: Vec<Arc<LoraMetadata>>,
    pub sorted_by_date: Vec<Arc<LoraMetadata>>,
    pub folders: Vec<String>,
    pub hash_index: HashIndex,
    pub tag_counts: HashMap<String, usize>,
    /// `file_path` -> position in `raw_data`.
    positions: HashMap<String, usize>,
}

impl CacheSnapshot {
    /// Build a snapshot from scan results. Later records win on duplicate paths.
    pub fn from_records(records: Vec<LoraMetadata>) -> Self {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.upsert(record);
        }
        snapshot.resort();
        snapshot
    }

    pub fn len(&self) -> usize {
        self.raw_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    pub fn get(&self, file_path: &str) -> Option<&Arc<LoraMetadata>> {
        self.positions
            .get(file_path)
            .and_then(|&idx| self.raw_data.get(idx))
    }

    /// Insert or replace the record with the same `file_path`.
    ///
    /// Leaves the sorted views stale until [`CacheSnapshot::resort`].
    pub fn upsert(&mut self, record: LoraMetadata) {
        let record = Arc::new(record);
        match self.positions.get(&record.file_path).copied() {
            Some(idx) => {
                let old = std::mem::replace(&mut self.raw_data[idx], record.clone());
                self.forget(&old);
            }
            None => {
                self.positions
                    .insert(record.file_path.clone(), self.raw_data.len());
                self.raw_data.push(record.clone());
            }
        }
        self.hash_index.add(&record.sha256, &record.file_path);
        for tag in &record.tags {
            *self.tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    /// Remove the record for `file_path`. Leaves the sorted views stale.
    pub fn remove(&mut self, file_path: &str) -> Option<Arc<LoraMetadata>> {
        let idx = self.positions.remove(file_path)?;
        let old = self.raw_data.remove(idx);
        for shifted in &self.raw_data[idx..] {
            if let Some(pos) = self.positions.get_mut(&shifted.file_path) {
                *pos -= 1;
            }
        }
        self.forget(&old);
        Some(old)
    }

    fn forget(&mut self, old: &LoraMetadata) {
        self.hash_index.remove_by_path(&old.file_path);
        for tag in &old.tags {
            if let Some(count) = self.tag_counts.get_mut(tag) {
                *count -= 1;
                if *count == 0 {
                    self.tag_counts.remove(tag);
                }
            }
        }
    }

    /// Recompute both sorted views and the folder list from `raw_data`.
    pub fn resort(&mut self) {
        let mut by_name = self.raw_data.clone();
        by_name.sort_by(|a, b| compare_by_name(a, b));
        let mut by_date = self.raw_data.clone();
        by_date.sort_by(|a, b| compare_by_date(a, b));

        let folders: BTreeSet<&str> = self.raw_data.iter().map(|r| r.folder.as_str()).collect();
        let mut folders: Vec<String> = folders.into_iter().map(str::to_string).collect();
        folders.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));

        self.sorted_by_name = by_name;
        self.sorted_by_date = by_date;
        self.folders = folders;
    }
}

fn compare_by_name(a: &LoraMetadata, b: &LoraMetadata) -> Ordering {
    a.model_name
        .to_lowercase()
        .cmp(&b.model_name.to_lowercase())
        .then_with(|| a.file_path.cmp(&b.file_path))
}

fn compare_by_date(a: &LoraMetadata, b: &LoraMetadata) -> Ordering {
    b.modified
        .total_cmp(&a.modified)
        .then_with(|| b.file_path.cmp(&a.file_path))
}

/// Published snapshot plus the writer lock.
#[derive(Debug)]
pub struct LoraCache {
    current: RwLock<Arc<CacheSnapshot>>,
    write_lock: Mutex<()>,
}

impl Default for LoraCache {
    fn default() -> Self {
        Self::new(CacheSnapshot::default())
    }
}

impl LoraCache {
    pub fn new(snapshot: CacheSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        }
    }

    /// Current published view.
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: CacheSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Apply `f` to a private copy, resort once, then publish.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut CacheSnapshot) -> R) -> R {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        let result = f(&mut next);
        next.resort();
        self.publish(next);
        result
    }

    /// Like [`LoraCache::mutate`] but only publishes when `f` reports a change.
    pub async fn try_mutate(&self, f: impl FnOnce(&mut CacheSnapshot) -> bool) -> bool {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        if !f(&mut next) {
            return false;
        }
        next.resort();
        self.publish(next);
        true
    }

    pub async fn add(&self, record: LoraMetadata) {
        self.mutate(|s| s.upsert(record)).await
    }

    pub async fn remove(&self, file_path: &str) -> bool {
        self.try_mutate(|s| s.remove(file_path).is_some()).await
    }

    /// Swap the record at `old_path` for `record` in one step.
    pub async fn replace(&self, old_path: &str, record: LoraMetadata) {
        self.mutate(|s| {
            s.remove(old_path);
            s.upsert(record);
        })
        .await
    }

    /// Returns false when no record has `file_path`.
    pub async fn update_preview_url(&self, file_path: &str, preview_url: &str) -> bool {
        self.try_mutate(|s| {
            let Some(existing) = s.get(file_path) else {
                return false;
            };
            let mut updated = (**existing).clone();
            updated.preview_url = preview_url.to_string();
            s.upsert(updated);
            true
        })
        .await
    }

    pub async fn resort(&self) {
        self.mutate(|_| ()).await
    }
}
