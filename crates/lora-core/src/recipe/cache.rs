//! In-memory recipe cache.
//!
//! Same publishing scheme as the LoRA cache: one async writer lock, readers
//! take an `Arc` of the last published snapshot.

use super::types::RecipeRecord;
use crate::error::{LoraError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct RecipeSnapshot {
    pub raw_data: Vec<Arc<RecipeRecord>>,
    pub sorted_by_name: Vec<Arc<RecipeRecord>>,
    pub sorted_by_date: Vec<Arc<RecipeRecord>>,
}

impl RecipeSnapshot {
    pub fn from_records(records: Vec<RecipeRecord>) -> Self {
        let mut snapshot = Self {
            raw_data: records.into_iter().map(Arc::new).collect(),
            ..Self::default()
        };
        snapshot.resort(false);
        snapshot
    }

    pub fn len(&self) -> usize {
        self.raw_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<RecipeRecord>> {
        self.raw_data.iter().find(|r| r.id == id)
    }

    /// Recompute the name view, and the date view unless `name_only`.
    pub fn resort(&mut self, name_only: bool) {
        let mut by_name = self.raw_data.clone();
        by_name.sort_by(|a, b| compare_by_title(a, b));
        self.sorted_by_name = by_name;

        if !name_only {
            let mut by_date = self.raw_data.clone();
            by_date.sort_by(|a, b| compare_by_date(a, b));
            self.sorted_by_date = by_date;
        }
    }
}

fn compare_by_title(a: &RecipeRecord, b: &RecipeRecord) -> Ordering {
    a.title
        .to_lowercase()
        .cmp(&b.title.to_lowercase())
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_by_date(a: &RecipeRecord, b: &RecipeRecord) -> Ordering {
    b.created_date
        .total_cmp(&a.created_date)
        .then_with(|| b.file_path.cmp(&a.file_path))
}

/// Field-level merge of `patch` into `record`. `id` is never overwritten.
pub fn merge_recipe(record: &RecipeRecord, patch: &Map<String, Value>) -> Result<RecipeRecord> {
    let Value::Object(mut fields) = serde_json::to_value(record)? else {
        return Err(LoraError::Other("recipe did not serialize to an object".into()));
    };
    for (key, value) in patch {
        if key != "id" {
            fields.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(Value::Object(fields)).map_err(|e| LoraError::Validation {
        field: "metadata".to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug)]
pub struct RecipeCache {
    current: RwLock<Arc<RecipeSnapshot>>,
    write_lock: Mutex<()>,
}

impl Default for RecipeCache {
    fn default() -> Self {
        Self::new(RecipeSnapshot::default())
    }
}

impl RecipeCache {
    pub fn new(snapshot: RecipeSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<RecipeSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: RecipeSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    pub async fn resort(&self, name_only: bool) {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        next.resort(name_only);
        self.publish(next);
    }

    /// Merge `patch` into the recipe with `id`.
    ///
    /// Returns the updated record, or `None` when no recipe has that id.
    pub async fn update_recipe_metadata(
        &self,
        id: &str,
        patch: &Map<String, Value>,
    ) -> Result<Option<RecipeRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        let Some(idx) = next.raw_data.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let updated = merge_recipe(&next.raw_data[idx], patch)?;
        next.raw_data[idx] = Arc::new(updated.clone());
        next.resort(false);
        self.publish(next);
        Ok(Some(updated))
    }

    /// Insert `record`, replacing any recipe with the same id.
    pub async fn add_recipe(&self, record: RecipeRecord) {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        next.raw_data.retain(|r| r.id != record.id);
        next.raw_data.push(Arc::new(record));
        next.resort(false);
        self.publish(next);
    }

    /// Returns the removed recipe, if there was one.
    pub async fn remove_recipe(&self, id: &str) -> Option<Arc<RecipeRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut next = (*self.snapshot()).clone();
        let idx = next.raw_data.iter().position(|r| r.id == id)?;
        let removed = next.raw_data.remove(idx);
        next.resort(false);
        self.publish(next);
        Some(removed)
    }
}
