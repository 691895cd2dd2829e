//! LoRA library methods on LoraManager.

use crate::error::Result;
use crate::lora::{LoraMetadata, LoraMetadataPatch, LoraQuery, NameCount};
use crate::models::{ApiResponse, DeletedFiles, MovedModel, Paginated, ScanSummary};
use crate::LoraManager;
use std::path::Path;

impl LoraManager {
    // ========================================
    // LoRA Queries
    // ========================================

    pub async fn list_loras(&self, query: &LoraQuery) -> Result<Paginated<LoraMetadata>> {
        self.lora_scanner.get_paginated_data(query).await
    }

    pub async fn get_folders(&self) -> Result<Vec<String>> {
        self.lora_scanner.get_folders().await
    }

    pub async fn get_top_tags(&self, limit: usize) -> Result<Vec<NameCount>> {
        self.lora_scanner.get_top_tags(limit).await
    }

    pub async fn get_base_models(&self, limit: usize) -> Result<Vec<NameCount>> {
        self.lora_scanner.get_base_models(limit).await
    }

    pub fn get_lora_by_hash(&self, sha256: &str) -> Option<LoraMetadata> {
        let path = self.lora_scanner.get_lora_path_by_hash(sha256)?;
        self.lora_scanner.get_lora_by_path(&path)
    }

    /// Rescan every root and replace the cache.
    pub async fn refresh_loras(&self) -> Result<ScanSummary> {
        let snapshot = self.lora_scanner.get_cached_data(true).await?.snapshot();
        Ok(ScanSummary {
            total: snapshot.len(),
            folders: snapshot.folders.len(),
        })
    }

    // ========================================
    // LoRA Mutations
    // ========================================

    pub async fn move_model(&self, source: &Path, target_dir: &Path) -> ApiResponse<MovedModel> {
        self.lora_scanner
            .move_model(source, target_dir)
            .await
            .map(|new_file_path| MovedModel { new_file_path })
            .into()
    }

    pub async fn delete_model(&self, file_path: &Path) -> ApiResponse<DeletedFiles> {
        self.lora_scanner
            .delete_model(file_path)
            .await
            .map(|deleted_files| DeletedFiles { deleted_files })
            .into()
    }

    pub async fn update_lora_metadata(
        &self,
        file_path: &Path,
        patch: &LoraMetadataPatch,
    ) -> ApiResponse<LoraMetadata> {
        self.lora_scanner
            .update_lora_metadata(file_path, patch)
            .await
            .into()
    }
}
