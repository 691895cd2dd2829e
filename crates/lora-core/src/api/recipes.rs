//! Recipe methods on LoraManager.

use crate::error::Result;
use crate::lora::NameCount;
use crate::models::{ApiResponse, Paginated, UnitResponse};
use crate::recipe::{
    ImageAnalysis, RecipeDetail, RecipeImageSource, RecipeQuery, RecipeRecord, SaveRecipeRequest,
    SavedRecipe,
};
use crate::LoraManager;
use serde_json::{Map, Value};

impl LoraManager {
    // ========================================
    // Recipe Queries
    // ========================================

    pub async fn list_recipes(&self, query: &RecipeQuery) -> Result<Paginated<RecipeRecord>> {
        self.recipe_scanner.get_paginated_data(query).await
    }

    pub async fn get_recipe_detail(&self, id: &str) -> Result<RecipeDetail> {
        self.recipe_scanner.get_recipe_detail(id).await
    }

    pub async fn get_recipe_top_tags(&self, limit: usize) -> Result<Vec<NameCount>> {
        self.recipe_scanner.get_top_tags(limit).await
    }

    pub async fn get_recipe_base_models(&self) -> Result<Vec<NameCount>> {
        self.recipe_scanner.get_base_models().await
    }

    pub async fn analyze_recipe_image(&self, source: RecipeImageSource) -> Result<ImageAnalysis> {
        self.recipe_scanner.analyze_image(source).await
    }

    // ========================================
    // Recipe Mutations
    // ========================================

    pub async fn save_recipe(&self, request: SaveRecipeRequest) -> ApiResponse<SavedRecipe> {
        self.recipe_scanner.save_recipe(request).await.into()
    }

    pub async fn delete_recipe(&self, id: &str) -> UnitResponse {
        match self.recipe_scanner.delete_recipe(id).await {
            Ok(()) => UnitResponse::ok(),
            Err(e) => UnitResponse::error(e.to_string()),
        }
    }

    pub async fn update_recipe(
        &self,
        id: &str,
        patch: &Map<String, Value>,
    ) -> ApiResponse<RecipeRecord> {
        self.recipe_scanner
            .update_recipe_metadata(id, patch)
            .await
            .into()
    }
}
