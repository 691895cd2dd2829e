//! Recipes: saved bundles of LoRAs and generation parameters.
//!
//! Each recipe is a JSON file plus an optimised preview image that also
//! carries the recipe in its EXIF UserComment.

mod cache;
mod exif;
mod preview;
mod scanner;
mod types;

pub use cache::{merge_recipe, RecipeCache, RecipeSnapshot};
pub use exif::{
    append_recipe_metadata, append_recipe_metadata_comment, decode_user_comment,
    encode_user_comment, extract_recipe_metadata, strip_recipe_metadata, ImageMetadataStore,
    WebpExifStore,
};
pub use preview::optimize_image;
pub use scanner::{run_recipe_query, RecipeScanner};
pub use types::{
    format_timestamp, ImageAnalysis, RecipeDetail, RecipeImageSource, RecipeInput, RecipeLora,
    RecipeLoraDetail, RecipeLoraInput, RecipeQuery, RecipeRecord, RecipeSearchOptions,
    SaveRecipeRequest, SavedRecipe,
};
