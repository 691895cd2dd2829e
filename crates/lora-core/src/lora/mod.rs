//! LoRA model indexing.
//!
//! Scans the configured roots for `.safetensors` files, builds one
//! [`LoraMetadata`] per file from sidecars, Civitai info files or the file
//! itself, and keeps the resulting cache in step with the file system.

mod builder;
mod cache;
mod files;
mod hash_index;
mod hashing;
mod query;
mod scanner;
mod types;
mod watcher;

pub use builder::{file_info, from_civitai_info, MetadataBuilder};
pub use cache::{CacheSnapshot, LoraCache};
pub use files::{
    civitai_info_path, compute_folder, find_preview, find_root, is_model_file, normalize_path,
    sidecar_path,
};
pub use hash_index::HashIndex;
pub use hashing::{compute_sha256, compute_sha256_async};
pub use query::{fuzzy_match, LoraQuery, SearchOptions, SortBy};
pub use scanner::{find_model_files, LoraScanner};
pub use types::{LoraMetadata, LoraMetadataPatch, NameCount};
pub(crate) use types::top_counts;
pub use watcher::{
    classify_event, spawn_debouncer, FileAction, FileChange, FileMonitor, IgnoreList, PathMapper,
};
