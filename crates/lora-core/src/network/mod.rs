//! HTTP access: remote metadata enrichment and image downloads.

mod civitai;

pub use civitai::{
    build_http_client, download_bytes, CivitaiClient, MetadataProvider, RemoteModelMetadata,
};
