//! Payloads of the mutation outcomes returned by the composition root.

use serde::{Deserialize, Serialize};

/// Result of moving a model into another folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovedModel {
    pub new_file_path: String,
}

/// Files removed by a model deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedFiles {
    pub deleted_files: Vec<String>,
}

/// Outcome of a full rescan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub total: usize,
    pub folders: usize,
}
