//! Sidecar persistence.
//!
//! All sidecar and recipe JSON goes through the atomic writer so concurrent
//! readers (including the scanner) never parse a truncated file.

mod atomic;

pub use atomic::{
    atomic_read_json, atomic_write_json, to_pretty_json, write_json_blocking, RECIPE_INDENT,
    SIDECAR_INDENT,
};
