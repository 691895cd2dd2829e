//! API implementation submodules.
//!
//! Each submodule contains `impl LoraManager` blocks that extend the public
//! API. The struct definition remains in `lib.rs`.

mod builder;
mod loras;
mod recipes;

pub use builder::LoraManagerBuilder;
