//! Output generation.
//!
//! # Submodules
//!
//! - [`json`]: loads the previous snapshot and writes the new one
//!
//! # Output Structure
//!
//! ```text
//! public/
//! └── news.json   # { generated_at, count, items[] }, newest first
//! ```

pub mod json;
