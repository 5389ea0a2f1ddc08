//! Database models.
//!
//! These map directly to the schema in `migrations/`.

pub mod job;
pub mod quota;

pub use job::*;
pub use quota::*;
