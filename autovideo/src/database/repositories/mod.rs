//! Repository layer for database access.

pub mod job;
pub mod quota;

pub use job::*;
pub use quota::*;
