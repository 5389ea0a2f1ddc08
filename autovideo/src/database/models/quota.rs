//! Quota database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Free submissions consumed by one owner.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuotaDbModel {
    pub owner_id: i64,
    /// Monotonically non-decreasing, starts at 0.
    pub consumed_count: i64,
    /// Unix epoch milliseconds of the last increment.
    pub updated_at: i64,
}
