//! Store ratings left after completed orders.

use serde::{Deserialize, Serialize};

/// A rating as listed on a store page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub stars: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of `POST /rating/{orderId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingSubmission {
    pub stars: u8,
    pub description: String,
}

impl RatingSubmission {
    pub const MAX_STARS: u8 = 5;

    /// Whether the star count is within 1..=5.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.stars >= 1 && self.stars <= Self::MAX_STARS
    }
}
