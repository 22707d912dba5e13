//! Orders, order placement lines and payment preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BasketId, OrderId, ProductInstanceId, StoreId, UserId};
use super::price::Price;
use super::status::{OrderStatus, RatingState, StatusTransitionError};

/// A line on a placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProduct {
    pub product_instance: ProductInstanceId,
    pub quantity: u32,
    #[serde(default)]
    pub discount: Option<f64>,
    pub price: Price,
    #[serde(default)]
    pub name: String,
}

/// A placed order.
///
/// Immutable once created except for `status` (server-driven) and `rating`
/// (set once client-side after a rating is submitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub commerce_id: StoreId,
    pub created_at: DateTime<Utc>,
    pub price: Price,
    #[serde(default)]
    pub del_address: String,
    #[serde(default)]
    pub pickup: bool,
    pub status: OrderStatus,
    #[serde(default)]
    pub products: Vec<OrderProduct>,
    #[serde(default)]
    pub rating: RatingState,
}

impl Order {
    /// Whether the rating prompt should be offered for this order.
    #[must_use]
    pub fn is_ratable(&self) -> bool {
        self.status == OrderStatus::Completed && self.rating == RatingState::Unrated
    }

    /// Flip the rating flag after a successful rating submission.
    ///
    /// # Errors
    ///
    /// Returns `StatusTransitionError` if the order is not completed or was
    /// already rated.
    pub fn mark_rated(&mut self) -> Result<(), StatusTransitionError> {
        if !self.is_ratable() {
            return Err(StatusTransitionError {
                from: self.status,
                to: self.status,
            });
        }
        self.rating = RatingState::Rated;
        Ok(())
    }
}

/// A line in a `POST /orders` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderLine {
    Basket {
        basket_id: BasketId,
        quantity: u32,
    },
    Instance {
        product_instance: ProductInstanceId,
        quantity: u32,
    },
}

/// One item of a payment preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceItem {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_instance: Option<ProductInstanceId>,
    pub quantity: u32,
    pub unit_price: Price,
}

/// Payment preference submitted to the payment provider through the backend.
///
/// The provider redirects back to `return_url` when the user finishes paying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPreference {
    pub items: Vec<PreferenceItem>,
    pub order: OrderId,
    pub auto_return: String,
    pub return_url: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn completed_order() -> Order {
        serde_json::from_value(serde_json::json!({
            "order_id": 99,
            "user_id": "u1",
            "commerce_id": 42,
            "created_at": "2024-05-01T12:00:00Z",
            "price": 1200.5,
            "del_address": "Calle 1",
            "pickup": false,
            "status": "completed",
            "products": [],
            "rating": "unrated",
        }))
        .unwrap()
    }

    #[test]
    fn test_mark_rated_once() {
        let mut order = completed_order();
        assert!(order.is_ratable());
        order.mark_rated().unwrap();
        assert_eq!(order.rating, RatingState::Rated);
        assert!(order.mark_rated().is_err());
    }

    #[test]
    fn test_mark_rated_requires_completed() {
        let mut order = completed_order();
        order.status = OrderStatus::Ready;
        assert!(order.mark_rated().is_err());
        assert_eq!(order.rating, RatingState::Unrated);
    }
}
