//! Catalog records: stores, products, product instances and baskets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{BasketId, ProductId, ProductInstanceId, StoreId};
use super::price::Price;

/// A store ("commerce") listed in the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: StoreId,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(rename = "isFavorite", default)]
    pub is_favorite: bool,
}

/// A product sold by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Price,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub state: String,
    pub commerce_id: StoreId,
    #[serde(rename = "isFavorite", default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub photo: Option<String>,
}

/// A concrete, expiring lot of a product that can be put in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductInstance {
    pub id: ProductInstanceId,
    #[serde(default)]
    pub product_id: Option<ProductId>,
    pub price: Price,
    #[serde(default)]
    pub discount: Option<f64>,
    /// Units available.
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

/// One product type bundled in a basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketContent {
    pub product_type: String,
    pub quantity: u32,
}

/// A surprise basket of several products sold as one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub id: BasketId,
    pub name: String,
    pub price: Price,
    pub commerce_id: StoreId,
    #[serde(default)]
    pub products: Vec<BasketContent>,
    /// Units available.
    #[serde(default)]
    pub quantity: u32,
}

/// A favorited store as returned by `/favorite/commerce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteStore {
    pub commerce_id: StoreId,
}

/// A favorited product as returned by `/favorite/product`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteProduct {
    pub product_id: ProductId,
}

/// A product lot close to expiry, as listed on the home feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringProduct {
    pub id: ProductInstanceId,
    pub product_id: ProductId,
    pub expiration_date: DateTime<Utc>,
    #[serde(default)]
    pub quantity: u32,
    pub product_name: String,
    pub product_price: Price,
    #[serde(default)]
    pub discount: Option<f64>,
    pub commerce_id: StoreId,
    #[serde(default)]
    pub commerce_name: String,
    #[serde(default)]
    pub commerce_logo: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_favorite_flag_defaults_false() {
        let store: Store = serde_json::from_value(serde_json::json!({
            "id": 42,
            "name": "Panaderia",
        }))
        .unwrap();
        assert_eq!(store.id.as_str(), "42");
        assert!(!store.is_favorite);
    }

    #[test]
    fn test_store_favorite_flag_round_trips_camel_case() {
        let store: Store = serde_json::from_value(serde_json::json!({
            "id": "1",
            "name": "Verduleria",
            "isFavorite": true,
        }))
        .unwrap();
        let value = serde_json::to_value(&store).unwrap();
        assert_eq!(value["isFavorite"], serde_json::json!(true));
    }
}
