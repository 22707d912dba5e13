//! Shopping cart lines and the arithmetic behind cart mutations.
//!
//! The backend stores the cart as a flat list and replaces it wholesale on
//! every `PATCH /shop_cart`, so all cart edits are computed client-side on a
//! [`Cart`] and the resulting list is sent back.
//!
//! Invariant: every line in a [`Cart`] has `quantity > 0`. Driving a line to
//! zero removes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{BasketId, CartItemId, ProductInstanceId};
use super::order::{OrderLine, PreferenceItem};
use super::price::Price;

/// Errors raised by cart arithmetic before anything is sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// A line was added with quantity zero.
    #[error("quantity must be greater than zero")]
    ZeroQuantity,

    /// A line references neither a product instance nor a basket.
    #[error("cart line has no product instance or basket reference")]
    MissingReference,

    /// The referenced line is not in the cart.
    #[error("line {0} is not in the cart")]
    NotInCart(CartLineRef),

    /// More units requested than the store has available.
    #[error("insufficient stock for {line}: requested {requested}, available {available}")]
    InsufficientStock {
        line: CartLineRef,
        requested: u32,
        available: u32,
    },
}

/// Identity of a cart line: one line per product instance or basket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartLineRef {
    Instance(ProductInstanceId),
    Basket(BasketId),
}

impl std::fmt::Display for CartLineRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance(id) => write!(f, "instance:{id}"),
            Self::Basket(id) => write!(f, "basket:{id}"),
        }
    }
}

/// A single line in the shopping cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CartItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_instance: Option<ProductInstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basket_id: Option<BasketId>,
    #[serde(default)]
    pub name: String,
    pub price: Price,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

impl CartItem {
    /// A new line for a product instance.
    #[must_use]
    pub fn for_instance(
        instance: ProductInstanceId,
        name: impl Into<String>,
        price: Price,
        quantity: u32,
    ) -> Self {
        Self {
            id: None,
            product_instance: Some(instance),
            basket_id: None,
            name: name.into(),
            price,
            quantity,
            expiration_date: None,
            photo: None,
        }
    }

    /// A new line for a basket.
    #[must_use]
    pub fn for_basket(basket: BasketId, name: impl Into<String>, price: Price, quantity: u32) -> Self {
        Self {
            id: None,
            product_instance: None,
            basket_id: Some(basket),
            name: name.into(),
            price,
            quantity,
            expiration_date: None,
            photo: None,
        }
    }

    /// The line identity, baskets first.
    #[must_use]
    pub fn line_ref(&self) -> Option<CartLineRef> {
        self.basket_id
            .clone()
            .map(CartLineRef::Basket)
            .or_else(|| self.product_instance.clone().map(CartLineRef::Instance))
    }

    /// `price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.quantity)
    }
}

/// The whole cart as the server stores it.
///
/// Deserializes through [`Cart::new`], so a decoded cart never holds a
/// zero-quantity line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<CartItem>", into = "Vec<CartItem>")]
pub struct Cart(Vec<CartItem>);

impl Cart {
    /// Build a cart from server lines, dropping any zero-quantity leftovers.
    #[must_use]
    pub fn new(items: Vec<CartItem>) -> Self {
        Self(items.into_iter().filter(|i| i.quantity > 0).collect())
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.0
    }

    #[must_use]
    pub fn into_items(self) -> Vec<CartItem> {
        self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Find the line for `line`.
    #[must_use]
    pub fn get(&self, line: &CartLineRef) -> Option<&CartItem> {
        self.0.iter().find(|i| i.line_ref().as_ref() == Some(line))
    }

    /// Add a line, merging with an existing line for the same instance or basket.
    ///
    /// Returns the resulting quantity of that line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::ZeroQuantity` or `CartError::MissingReference` for
    /// malformed input; the cart is left unchanged.
    pub fn add(&mut self, item: CartItem) -> Result<u32, CartError> {
        if item.quantity == 0 {
            return Err(CartError::ZeroQuantity);
        }
        let line = item.line_ref().ok_or(CartError::MissingReference)?;

        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|i| i.line_ref().as_ref() == Some(&line))
        {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            return Ok(existing.quantity);
        }

        let quantity = item.quantity;
        self.0.push(item);
        Ok(quantity)
    }

    /// Change a line's quantity by `delta`. A result of zero or less removes it.
    ///
    /// Returns the new quantity (0 when removed).
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotInCart` if the line does not exist.
    pub fn change_quantity(&mut self, line: &CartLineRef, delta: i64) -> Result<u32, CartError> {
        let pos = self
            .0
            .iter()
            .position(|i| i.line_ref().as_ref() == Some(line))
            .ok_or_else(|| CartError::NotInCart(line.clone()))?;

        let current = self.0.get(pos).map_or(0, |i| i64::from(i.quantity));
        let next = u32::try_from((current + delta).max(0)).unwrap_or(u32::MAX);

        if next == 0 {
            self.0.remove(pos);
        } else if let Some(item) = self.0.get_mut(pos) {
            item.quantity = next;
        }
        Ok(next)
    }

    /// Remove a line. Returns whether it was present.
    pub fn remove(&mut self, line: &CartLineRef) -> bool {
        let before = self.0.len();
        self.0.retain(|i| i.line_ref().as_ref() != Some(line));
        self.0.len() != before
    }

    /// Check that adding `adding` units keeps the line within `available`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InsufficientStock` when the request exceeds stock.
    pub fn check_stock(&self, line: &CartLineRef, adding: u32, available: u32) -> Result<(), CartError> {
        let requested = self
            .get(line)
            .map_or(0, |i| i.quantity)
            .saturating_add(adding);
        if requested > available {
            return Err(CartError::InsufficientStock {
                line: line.clone(),
                requested,
                available,
            });
        }
        Ok(())
    }

    /// Sum of all line totals.
    #[must_use]
    pub fn total(&self) -> Price {
        self.0.iter().map(CartItem::line_total).sum()
    }

    /// Total units across all lines (the header badge count).
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.0.iter().map(|i| i.quantity).sum()
    }

    /// Lines in the shape `POST /orders` expects.
    #[must_use]
    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.0
            .iter()
            .filter_map(|item| match item.line_ref()? {
                CartLineRef::Basket(basket_id) => Some(OrderLine::Basket {
                    basket_id,
                    quantity: item.quantity,
                }),
                CartLineRef::Instance(product_instance) => Some(OrderLine::Instance {
                    product_instance,
                    quantity: item.quantity,
                }),
            })
            .collect()
    }

    /// Items for a payment preference.
    #[must_use]
    pub fn preference_items(&self) -> Vec<PreferenceItem> {
        self.0
            .iter()
            .map(|item| PreferenceItem {
                title: item.name.clone(),
                product_instance: item.product_instance.clone(),
                quantity: item.quantity,
                unit_price: item.price,
            })
            .collect()
    }
}

impl From<Vec<CartItem>> for Cart {
    fn from(items: Vec<CartItem>) -> Self {
        Self::new(items)
    }
}

impl From<Cart> for Vec<CartItem> {
    fn from(cart: Cart) -> Self {
        cart.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn instance(id: &str, qty: u32) -> CartItem {
        CartItem::for_instance(id.into(), "Medialunas", Price::from_cents(150), qty)
    }

    #[test]
    fn test_add_merges_same_instance() {
        let mut cart = Cart::default();
        cart.add(instance("pi-7", 2)).unwrap();
        let qty = cart.add(instance("pi-7", 1)).unwrap();
        assert_eq!(qty, 3);
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.item_count(), 3);
    }

    #[test]
    fn test_basket_and_instance_with_same_id_are_distinct() {
        let mut cart = Cart::default();
        cart.add(instance("5", 1)).unwrap();
        cart.add(CartItem::for_basket("5".into(), "Canasta", Price::from_cents(900), 1))
            .unwrap();
        assert_eq!(cart.len(), 2);
    }

    #[test]
    fn test_add_zero_quantity_rejected() {
        let mut cart = Cart::default();
        assert_eq!(cart.add(instance("pi-1", 0)), Err(CartError::ZeroQuantity));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_change_quantity_to_zero_removes_line() {
        let mut cart = Cart::new(vec![instance("pi-1", 1), instance("pi-2", 4)]);
        let line = CartLineRef::Instance("pi-1".into());
        assert_eq!(cart.change_quantity(&line, -1).unwrap(), 0);
        assert!(cart.get(&line).is_none());
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn test_change_quantity_unknown_line() {
        let mut cart = Cart::default();
        let line = CartLineRef::Basket("9".into());
        assert_eq!(
            cart.change_quantity(&line, 1),
            Err(CartError::NotInCart(line))
        );
    }

    #[test]
    fn test_new_drops_zero_quantity_lines() {
        let cart = Cart::new(vec![instance("pi-1", 0), instance("pi-2", 1)]);
        assert_eq!(cart.len(), 1);
    }

    #[test]
    fn test_decoded_cart_drops_zero_quantity_lines() {
        let encoded = serde_json::to_value(vec![instance("pi-1", 0), instance("pi-2", 3)]).unwrap();
        let cart: Cart = serde_json::from_value(encoded).unwrap();
        assert_eq!(cart.len(), 1);
        assert!(cart.get(&CartLineRef::Instance("pi-1".into())).is_none());

        let reencoded = serde_json::to_value(&cart).unwrap();
        assert_eq!(reencoded.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_check_stock_counts_existing_quantity() {
        let cart = Cart::new(vec![instance("pi-1", 2)]);
        let line = CartLineRef::Instance("pi-1".into());
        assert!(cart.check_stock(&line, 1, 3).is_ok());
        assert!(matches!(
            cart.check_stock(&line, 2, 3),
            Err(CartError::InsufficientStock { requested: 4, available: 3, .. })
        ));
    }

    #[test]
    fn test_order_lines_shape() {
        let cart = Cart::new(vec![
            instance("11", 2),
            CartItem::for_basket("3".into(), "Canasta", Price::from_cents(500), 1),
        ]);
        let body = serde_json::to_value(cart.order_lines()).unwrap();
        assert_eq!(
            body,
            serde_json::json!([
                {"product_instance": "11", "quantity": 2},
                {"basket_id": "3", "quantity": 1},
            ])
        );
        assert_eq!(cart.total(), Price::from_cents(800));
    }
}
