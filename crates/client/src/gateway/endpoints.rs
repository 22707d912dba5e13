//! Typed backend endpoints.

use regusto_core::{
    ActiveAddress, Address, AddressId, Basket, CartItem, ChatMessage, ExpiringProduct,
    FavoriteProduct, FavoriteStore, NewAddress, Order, OrderId, OrderLine, PaymentPreference,
    Product, ProductId, ProductInstance, Rating, RatingSubmission, Store,
    StoreId, TriggerRequest, UserData, UserId, UserUpdate, chat_channel,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use super::{ApiRequest, Gateway};
use crate::error::ClientError;

/// Response of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlacedOrder {
    #[serde(alias = "id")]
    pub order_id: OrderId,
}

/// A payment preference accepted by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    /// Hosted checkout page the user is sent to
    pub init_point: String,
}

impl Gateway {
    async fn user_id(&self) -> Result<UserId, ClientError> {
        Ok(self.inner.session.credentials().await?.user_id)
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_stores(&self) -> Result<Vec<Store>, ClientError> {
        self.send(ApiRequest::get("/api/commerce")).await
    }

    /// Stores near a coordinate.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_nearby_stores(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<Store>, ClientError> {
        let user_id = self.user_id().await?;
        self.send(
            ApiRequest::post(format!("/api/user/{user_id}/nearCommerce"))
                .json(json!({ "latitude": latitude, "longitude": longitude })),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_products(&self, store: &StoreId) -> Result<Vec<Product>, ClientError> {
        self.send(ApiRequest::get("/api/product").query("commerce_id", store))
            .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_product_instances(
        &self,
        product: &ProductId,
    ) -> Result<Vec<ProductInstance>, ClientError> {
        self.send(ApiRequest::get(format!(
            "/api/product/{product}/product_instance"
        )))
        .await
    }

    /// Baskets, optionally restricted to one store.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_baskets(&self, store: Option<&StoreId>) -> Result<Vec<Basket>, ClientError> {
        let mut request = ApiRequest::get("/api/basket");
        if let Some(store) = store {
            request = request.query("commerce_id", store);
        }
        self.send(request).await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_expiring_products(&self) -> Result<Vec<ExpiringProduct>, ClientError> {
        self.send(ApiRequest::get("/api/expiring")).await
    }

    // =========================================================================
    // Favorites
    // =========================================================================

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_favorite_stores(&self) -> Result<Vec<FavoriteStore>, ClientError> {
        self.send(ApiRequest::get("/api/favorite/commerce")).await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_favorite_products(&self) -> Result<Vec<FavoriteProduct>, ClientError> {
        self.send(ApiRequest::get("/api/favorite/product")).await
    }

    /// Favorite (`POST`) or unfavorite (`DELETE`) a store.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn set_store_favorite(
        &self,
        store: &StoreId,
        favorite: bool,
    ) -> Result<(), ClientError> {
        let path = format!("/api/commerce/{store}/favorite");
        let request = if favorite {
            ApiRequest::post(path)
        } else {
            ApiRequest::delete(path)
        };
        self.send_unit(request).await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn remove_product_favorite(&self, product: &ProductId) -> Result<(), ClientError> {
        self.send_unit(ApiRequest::delete(format!("/api/product/{product}/favorite")))
            .await
    }

    // =========================================================================
    // Cart & Orders
    // =========================================================================

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> Result<Vec<CartItem>, ClientError> {
        self.send(ApiRequest::get("/api/shop_cart")).await
    }

    /// Replace the whole cart.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn replace_cart(&self, items: &[CartItem]) -> Result<(), ClientError> {
        self.send_unit(ApiRequest::patch("/api/shop_cart").json(json!({ "products": items })))
            .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_orders(&self) -> Result<Vec<Order>, ClientError> {
        self.send(ApiRequest::get("/api/orders")).await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_order(&self, order: &OrderId) -> Result<Order, ClientError> {
        self.send(ApiRequest::get(format!("/api/orders/{order}")))
            .await
    }

    /// Create an order from explicit lines.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn create_order(&self, lines: &[OrderLine]) -> Result<PlacedOrder, ClientError> {
        self.send(ApiRequest::post("/api/orders").json(json!({ "products": lines })))
            .await
    }

    /// Register a payment preference and get the hosted checkout link.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, preference), fields(order = %preference.order))]
    pub async fn create_payment_preference(
        &self,
        preference: &PaymentPreference,
    ) -> Result<CheckoutSession, ClientError> {
        let body = serde_json::to_value(preference)?;
        self.send(ApiRequest::post("/api/payment/createpreference").json(body))
            .await
    }

    // =========================================================================
    // Addresses & Profile
    // =========================================================================

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_addresses(&self) -> Result<Vec<Address>, ClientError> {
        let user_id = self.user_id().await?;
        self.send(ApiRequest::get(format!("/api/user/{user_id}/addresses")))
            .await
    }

    /// The active delivery address; `None` when the user has not picked one.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_active_address(&self) -> Result<Option<Address>, ClientError> {
        let user_id = self.user_id().await?;
        let active: Option<ActiveAddress> = self
            .send(ApiRequest::get(format!("/api/user/{user_id}/activeaddress")))
            .await?;
        Ok(active.map(Address::from))
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, address))]
    pub async fn create_address(&self, address: &NewAddress) -> Result<Address, ClientError> {
        let user_id = self.user_id().await?;
        let body = serde_json::to_value(address)?;
        self.send(ApiRequest::post(format!("/api/user/{user_id}/addresses")).json(body))
            .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, address), fields(address = %address.id))]
    pub async fn update_address(&self, address: &Address) -> Result<(), ClientError> {
        let user_id = self.user_id().await?;
        let body = serde_json::to_value(address)?;
        self.send_unit(
            ApiRequest::patch(format!("/api/user/{user_id}/addresses/{}", address.id)).json(body),
        )
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn select_address(&self, address: &AddressId) -> Result<(), ClientError> {
        let user_id = self.user_id().await?;
        self.send_unit(ApiRequest::post(format!(
            "/api/user/{user_id}/addresses/{address}"
        )))
        .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn delete_address(&self, address: &AddressId) -> Result<(), ClientError> {
        let user_id = self.user_id().await?;
        self.send_unit(ApiRequest::delete(format!(
            "/api/user/{user_id}/addresses/{address}"
        )))
        .await
    }

    /// The signed-in user's profile. The backend wraps it in a one-element
    /// array; a bare object is accepted too.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_user(&self) -> Result<UserData, ClientError> {
        let user_id = self.user_id().await?;
        let value = self
            .send_value(ApiRequest::get(format!("/api/user/{user_id}")))
            .await?;
        let profile = match value {
            Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
            Value::Array(_) => {
                return Err(ClientError::Decode("empty user response".to_string()));
            }
            other => other,
        };
        Ok(serde_json::from_value(profile)?)
    }

    /// Patch the profile. The backend may answer 2xx with `false` or
    /// `{"success": false}` to report a rejected update.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rejected` for an in-band failure, or the mapped
    /// transport error.
    #[instrument(skip(self, update))]
    pub async fn update_user(&self, update: &UserUpdate) -> Result<(), ClientError> {
        let user_id = self.user_id().await?;
        let body = serde_json::to_value(update)?;
        let value = self
            .send_value(ApiRequest::patch(format!("/api/user/{user_id}")).json(body))
            .await?;
        if value == Value::Bool(false) || value.get("success") == Some(&Value::Bool(false)) {
            return Err(ClientError::Rejected(
                "profile update refused by server".to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Ratings
    // =========================================================================

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_store_ratings(&self, store: &StoreId) -> Result<Vec<Rating>, ClientError> {
        self.send(ApiRequest::get(format!("/api/rating/{store}/commerce")))
            .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_order_rating(&self, order: &OrderId) -> Result<Vec<Rating>, ClientError> {
        self.send(ApiRequest::get(format!("/api/rating/{order}")))
            .await
    }

    /// Raw rating-prompt status for an order.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_rating_status(&self, order: &OrderId) -> Result<Value, ClientError> {
        self.send_value(ApiRequest::get(format!("/api/rating/{order}/ratingStatus")))
            .await
    }

    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, rating), fields(stars = rating.stars))]
    pub async fn submit_rating(
        &self,
        order: &OrderId,
        rating: &RatingSubmission,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_value(rating)?;
        self.send_unit(ApiRequest::post(format!("/api/rating/{order}")).json(body))
            .await
    }

    /// Dismiss the rating prompt for an order.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn stop_rating(&self, order: &OrderId) -> Result<(), ClientError> {
        self.send_unit(ApiRequest::post(format!("/api/rating/{order}/stopRating")))
            .await
    }

    // =========================================================================
    // Chat
    // =========================================================================

    /// Message history of an order's chat channel.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self))]
    pub async fn fetch_messages(&self, order: &OrderId) -> Result<Vec<ChatMessage>, ClientError> {
        self.send(ApiRequest::get("/pusher/messages").query("channel", chat_channel(order)))
            .await
    }

    /// Publish a message through the backend trigger.
    ///
    /// # Errors
    ///
    /// Returns the mapped [`ClientError`] on failure.
    #[instrument(skip(self, message), fields(order = %message.order_id))]
    pub async fn publish_message(&self, message: &ChatMessage) -> Result<(), ClientError> {
        let body = serde_json::to_value(TriggerRequest::new_message(message.clone()))?;
        self.send_unit(ApiRequest::post("/pusher/trigger").json(body))
            .await
    }
}
