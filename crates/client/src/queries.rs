//! Typed queries.
//!
//! Each query reads through the cache under its [`QueryKey`], loading from
//! the gateway when the entry is missing, stale or invalidated.

use std::future::Future;

use regusto_core::{
    Address, Basket, Cart, ChatMessage, ExpiringProduct, FavoriteProduct, FavoriteStore, Order,
    OrderId, Product, ProductId, ProductInstance, Rating, Store, StoreId, UserData,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::cache::QueryKey;
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::gateway::Gateway;

impl ClientContext {
    async fn query<T, F, Fut>(&self, key: QueryKey, load: F) -> Result<T, ClientError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(Gateway) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
    {
        let gateway = self.gateway().clone();
        self.cache().fetch(key, move || load(gateway.clone())).await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn stores(&self) -> Result<Vec<Store>, ClientError> {
        self.query(QueryKey::stores(), |gateway| async move {
            gateway.fetch_stores().await
        })
        .await
    }

    /// Stores near the active address; empty when no address is selected.
    ///
    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn nearby_stores(&self) -> Result<Vec<Store>, ClientError> {
        self.query(QueryKey::nearby_stores(), |gateway| async move {
            match gateway.fetch_active_address().await? {
                Some(address) => {
                    gateway
                        .fetch_nearby_stores(address.latitude, address.longitude)
                        .await
                }
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn favorite_stores(&self) -> Result<Vec<FavoriteStore>, ClientError> {
        self.query(QueryKey::favorites(), |gateway| async move {
            gateway.fetch_favorite_stores().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn favorite_products(&self) -> Result<Vec<FavoriteProduct>, ClientError> {
        self.query(QueryKey::favorite_products(), |gateway| async move {
            gateway.fetch_favorite_products().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn products(&self, store: &StoreId) -> Result<Vec<Product>, ClientError> {
        let store = store.clone();
        self.query(QueryKey::products(&store), move |gateway| {
            let store = store.clone();
            async move { gateway.fetch_products(&store).await }
        })
        .await
    }

    /// Baskets of one store, or of every store.
    ///
    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn baskets(&self, store: Option<&StoreId>) -> Result<Vec<Basket>, ClientError> {
        let store = store.cloned();
        self.query(QueryKey::baskets(store.as_ref()), move |gateway| {
            let store = store.clone();
            async move { gateway.fetch_baskets(store.as_ref()).await }
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn product_instances(
        &self,
        product: &ProductId,
    ) -> Result<Vec<ProductInstance>, ClientError> {
        let product = product.clone();
        self.query(QueryKey::product_instances(&product), move |gateway| {
            let product = product.clone();
            async move { gateway.fetch_product_instances(&product).await }
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn expiring_products(&self) -> Result<Vec<ExpiringProduct>, ClientError> {
        self.query(QueryKey::expiring_products(), |gateway| async move {
            gateway.fetch_expiring_products().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn cart(&self) -> Result<Cart, ClientError> {
        self.query(QueryKey::cart_items(), |gateway| async move {
            gateway.fetch_cart().await.map(Cart::new)
        })
        .await
    }

    /// Units in the cart, for the header badge.
    ///
    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn cart_item_count(&self) -> Result<u32, ClientError> {
        self.query(QueryKey::cart_item_count(), |gateway| async move {
            Ok(Cart::new(gateway.fetch_cart().await?).item_count())
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn orders(&self) -> Result<Vec<Order>, ClientError> {
        self.query(QueryKey::orders(), |gateway| async move {
            gateway.fetch_orders().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn order(&self, order: &OrderId) -> Result<Order, ClientError> {
        let order = order.clone();
        self.query(QueryKey::order(&order), move |gateway| {
            let order = order.clone();
            async move { gateway.fetch_order(&order).await }
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn saved_addresses(&self) -> Result<Vec<Address>, ClientError> {
        self.query(QueryKey::saved_addresses(), |gateway| async move {
            gateway.fetch_addresses().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn current_address(&self) -> Result<Option<Address>, ClientError> {
        self.query(QueryKey::current_address(), |gateway| async move {
            gateway.fetch_active_address().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn user_data(&self) -> Result<UserData, ClientError> {
        self.query(QueryKey::user_data(), |gateway| async move {
            gateway.fetch_user().await
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn store_ratings(&self, store: &StoreId) -> Result<Vec<Rating>, ClientError> {
        let store = store.clone();
        self.query(QueryKey::ratings(&store), move |gateway| {
            let store = store.clone();
            async move { gateway.fetch_store_ratings(&store).await }
        })
        .await
    }

    /// Ratings already left for an order.
    ///
    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn rating_info(&self, order: &OrderId) -> Result<Vec<Rating>, ClientError> {
        let order = order.clone();
        self.query(QueryKey::rating_info(&order), move |gateway| {
            let order = order.clone();
            async move { gateway.fetch_order_rating(&order).await }
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn rating_status(&self, order: &OrderId) -> Result<Value, ClientError> {
        let order = order.clone();
        self.query(QueryKey::rating_status(&order), move |gateway| {
            let order = order.clone();
            async move { gateway.fetch_rating_status(&order).await }
        })
        .await
    }

    /// Chat history of an order. Live messages are appended by the realtime
    /// adapter.
    ///
    /// # Errors
    ///
    /// Returns the load error once retries are exhausted.
    pub async fn messages(&self, order: &OrderId) -> Result<Vec<ChatMessage>, ClientError> {
        let order = order.clone();
        self.query(QueryKey::messages(&order), move |gateway| {
            let order = order.clone();
            async move { gateway.fetch_messages(&order).await }
        })
        .await
    }
}
