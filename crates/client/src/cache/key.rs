//! Query keys and invalidation matchers.

use std::fmt;

use regusto_core::{OrderId, ProductId, StoreId};

/// Resource family a cached query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Stores,
    NearbyStores,
    Favorites,
    FavoriteProducts,
    Products,
    Baskets,
    ProductInstances,
    ExpiringProducts,
    CartItems,
    CartItemCount,
    Orders,
    Order,
    SavedAddresses,
    CurrentAddress,
    UserData,
    Ratings,
    RatingInfo,
    RatingStatus,
    Messages,
}

impl Resource {
    /// Stable name used in logs and key display.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stores => "stores",
            Self::NearbyStores => "nearbyStores",
            Self::Favorites => "favorites",
            Self::FavoriteProducts => "favoriteProducts",
            Self::Products => "products",
            Self::Baskets => "baskets",
            Self::ProductInstances => "productInstances",
            Self::ExpiringProducts => "expiringProducts",
            Self::CartItems => "cartItems",
            Self::CartItemCount => "cartItemCount",
            Self::Orders => "orders",
            Self::Order => "order",
            Self::SavedAddresses => "savedAddresses",
            Self::CurrentAddress => "currentAddress",
            Self::UserData => "userData",
            Self::Ratings => "ratings",
            Self::RatingInfo => "ratingInfo",
            Self::RatingStatus => "ratingStatus",
            Self::Messages => "messages",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of a cached query: a resource plus an optional scope such as a
/// store or order id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: Resource,
    scope: Option<String>,
}

impl QueryKey {
    #[must_use]
    pub const fn new(resource: Resource) -> Self {
        Self {
            resource,
            scope: None,
        }
    }

    #[must_use]
    pub fn scoped(resource: Resource, scope: impl fmt::Display) -> Self {
        Self {
            resource,
            scope: Some(scope.to_string()),
        }
    }

    #[must_use]
    pub const fn resource(&self) -> Resource {
        self.resource
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[must_use]
    pub const fn stores() -> Self {
        Self::new(Resource::Stores)
    }

    #[must_use]
    pub const fn nearby_stores() -> Self {
        Self::new(Resource::NearbyStores)
    }

    #[must_use]
    pub const fn favorites() -> Self {
        Self::new(Resource::Favorites)
    }

    #[must_use]
    pub const fn favorite_products() -> Self {
        Self::new(Resource::FavoriteProducts)
    }

    #[must_use]
    pub fn products(store: &StoreId) -> Self {
        Self::scoped(Resource::Products, store)
    }

    /// Baskets of one store, or of all stores when `store` is `None`.
    #[must_use]
    pub fn baskets(store: Option<&StoreId>) -> Self {
        store.map_or_else(
            || Self::new(Resource::Baskets),
            |store| Self::scoped(Resource::Baskets, store),
        )
    }

    #[must_use]
    pub fn product_instances(product: &ProductId) -> Self {
        Self::scoped(Resource::ProductInstances, product)
    }

    #[must_use]
    pub const fn expiring_products() -> Self {
        Self::new(Resource::ExpiringProducts)
    }

    #[must_use]
    pub const fn cart_items() -> Self {
        Self::new(Resource::CartItems)
    }

    #[must_use]
    pub const fn cart_item_count() -> Self {
        Self::new(Resource::CartItemCount)
    }

    #[must_use]
    pub const fn orders() -> Self {
        Self::new(Resource::Orders)
    }

    #[must_use]
    pub fn order(order: &OrderId) -> Self {
        Self::scoped(Resource::Order, order)
    }

    #[must_use]
    pub const fn saved_addresses() -> Self {
        Self::new(Resource::SavedAddresses)
    }

    #[must_use]
    pub const fn current_address() -> Self {
        Self::new(Resource::CurrentAddress)
    }

    #[must_use]
    pub const fn user_data() -> Self {
        Self::new(Resource::UserData)
    }

    #[must_use]
    pub fn ratings(store: &StoreId) -> Self {
        Self::scoped(Resource::Ratings, store)
    }

    #[must_use]
    pub fn rating_info(order: &OrderId) -> Self {
        Self::scoped(Resource::RatingInfo, order)
    }

    #[must_use]
    pub fn rating_status(order: &OrderId) -> Self {
        Self::scoped(Resource::RatingStatus, order)
    }

    #[must_use]
    pub fn messages(order: &OrderId) -> Self {
        Self::scoped(Resource::Messages, order)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}/{scope}", self.resource),
            None => write!(f, "{}", self.resource),
        }
    }
}

/// Selects the cache entries an invalidation applies to.
///
/// `Resource` is the prefix match: it covers the unscoped key and every
/// scoped key of that resource. `Scope` covers every key scoped to one id
/// whatever its resource, e.g. all entries of one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    Exact(QueryKey),
    Resource(Resource),
    Scope(String),
}

impl KeyMatch {
    /// Every key scoped to `id`.
    #[must_use]
    pub fn scope(id: impl fmt::Display) -> Self {
        Self::Scope(id.to_string())
    }

    #[must_use]
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            Self::Exact(exact) => exact == key,
            Self::Resource(resource) => key.resource == *resource,
            Self::Scope(scope) => key.scope.as_deref() == Some(scope.as_str()),
        }
    }
}

impl From<QueryKey> for KeyMatch {
    fn from(key: QueryKey) -> Self {
        Self::Exact(key)
    }
}

impl From<&QueryKey> for KeyMatch {
    fn from(key: &QueryKey) -> Self {
        Self::Exact(key.clone())
    }
}

impl From<Resource> for KeyMatch {
    fn from(resource: Resource) -> Self {
        Self::Resource(resource)
    }
}

impl fmt::Display for KeyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(key) => write!(f, "{key}"),
            Self::Resource(resource) => write!(f, "{resource}/*"),
            Self::Scope(scope) => write!(f, "*/{scope}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(QueryKey::stores().to_string(), "stores");
        assert_eq!(
            QueryKey::products(&StoreId::new("42")).to_string(),
            "products/42"
        );
        assert_eq!(QueryKey::baskets(None).to_string(), "baskets");
    }

    #[test]
    fn test_resource_match_is_prefix() {
        let all_baskets = KeyMatch::from(Resource::Baskets);
        assert!(all_baskets.matches(&QueryKey::baskets(None)));
        assert!(all_baskets.matches(&QueryKey::baskets(Some(&StoreId::new("3")))));
        assert!(!all_baskets.matches(&QueryKey::stores()));
    }

    #[test]
    fn test_scope_match_spans_resources() {
        let store = StoreId::new("42");
        let everything_for_store = KeyMatch::scope(&store);
        assert!(everything_for_store.matches(&QueryKey::products(&store)));
        assert!(everything_for_store.matches(&QueryKey::ratings(&store)));
        assert!(everything_for_store.matches(&QueryKey::baskets(Some(&store))));
        assert!(!everything_for_store.matches(&QueryKey::baskets(None)));
        assert!(!everything_for_store.matches(&QueryKey::products(&StoreId::new("4"))));
    }

    #[test]
    fn test_exact_match_ignores_siblings() {
        let one = KeyMatch::from(QueryKey::products(&StoreId::new("1")));
        assert!(one.matches(&QueryKey::products(&StoreId::new("1"))));
        assert!(!one.matches(&QueryKey::products(&StoreId::new("2"))));
    }
}
