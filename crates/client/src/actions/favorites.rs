//! Store and product favorites.

use std::sync::{Arc, OnceLock};

use regusto_core::{ProductId, StoreId};
use serde_json::{Value, json};
use tracing::instrument;

use super::{edit_matching, remove_matching, same_id};
use crate::cache::{QueryCache, QueryKey, Resource};
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

/// A favorite shown on the favorites screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FavoriteTarget {
    Store(StoreId),
    Product(ProductId),
}

/// Store lists that carry an `isFavorite` flag.
const STORE_LISTS: [fn() -> QueryKey; 2] = [QueryKey::stores, QueryKey::nearby_stores];

/// Cached favorite flag of `store`, looked up in the store lists first and
/// the favorites list second.
fn cached_favorite(cache: &QueryCache, store: &StoreId) -> Option<bool> {
    let id = store.as_str();
    STORE_LISTS
        .iter()
        .filter_map(|key| cache.get(&key())?.data)
        .find_map(|list| {
            list.as_array()?
                .iter()
                .find(|s| same_id(s.get("id"), id))
                .and_then(|s| s.get("isFavorite"))
                .and_then(Value::as_bool)
        })
        .or_else(|| {
            let favorites = cache.get(&QueryKey::favorites())?.data?;
            Some(
                favorites
                    .as_array()?
                    .iter()
                    .any(|f| same_id(f.get("commerce_id"), id)),
            )
        })
}

impl ClientContext {
    /// Flip the favorite flag of `store`.
    ///
    /// The wanted flag is read from the cache once earlier mutations on the
    /// store have settled. It is written to every cached store list and to
    /// the favorites list, and everything snaps back if the server refuses.
    /// Returns the new flag.
    ///
    /// # Errors
    ///
    /// Returns the request error after rolling back.
    #[instrument(skip(self))]
    pub async fn toggle_store_favorite(&self, store: &StoreId) -> Result<bool, ClientError> {
        let wanted = Arc::new(OnceLock::new());
        let id = store.to_string();

        let mut mutation = Mutation::new("toggle_store_favorite", format!("favorite:store:{store}"))
            .precheck({
                let wanted = wanted.clone();
                let store = store.clone();
                move |cache| {
                    let _ = wanted.set(!cached_favorite(cache, &store).unwrap_or(false));
                    Ok(())
                }
            });
        for key in STORE_LISTS {
            let (id, wanted) = (id.clone(), wanted.clone());
            mutation = mutation.optimistic_value(key(), move |stores| {
                let favorite = wanted.get().copied().unwrap_or(true);
                edit_matching(stores, "id", &id, |s| s["isFavorite"] = Value::Bool(favorite));
            });
        }
        let mutation = mutation.optimistic_value(QueryKey::favorites(), {
            let wanted = wanted.clone();
            move |favorites| {
                remove_matching(favorites, "commerce_id", &id);
                if wanted.get().copied().unwrap_or(true)
                    && let Value::Array(items) = favorites
                {
                    items.push(json!({ "commerce_id": id }));
                }
            }
        });

        let gateway = self.gateway().clone();
        let store = store.clone();
        self.mutations()
            .run(mutation, move |_| {
                let favorite = wanted.get().copied().unwrap_or(true);
                async move {
                    gateway.set_store_favorite(&store, favorite).await?;
                    Ok(favorite)
                }
            })
            .await
    }

    /// Remove a favorite from the favorites screen.
    ///
    /// # Errors
    ///
    /// Returns the request error after rolling back.
    #[instrument(skip(self))]
    pub async fn remove_favorite(&self, target: &FavoriteTarget) -> Result<(), ClientError> {
        let gateway = self.gateway().clone();
        match target.clone() {
            FavoriteTarget::Store(store) => {
                let id = store.to_string();
                let mut mutation =
                    Mutation::new("remove_store_favorite", format!("favorite:store:{store}"))
                        .optimistic_value(QueryKey::favorites(), {
                            let id = id.clone();
                            move |favorites| remove_matching(favorites, "commerce_id", &id)
                        });
                for key in STORE_LISTS {
                    let id = id.clone();
                    mutation = mutation.optimistic_value(key(), move |stores| {
                        edit_matching(stores, "id", &id, |s| s["isFavorite"] = Value::Bool(false));
                    });
                }
                self.mutations()
                    .run(mutation, move |_| async move {
                        gateway.set_store_favorite(&store, false).await
                    })
                    .await
            }
            FavoriteTarget::Product(product) => {
                let id = product.to_string();
                let mutation =
                    Mutation::new("remove_product_favorite", format!("favorite:product:{product}"))
                        .optimistic_value(QueryKey::favorite_products(), move |favorites| {
                            remove_matching(favorites, "product_id", &id);
                        })
                        .invalidates(Resource::Products);
                self.mutations()
                    .run(mutation, move |_| async move {
                        gateway.remove_product_favorite(&product).await
                    })
                    .await
            }
        }
    }
}
