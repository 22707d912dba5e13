//! Cart edits.
//!
//! The backend replaces the cart wholesale, so every edit is computed on the
//! cached [`Cart`] and the resulting list is sent back. All cart edits share
//! the `cart` entity and run strictly one after another.

use regusto_core::{Cart, CartError, CartItem, CartLineRef};
use tracing::instrument;

use crate::cache::{QueryCache, QueryKey};
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

pub(super) const CART_ENTITY: &str = "cart";

pub(super) fn cached_cart(cache: &QueryCache) -> Cart {
    cache.get_data(&QueryKey::cart_items()).unwrap_or_default()
}

impl ClientContext {
    /// Add `item` to the cart, merging with an existing line for the same
    /// product instance or basket. `available` is the store's stock for the
    /// line. Returns the line's new quantity.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` without sending anything when the
    /// item is malformed or exceeds stock; otherwise the request error after
    /// rolling back.
    #[instrument(skip(self, item), fields(line = ?item.line_ref(), quantity = item.quantity))]
    pub async fn add_to_cart(&self, item: CartItem, available: u32) -> Result<u32, ClientError> {
        // Edits are computed on the whole cart, so it must be cached first.
        self.cart().await?;

        let quantity = item.quantity;
        let line = item.line_ref();
        let mutation = Mutation::new("add_to_cart", CART_ENTITY)
            .precheck({
                let line = line.clone();
                move |cache| {
                    if quantity == 0 {
                        return Err(CartError::ZeroQuantity.into());
                    }
                    let line = line.ok_or(CartError::MissingReference)?;
                    Ok(cached_cart(cache).check_stock(&line, quantity, available)?)
                }
            })
            .optimistic(QueryKey::cart_items(), move |cart: &mut Cart| {
                cart.add(item)?;
                Ok(())
            })
            .optimistic(QueryKey::cart_item_count(), move |count: &mut u32| {
                *count = count.saturating_add(quantity);
                Ok(())
            });

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |cache| {
                let cart = cached_cart(cache);
                let merged = line.and_then(|line| cart.get(&line).map(|i| i.quantity));
                async move {
                    gateway.replace_cart(cart.items()).await?;
                    Ok(merged.unwrap_or(quantity))
                }
            })
            .await
    }

    /// Change a line's quantity by `delta`; reaching zero removes the line.
    /// Returns the new quantity.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the line is not in the cart,
    /// otherwise the request error after rolling back.
    #[instrument(skip(self))]
    pub async fn change_cart_quantity(
        &self,
        line: &CartLineRef,
        delta: i64,
    ) -> Result<u32, ClientError> {
        self.cart().await?;

        let mutation = Mutation::new("change_cart_quantity", CART_ENTITY)
            .precheck({
                let line = line.clone();
                move |cache| match cached_cart(cache).get(&line) {
                    Some(_) => Ok(()),
                    None => Err(CartError::NotInCart(line).into()),
                }
            })
            .optimistic(QueryKey::cart_items(), {
                let line = line.clone();
                move |cart: &mut Cart| {
                    cart.change_quantity(&line, delta)?;
                    Ok(())
                }
            })
            .touch(QueryKey::cart_item_count());

        let gateway = self.gateway().clone();
        let line = line.clone();
        self.mutations()
            .run(mutation, move |cache| {
                let cart = cached_cart(cache);
                let quantity = cart.get(&line).map_or(0, |i| i.quantity);
                async move {
                    gateway.replace_cart(cart.items()).await?;
                    Ok(quantity)
                }
            })
            .await
    }

    /// Remove a line from the cart.
    ///
    /// # Errors
    ///
    /// Returns the request error after rolling back.
    #[instrument(skip(self))]
    pub async fn remove_cart_line(&self, line: &CartLineRef) -> Result<(), ClientError> {
        self.cart().await?;

        let mutation = Mutation::new("remove_cart_line", CART_ENTITY)
            .optimistic(QueryKey::cart_items(), {
                let line = line.clone();
                move |cart: &mut Cart| {
                    cart.remove(&line);
                    Ok(())
                }
            })
            .touch(QueryKey::cart_item_count());

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |cache| {
                let cart = cached_cart(cache);
                async move { gateway.replace_cart(cart.items()).await }
            })
            .await
    }
}
