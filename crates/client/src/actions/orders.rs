//! Order placement and payment.
//!
//! Placing an order cannot be undone, so nothing here is optimistic: the
//! cart stays as it is until the server confirms, and only then are the cart
//! and order lists invalidated.

use regusto_core::{Cart, OrderId, PaymentPreference};
use tracing::{info, instrument};
use url::Url;

use super::cart::{CART_ENTITY, cached_cart};
use crate::cache::QueryKey;
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

/// Preference `auto_return` mode: come back as soon as payment is approved.
const AUTO_RETURN: &str = "approved";
const ORDER_ID_PARAM: &str = "orderId";

/// A placed order awaiting payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub order_id: OrderId,
    /// Hosted payment page to open in an external browser
    pub init_point: String,
}

/// The order a payment deep link reports back on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReturn {
    pub order_id: OrderId,
}

impl PaymentReturn {
    /// Extract the order id from a payment return link, either
    /// `scheme://host/path?orderId=7` or `scheme://payment-success/7`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` if the link is malformed or carries
    /// no order id.
    pub fn from_deep_link(link: &str) -> Result<Self, ClientError> {
        let url = Url::parse(link)
            .map_err(|e| ClientError::Validation(format!("invalid return link: {e}")))?;

        let from_query = url
            .query_pairs()
            .find(|(key, _)| key == ORDER_ID_PARAM)
            .map(|(_, value)| value.into_owned());
        let from_path = || {
            let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
            let last = segments.next_back()?;
            let under_success = url.host_str() == Some("payment-success")
                || segments.next_back() == Some("payment-success");
            under_success.then(|| last.to_string())
        };

        from_query
            .or_else(from_path)
            .filter(|id| !id.is_empty())
            .map(|id| Self {
                order_id: OrderId::new(id),
            })
            .ok_or_else(|| ClientError::Validation("return link carries no order id".to_string()))
    }
}

/// Return link for `order`: the configured deep link plus `?orderId=`.
fn return_link(base: &str, order: &OrderId) -> Result<String, ClientError> {
    let mut url = Url::parse(base)
        .map_err(|e| ClientError::Validation(format!("invalid return url: {e}")))?;
    url.query_pairs_mut()
        .append_pair(ORDER_ID_PARAM, order.as_str());
    Ok(url.into())
}

impl ClientContext {
    /// Place an order for the current cart. The request is sent exactly once.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` for an empty cart, or the request
    /// error. The cart is untouched on failure.
    #[instrument(skip(self))]
    pub async fn place_order(&self) -> Result<OrderId, ClientError> {
        let (order_id, _) = self.place_cart_order().await?;
        Ok(order_id)
    }

    /// Place an order for the cart as cached once the cart lock is held.
    /// Returns the order id and the cart it was placed for.
    async fn place_cart_order(&self) -> Result<(OrderId, Cart), ClientError> {
        self.cart().await?;

        let mutation = Mutation::new("place_order", CART_ENTITY)
            .precheck(|cache| {
                if cached_cart(cache).is_empty() {
                    return Err(ClientError::Validation("cart is empty".to_string()));
                }
                Ok(())
            })
            .invalidates(QueryKey::cart_items())
            .invalidates(QueryKey::cart_item_count())
            .invalidates(QueryKey::orders());

        let gateway = self.gateway().clone();
        let (order_id, cart) = self
            .mutations()
            .run(mutation, move |cache| {
                let cart = cached_cart(cache);
                async move {
                    let placed = gateway.create_order(&cart.order_lines()).await?;
                    Ok((placed.order_id, cart))
                }
            })
            .await?;

        info!(order_id = %order_id, lines = cart.len(), "Order placed");
        Ok((order_id, cart))
    }

    /// Place an order for the current cart and open a payment preference
    /// for it.
    ///
    /// # Errors
    ///
    /// Returns the order or preference error. If the preference fails the
    /// order stays placed.
    #[instrument(skip(self))]
    pub async fn checkout(&self) -> Result<Checkout, ClientError> {
        let (order_id, cart) = self.place_cart_order().await?;

        let preference = PaymentPreference {
            items: cart.preference_items(),
            order: order_id.clone(),
            auto_return: AUTO_RETURN.to_string(),
            return_url: return_link(&self.config().return_url, &order_id)?,
        };
        let session = self
            .gateway()
            .create_payment_preference(&preference)
            .await?;

        info!(order_id = %order_id, "Payment preference created");
        Ok(Checkout {
            order_id,
            init_point: session.init_point,
        })
    }

    /// Finish a paid order: empty the cart on the server and refresh the
    /// cart and order views.
    ///
    /// # Errors
    ///
    /// Returns the request error; the cached cart is untouched on failure.
    #[instrument(skip(self))]
    pub async fn complete_payment(&self, order: &OrderId) -> Result<(), ClientError> {
        let mutation = Mutation::new("complete_payment", CART_ENTITY)
            .invalidates(QueryKey::cart_items())
            .invalidates(QueryKey::cart_item_count())
            .invalidates(QueryKey::orders())
            .invalidates(QueryKey::order(order));

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |_| async move { gateway.replace_cart(&[]).await })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_from_query() {
        let link = PaymentReturn::from_deep_link("regusto://payment-success?orderId=77").unwrap();
        assert_eq!(link.order_id, OrderId::new("77"));
    }

    #[test]
    fn test_order_id_from_path() {
        let link = PaymentReturn::from_deep_link("regusto://payment-success/91").unwrap();
        assert_eq!(link.order_id, OrderId::new("91"));

        let link =
            PaymentReturn::from_deep_link("https://regusto.app/payment-success/92").unwrap();
        assert_eq!(link.order_id, OrderId::new("92"));
    }

    #[test]
    fn test_link_without_order_is_rejected() {
        assert!(matches!(
            PaymentReturn::from_deep_link("regusto://payment-success"),
            Err(ClientError::Validation(_))
        ));
        assert!(PaymentReturn::from_deep_link("regusto://home/3").is_err());
        assert!(PaymentReturn::from_deep_link("not a link").is_err());
    }

    #[test]
    fn test_return_link_appends_order() {
        let link = return_link("regusto://payment-success", &OrderId::new("5")).unwrap();
        assert_eq!(link, "regusto://payment-success?orderId=5");
        assert_eq!(PaymentReturn::from_deep_link(&link).unwrap().order_id, OrderId::new("5"));
    }
}
