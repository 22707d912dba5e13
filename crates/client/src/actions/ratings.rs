//! Order ratings.

use regusto_core::{Order, OrderId, RatingSubmission};
use tracing::instrument;

use crate::cache::{QueryCache, QueryKey, Resource};
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

fn order_entity(order: &OrderId) -> String {
    format!("order:{order}")
}

/// Flip the rating flag of `order` wherever it is cached.
fn mark_rated(cache: &QueryCache, order: &OrderId) -> Result<(), ClientError> {
    cache.update(&QueryKey::order(order), |cached: &mut Order| {
        Ok(cached.mark_rated()?)
    })?;
    cache.update(&QueryKey::orders(), |orders: &mut Vec<Order>| {
        if let Some(cached) = orders
            .iter_mut()
            .find(|o| &o.order_id == order && o.is_ratable())
        {
            cached.mark_rated()?;
        }
        Ok(())
    })?;
    Ok(())
}

impl ClientContext {
    /// Rate a completed order. Allowed once per order.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` without sending anything when the
    /// stars are out of range or the order is not completed and unrated;
    /// otherwise the request error.
    #[instrument(skip(self, rating), fields(stars = rating.stars))]
    pub async fn submit_rating(
        &self,
        order: &OrderId,
        rating: RatingSubmission,
    ) -> Result<(), ClientError> {
        self.order(order).await?;

        let mutation = Mutation::new("submit_rating", order_entity(order))
            .precheck({
                let order = order.clone();
                let valid = rating.is_valid();
                move |cache| {
                    if !valid {
                        return Err(ClientError::Validation(format!(
                            "stars must be between 1 and {}",
                            RatingSubmission::MAX_STARS
                        )));
                    }
                    let ratable = cache
                        .get_data::<Order>(&QueryKey::order(&order))
                        .is_some_and(|o| o.is_ratable());
                    if !ratable {
                        return Err(ClientError::Validation(format!(
                            "order {order} cannot be rated"
                        )));
                    }
                    Ok(())
                }
            })
            .on_success({
                let order = order.clone();
                move |cache, _: &()| mark_rated(cache, &order)
            })
            .invalidates(QueryKey::rating_status(order))
            .invalidates(QueryKey::rating_info(order))
            .invalidates(Resource::Ratings);

        let gateway = self.gateway().clone();
        let order = order.clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.submit_rating(&order, &rating).await
            })
            .await
    }

    /// Dismiss the rating prompt of an order without rating it.
    ///
    /// # Errors
    ///
    /// Returns the request error.
    #[instrument(skip(self))]
    pub async fn stop_rating(&self, order: &OrderId) -> Result<(), ClientError> {
        let mutation = Mutation::new("stop_rating", order_entity(order))
            .invalidates(QueryKey::rating_status(order));

        let gateway = self.gateway().clone();
        let order = order.clone();
        self.mutations()
            .run(mutation, move |_| async move { gateway.stop_rating(&order).await })
            .await
    }
}
