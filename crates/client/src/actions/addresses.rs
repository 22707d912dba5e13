//! Saved addresses.

use regusto_core::{Address, AddressId, NewAddress};
use tracing::instrument;

use crate::cache::QueryKey;
use crate::context::ClientContext;
use crate::error::ClientError;
use crate::mutation::Mutation;

const ADDRESS_ENTITY: &str = "addresses";

impl ClientContext {
    /// Save a new address. Waits for the server before any cache change.
    ///
    /// # Errors
    ///
    /// Returns the request error.
    #[instrument(skip(self, address))]
    pub async fn add_address(&self, address: NewAddress) -> Result<Address, ClientError> {
        let mutation = Mutation::new("add_address", ADDRESS_ENTITY)
            .invalidates(QueryKey::saved_addresses())
            .invalidates(QueryKey::current_address())
            .invalidates(QueryKey::nearby_stores());

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.create_address(&address).await
            })
            .await
    }

    /// Edit an address in place, optimistically.
    ///
    /// # Errors
    ///
    /// Returns the request error after rolling back.
    #[instrument(skip(self, address), fields(address_id = %address.id))]
    pub async fn update_address(&self, address: Address) -> Result<(), ClientError> {
        let edited = address.clone();
        let mutation = Mutation::new("update_address", ADDRESS_ENTITY)
            .optimistic(
                QueryKey::saved_addresses(),
                move |addresses: &mut Vec<Address>| {
                    if let Some(slot) = addresses.iter_mut().find(|a| a.id == edited.id) {
                        *slot = edited;
                    }
                    Ok(())
                },
            )
            .invalidates(QueryKey::current_address());

        let gateway = self.gateway().clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.update_address(&address).await
            })
            .await
    }

    /// Make `address` the active delivery address. Store lists depend on it,
    /// so they are refetched afterwards.
    ///
    /// # Errors
    ///
    /// Returns the request error.
    #[instrument(skip(self))]
    pub async fn select_address(&self, address: &AddressId) -> Result<(), ClientError> {
        let mutation = Mutation::new("select_address", ADDRESS_ENTITY)
            .invalidates(QueryKey::current_address())
            .invalidates(QueryKey::nearby_stores())
            .invalidates(QueryKey::stores());

        let gateway = self.gateway().clone();
        let address = address.clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.select_address(&address).await
            })
            .await
    }

    /// Delete a saved address once the server confirms. Deleting the active
    /// address also refreshes the active address and nearby stores.
    ///
    /// # Errors
    ///
    /// Returns the request error; the cache is untouched on failure.
    #[instrument(skip(self))]
    pub async fn delete_address(&self, address: &AddressId) -> Result<(), ClientError> {
        let removed = address.clone();
        let mutation = Mutation::new("delete_address", ADDRESS_ENTITY).on_success(
            move |cache, _: &()| {
                cache.update(&QueryKey::saved_addresses(), |addresses: &mut Vec<Address>| {
                    addresses.retain(|a| a.id != removed);
                    Ok(())
                })?;
                let was_active = cache
                    .get_data::<Option<Address>>(&QueryKey::current_address())
                    .flatten()
                    .is_some_and(|active| active.id == removed);
                if was_active {
                    cache.invalidate(QueryKey::current_address());
                    cache.invalidate(QueryKey::nearby_stores());
                }
                Ok(())
            },
        );

        let gateway = self.gateway().clone();
        let address = address.clone();
        self.mutations()
            .run(mutation, move |_| async move {
                gateway.delete_address(&address).await
            })
            .await
    }
}
