//! Store listing and favorites.

use regusto_client::ClientContext;
use regusto_core::StoreId;

use super::{CliError, emit};

pub async fn list(ctx: &ClientContext, nearby: bool) -> Result<(), CliError> {
    let stores = if nearby {
        ctx.nearby_stores().await?
    } else {
        ctx.stores().await?
    };
    if stores.is_empty() {
        emit("no stores");
    }
    for store in &stores {
        let heart = if store.is_favorite { "*" } else { " " };
        let rating = store
            .rating
            .map_or_else(|| "-".to_string(), |r| format!("{r:.1}"));
        emit(format_args!(
            "{heart} {:>6}  {:<30} {:<16} {rating}",
            store.id, store.name, store.category
        ));
    }
    Ok(())
}

pub async fn favorite(ctx: &ClientContext, store: &str) -> Result<(), CliError> {
    let store = StoreId::new(store);
    // Load the list first so the current flag is known.
    ctx.stores().await?;
    let favorite = ctx.toggle_store_favorite(&store).await?;
    emit(format_args!(
        "store {store} {}",
        if favorite { "added to favorites" } else { "removed from favorites" }
    ));
    Ok(())
}
