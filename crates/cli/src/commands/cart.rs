//! Cart commands.

use regusto_client::ClientContext;
use regusto_core::{CartItem, CartLineRef, ProductId, ProductInstanceId};

use super::{CliError, emit};

pub async fn show(ctx: &ClientContext) -> Result<(), CliError> {
    let cart = ctx.cart().await?;
    if cart.is_empty() {
        emit("cart is empty");
        return Ok(());
    }
    for item in cart.items() {
        let line = item
            .line_ref()
            .map_or_else(|| "?".to_string(), |line| line.to_string());
        emit(format_args!(
            "{line:<20} {:<30} x{:<3} {}",
            item.name,
            item.quantity,
            item.line_total().display()
        ));
    }
    emit(format_args!(
        "{} items, total {}",
        cart.item_count(),
        cart.total().display()
    ));
    Ok(())
}

/// Add `quantity` of a product instance, priced and stock-checked from the
/// product's instance list.
pub async fn add(
    ctx: &ClientContext,
    product: &str,
    instance: &str,
    quantity: u32,
) -> Result<(), CliError> {
    let instance_id = ProductInstanceId::new(instance);
    let instances = ctx.product_instances(&ProductId::new(product)).await?;
    let found = instances
        .into_iter()
        .find(|i| i.id == instance_id)
        .ok_or_else(|| CliError::NotFound(format!("instance {instance} of product {product}")))?;

    let item = CartItem::for_instance(
        instance_id,
        format!("product {product}"),
        found.price,
        quantity,
    );
    let total = ctx.add_to_cart(item, found.quantity).await?;
    emit(format_args!("instance {instance}: {total} in cart"));
    Ok(())
}

pub async fn change(ctx: &ClientContext, instance: &str, delta: i64) -> Result<(), CliError> {
    let line = CartLineRef::Instance(ProductInstanceId::new(instance));
    let quantity = ctx.change_cart_quantity(&line, delta).await?;
    if quantity == 0 {
        emit(format_args!("instance {instance} removed"));
    } else {
        emit(format_args!("instance {instance}: {quantity} in cart"));
    }
    Ok(())
}

pub async fn remove(ctx: &ClientContext, instance: &str) -> Result<(), CliError> {
    let line = CartLineRef::Instance(ProductInstanceId::new(instance));
    ctx.remove_cart_line(&line).await?;
    emit(format_args!("instance {instance} removed"));
    Ok(())
}
