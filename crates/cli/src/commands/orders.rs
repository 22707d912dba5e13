//! Orders, payment and ratings.

use regusto_client::{ClientContext, PaymentReturn};
use regusto_core::{OrderId, RatingSubmission};

use super::{CliError, emit};

pub async fn list(ctx: &ClientContext) -> Result<(), CliError> {
    let orders = ctx.orders().await?;
    if orders.is_empty() {
        emit("no orders");
    }
    for order in &orders {
        let ratable = if order.is_ratable() { "  (rate me)" } else { "" };
        emit(format_args!(
            "{:>6}  {}  {:<10} {}{ratable}",
            order.order_id,
            order.created_at.format("%Y-%m-%d %H:%M"),
            order.status,
            order.price.display()
        ));
    }
    Ok(())
}

pub async fn checkout(ctx: &ClientContext) -> Result<(), CliError> {
    let checkout = ctx.checkout().await?;
    emit(format_args!("order {} placed", checkout.order_id));
    emit(format_args!("pay at {}", checkout.init_point));
    Ok(())
}

pub async fn paid(ctx: &ClientContext, link: &str) -> Result<(), CliError> {
    let PaymentReturn { order_id } = PaymentReturn::from_deep_link(link)?;
    ctx.complete_payment(&order_id).await?;
    emit(format_args!("order {order_id} paid, cart cleared"));
    Ok(())
}

pub async fn rate(
    ctx: &ClientContext,
    order: &str,
    stars: u8,
    description: String,
) -> Result<(), CliError> {
    let order = OrderId::new(order);
    ctx.submit_rating(&order, RatingSubmission { stars, description })
        .await?;
    emit(format_args!("order {order} rated {stars}/{}", RatingSubmission::MAX_STARS));
    Ok(())
}
