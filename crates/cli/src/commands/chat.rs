//! Order chat.

use futures::StreamExt;
use regusto_client::{CUSTOMER_SENDER, ClientContext};
use regusto_core::{ChatMessage, OrderId};
use tracing::{info, warn};

use super::{CliError, emit};

fn print_message(message: &ChatMessage) {
    let who = if message.sender == CUSTOMER_SENDER {
        "you"
    } else {
        "store"
    };
    emit(format_args!("[{who}] {}", message.text));
}

/// Print the history, then every new message until Ctrl-C or the channel
/// gives up.
pub async fn tail(ctx: &ClientContext, order: &str) -> Result<(), CliError> {
    let order = OrderId::new(order);
    let mut feed = ctx.open_chat(&order).await?;
    for message in &feed.history {
        print_message(message);
    }

    loop {
        tokio::select! {
            message = feed.live.next() => match message {
                Some(message) => print_message(&message),
                None => {
                    warn!(order_id = %order, "Chat channel ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!(order_id = %order, "Interrupted");
                break;
            }
        }
    }

    ctx.close_chat(&order);
    Ok(())
}

pub async fn send(ctx: &ClientContext, order: &str, text: &str) -> Result<(), CliError> {
    ctx.send_message(&OrderId::new(order), text).await?;
    emit("sent");
    Ok(())
}
