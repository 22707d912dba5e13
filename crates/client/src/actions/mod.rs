//! User actions.
//!
//! Every action that changes server state is expressed as a
//! [`Mutation`](crate::mutation::Mutation) and run on the shared engine.
//! Reversible edits (favorites, cart lines, address edits) are optimistic.
//! Destructive ones (placing an order, deleting an address) wait for the
//! server before touching the cache.

mod addresses;
mod cart;
mod chat;
mod favorites;
mod orders;
mod profile;
mod ratings;

use serde_json::Value;

pub use chat::{CUSTOMER_SENDER, ChatFeed};
pub use favorites::FavoriteTarget;
pub use orders::{Checkout, PaymentReturn};

/// Whether a raw JSON id equals `id`. The backend sends ids as strings or
/// numbers.
fn same_id(value: Option<&Value>, id: &str) -> bool {
    match value {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

/// Apply `edit` to every object in a cached list whose `field` equals `id`.
fn edit_matching(list: &mut Value, field: &str, id: &str, mut edit: impl FnMut(&mut Value)) {
    if let Value::Array(items) = list {
        items
            .iter_mut()
            .filter(|item| same_id(item.get(field), id))
            .for_each(&mut edit);
    }
}

/// Drop every object in a cached list whose `field` equals `id`.
fn remove_matching(list: &mut Value, field: &str, id: &str) {
    if let Value::Array(items) = list {
        items.retain(|item| !same_id(item.get(field), id));
    }
}
