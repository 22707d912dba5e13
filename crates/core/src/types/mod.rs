//! Core types for the Regusto client.
//!
//! This module provides type-safe wrappers for the marketplace domain.

pub mod address;
pub mod cart;
pub mod chat;
pub mod id;
pub mod order;
pub mod price;
pub mod rating;
pub mod status;
pub mod store;
pub mod user;

pub use address::{ActiveAddress, Address, NewAddress};
pub use cart::{Cart, CartError, CartItem, CartLineRef};
pub use chat::{ChatMessage, NEW_MESSAGE_EVENT, TriggerRequest, chat_channel};
pub use id::*;
pub use order::{Order, OrderLine, OrderProduct, PaymentPreference, PreferenceItem};
pub use price::Price;
pub use rating::{Rating, RatingSubmission};
pub use status::*;
pub use store::{
    Basket, BasketContent, ExpiringProduct, FavoriteProduct, FavoriteStore, Product, ProductInstance,
    Store,
};
pub use user::{UserData, UserUpdate};
