//! Status enums for orders and ratings.
//!
//! Order status is server-driven and only moves forward:
//! `pending -> accepted -> ready -> completed -> payed | rejected`.
//! A rejection may arrive from any non-terminal state. The rating flag moves
//! `unrated -> rated` exactly once, and only for completed orders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Accepted,
    Ready,
    Completed,
    Payed,
    Rejected,
    /// Any status string this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Rating flag carried on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RatingState {
    #[default]
    Unrated,
    Rated,
}

/// A status change that would move an order backwards or out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid order transition: {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Accepted => Some(1),
            Self::Ready => Some(2),
            Self::Completed => Some(3),
            Self::Payed | Self::Rejected => Some(4),
            Self::Unknown => None,
        }
    }

    /// Whether no further status change is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Payed | Self::Rejected)
    }

    /// Whether an order in this status is still being worked on by the store.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Accepted | Self::Ready)
    }

    /// Whether `next` is a forward move from `self`.
    ///
    /// Unknown statuses are accepted in either direction since the server is
    /// the source of truth.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => !self.is_terminal() && to > from,
            _ => true,
        }
    }

    /// Apply a server-pushed status.
    ///
    /// # Errors
    ///
    /// Returns `StatusTransitionError` if `next` would move the order backwards.
    pub fn advance(&mut self, next: Self) -> Result<(), StatusTransitionError> {
        if *self == next {
            return Ok(());
        }
        if !self.can_advance_to(next) {
            return Err(StatusTransitionError { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Ready => write!(f, "ready"),
            Self::Completed => write!(f, "completed"),
            Self::Payed => write!(f, "payed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "ready" => Ok(Self::Ready),
            "completed" => Ok(Self::Completed),
            "payed" => Ok(Self::Payed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}
