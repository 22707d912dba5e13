//! Saved delivery addresses.

use serde::{Deserialize, Serialize};

use super::id::AddressId;

/// A saved address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub longitude: f64,
    pub latitude: f64,
    /// Human-readable address line.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_number: Option<String>,
}

/// Body of `POST /user/{id}/addresses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAddress {
    pub longitude: f64,
    pub latitude: f64,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floor_number: Option<String>,
}

/// Shape of `GET /user/{id}/activeaddress`: the address is nested and the
/// per-user annotations sit beside it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActiveAddress {
    pub address: ActiveAddressInner,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub floor_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActiveAddressInner {
    pub id: AddressId,
    pub longitude: f64,
    pub latitude: f64,
    pub data: String,
}

impl From<ActiveAddress> for Address {
    fn from(active: ActiveAddress) -> Self {
        Self {
            id: active.address.id,
            longitude: active.address.longitude,
            latitude: active.address.latitude,
            data: active.address.data,
            description: active.description,
            floor_number: active.floor_number,
        }
    }
}
