//! Strongly-typed identifiers used across the pipeline.
//!
//! Two families exist:
//! - **UUID identifiers** assigned by this system (`OrderId`, `SubscriptionId`).
//! - **External codes** that arrive in uploaded files and inventory requests
//!   (`TenantId`, `SellerId`, `HubCode`, `SkuCode`). These are opaque strings
//!   owned by other services; the only rule enforced here is that they are not blank.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a persisted order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

/// Identifier of a webhook subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(OrderId, "OrderId");
impl_uuid_newtype!(SubscriptionId, "SubscriptionId");

/// Tenant owning orders, stock and webhook subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// Seller whose stock an order consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SellerId(String);

/// Warehouse (hub) code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HubCode(String);

/// Stock keeping unit code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SkuCode(String);

macro_rules! impl_code_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build a code, rejecting blank values. Surrounding whitespace is trimmed.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(concat!($name, " cannot be blank")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_code_newtype!(TenantId, "TenantId");
impl_code_newtype!(SellerId, "SellerId");
impl_code_newtype!(HubCode, "HubCode");
impl_code_newtype!(SkuCode, "SkuCode");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_reject_blank_values() {
        assert!(TenantId::new("").is_err());
        assert!(SkuCode::new("   ").is_err());
        assert!(matches!(HubCode::new("\t"), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn codes_are_trimmed() {
        let hub = HubCode::new("  HUB-1 ").unwrap();
        assert_eq!(hub.as_str(), "HUB-1");
        assert_eq!(hub.to_string(), "HUB-1");
    }

    #[test]
    fn codes_serialize_as_plain_strings() {
        let sku: SkuCode = "SKU-9".parse().unwrap();
        assert_eq!(serde_json::to_string(&sku).unwrap(), "\"SKU-9\"");
    }

    #[test]
    fn blank_codes_fail_to_deserialize() {
        assert!(serde_json::from_str::<TenantId>("\"  \"").is_err());
        let seller: SellerId = serde_json::from_str("\"S-1\"").unwrap();
        assert_eq!(seller.as_str(), "S-1");
    }

    #[test]
    fn order_id_round_trips_through_display() {
        let id = OrderId::new();
        let parsed: OrderId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }
}
