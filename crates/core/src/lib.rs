//! `orderflow-core`: identifiers and domain errors shared by every crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{HubCode, OrderId, SellerId, SkuCode, SubscriptionId, TenantId};
