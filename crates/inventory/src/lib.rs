//! Inventory ledger domain module.
//!
//! The ledger is the authoritative per-(tenant, seller, hub, SKU) stock
//! counter. Its one interesting operation is the conditional decrement:
//! read, compare and write under one exclusive lock on the key, so concurrent
//! consumers can never drive a record negative.
//!
//! This crate holds the contract and an in-process implementation; the
//! Postgres and HTTP implementations live in `orderflow-infra`.

pub mod catalog;
pub mod ledger;
pub mod record;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use ledger::{InMemoryInventoryLedger, InventoryLedger, LedgerError};
pub use record::{ConsumeOutcome, ConsumeRequest, InventoryKey, InventoryRecord};
