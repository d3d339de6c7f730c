//! Inventory ledger and catalog adapters (Postgres, inventory service HTTP).

mod http;
mod postgres;

pub use http::HttpInventoryClient;
pub use postgres::PostgresInventoryLedger;
