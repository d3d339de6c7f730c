use std::collections::HashSet;
use std::sync::RwLock;

use orderflow_core::{HubCode, SkuCode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Reference-data lookups used to validate ingestion rows.
pub trait Catalog: Send + Sync {
    fn sku_exists(&self, sku: &SkuCode) -> Result<bool, CatalogError>;
    fn hub_exists(&self, hub: &HubCode) -> Result<bool, CatalogError>;
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    skus: RwLock<HashSet<SkuCode>>,
    hubs: RwLock<HashSet<HubCode>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sku(self, sku: SkuCode) -> Self {
        self.add_sku(sku);
        self
    }

    pub fn with_hub(self, hub: HubCode) -> Self {
        self.add_hub(hub);
        self
    }

    pub fn add_sku(&self, sku: SkuCode) {
        if let Ok(mut skus) = self.skus.write() {
            skus.insert(sku);
        }
    }

    pub fn add_hub(&self, hub: HubCode) {
        if let Ok(mut hubs) = self.hubs.write() {
            hubs.insert(hub);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn sku_exists(&self, sku: &SkuCode) -> Result<bool, CatalogError> {
        let skus = self
            .skus
            .read()
            .map_err(|_| CatalogError::Unavailable("sku lock poisoned".into()))?;
        Ok(skus.contains(sku))
    }

    fn hub_exists(&self, hub: &HubCode) -> Result<bool, CatalogError> {
        let hubs = self
            .hubs
            .read()
            .map_err(|_| CatalogError::Unavailable("hub lock poisoned".into()))?;
        Ok(hubs.contains(hub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knows_what_was_added() {
        let c = InMemoryCatalog::new()
            .with_sku(SkuCode::new("K1").unwrap())
            .with_hub(HubCode::new("H1").unwrap());
        assert!(c.sku_exists(&SkuCode::new("K1").unwrap()).unwrap());
        assert!(!c.sku_exists(&SkuCode::new("K2").unwrap()).unwrap());
        assert!(c.hub_exists(&HubCode::new("H1").unwrap()).unwrap());
        assert!(!c.hub_exists(&HubCode::new("H2").unwrap()).unwrap());
    }
}
