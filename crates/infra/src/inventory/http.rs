//! Blocking HTTP client for the inventory service.
//!
//! Implements both [`InventoryLedger`] and [`Catalog`] so the pipeline can run
//! against a remote inventory service instead of the in-process ledger.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use orderflow_core::{HubCode, SkuCode};
use orderflow_inventory::{
    Catalog, CatalogError, ConsumeOutcome, ConsumeRequest, InventoryKey, InventoryLedger, InventoryRecord,
    LedgerError,
};

#[derive(Debug, Clone)]
pub struct HttpInventoryClient {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    available: Option<i64>,
}

#[derive(Debug, Serialize)]
struct StockLevel<'a> {
    #[serde(flatten)]
    key: &'a InventoryKey,
    quantity: i64,
}

impl HttpInventoryClient {
    /// `timeout` bounds every request, including connect.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let base_url = Url::parse(base_url).map_err(|e| LedgerError::Unavailable(format!("invalid base url: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| format!("base url cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn exists(&self, segments: &[&str]) -> Result<bool, CatalogError> {
        let url = self.url(segments).map_err(CatalogError::Unavailable)?;
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(CatalogError::Unavailable(format!("inventory service returned {s}"))),
        }
    }
}

fn transport(e: reqwest::Error) -> LedgerError {
    if e.is_timeout() {
        LedgerError::TimedOut(e.to_string())
    } else {
        LedgerError::Unavailable(e.to_string())
    }
}

fn unexpected(resp: Response) -> LedgerError {
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    LedgerError::Unavailable(format!("inventory service returned {status}: {body}"))
}

impl InventoryLedger for HttpInventoryClient {
    #[instrument(skip(self), fields(key = %key), err)]
    fn get(&self, key: &InventoryKey) -> Result<InventoryRecord, LedgerError> {
        let url = self.url(&["inventory", "query"]).map_err(LedgerError::Unavailable)?;
        let resp = self
            .client
            .get(url)
            .query(&[
                ("tenant_id", key.tenant_id.as_str()),
                ("seller_id", key.seller_id.as_str()),
                ("hub_code", key.hub_code.as_str()),
                ("sku_code", key.sku_code.as_str()),
            ])
            .send()
            .map_err(transport)?;

        match resp.status() {
            StatusCode::OK => resp.json().map_err(transport),
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(key.clone())),
            _ => Err(unexpected(resp)),
        }
    }

    #[instrument(skip(self, request), fields(key = %request.key, quantity = request.quantity), err)]
    fn consume(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, LedgerError> {
        let url = self.url(&["inventory", "consume"]).map_err(LedgerError::Unavailable)?;
        let mut call = self.client.post(url).json(request);
        if let Some(left) = request.time_left() {
            if left.is_zero() {
                return Err(LedgerError::TimedOut(format!("consume {} past its deadline", request.key)));
            }
            call = call.timeout(left);
        }
        let resp = call.send().map_err(transport)?;

        match resp.status() {
            StatusCode::OK => {
                let outcome: ConsumeOutcome = resp.json().map_err(transport)?;
                debug!(remaining = outcome.remaining, "inventory consumed");
                Ok(outcome)
            }
            StatusCode::CONFLICT => {
                let body: Option<ConflictBody> = resp.json().ok();
                Err(LedgerError::Conflict {
                    available: body.and_then(|b| b.available).unwrap_or(0),
                    requested: request.quantity,
                })
            }
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(request.key.clone())),
            StatusCode::BAD_REQUEST => Err(LedgerError::InvalidQuantity(request.quantity)),
            _ => Err(unexpected(resp)),
        }
    }

    #[instrument(skip(self), fields(key = %key), err)]
    fn upsert(&self, key: InventoryKey, quantity: i64) -> Result<InventoryRecord, LedgerError> {
        let url = self.url(&["inventory"]).map_err(LedgerError::Unavailable)?;
        let resp = self
            .client
            .put(url)
            .json(&StockLevel { key: &key, quantity })
            .send()
            .map_err(transport)?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => resp.json().map_err(transport),
            StatusCode::BAD_REQUEST => Err(LedgerError::InvalidQuantity(quantity)),
            _ => Err(unexpected(resp)),
        }
    }
}

impl Catalog for HttpInventoryClient {
    fn sku_exists(&self, sku: &SkuCode) -> Result<bool, CatalogError> {
        self.exists(&["skus", "code", sku.as_str()])
    }

    fn hub_exists(&self, hub: &HubCode) -> Result<bool, CatalogError> {
        self.exists(&["hubs", "code", hub.as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_encoded_paths_under_base() {
        let c = HttpInventoryClient::new("http://ims.local:8081/api/", Duration::from_secs(1)).unwrap();
        let url = c.url(&["skus", "code", "A B/C"]).unwrap();
        assert_eq!(url.as_str(), "http://ims.local:8081/api/skus/code/A%20B%2FC");
    }

    #[test]
    fn expired_deadline_is_not_sent() {
        use orderflow_core::{SellerId, TenantId};

        let c = HttpInventoryClient::new("http://127.0.0.1:9/", Duration::from_secs(1)).unwrap();
        let key = InventoryKey::new(
            TenantId::new("T").unwrap(),
            SellerId::new("S").unwrap(),
            HubCode::new("H").unwrap(),
            SkuCode::new("K").unwrap(),
        );
        let req = ConsumeRequest::new(key, 1).with_deadline(std::time::Instant::now());
        assert!(matches!(c.consume(&req), Err(LedgerError::TimedOut(_))));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpInventoryClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
