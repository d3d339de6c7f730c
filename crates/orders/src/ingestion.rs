//! Ingestion task and per-row validation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, HubCode, SellerId, SkuCode, TenantId};

use crate::order::{NewOrder, Quantity};

/// Work queue message referencing an uploaded file.
///
/// Field names are capitalised on the wire (`{"Bucket": …, "Key": …}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionTask {
    #[serde(rename = "Bucket", default)]
    pub bucket: String,
    #[serde(rename = "Key", default)]
    pub key: String,
}

impl IngestionTask {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Decode a queue message body. Missing or blank fields are rejected.
    pub fn parse(body: &str) -> Result<Self, DomainError> {
        let task: IngestionTask = serde_json::from_str(body)
            .map_err(|e| DomainError::validation(format!("invalid ingestion task JSON: {e}")))?;
        if task.bucket.trim().is_empty() || task.key.trim().is_empty() {
            return Err(DomainError::validation(
                "ingestion task is missing Bucket or Key",
            ));
        }
        Ok(task)
    }

    pub fn to_json(&self) -> String {
        // Two string fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Columns every ingestion file must carry.
pub const REQUIRED_COLUMNS: [&str; 5] = ["tenant_id", "seller_id", "hub_id", "sku_id", "quantity"];

/// Why a row was routed to the quarantine file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    /// Zero-based position of the first field that failed to decode.
    #[error("field {field} is not valid UTF-8")]
    InvalidEncoding { field: usize },

    #[error("row has {found} columns, header has {expected}")]
    TooFewColumns { expected: usize, found: usize },

    #[error("column {0} is empty")]
    MissingField(&'static str),

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("unknown sku {0}")]
    UnknownSku(SkuCode),

    #[error("unknown hub {0}")]
    UnknownHub(HubCode),

    #[error("order could not be saved: {0}")]
    PersistFailed(String),
}

/// Column positions resolved from a file's header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSchema {
    width: usize,
    index: HashMap<&'static str, usize>,
}

impl CsvSchema {
    /// Resolve required columns by name. A header lacking one fails the whole
    /// file, since no row could be valid.
    pub fn from_header<S: AsRef<str>>(header: &[S]) -> Result<Self, DomainError> {
        let mut index = HashMap::new();
        for required in REQUIRED_COLUMNS {
            let pos = header
                .iter()
                .position(|h| h.as_ref().trim() == required)
                .ok_or_else(|| {
                    DomainError::validation(format!("header is missing column {required}"))
                })?;
            index.insert(required, pos);
        }
        Ok(Self {
            width: header.len(),
            index,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn field<'a, S: AsRef<str>>(&self, row: &'a [S], column: &'static str) -> &'a str {
        self.index
            .get(column)
            .and_then(|&i| row.get(i))
            .map(|v| v.as_ref().trim())
            .unwrap_or("")
    }

    /// Row-local checks that need no lookups, in order: column sufficiency
    /// (enough cells, and a non-blank value in each identifier column), then
    /// a positive integer quantity.
    ///
    /// SKU and hub existence are checked afterwards against the catalog.
    pub fn extract<S: AsRef<str>>(&self, row: &[S]) -> Result<NewOrder, RowRejection> {
        if row.len() < self.width {
            return Err(RowRejection::TooFewColumns {
                expected: self.width,
                found: row.len(),
            });
        }

        let tenant_id =
            TenantId::new(self.field(row, "tenant_id")).map_err(|_| RowRejection::MissingField("tenant_id"))?;
        let seller_id =
            SellerId::new(self.field(row, "seller_id")).map_err(|_| RowRejection::MissingField("seller_id"))?;
        let hub_id = HubCode::new(self.field(row, "hub_id")).map_err(|_| RowRejection::MissingField("hub_id"))?;
        let sku_id = SkuCode::new(self.field(row, "sku_id")).map_err(|_| RowRejection::MissingField("sku_id"))?;

        let raw_qty = self.field(row, "quantity");
        let quantity =
            Quantity::parse(raw_qty).map_err(|_| RowRejection::InvalidQuantity(raw_qty.to_string()))?;

        Ok(NewOrder {
            tenant_id,
            seller_id,
            hub_id,
            sku_id,
            quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CsvSchema {
        CsvSchema::from_header(&["tenant_id", "seller_id", "hub_id", "sku_id", "quantity"]).unwrap()
    }

    #[test]
    fn task_parses_capitalised_fields() {
        let task = IngestionTask::parse(r#"{"Bucket":"orders","Key":"in/a.csv"}"#).unwrap();
        assert_eq!(task, IngestionTask::new("orders", "in/a.csv"));
        assert_eq!(IngestionTask::parse(&task.to_json()).unwrap(), task);
    }

    #[test]
    fn task_rejects_missing_fields_and_garbage() {
        assert!(IngestionTask::parse(r#"{"Bucket":"orders"}"#).is_err());
        assert!(IngestionTask::parse(r#"{"Bucket":"","Key":"k"}"#).is_err());
        assert!(IngestionTask::parse("not json").is_err());
    }

    #[test]
    fn header_order_does_not_matter() {
        let s = CsvSchema::from_header(&["quantity", "sku_id", "hub_id", "seller_id", "tenant_id", "note"]).unwrap();
        let order = s.extract(&["7", "K1", "H1", "s1", "t1", "gift"]).unwrap();
        assert_eq!(order.quantity.get(), 7);
        assert_eq!(order.tenant_id.as_str(), "t1");
        assert_eq!(s.width(), 6);
    }

    #[test]
    fn header_missing_required_column_fails() {
        let err = CsvSchema::from_header(&["tenant_id", "seller_id", "hub_id", "quantity"]).unwrap_err();
        assert!(err.to_string().contains("sku_id"));
    }

    #[test]
    fn short_row_is_rejected_first() {
        let err = schema().extract(&["t1", "s1", "H1", "K1"]).unwrap_err();
        assert_eq!(err, RowRejection::TooFewColumns { expected: 5, found: 4 });
    }

    #[test]
    fn bad_quantities_are_rejected() {
        for q in ["-5", "0", "abc", "", "2.5"] {
            let err = schema().extract(&["t1", "s1", "H1", "K1", q]).unwrap_err();
            assert_eq!(err, RowRejection::InvalidQuantity(q.to_string()));
        }
    }

    #[test]
    fn blank_identifier_is_rejected() {
        let err = schema().extract(&["t1", " ", "H1", "K1", "1"]).unwrap_err();
        assert_eq!(err, RowRejection::MissingField("seller_id"));
    }

    #[test]
    fn column_sufficiency_is_judged_before_quantity() {
        let err = schema().extract(&["", "s1", "H1", "K1", "-5"]).unwrap_err();
        assert_eq!(err, RowRejection::MissingField("tenant_id"));

        let err = schema().extract(&["t1", "s1", "H1"]).unwrap_err();
        assert_eq!(err, RowRejection::TooFewColumns { expected: 5, found: 3 });
    }
}
