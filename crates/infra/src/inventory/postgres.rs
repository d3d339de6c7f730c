//! Postgres-backed inventory ledger.
//!
//! `consume` is one transaction: the record row is locked with
//! `SELECT … FOR UPDATE`, compared, then decremented or left untouched.
//! Concurrent consumers of the same key queue on the row lock, so they observe
//! each other's decrements in a total order. A request deadline caps that
//! wait both server-side (`lock_timeout`) and around the whole call.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};
use uuid::Uuid;

use orderflow_core::{HubCode, SellerId, SkuCode, TenantId};
use orderflow_inventory::{
    Catalog, CatalogError, ConsumeOutcome, ConsumeRequest, InventoryKey, InventoryLedger, InventoryRecord, LedgerError,
};

#[derive(Debug, Clone)]
pub struct PostgresInventoryLedger {
    pool: PgPool,
    runtime: Handle,
}

fn unavailable(operation: &str, e: impl core::fmt::Display) -> LedgerError {
    LedgerError::Unavailable(format!("{operation}: {e}"))
}

/// Like [`unavailable`], but lock and statement timeouts become `TimedOut`.
fn db_error(operation: &str, e: sqlx::Error) -> LedgerError {
    let timed_out = match &e {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("55P03") | Some("57014")),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    };
    if timed_out {
        LedgerError::TimedOut(format!("{operation}: {e}"))
    } else {
        unavailable(operation, e)
    }
}

fn record_from_row(row: &PgRow) -> Result<InventoryRecord, LedgerError> {
    let op = "record_from_row";
    let text = |col: &str| -> Result<String, LedgerError> { row.try_get::<String, _>(col).map_err(|e| unavailable(op, e)) };

    let key = InventoryKey::new(
        TenantId::new(text("tenant_id")?).map_err(|e| unavailable(op, e))?,
        SellerId::new(text("seller_id")?).map_err(|e| unavailable(op, e))?,
        HubCode::new(text("hub_code")?).map_err(|e| unavailable(op, e))?,
        SkuCode::new(text("sku_code")?).map_err(|e| unavailable(op, e))?,
    );
    let id: Uuid = row.try_get("id").map_err(|e| unavailable(op, e))?;
    let quantity: i64 = row.try_get("quantity").map_err(|e| unavailable(op, e))?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(|e| unavailable(op, e))?;

    Ok(InventoryRecord {
        id,
        key,
        quantity,
        updated_at,
    })
}

impl PostgresInventoryLedger {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn fetch(&self, key: &InventoryKey) -> Result<InventoryRecord, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, seller_id, hub_code, sku_code, quantity, updated_at
            FROM inventory
            WHERE tenant_id = $1 AND seller_id = $2 AND hub_code = $3 AND sku_code = $4
            "#,
        )
        .bind(key.tenant_id.as_str())
        .bind(key.seller_id.as_str())
        .bind(key.hub_code.as_str())
        .bind(key.sku_code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("fetch", e))?
        .ok_or_else(|| LedgerError::NotFound(key.clone()))?;

        record_from_row(&row)
    }

    /// Read-lock-decrement-commit as one unit of work.
    #[instrument(
        skip(self, request),
        fields(key = %request.key, quantity = request.quantity, reference = ?request.reference),
        err
    )]
    pub async fn consume_locked(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, LedgerError> {
        if request.quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(request.quantity));
        }
        let key = &request.key;

        let mut tx = self.pool.begin().await.map_err(|e| db_error("begin", e))?;

        if let Some(left) = request.time_left() {
            // Whole milliseconds; 0 would mean "wait forever".
            let millis = left.as_millis().max(1).to_string();
            sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                .bind(format!("{millis}ms"))
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("lock_timeout", e))?;
        }

        let locked = sqlx::query(
            r#"
            SELECT id, quantity
            FROM inventory
            WHERE tenant_id = $1 AND seller_id = $2 AND hub_code = $3 AND sku_code = $4
            FOR UPDATE
            "#,
        )
        .bind(key.tenant_id.as_str())
        .bind(key.seller_id.as_str())
        .bind(key.hub_code.as_str())
        .bind(key.sku_code.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock", e))?;

        // Dropping `tx` without commit rolls back and releases the lock.
        let Some(locked) = locked else {
            return Err(LedgerError::NotFound(key.clone()));
        };
        let id: Uuid = locked.try_get("id").map_err(|e| unavailable("lock", e))?;
        let available: i64 = locked.try_get("quantity").map_err(|e| unavailable("lock", e))?;

        if let Some(reference) = &request.reference {
            let previous: Option<i64> = sqlx::query_scalar(
                "SELECT remaining FROM inventory_consumptions WHERE inventory_id = $1 AND reference = $2",
            )
            .bind(id)
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| unavailable("replay_check", e))?;

            if let Some(remaining) = previous {
                debug!(reference, "consume replayed");
                return Ok(ConsumeOutcome {
                    remaining,
                    replayed: true,
                });
            }
        }

        if available < request.quantity {
            return Err(LedgerError::Conflict {
                available,
                requested: request.quantity,
            });
        }

        let remaining: i64 = sqlx::query_scalar(
            "UPDATE inventory SET quantity = quantity - $2, updated_at = now() WHERE id = $1 RETURNING quantity",
        )
        .bind(id)
        .bind(request.quantity)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unavailable("decrement", e))?;

        if let Some(reference) = &request.reference {
            sqlx::query(
                r#"
                INSERT INTO inventory_consumptions (inventory_id, reference, quantity, remaining, consumed_at)
                VALUES ($1, $2, $3, $4, now())
                "#,
            )
            .bind(id)
            .bind(reference)
            .bind(request.quantity)
            .bind(remaining)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("record_consumption", e))?;
        }

        tx.commit().await.map_err(|e| unavailable("commit", e))?;

        Ok(ConsumeOutcome {
            remaining,
            replayed: false,
        })
    }

    #[instrument(skip(self), fields(key = %key), err)]
    pub async fn set_stock(&self, key: &InventoryKey, quantity: i64) -> Result<InventoryRecord, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO inventory (id, tenant_id, seller_id, hub_code, sku_code, quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (tenant_id, seller_id, hub_code, sku_code)
            DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = now()
            RETURNING id, tenant_id, seller_id, hub_code, sku_code, quantity, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(key.tenant_id.as_str())
        .bind(key.seller_id.as_str())
        .bind(key.hub_code.as_str())
        .bind(key.sku_code.as_str())
        .bind(quantity)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unavailable("set_stock", e))?;

        record_from_row(&row)
    }

    /// Whether any inventory record references `code` in `column`.
    #[instrument(skip(self), err)]
    pub async fn code_known(&self, column: &'static str, code: &str) -> Result<bool, CatalogError> {
        let sql = match column {
            "sku_code" => "SELECT EXISTS (SELECT 1 FROM inventory WHERE sku_code = $1)",
            _ => "SELECT EXISTS (SELECT 1 FROM inventory WHERE hub_code = $1)",
        };
        sqlx::query_scalar::<_, bool>(sql)
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{column} lookup: {e}")))
    }
}

impl InventoryLedger for PostgresInventoryLedger {
    fn get(&self, key: &InventoryKey) -> Result<InventoryRecord, LedgerError> {
        self.runtime.block_on(self.fetch(key))
    }

    fn consume(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, LedgerError> {
        let Some(left) = request.time_left() else {
            return self.runtime.block_on(self.consume_locked(request));
        };
        // Dropping the unfinished transaction rolls it back.
        self.runtime.block_on(async {
            tokio::time::timeout(left, self.consume_locked(request))
                .await
                .map_err(|_| LedgerError::TimedOut(format!("consume {} exceeded {}ms", request.key, left.as_millis())))?
        })
    }

    fn upsert(&self, key: InventoryKey, quantity: i64) -> Result<InventoryRecord, LedgerError> {
        self.runtime.block_on(self.set_stock(&key, quantity))
    }
}

impl Catalog for PostgresInventoryLedger {
    fn sku_exists(&self, sku: &SkuCode) -> Result<bool, CatalogError> {
        self.runtime.block_on(self.code_known("sku_code", sku.as_str()))
    }

    fn hub_exists(&self, hub: &HubCode) -> Result<bool, CatalogError> {
        self.runtime.block_on(self.code_known("hub_code", hub.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_pool_is_a_timeout_not_an_outage() {
        assert!(matches!(db_error("begin", sqlx::Error::PoolTimedOut), LedgerError::TimedOut(_)));
        assert!(matches!(db_error("begin", sqlx::Error::PoolClosed), LedgerError::Unavailable(_)));
    }
}
