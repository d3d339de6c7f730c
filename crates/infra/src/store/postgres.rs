//! Postgres-backed stores.
//!
//! The store traits are synchronous (they are called from worker threads), so
//! each store keeps a `tokio::runtime::Handle` and blocks on the async sqlx
//! call. Callers already inside the runtime (axum handlers) must go through
//! `spawn_blocking`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (check violation) | `23514` | `Invalid` |
//! | Database (statement/lock timeout) | `57014`, `55P03` | `TimedOut` |
//! | Database (other) | any other | `Backend` |
//! | RowNotFound | N/A | `NotFound` |
//! | PoolTimedOut | N/A | `TimedOut` |
//! | ColumnDecode / Decode | N/A | `Corrupt` |
//! | Other | N/A | `Backend` |

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use orderflow_core::{HubCode, OrderId, SellerId, SkuCode, SubscriptionId, TenantId};
use orderflow_orders::{
    FinalizationProgress, NewOrder, NewSubscription, Order, OrderStatus, Quantity, WebhookSubscription,
};

use super::{IdempotencyKey, OrderStore, StoreError, WebhookRegistry};

/// Map a sqlx error to a store error.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Invalid(msg),
                Some("57014") | Some("55P03") => StoreError::TimedOut(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(operation.to_string()),
        sqlx::Error::PoolTimedOut => StoreError::TimedOut(format!("{operation}: no free connection")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("{operation}: {err}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

const SCHEMA: &str = include_str!("../../migrations/0001_orderflow.sql");

/// Create the pipeline tables if they do not exist.
#[instrument(skip(pool), err)]
pub async fn apply_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    Ok(())
}

fn corrupt(operation: &str, e: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{operation}: {e}"))
}

#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    #[instrument(skip(self, order), fields(order_id = %order.id()), err)]
    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        write_order(&self.pool, order)
            .await
            .map_err(|e| map_sqlx_error("insert_order", e))
    }

    /// Dedup key and order commit together or not at all.
    #[instrument(skip(self, order), fields(order_id = %order.id(), key = %key), err)]
    pub async fn insert_ingested_order(&self, order: &Order, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_ingested_order", e))?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO ingested_rows (idempotency_key, order_id, claimed_at)
            VALUES ($1, $2, now())
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(order.id().as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_row", e))?;

        // Dropping `tx` rolls back.
        if claimed.rows_affected() == 0 {
            return Ok(false);
        }

        write_order(&mut *tx, order)
            .await
            .map_err(|e| map_sqlx_error("insert_ingested_order", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_ingested_order", e))?;
        Ok(true)
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    pub async fn load_order(&self, id: OrderId) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, seller_id, hub_id, sku_id, quantity,
                   status, inventory_consumed, notified, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order", e))?
        .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;

        order_from_row(&row)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id(), status = %order.status()), err)]
    pub async fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let progress = order.progress();
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, inventory_consumed = $3, notified = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(progress.inventory_consumed)
        .bind(progress.notified)
        .bind(order.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {}", order.id())));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn orders_for_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, seller_id, hub_id, sku_id, quantity,
                   status, inventory_consumed, notified, created_at, updated_at
            FROM orders
            WHERE tenant_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(tenant_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("orders_for_tenant", e))?;

        rows.iter().map(order_from_row).collect()
    }
}

async fn write_order<'e, E: PgExecutor<'e>>(executor: E, order: &Order) -> Result<(), sqlx::Error> {
    let progress = order.progress();
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, tenant_id, seller_id, hub_id, sku_id, quantity,
            status, inventory_consumed, notified, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(order.id().as_uuid())
    .bind(order.tenant_id().as_str())
    .bind(order.seller_id().as_str())
    .bind(order.hub_id().as_str())
    .bind(order.sku_id().as_str())
    .bind(order.quantity().get())
    .bind(order.status().as_str())
    .bind(progress.inventory_consumed)
    .bind(progress.notified)
    .bind(order.created_at())
    .bind(order.updated_at())
    .execute(executor)
    .await?;
    Ok(())
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let op = "order_from_row";
    let get_str = |col: &str| -> Result<String, StoreError> {
        row.try_get::<String, _>(col).map_err(|e| map_sqlx_error(op, e))
    };

    let new = NewOrder {
        tenant_id: TenantId::new(get_str("tenant_id")?).map_err(|e| corrupt(op, e))?,
        seller_id: SellerId::new(get_str("seller_id")?).map_err(|e| corrupt(op, e))?,
        hub_id: HubCode::new(get_str("hub_id")?).map_err(|e| corrupt(op, e))?,
        sku_id: SkuCode::new(get_str("sku_id")?).map_err(|e| corrupt(op, e))?,
        quantity: Quantity::new(row.try_get("quantity").map_err(|e| map_sqlx_error(op, e))?)
            .map_err(|e| corrupt(op, e))?,
    };
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error(op, e))?;
    let status: OrderStatus = get_str("status")?.parse().map_err(|e| corrupt(op, e))?;
    let progress = FinalizationProgress {
        inventory_consumed: row.try_get("inventory_consumed").map_err(|e| map_sqlx_error(op, e))?,
        notified: row.try_get("notified").map_err(|e| map_sqlx_error(op, e))?,
    };
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| map_sqlx_error(op, e))?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(|e| map_sqlx_error(op, e))?;

    Ok(Order::restore(
        OrderId::from_uuid(id),
        new,
        status,
        progress,
        created_at,
        updated_at,
    ))
}

impl OrderStore for PostgresOrderStore {
    fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.runtime.block_on(self.insert_order(order))
    }

    fn insert_ingested(&self, order: &Order, key: &IdempotencyKey) -> Result<bool, StoreError> {
        self.runtime.block_on(self.insert_ingested_order(order, key))
    }

    fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        self.runtime.block_on(self.load_order(id))
    }

    fn save(&self, order: &Order) -> Result<(), StoreError> {
        self.runtime.block_on(self.save_order(order))
    }

    fn list_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Order>, StoreError> {
        self.runtime.block_on(self.orders_for_tenant(tenant_id))
    }
}

#[derive(Debug, Clone)]
pub struct PostgresWebhookRegistry {
    pool: PgPool,
    runtime: Handle,
}

const SUBSCRIPTION_COLUMNS: &str =
    "id, tenant_id, callback_url, events, headers, secret, is_active, created_at, updated_at";

impl PostgresWebhookRegistry {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id), err)]
    pub async fn insert_subscription(&self, request: NewSubscription) -> Result<WebhookSubscription, StoreError> {
        let sub = request
            .into_subscription(Utc::now())
            .map_err(|e| StoreError::Invalid(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO webhook_subscriptions (
                id, tenant_id, callback_url, events, headers, secret, is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(sub.id.as_uuid())
        .bind(sub.tenant_id.as_str())
        .bind(&sub.callback_url)
        .bind(&sub.events)
        .bind(Json(&sub.headers))
        .bind(sub.secret.as_deref())
        .bind(sub.is_active)
        .bind(sub.created_at)
        .bind(sub.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_subscription", e))?;

        Ok(sub)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub async fn subscriptions_for(
        &self,
        tenant_id: &TenantId,
        event: Option<&str>,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        let rows = match event {
            Some(event) => {
                sqlx::query(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
                     WHERE tenant_id = $1 AND is_active AND $2 = ANY(events) \
                     ORDER BY created_at ASC"
                ))
                .bind(tenant_id.as_str())
                .bind(event)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
                     WHERE tenant_id = $1 ORDER BY created_at ASC"
                ))
                .bind(tenant_id.as_str())
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("subscriptions_for", e))?;

        rows.iter().map(subscription_from_row).collect()
    }

    #[instrument(skip(self), fields(subscription_id = %id), err)]
    pub async fn deactivate_subscription(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_subscriptions SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_subscription", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("webhook subscription {id}")));
        }
        Ok(())
    }
}

fn subscription_from_row(row: &PgRow) -> Result<WebhookSubscription, StoreError> {
    let op = "subscription_from_row";
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error(op, e))?;
    let tenant: String = row.try_get("tenant_id").map_err(|e| map_sqlx_error(op, e))?;
    let Json(headers): Json<BTreeMap<String, String>> =
        row.try_get("headers").map_err(|e| map_sqlx_error(op, e))?;

    Ok(WebhookSubscription {
        id: SubscriptionId::from_uuid(id),
        tenant_id: TenantId::new(tenant).map_err(|e| corrupt(op, e))?,
        callback_url: row.try_get("callback_url").map_err(|e| map_sqlx_error(op, e))?,
        events: row.try_get("events").map_err(|e| map_sqlx_error(op, e))?,
        headers,
        secret: row.try_get("secret").map_err(|e| map_sqlx_error(op, e))?,
        is_active: row.try_get("is_active").map_err(|e| map_sqlx_error(op, e))?,
        created_at: row.try_get("created_at").map_err(|e| map_sqlx_error(op, e))?,
        updated_at: row.try_get("updated_at").map_err(|e| map_sqlx_error(op, e))?,
    })
}

impl WebhookRegistry for PostgresWebhookRegistry {
    fn register(&self, request: NewSubscription) -> Result<WebhookSubscription, StoreError> {
        self.runtime.block_on(self.insert_subscription(request))
    }

    fn active_for(&self, tenant_id: &TenantId, event: &str) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.runtime.block_on(self.subscriptions_for(tenant_id, Some(event)))
    }

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<WebhookSubscription>, StoreError> {
        self.runtime.block_on(self.subscriptions_for(tenant_id, None))
    }

    fn deactivate(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.runtime.block_on(self.deactivate_subscription(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_a_timeout() {
        assert!(matches!(
            map_sqlx_error("save_order", sqlx::Error::PoolTimedOut),
            StoreError::TimedOut(_)
        ));
        assert!(matches!(
            map_sqlx_error("load_order", sqlx::Error::RowNotFound),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            map_sqlx_error("load_order", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
    }
}
