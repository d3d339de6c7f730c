use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use orderflow_core::{OrderId, SubscriptionId, TenantId};
use orderflow_orders::{NewSubscription, Order, WebhookSubscription};

use super::{IdempotencyKey, OrderStore, StoreError, WebhookRegistry};

fn poisoned() -> StoreError {
    StoreError::Backend("store lock poisoned".into())
}

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    state: RwLock<OrderTable>,
}

#[derive(Debug, Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    ingested: HashSet<IdempotencyKey>,
}

impl OrderTable {
    fn insert(&mut self, order: &Order) -> Result<(), StoreError> {
        if self.orders.contains_key(&order.id()) {
            return Err(StoreError::Conflict(format!("order {} already exists", order.id())));
        }
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.orders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Order> {
        let mut all: Vec<Order> = self
            .state
            .read()
            .map(|s| s.orders.values().cloned().collect())
            .unwrap_or_default();
        all.sort_by_key(|o| (o.created_at(), *o.id().as_uuid()));
        all
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, order: &Order) -> Result<(), StoreError> {
        self.state.write().map_err(|_| poisoned())?.insert(order)
    }

    fn insert_ingested(&self, order: &Order, key: &IdempotencyKey) -> Result<bool, StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if state.ingested.contains(key) {
            return Ok(false);
        }
        state.insert(order)?;
        state.ingested.insert(key.clone());
        Ok(true)
    }

    fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))
    }

    fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        match state.orders.get_mut(&order.id()) {
            Some(slot) => {
                *slot = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("order {}", order.id()))),
        }
    }

    fn list_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Order>, StoreError> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut out: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.tenant_id() == tenant_id)
            .cloned()
            .collect();
        out.sort_by_key(|o| (o.created_at(), *o.id().as_uuid()));
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWebhookRegistry {
    subscriptions: RwLock<Vec<WebhookSubscription>>,
}

impl InMemoryWebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WebhookRegistry for InMemoryWebhookRegistry {
    fn register(&self, request: NewSubscription) -> Result<WebhookSubscription, StoreError> {
        let sub = request
            .into_subscription(Utc::now())
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        self.subscriptions
            .write()
            .map_err(|_| poisoned())?
            .push(sub.clone());
        Ok(sub)
    }

    fn active_for(&self, tenant_id: &TenantId, event: &str) -> Result<Vec<WebhookSubscription>, StoreError> {
        let subs = self.subscriptions.read().map_err(|_| poisoned())?;
        Ok(subs.iter().filter(|s| s.wants(tenant_id, event)).cloned().collect())
    }

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<WebhookSubscription>, StoreError> {
        let subs = self.subscriptions.read().map_err(|_| poisoned())?;
        Ok(subs.iter().filter(|s| &s.tenant_id == tenant_id).cloned().collect())
    }

    fn deactivate(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut subs = self.subscriptions.write().map_err(|_| poisoned())?;
        let sub = subs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook subscription {id}")))?;
        sub.is_active = false;
        sub.updated_at = Utc::now();
        Ok(())
    }
}
