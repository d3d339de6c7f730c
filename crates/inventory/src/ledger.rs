use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use orderflow_core::{HubCode, SkuCode};

use crate::catalog::{Catalog, CatalogError};
use crate::record::{ConsumeOutcome, ConsumeRequest, InventoryKey, InventoryRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("no inventory record for {0}")]
    NotFound(InventoryKey),

    /// Insufficient stock; nothing was mutated.
    #[error("insufficient stock: available {available}, requested {requested}")]
    Conflict { available: i64, requested: i64 },

    #[error("invalid quantity {0}")]
    InvalidQuantity(i64),

    /// Transport/datastore failure (transient).
    #[error("inventory ledger unavailable: {0}")]
    Unavailable(String),

    /// The request's deadline passed before the ledger answered; nothing was
    /// consumed.
    #[error("inventory ledger timed out: {0}")]
    TimedOut(String),
}

/// Authoritative stock counter.
///
/// Implementations must make `consume` one serialized unit of work per key:
/// the read of the available quantity and the decrement happen under the
/// same exclusive lock, so the sum of successful consumptions never exceeds
/// the stock that was there.
pub trait InventoryLedger: Send + Sync {
    fn get(&self, key: &InventoryKey) -> Result<InventoryRecord, LedgerError>;

    /// Conditional decrement. `Conflict` when `available < requested`,
    /// `TimedOut` when the request's deadline passes while waiting for the key.
    fn consume(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, LedgerError>;

    /// Set the absolute stock level for a key, creating the record if needed.
    fn upsert(&self, key: InventoryKey, quantity: i64) -> Result<InventoryRecord, LedgerError>;
}

#[derive(Debug)]
struct Slot {
    record: InventoryRecord,
    /// reference → remaining after its consumption
    consumed: HashMap<String, i64>,
}

/// In-process ledger: one mutex per key, so different keys never contend.
#[derive(Debug, Default)]
pub struct InMemoryInventoryLedger {
    slots: RwLock<HashMap<InventoryKey, Arc<Mutex<Slot>>>>,
}

impl InMemoryInventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &InventoryKey) -> Result<Arc<Mutex<Slot>>, LedgerError> {
        let slots = self.slots.read().map_err(|_| poisoned())?;
        slots
            .get(key)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(key.clone()))
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Unavailable("ledger lock poisoned".into())
}

const LOCK_POLL: Duration = Duration::from_millis(1);

/// Take the slot lock, giving up at `deadline` if one is set.
fn lock_slot<'a>(
    slot: &'a Mutex<Slot>,
    key: &InventoryKey,
    deadline: Option<Instant>,
) -> Result<MutexGuard<'a, Slot>, LedgerError> {
    let Some(deadline) = deadline else {
        return slot.lock().map_err(|_| poisoned());
    };
    loop {
        match slot.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(_)) => return Err(poisoned()),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(LedgerError::TimedOut(format!("{key} is locked")));
                }
                thread::sleep(LOCK_POLL);
            }
        }
    }
}

impl InventoryLedger for InMemoryInventoryLedger {
    fn get(&self, key: &InventoryKey) -> Result<InventoryRecord, LedgerError> {
        let slot = self.slot(key)?;
        let guard = slot.lock().map_err(|_| poisoned())?;
        Ok(guard.record.clone())
    }

    fn consume(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome, LedgerError> {
        if request.quantity <= 0 {
            return Err(LedgerError::InvalidQuantity(request.quantity));
        }

        let slot = self.slot(&request.key)?;
        let mut guard = lock_slot(&slot, &request.key, request.deadline)?;

        if let Some(reference) = &request.reference {
            if let Some(&remaining) = guard.consumed.get(reference) {
                debug!(key = %request.key, reference, "consume replayed");
                return Ok(ConsumeOutcome {
                    remaining,
                    replayed: true,
                });
            }
        }

        let available = guard.record.quantity;
        if available < request.quantity {
            return Err(LedgerError::Conflict {
                available,
                requested: request.quantity,
            });
        }

        let remaining = available - request.quantity;
        guard.record.quantity = remaining;
        guard.record.updated_at = Utc::now();
        if let Some(reference) = &request.reference {
            guard.consumed.insert(reference.clone(), remaining);
        }

        Ok(ConsumeOutcome {
            remaining,
            replayed: false,
        })
    }

    fn upsert(&self, key: InventoryKey, quantity: i64) -> Result<InventoryRecord, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }

        let slot = {
            let mut slots = self.slots.write().map_err(|_| poisoned())?;
            slots
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Slot {
                        record: InventoryRecord {
                            id: Uuid::now_v7(),
                            key,
                            quantity: 0,
                            updated_at: Utc::now(),
                        },
                        consumed: HashMap::new(),
                    }))
                })
                .clone()
        };

        let mut guard = slot.lock().map_err(|_| poisoned())?;
        guard.record.quantity = quantity;
        guard.record.updated_at = Utc::now();
        Ok(guard.record.clone())
    }
}

/// A ledger knows the SKUs and hubs it holds stock for; in-process
/// deployments use it as their reference catalog.
impl Catalog for InMemoryInventoryLedger {
    fn sku_exists(&self, sku: &SkuCode) -> Result<bool, CatalogError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| CatalogError::Unavailable("ledger lock poisoned".into()))?;
        Ok(slots.keys().any(|k| &k.sku_code == sku))
    }

    fn hub_exists(&self, hub: &HubCode) -> Result<bool, CatalogError> {
        let slots = self
            .slots
            .read()
            .map_err(|_| CatalogError::Unavailable("ledger lock poisoned".into()))?;
        Ok(slots.keys().any(|k| &k.hub_code == hub))
    }
}
