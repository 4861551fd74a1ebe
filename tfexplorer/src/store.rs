use crate::capacity::pool::Pool;
use crate::capacity::reservation::CapacityReservation;
use crate::escrow::types::{CustomerAddress, EscrowPaymentRecord, PaymentFlags};
use crate::Id;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tokio::sync::Mutex;

#[async_trait]
/// PoolStore defines `something` which persists capacity pools. Updates are versioned: a pool
/// is only written if nobody else wrote it since it was loaded.
pub trait PoolStore: Send + Sync {
    /// Load a pool.
    async fn pool(&self, id: Id) -> Result<Option<Pool>, StoreError>;

    /// Insert a new pool. A pool with id 0 is given a fresh id. Returns the stored pool.
    /// Inserting a pool with an id which is already used is a conflict.
    async fn insert_pool(&self, pool: Pool) -> Result<Pool, StoreError>;

    /// Write a pool if the stored version still equals `pool.version`. Returns the stored pool
    /// with its new version, or `None` if the pool was changed concurrently.
    async fn update_pool(&self, pool: &Pool) -> Result<Option<Pool>, StoreError>;

    /// All pools owned by a customer.
    async fn pools_by_owner(&self, customer_tid: Id) -> Result<Vec<Pool>, StoreError>;
}

#[async_trait]
/// Persistence of capacity reservations.
pub trait CapacityReservationStore: Send + Sync {
    /// Store a new reservation under a freshly allocated id, which is set on the returned
    /// reservation.
    async fn insert_reservation(
        &self,
        reservation: CapacityReservation,
    ) -> Result<CapacityReservation, StoreError>;

    /// Load a reservation.
    async fn reservation(&self, id: Id) -> Result<Option<CapacityReservation>, StoreError>;
}

#[async_trait]
/// Persistence of escrow payment records and customer escrow accounts.
pub trait EscrowStore: Send + Sync {
    /// Store a new payment record. There can only be 1 record per reservation.
    async fn insert_payment(&self, record: EscrowPaymentRecord) -> Result<(), StoreError>;

    /// Load the payment record of a reservation.
    async fn payment(&self, reservation_id: Id) -> Result<Option<EscrowPaymentRecord>, StoreError>;

    /// Overwrite a payment record, if the stored flags still equal `expected`. Returns if the
    /// record was written.
    async fn update_payment(
        &self,
        record: &EscrowPaymentRecord,
        expected: PaymentFlags,
    ) -> Result<bool, StoreError>;

    /// Records which are not paid or canceled yet, and not expired at `now`.
    async fn unpaid_active_payments(&self, now: i64)
        -> Result<Vec<EscrowPaymentRecord>, StoreError>;

    /// Records which are not paid or canceled yet, and expired at `now`.
    async fn unpaid_expired_payments(&self, now: i64)
        -> Result<Vec<EscrowPaymentRecord>, StoreError>;

    /// Records which are not canceled, but are either paid or waiting for a refund.
    async fn pending_payments(&self) -> Result<Vec<EscrowPaymentRecord>, StoreError>;

    /// The escrow account of a customer, if one was created before.
    async fn customer_address(&self, customer_tid: Id)
        -> Result<Option<CustomerAddress>, StoreError>;

    /// Persist the escrow account of a customer.
    async fn save_customer_address(&self, address: CustomerAddress) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Collections {
    pools: BTreeMap<Id, Pool>,
    reservations: BTreeMap<Id, CapacityReservation>,
    payments: BTreeMap<Id, EscrowPaymentRecord>,
    addresses: HashMap<Id, CustomerAddress>,
    // pools without a reservation share this counter, so ids never collide
    last_reservation_id: Id,
}

impl Collections {
    fn next_reservation_id(&mut self) -> Id {
        self.last_reservation_id += 1;
        self.last_reservation_id
    }
}

/// A store keeping everything in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryStore {
    async fn pool(&self, id: Id) -> Result<Option<Pool>, StoreError> {
        Ok(self.inner.lock().await.pools.get(&id).cloned())
    }

    async fn insert_pool(&self, mut pool: Pool) -> Result<Pool, StoreError> {
        let mut inner = self.inner.lock().await;
        if pool.id == 0 {
            pool.id = inner.next_reservation_id();
        } else if inner.pools.contains_key(&pool.id) {
            return Err(StoreError::conflict(format!("pool {} already exists", pool.id)));
        }
        pool.version = 1;
        inner.pools.insert(pool.id, pool.clone());
        Ok(pool)
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Option<Pool>, StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .pools
            .get_mut(&pool.id)
            .ok_or_else(|| StoreError::not_found(format!("pool {}", pool.id)))?;
        if stored.version != pool.version {
            return Ok(None);
        }
        let mut updated = pool.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(Some(updated))
    }

    async fn pools_by_owner(&self, customer_tid: Id) -> Result<Vec<Pool>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .pools
            .values()
            .filter(|p| p.customer_tid == customer_tid)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CapacityReservationStore for MemoryStore {
    async fn insert_reservation(
        &self,
        mut reservation: CapacityReservation,
    ) -> Result<CapacityReservation, StoreError> {
        let mut inner = self.inner.lock().await;
        reservation.id = inner.next_reservation_id();
        inner
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn reservation(&self, id: Id) -> Result<Option<CapacityReservation>, StoreError> {
        Ok(self.inner.lock().await.reservations.get(&id).cloned())
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn insert_payment(&self, record: EscrowPaymentRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.payments.contains_key(&record.reservation_id) {
            return Err(StoreError::conflict(format!(
                "escrow for reservation {} already exists",
                record.reservation_id
            )));
        }
        inner.payments.insert(record.reservation_id, record);
        Ok(())
    }

    async fn payment(&self, reservation_id: Id) -> Result<Option<EscrowPaymentRecord>, StoreError> {
        Ok(self.inner.lock().await.payments.get(&reservation_id).cloned())
    }

    async fn update_payment(
        &self,
        record: &EscrowPaymentRecord,
        expected: PaymentFlags,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.payments.get_mut(&record.reservation_id) {
            Some(stored) if stored.flags() == expected => {
                *stored = record.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::not_found(format!(
                "escrow for reservation {}",
                record.reservation_id
            ))),
        }
    }

    async fn unpaid_active_payments(
        &self,
        now: i64,
    ) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .values()
            .filter(|r| !r.paid && !r.is_settled() && r.expiration > now)
            .cloned()
            .collect())
    }

    async fn unpaid_expired_payments(
        &self,
        now: i64,
    ) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .values()
            .filter(|r| !r.paid && !r.is_settled() && r.expiration <= now)
            .cloned()
            .collect())
    }

    async fn pending_payments(&self) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .values()
            .filter(|r| !r.canceled && (r.paid || r.cancellation_pending))
            .cloned()
            .collect())
    }

    async fn customer_address(
        &self,
        customer_tid: Id,
    ) -> Result<Option<CustomerAddress>, StoreError> {
        Ok(self.inner.lock().await.addresses.get(&customer_tid).cloned())
    }

    async fn save_customer_address(&self, address: CustomerAddress) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .addresses
            .insert(address.customer_tid, address);
        Ok(())
    }
}

/// An error returned by a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreError {
    kind: StoreErrorKind,
    msg: String,
}

/// The kind of store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The write conflicts with an existing object.
    Conflict,
    /// The object to update does not exist.
    NotFound,
    /// The backend failed.
    Backend,
}

impl StoreError {
    /// Create a new store error.
    pub fn new(kind: StoreErrorKind, msg: impl Into<String>) -> Self {
        StoreError {
            kind,
            msg: msg.into(),
        }
    }

    /// Create a new conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, msg)
    }

    /// Create a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, msg)
    }

    /// The kind of this error.
    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            StoreErrorKind::Conflict => write!(f, "conflicting write: {}", self.msg),
            StoreErrorKind::NotFound => write!(f, "{} not found", self.msg),
            StoreErrorKind::Backend => write!(f, "store backend failure: {}", self.msg),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::{CapacityReservationStore, EscrowStore, MemoryStore, PoolStore, StoreErrorKind};
    use crate::capacity::pool::Pool;
    use crate::capacity::reservation::{CapacityReservation, ReservationData};
    use crate::escrow::types::EscrowPaymentRecord;
    use crate::wallet::{Asset, TFT_MAINNET};

    fn reservation() -> CapacityReservation {
        CapacityReservation::new(
            7,
            ReservationData {
                pool_id: 0,
                cus: 100,
                sus: 100,
                ipv4us: 0,
                node_ids: vec!["node1".to_string()],
                currencies: vec!["TFT".to_string()],
            },
        )
        .unwrap()
    }

    fn record(reservation_id: i64, expiration: i64) -> EscrowPaymentRecord {
        EscrowPaymentRecord {
            reservation_id,
            customer_tid: 7,
            sponsor_tid: 0,
            farmer_id: 1,
            address: "GESCROW".to_string(),
            asset: Asset::parse(TFT_MAINNET).unwrap(),
            amount: 100,
            expiration,
            paid: false,
            released: false,
            canceled: false,
            cancellation_pending: false,
            cause: None,
            failures: Vec::new(),
        }
    }

    #[tokio::test]
    async fn ids_are_shared_between_reservations_and_pools() {
        let store = MemoryStore::new();
        let first = store.insert_reservation(reservation()).await.unwrap();
        let pool = store
            .insert_pool(Pool::new(0, 7, vec!["node1".to_string()]))
            .await
            .unwrap();
        let second = store.insert_reservation(reservation()).await.unwrap();
        assert_eq!((first.id, pool.id, second.id), (1, 2, 3));
        assert_eq!(store.reservation(3).await.unwrap(), Some(second));

        let err = store
            .insert_pool(Pool::new(2, 7, vec!["node1".to_string()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), StoreErrorKind::Conflict);
    }

    #[tokio::test]
    async fn pool_updates_are_versioned() {
        let store = MemoryStore::new();
        let pool = store
            .insert_pool(Pool::new(10, 7, vec!["node1".to_string()]))
            .await
            .unwrap();
        assert_eq!(pool.version, 1);

        let mut first = pool.clone();
        first.cus = 10.;
        let mut second = pool;
        second.cus = 20.;

        let stored = store.update_pool(&first).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert!(store.update_pool(&second).await.unwrap().is_none());
        assert_eq!(store.pool(10).await.unwrap().unwrap().cus, 10.);

        assert_eq!(store.pools_by_owner(7).await.unwrap().len(), 1);
        assert!(store.pools_by_owner(8).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn payment_updates_are_conditional() {
        let store = MemoryStore::new();
        store.insert_payment(record(1, 100)).await.unwrap();
        assert!(store.insert_payment(record(1, 100)).await.is_err());

        let original = store.payment(1).await.unwrap().unwrap();
        let mut paid = original.clone();
        paid.paid = true;
        assert!(store.update_payment(&paid, original.flags()).await.unwrap());

        let mut canceled = original.clone();
        canceled.canceled = true;
        assert!(!store
            .update_payment(&canceled, original.flags())
            .await
            .unwrap());
        assert_eq!(store.payment(1).await.unwrap(), Some(paid));
    }

    #[tokio::test]
    async fn payment_scans() {
        let store = MemoryStore::new();
        store.insert_payment(record(1, 100)).await.unwrap();
        store.insert_payment(record(2, 200)).await.unwrap();
        let mut paid = record(3, 100);
        paid.paid = true;
        store.insert_payment(paid).await.unwrap();
        let mut released = record(4, 100);
        released.paid = true;
        released.released = true;
        store.insert_payment(released).await.unwrap();
        let mut refunding = record(5, 100);
        refunding.cancellation_pending = true;
        store.insert_payment(refunding).await.unwrap();
        let mut canceled = record(6, 100);
        canceled.canceled = true;
        store.insert_payment(canceled).await.unwrap();

        let ids = |records: Vec<EscrowPaymentRecord>| {
            records.iter().map(|r| r.reservation_id).collect::<Vec<_>>()
        };
        assert_eq!(ids(store.unpaid_active_payments(150).await.unwrap()), vec![2]);
        // paid escrows are never refunded for expiring
        assert_eq!(ids(store.unpaid_expired_payments(150).await.unwrap()), vec![1]);
        assert_eq!(ids(store.pending_payments().await.unwrap()), vec![3, 4, 5]);
    }
}
