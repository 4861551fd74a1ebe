use super::pool::Pool;
use super::reservation::CapacityReservation;
use super::units::CloudUnits;
use crate::config::PlannerConfig;
use crate::escrow::types::{capacity_reservation_memo, EscrowInformation};
use crate::store::{CapacityReservationStore, PoolStore};
use crate::workloads::types::{NextAction, ResultState, Workload, WorkloadResult};
use crate::{ExplorerError, ExplorerErrorKind, ExplorerResult, Id};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Something which sets up payment for capacity reservations.
#[async_trait]
pub trait CapacityEscrow: Send + Sync {
    /// Register a reservation, and return where and how much the customer needs to pay.
    async fn capacity_reservation(
        &self,
        reservation: &CapacityReservation,
        currencies: &[String],
    ) -> ExplorerResult<EscrowInformation>;
}

/// An escrow which gives capacity away. Every reservation is reported as paid right away.
pub struct FreeEscrow {
    paid: mpsc::Sender<Id>,
}

impl FreeEscrow {
    /// Create a new free escrow, and the receiver on which paid reservation ids arrive.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Id>) {
        let (paid, rx) = mpsc::channel(buffer.max(1));
        (FreeEscrow { paid }, rx)
    }
}

#[async_trait]
impl CapacityEscrow for FreeEscrow {
    async fn capacity_reservation(
        &self,
        reservation: &CapacityReservation,
        _: &[String],
    ) -> ExplorerResult<EscrowInformation> {
        self.paid.send(reservation.id).await.map_err(|_| {
            ExplorerError::with_message(
                ExplorerErrorKind::Async,
                "nobody is listening for paid capacity",
            )
        })?;
        Ok(EscrowInformation {
            address: String::new(),
            asset: None,
            amount: 0,
        })
    }
}

/// The answer to a capacity reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationPayment {
    /// Id of the stored reservation.
    pub reservation_id: Id,
    /// Pool receiving the capacity once the reservation is paid.
    pub pool_id: Id,
    /// Memo the payment must carry.
    pub memo: String,
    /// Where and how much to pay.
    pub escrow: EscrowInformation,
}

/// Decides if and how capacity can be used, and keeps the pools up to date.
///
/// Pool writes are compare-and-swap on the pool version. A write which lost against a
/// concurrent one is retried on the fresh pool, up to a configured amount of attempts.
pub struct Planner<S, E> {
    store: Arc<S>,
    escrow: E,
    config: PlannerConfig,
}

impl<S, E> Planner<S, E>
where
    S: PoolStore + CapacityReservationStore,
    E: CapacityEscrow,
{
    /// Create a new planner.
    pub fn new(store: Arc<S>, escrow: E, config: PlannerConfig) -> Self {
        Planner {
            store,
            escrow,
            config,
        }
    }

    /// Store a capacity reservation, make sure its pool exists, and set up payment for it.
    /// The signatures on the reservation must have been verified by the caller.
    pub async fn reserve(
        &self,
        reservation: CapacityReservation,
        currencies: &[String],
    ) -> ExplorerResult<ReservationPayment> {
        reservation.validate()?;

        let pool_id = reservation.data_reservation.pool_id;
        if pool_id != 0 {
            let pool = self.pool(pool_id).await?;
            if pool.customer_tid != reservation.customer_tid {
                return Err(ExplorerError::with_message(
                    ExplorerErrorKind::Unauthorized,
                    format!(
                        "pool {} is not owned by customer {}",
                        pool_id, reservation.customer_tid
                    ),
                ));
            }
        }

        let reservation = if reservation.id == 0 {
            self.store.insert_reservation(reservation).await?
        } else {
            reservation
        };

        if pool_id == 0 {
            let mut pool = Pool::new(
                reservation.id,
                reservation.customer_tid,
                reservation.data_reservation.node_ids.iter().cloned(),
            );
            pool.sponsor_tid = reservation.sponsor_tid;
            self.store.insert_pool(pool).await?;
            info!(
                "created pool {} for customer {}",
                reservation.id, reservation.customer_tid
            );
        }

        let escrow = self
            .escrow
            .capacity_reservation(&reservation, currencies)
            .await?;
        Ok(ReservationPayment {
            reservation_id: reservation.id,
            pool_id: reservation.target_pool_id(),
            memo: capacity_reservation_memo(reservation.id),
            escrow,
        })
    }

    /// Check if a workload can be funded by the pool it references: it must be deployed on a
    /// node of the pool, by the owner of the pool.
    pub async fn is_allowed(&self, workload: &Workload) -> ExplorerResult<bool> {
        let pool = self.pool(workload.contract.pool_id).await?;
        Ok(pool.allowed_in_pool(&workload.contract.node_id)
            && pool.customer_tid == workload.contract.customer_tid)
    }

    /// Check if the pool of a workload can run for at least `min_seconds` more at its current
    /// rates.
    pub async fn has_capacity(&self, workload: &Workload, min_seconds: i64) -> ExplorerResult<bool> {
        let pool = self.pool(workload.contract.pool_id).await?;
        Ok(pool.remaining_seconds(Utc::now().timestamp()) >= min_seconds)
    }

    /// Check if the pool of a workload can run for at least the configured minimum lifetime.
    pub async fn has_minimum_capacity(&self, workload: &Workload) -> ExplorerResult<bool> {
        self.has_capacity(workload, self.config.min_pool_lifetime())
            .await
    }

    /// Start consuming capacity for a deployed workload. Returns the updated pool.
    pub async fn add_used_capacity(&self, workload: &Workload) -> ExplorerResult<Pool> {
        let units = workload_units(workload);
        let id = workload.contract.id;
        self.update_pool(workload.contract.pool_id, |pool, now| {
            pool.add_workload_at(id, units, now)
        })
        .await
    }

    /// Stop consuming capacity for a workload. Returns the updated pool.
    pub async fn remove_used_capacity(&self, workload: &Workload) -> ExplorerResult<Pool> {
        let units = workload_units(workload);
        let id = workload.contract.id;
        self.update_pool(workload.contract.pool_id, |pool, now| {
            pool.remove_workload_at(id, units, now)
        })
        .await
    }

    /// Record the result a node reported for a workload, and make the pool usage follow it. A
    /// successful deployment starts consuming capacity. A failed deployment is marked for
    /// deletion, and like a removed workload stops consuming capacity. Returns the pool.
    pub async fn apply_workload_result(
        &self,
        workload: &mut Workload,
        result: WorkloadResult,
    ) -> ExplorerResult<Pool> {
        let failed = result.state == ResultState::Error;
        let deleted = workload.apply_result(result);
        if failed {
            debug!("workload {} failed to deploy", workload.contract.id);
            workload.state.next_action = NextAction::Delete;
        }
        if failed || deleted {
            self.remove_used_capacity(workload).await
        } else if workload.is_successfully_deployed() {
            self.add_used_capacity(workload).await
        } else {
            self.pool(workload.contract.pool_id).await
        }
    }

    /// Add the capacity bought by a paid reservation to its pool.
    pub async fn apply_paid_capacity(&self, reservation_id: Id) -> ExplorerResult<Pool> {
        let reservation = self
            .store
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| {
                ExplorerError::validation(format!(
                    "paid reservation {} does not exist",
                    reservation_id
                ))
            })?;
        let units = reservation.purchased_units();
        let mut added = false;
        let pool = self
            .update_pool(reservation.target_pool_id(), |pool, now| {
                added = pool.add_paid_capacity_at(reservation_id, units, now);
                added
            })
            .await?;
        if added {
            info!(
                "added capacity of reservation {} to pool {}",
                reservation_id, pool.id
            );
        } else {
            debug!(
                "capacity of reservation {} was already added to pool {}",
                reservation_id, pool.id
            );
        }
        Ok(pool)
    }

    /// Load a pool.
    pub async fn pool(&self, id: Id) -> ExplorerResult<Pool> {
        self.store
            .pool(id)
            .await?
            .ok_or_else(|| ExplorerError::pool_not_found(id))
    }

    /// All pools of a customer.
    pub async fn pools_for_owner(&self, customer_tid: Id) -> ExplorerResult<Vec<Pool>> {
        Ok(self.store.pools_by_owner(customer_tid).await?)
    }

    /// Load, modify and write back a pool until the write wins. `f` returns if it changed
    /// the pool, nothing is written otherwise.
    async fn update_pool<F>(&self, pool_id: Id, mut f: F) -> ExplorerResult<Pool>
    where
        F: FnMut(&mut Pool, i64) -> bool,
    {
        let attempts = self.config.max_update_attempts();
        for attempt in 1..=attempts {
            let mut pool = self.pool(pool_id).await?;
            if !f(&mut pool, Utc::now().timestamp()) {
                return Ok(pool);
            }
            match self.store.update_pool(&pool).await? {
                Some(updated) => return Ok(updated),
                None => debug!(
                    "pool {} changed concurrently, retrying ({}/{})",
                    pool_id, attempt, attempts
                ),
            }
        }
        warn!(
            "giving up updating pool {} after {} attempts",
            pool_id, attempts
        );
        Err(ExplorerError::with_message(
            ExplorerErrorKind::Conflict,
            format!("pool {} keeps changing concurrently", pool_id),
        ))
    }
}

/// The cloud units a workload consumes. Components which come out negative, e.g. compute for
/// a workload without memory, are not consumed at all.
fn workload_units(workload: &Workload) -> CloudUnits {
    let units = workload.resource_units().cloud_units();
    CloudUnits {
        cu: units.cu.max(0.),
        su: units.su.max(0.),
        ipv4u: units.ipv4u.max(0.),
    }
}

#[cfg(test)]
mod tests {
    use super::{CapacityEscrow, FreeEscrow, Planner};
    use crate::capacity::pool::Pool;
    use crate::capacity::reservation::{CapacityReservation, ReservationData};
    use crate::config::PlannerConfig;
    use crate::escrow::types::EscrowInformation;
    use crate::store::{CapacityReservationStore, MemoryStore, PoolStore, StoreError};
    use crate::workloads::types::{
        Contract, DiskType, NextAction, ResultState, VolumeData, Workload, WorkloadData,
        WorkloadResult,
    };
    use crate::{ExplorerErrorKind, ExplorerResult, Id};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CUSTOMER: Id = 7;

    fn reservation(pool_id: Id) -> CapacityReservation {
        let mut res = CapacityReservation::new(
            CUSTOMER,
            ReservationData {
                pool_id,
                cus: 1000,
                sus: 2000,
                ipv4us: 0,
                node_ids: vec!["node1".to_string(), "node2".to_string()],
                currencies: vec!["TFT".to_string()],
            },
        )
        .unwrap();
        res.customer_signature = "00".to_string();
        res
    }

    fn volume(id: Id, pool_id: Id, node_id: &str, customer_tid: Id) -> Workload {
        Workload::new(
            Contract {
                id,
                node_id: node_id.to_string(),
                pool_id,
                customer_tid,
                reference: String::new(),
                description: String::new(),
                metadata: String::new(),
                epoch: 1_600_000_000,
                signing_request_provision: Default::default(),
                signing_request_delete: Default::default(),
            },
            // 1 storage unit
            WorkloadData::Volume(VolumeData {
                size: 1200,
                disk_type: DiskType::Hdd,
            }),
        )
    }

    fn free_planner() -> (
        Planner<MemoryStore, FreeEscrow>,
        tokio::sync::mpsc::Receiver<Id>,
    ) {
        let (escrow, paid) = FreeEscrow::new(10);
        (
            Planner::new(Arc::new(MemoryStore::new()), escrow, PlannerConfig::default()),
            paid,
        )
    }

    #[tokio::test]
    async fn reserve_new_pool() {
        let (planner, mut paid) = free_planner();
        let payment = planner.reserve(reservation(0), &[]).await.unwrap();
        assert_eq!(payment.pool_id, payment.reservation_id);
        assert_eq!(payment.memo, format!("p-{}", payment.reservation_id));
        assert_eq!(payment.escrow.amount, 0);

        let pool = planner.pool(payment.pool_id).await.unwrap();
        assert_eq!(pool.customer_tid, CUSTOMER);
        assert!(pool.allowed_in_pool("node2"));
        assert_eq!(pool.cus, 0.);

        let id = paid.recv().await.unwrap();
        assert_eq!(id, payment.reservation_id);
        let pool = planner.apply_paid_capacity(id).await.unwrap();
        assert_eq!(pool.cus, 1000.);
        assert_eq!(pool.sus, 2000.);
        // reported twice, e.g. after a restart of the escrow
        let again = planner.apply_paid_capacity(id).await.unwrap();
        assert_eq!(again.cus, 1000.);
        assert_eq!(again.version, pool.version);
        assert_eq!(planner.pools_for_owner(CUSTOMER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn top_up_existing_pool() {
        let (planner, mut paid) = free_planner();
        let first = planner.reserve(reservation(0), &[]).await.unwrap();
        let second = planner
            .reserve(reservation(first.pool_id), &[])
            .await
            .unwrap();
        assert_ne!(first.reservation_id, second.reservation_id);
        assert_eq!(second.pool_id, first.pool_id);

        for _ in 0..2 {
            let id = paid.recv().await.unwrap();
            planner.apply_paid_capacity(id).await.unwrap();
        }
        let pool = planner.pool(first.pool_id).await.unwrap();
        assert!((pool.cus - 2000.).abs() < 1e-9);
        assert_eq!(planner.pools_for_owner(CUSTOMER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reserve_rejections() {
        let (planner, _paid) = free_planner();
        let err = planner.reserve(reservation(42), &[]).await.unwrap_err();
        assert_eq!(err.kind(), &ExplorerErrorKind::PoolNotFound(42));

        let payment = planner.reserve(reservation(0), &[]).await.unwrap();
        let mut other = reservation(payment.pool_id);
        other.customer_tid = CUSTOMER + 1;
        let err = planner.reserve(other, &[]).await.unwrap_err();
        assert_eq!(err.kind(), &ExplorerErrorKind::Unauthorized);

        let mut unsigned = reservation(0);
        unsigned.customer_signature.clear();
        let err = planner.reserve(unsigned, &[]).await.unwrap_err();
        assert_eq!(err.kind(), &ExplorerErrorKind::Validation);
    }

    #[tokio::test]
    async fn workload_admission() {
        let (planner, mut paid) = free_planner();
        let payment = planner.reserve(reservation(0), &[]).await.unwrap();
        planner
            .apply_paid_capacity(paid.recv().await.unwrap())
            .await
            .unwrap();
        let pool_id = payment.pool_id;

        assert!(planner
            .is_allowed(&volume(1, pool_id, "node1", CUSTOMER))
            .await
            .unwrap());
        assert!(!planner
            .is_allowed(&volume(1, pool_id, "node3", CUSTOMER))
            .await
            .unwrap());
        assert!(!planner
            .is_allowed(&volume(1, pool_id, "node1", CUSTOMER + 1))
            .await
            .unwrap());

        // nothing consumes the pool yet, so it never runs out
        let workload = volume(1, pool_id, "node1", CUSTOMER);
        assert!(planner.has_capacity(&workload, i64::MAX / 2).await.unwrap());

        // 2000 storage unit seconds at 1 per second
        planner.add_used_capacity(&workload).await.unwrap();
        assert!(planner.has_capacity(&workload, 1000).await.unwrap());
        assert!(!planner.has_capacity(&workload, 2100).await.unwrap());
        assert!(planner.has_minimum_capacity(&workload).await.unwrap());

        let err = planner
            .is_allowed(&volume(1, 99, "node1", CUSTOMER))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExplorerErrorKind::PoolNotFound(99));
    }

    #[tokio::test]
    async fn used_capacity_is_idempotent() {
        let (planner, _paid) = free_planner();
        let payment = planner.reserve(reservation(0), &[]).await.unwrap();
        let workload = volume(5, payment.pool_id, "node1", CUSTOMER);

        let pool = planner.add_used_capacity(&workload).await.unwrap();
        assert!((pool.active_su - 1.).abs() < 1e-9);
        assert_eq!(pool.active_cu, 0.);
        let again = planner.add_used_capacity(&workload).await.unwrap();
        assert_eq!(again.active_su, pool.active_su);
        assert_eq!(again.version, pool.version);

        let pool = planner.remove_used_capacity(&workload).await.unwrap();
        assert_eq!(pool.active_su, 0.);
        assert!(pool.active_workload_ids.is_empty());
        assert_eq!(pool.empty_at, i64::MAX);
        let again = planner.remove_used_capacity(&workload).await.unwrap();
        assert_eq!(again.version, pool.version);
    }

    fn result(state: ResultState) -> WorkloadResult {
        WorkloadResult {
            workload_id: "5-1".to_string(),
            state,
            message: String::new(),
            data_json: serde_json::Value::Null,
            signature: String::new(),
            epoch: 1_600_000_100,
            node_id: "node1".to_string(),
        }
    }

    #[tokio::test]
    async fn results_drive_used_capacity() {
        let (planner, _paid) = free_planner();
        let payment = planner.reserve(reservation(0), &[]).await.unwrap();

        let mut workload = volume(5, payment.pool_id, "node1", CUSTOMER);
        workload.state.next_action = NextAction::Deploy;
        let pool = planner
            .apply_workload_result(&mut workload, result(ResultState::Ok))
            .await
            .unwrap();
        assert!(pool.active_workload_ids.contains(&5));
        assert!((pool.active_su - 1.).abs() < 1e-9);
        assert_eq!(workload.state.next_action, NextAction::Deploy);

        let pool = planner
            .apply_workload_result(&mut workload, result(ResultState::Deleted))
            .await
            .unwrap();
        assert!(pool.active_workload_ids.is_empty());
        assert_eq!(workload.state.next_action, NextAction::Deleted);

        let mut broken = volume(6, payment.pool_id, "node1", CUSTOMER);
        broken.state.next_action = NextAction::Deploy;
        let pool = planner
            .apply_workload_result(&mut broken, result(ResultState::Error))
            .await
            .unwrap();
        assert!(pool.active_workload_ids.is_empty());
        assert_eq!(pool.active_su, 0.);
        assert_eq!(broken.state.next_action, NextAction::Delete);
    }

    /// A store which loses the first `conflicts` pool writes to a concurrent writer.
    struct RacingStore {
        inner: MemoryStore,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl PoolStore for RacingStore {
        async fn pool(&self, id: Id) -> Result<Option<Pool>, StoreError> {
            self.inner.pool(id).await
        }

        async fn insert_pool(&self, pool: Pool) -> Result<Pool, StoreError> {
            self.inner.insert_pool(pool).await
        }

        async fn update_pool(&self, pool: &Pool) -> Result<Option<Pool>, StoreError> {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
                .is_ok()
            {
                // somebody else writes the pool in the meantime
                let mut concurrent = self.inner.pool(pool.id).await?.unwrap();
                concurrent.cus += 1.;
                self.inner.update_pool(&concurrent).await?;
            }
            self.inner.update_pool(pool).await
        }

        async fn pools_by_owner(&self, customer_tid: Id) -> Result<Vec<Pool>, StoreError> {
            self.inner.pools_by_owner(customer_tid).await
        }
    }

    #[async_trait]
    impl CapacityReservationStore for RacingStore {
        async fn insert_reservation(
            &self,
            reservation: CapacityReservation,
        ) -> Result<CapacityReservation, StoreError> {
            self.inner.insert_reservation(reservation).await
        }

        async fn reservation(&self, id: Id) -> Result<Option<CapacityReservation>, StoreError> {
            self.inner.reservation(id).await
        }
    }

    struct NoEscrow;

    #[async_trait]
    impl CapacityEscrow for NoEscrow {
        async fn capacity_reservation(
            &self,
            _: &CapacityReservation,
            _: &[String],
        ) -> ExplorerResult<EscrowInformation> {
            Ok(EscrowInformation {
                address: "GESCROW".to_string(),
                asset: None,
                amount: 10,
            })
        }
    }

    #[tokio::test]
    async fn lost_updates_are_retried() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            conflicts: AtomicUsize::new(0),
        });
        let planner = Planner::new(store.clone(), NoEscrow, PlannerConfig::new(300, 3));
        let payment = planner.reserve(reservation(0), &[]).await.unwrap();
        let workload = volume(1, payment.pool_id, "node1", CUSTOMER);

        store.conflicts.store(2, Ordering::SeqCst);
        let pool = planner.add_used_capacity(&workload).await.unwrap();
        // both concurrent writes survived
        assert_eq!(pool.cus, 2.);
        assert!(pool.active_workload_ids.contains(&1));

        store.conflicts.store(3, Ordering::SeqCst);
        let err = planner
            .remove_used_capacity(&workload)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ExplorerErrorKind::Conflict);
    }
}
