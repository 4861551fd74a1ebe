use super::metrics::EscrowMetrics;
use super::payout::{split_payout, DistributionName, PaymentDestination, WISDOM_WALLET};
use super::pricing::Pricing;
use super::types::{
    CustomerAddress, EscrowInformation, EscrowPaymentRecord, PaymentFailure, PaymentOperation,
};
use crate::capacity::planner::CapacityEscrow;
use crate::capacity::reservation::CapacityReservation;
use crate::config::{Config, EscrowConfig};
use crate::directory::{Directories, Farm};
use crate::store::{EscrowStore, PoolStore};
use crate::wallet::{Asset, PayoutInfo, RetryWallet, Wallet, WalletErrorKind};
use crate::{ExplorerError, ExplorerErrorKind, ExplorerResult, Id};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, trace, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A request to set up an escrow, answered by the worker over the response channel.
struct EscrowJob {
    reservation: CapacityReservation,
    currencies: Vec<String>,
    response: oneshot::Sender<ExplorerResult<EscrowInformation>>,
}

/// The escrow worker. It is the only writer of escrow state: reservations are registered
/// through an [`EscrowClient`], and funding is reconciled periodically, all on the single
/// task running [`Escrow::run`].
pub struct Escrow<W, S> {
    wallet: RetryWallet<W>,
    store: Arc<S>,
    directories: Directories,
    pricing: Pricing,
    config: EscrowConfig,
    foundation_address: String,
    jobs: mpsc::Receiver<EscrowJob>,
    job_sender: mpsc::Sender<EscrowJob>,
    paid_tx: mpsc::Sender<Id>,
    paid_rx: Option<mpsc::Receiver<Id>>,
    metrics: EscrowMetrics,
}

impl<W, S> Escrow<W, S>
where
    W: Wallet,
    S: EscrowStore + PoolStore,
{
    /// Create a new escrow. Mutating wallet calls are retried according to the backoff
    /// policy of the config.
    pub fn new(
        wallet: W,
        store: Arc<S>,
        directories: Directories,
        config: &Config,
    ) -> ExplorerResult<Self> {
        config.validate()?;
        let foundation_address = match config.foundation_address() {
            Some(address) => address.to_string(),
            None => wallet.public_address(),
        };
        let (job_sender, jobs) = mpsc::channel(1);
        let (paid_tx, paid_rx) = mpsc::channel(config.escrow().paid_buffer());
        Ok(Escrow {
            wallet: RetryWallet::new(wallet, *config.backoff()),
            store,
            directories,
            pricing: Pricing::new(*config.prices(), config.network()),
            config: config.escrow().clone(),
            foundation_address,
            jobs,
            job_sender,
            paid_tx,
            paid_rx: Some(paid_rx),
            metrics: EscrowMetrics::new()?,
        })
    }

    /// Get a handle to register capacity reservations with this escrow.
    pub fn client(&self) -> EscrowClient {
        EscrowClient {
            jobs: self.job_sender.clone(),
        }
    }

    /// Take the receiving end of the paid capacity channel. Every reservation id is sent
    /// exactly once, after the reservation is funded and paid out. Returns `None` if the
    /// receiver was already taken.
    pub fn paid_capacity(&mut self) -> Option<mpsc::Receiver<Id>> {
        self.paid_rx.take()
    }

    /// The counters of this escrow.
    pub fn metrics(&self) -> EscrowMetrics {
        self.metrics.clone()
    }

    /// Process jobs and reconcile escrows until the token is canceled. Escrows a previous run
    /// left unfinished are picked up first.
    pub async fn run(mut self, token: CancellationToken) -> ExplorerResult<()> {
        let mut ticker = time::interval(self.config.balance_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(e) = self.recover_pending_payments().await {
            error!("failed to recover pending payments: {}", e);
        }
        info!("escrow started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("escrow shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.check_capacity_reservations().await {
                        error!("failed to check capacity reservations: {}", e);
                    }
                    if let Err(e) = self.refund_expired_capacity_reservations().await {
                        error!("failed to refund expired capacity reservations: {}", e);
                    }
                }
                job = self.jobs.recv() => {
                    let job = match job {
                        Some(job) => job,
                        None => return Ok(()),
                    };
                    let reservation_id = job.reservation.id;
                    let result = self
                        .process_capacity_reservation(&job.reservation, &job.currencies)
                        .await;
                    if job.response.send(result).is_err() {
                        warn!(
                            "caller of capacity reservation {} went away before the escrow was set up",
                            reservation_id
                        );
                    }
                }
            }
        }
    }

    async fn process_capacity_reservation(
        &self,
        reservation: &CapacityReservation,
        offered_currencies: &[String],
    ) -> ExplorerResult<EscrowInformation> {
        let currencies = self.supported_currencies(offered_currencies)?;
        if currencies.is_empty() {
            return Err(ExplorerError::with_message(
                ExplorerErrorKind::NoCurrencySupported,
                "none of the offered currencies is supported",
            ));
        }

        let farm_id = self.resolve_farm(&reservation.data_reservation.node_ids).await?;
        let farm = self.directories.farms.farm(farm_id).await?;

        let asset = currencies
            .into_iter()
            .find(|asset| farm.wallet_address(asset.code()).is_some())
            .ok_or_else(|| {
                ExplorerError::with_message(
                    ExplorerErrorKind::NoCurrencyShared,
                    format!("farm {} accepts none of the offered currencies", farm_id),
                )
            })?;

        let sponsor_tid = self.pool_sponsor(reservation).await?;
        let account = self.customer_account(reservation.customer_tid).await?;

        let price_for = if sponsor_tid != 0 {
            sponsor_tid
        } else {
            reservation.customer_tid
        };
        let custom_price = match self
            .directories
            .farms
            .custom_price(farm_id, price_for)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!(
                    "could not load custom price of farm {} for threebot {}, using defaults: {}",
                    farm_id, price_for, e
                );
                None
            }
        };
        let amount = self.pricing.cost(
            &reservation.data_reservation,
            &self.pricing.effective(custom_price),
            self.wallet.precision_digits(),
        )?;

        let mut record = EscrowPaymentRecord {
            reservation_id: reservation.id,
            customer_tid: reservation.customer_tid,
            sponsor_tid,
            farmer_id: farm_id,
            address: account.address.clone(),
            asset: asset.clone(),
            amount,
            expiration: Utc::now()
                .timestamp()
                .saturating_add(self.config.reservation_timeout()),
            paid: false,
            released: false,
            canceled: false,
            cancellation_pending: false,
            cause: None,
            failures: Vec::new(),
        };
        if amount == 0 {
            debug!(
                "capacity reservation {} is free, marking it as processed",
                reservation.id
            );
            record.paid = true;
            record.released = true;
        }
        self.store.insert_payment(record).await?;
        self.metrics.reservation_processed();

        if amount == 0 {
            self.push_paid(reservation.id).await;
        }

        info!(
            "set up escrow for capacity reservation {}: {} {} on {}",
            reservation.id, amount, asset, account.address
        );
        Ok(EscrowInformation {
            address: account.address,
            asset: Some(asset),
            amount,
        })
    }

    /// The offered currencies the wallet knows and a payout distribution exists for, in the
    /// order they were offered.
    fn supported_currencies(&self, offered: &[String]) -> ExplorerResult<Vec<Asset>> {
        let mut currencies = Vec::new();
        for code in offered {
            let asset = match self.wallet.asset_from_code(code) {
                Ok(asset) => asset,
                Err(e) if e.kind() == WalletErrorKind::UnsupportedAsset => continue,
                Err(e) => return Err(e.into()),
            };
            match self.config.distribution_for(asset.code()) {
                Some(_) => currencies.push(asset),
                None => error!(
                    "asset {} is supported by the wallet but has no payout distribution",
                    asset
                ),
            }
        }
        Ok(currencies)
    }

    /// The sponsor of the pool receiving the capacity. A reservation which creates a pool
    /// brings its own sponsor, as long as that pool is not stored yet.
    async fn pool_sponsor(&self, reservation: &CapacityReservation) -> ExplorerResult<Id> {
        let pool_id = reservation.data_reservation.pool_id;
        match self.store.pool(reservation.target_pool_id()).await? {
            Some(pool) => Ok(pool.sponsor_tid),
            None if pool_id == 0 => Ok(reservation.sponsor_tid),
            None => Err(ExplorerError::pool_not_found(pool_id)),
        }
    }

    /// Find the single farm owning all nodes. An id which is not a known node is looked up as
    /// a gateway.
    async fn resolve_farm(&self, node_ids: &[String]) -> ExplorerResult<Id> {
        let mut farms = BTreeSet::new();
        for node_id in node_ids {
            farms.insert(self.directories.farm_of(node_id).await?);
        }
        let mut farms = farms.into_iter();
        match (farms.next(), farms.next()) {
            (Some(farm_id), None) => Ok(farm_id),
            (None, _) => Err(ExplorerError::validation(
                "a capacity reservation needs at least 1 node",
            )),
            (Some(_), Some(_)) => Err(ExplorerError::validation(
                "all nodes of a capacity reservation must belong to the same farm",
            )),
        }
    }

    /// Load the escrow account of a customer, or create one if the customer has none yet.
    async fn customer_account(&self, customer_tid: Id) -> ExplorerResult<CustomerAddress> {
        if let Some(account) = self.store.customer_address(customer_tid).await? {
            trace!("escrow address found for customer {}", customer_tid);
            return Ok(account);
        }
        let created = self.wallet.create_account().await?;
        let account = CustomerAddress {
            customer_tid,
            address: created.address,
            secret: created.secret,
        };
        self.store.save_customer_address(account.clone()).await?;
        self.metrics.account_created();
        info!(
            "created escrow address {} for customer {}",
            account.address, customer_tid
        );
        Ok(account)
    }

    async fn escrow_account(&self, record: &EscrowPaymentRecord) -> ExplorerResult<CustomerAddress> {
        self.store
            .customer_address(record.customer_tid)
            .await?
            .ok_or_else(|| {
                ExplorerError::with_message(
                    ExplorerErrorKind::EscrowNotFound(record.reservation_id),
                    format!("no escrow account for customer {}", record.customer_tid),
                )
            })
    }

    async fn push_paid(&self, reservation_id: Id) {
        debug!("pushing reservation {} as paid", reservation_id);
        if self.paid_tx.send(reservation_id).await.is_err() {
            error!(
                "nobody is listening for paid capacity, reservation {} is lost",
                reservation_id
            );
        }
    }

    /// Check the funding of all unpaid escrows which did not expire yet.
    async fn check_capacity_reservations(&self) -> ExplorerResult<()> {
        let records = self
            .store
            .unpaid_active_payments(Utc::now().timestamp())
            .await?;
        trace!("checking {} active escrows", records.len());
        for record in records {
            let reservation_id = record.reservation_id;
            if let Err(e) = self.check_capacity_reservation_paid(record).await {
                error!(
                    "failed to check funding of capacity reservation {}: {}",
                    reservation_id, e
                );
            }
        }
        Ok(())
    }

    async fn check_capacity_reservation_paid(
        &self,
        mut record: EscrowPaymentRecord,
    ) -> ExplorerResult<()> {
        let (balance, _) = self
            .wallet
            .get_balance(&record.address, &record.memo(), &record.asset)
            .await?;
        if balance < record.amount {
            trace!(
                "required balance {} for reservation {} not reached yet ({})",
                record.amount,
                record.reservation_id,
                balance
            );
            return Ok(());
        }

        debug!(
            "required balance {} for reservation {} funded ({})",
            record.amount, record.reservation_id, balance
        );
        let expected = record.flags();
        record.paid = true;
        if !self.store.update_payment(&record, expected).await? {
            warn!(
                "escrow of reservation {} changed concurrently, skipping",
                record.reservation_id
            );
            return Ok(());
        }

        if let Err(e) = self.payout(&record).await {
            self.metrics.payout_failed();
            error!(
                "payout of capacity reservation {} failed, refunding customer: {}",
                record.reservation_id, e
            );
            record
                .failures
                .push(PaymentFailure::new(PaymentOperation::Payout, &e));
            let cause = e.to_string();
            if let Err(refund_err) = self.refund(record, &cause).await {
                error!("could not refund customer: {}", refund_err);
            }
            return Err(e);
        }

        // The funds moved, store failures past this point are only logged.
        let expected = record.flags();
        record.released = true;
        match self.store.update_payment(&record, expected).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "escrow of reservation {} changed concurrently after payout",
                record.reservation_id
            ),
            Err(e) => error!(
                "could not mark escrow of reservation {} as released: {}",
                record.reservation_id, e
            ),
        }
        self.metrics.escrow_paid();
        info!(
            "capacity reservation {} paid out {} {}",
            record.reservation_id, record.amount, record.asset
        );
        self.push_paid(record.reservation_id).await;
        Ok(())
    }

    /// Split the escrowed amount and pay every destination.
    async fn payout(&self, record: &EscrowPaymentRecord) -> ExplorerResult<()> {
        let farm = self.directories.farms.farm(record.farmer_id).await?;
        let base = self
            .config
            .distribution_for(record.asset.code())
            .ok_or_else(|| {
                ExplorerError::validation(format!(
                    "no payout distribution for asset {}",
                    record.asset
                ))
            })?;
        let distribution = payout_distribution(base, &farm, record).distribution();

        let mut payouts = Vec::new();
        for (destination, amount) in split_payout(
            record.amount,
            &distribution,
            self.wallet.precision_digits(),
        ) {
            if amount == 0 {
                continue;
            }
            payouts.push(PayoutInfo {
                address: self.destination_address(destination, &farm, record).await?,
                amount,
            });
        }

        let account = self.escrow_account(record).await?;
        self.wallet
            .payout_farmers(&account.secret, &payouts, &record.memo(), &record.asset)
            .await?;
        Ok(())
    }

    async fn destination_address(
        &self,
        destination: PaymentDestination,
        farm: &Farm,
        record: &EscrowPaymentRecord,
    ) -> ExplorerResult<String> {
        let missing = || {
            ExplorerError::validation(format!(
                "no {} address for asset {}",
                destination, record.asset
            ))
        };
        match destination {
            PaymentDestination::Farmer => farm
                .wallet_address(record.asset.code())
                .map(str::to_string)
                .ok_or_else(missing),
            PaymentDestination::Burned => Ok(record.asset.issuer().to_string()),
            PaymentDestination::Foundation => Ok(self.foundation_address.clone()),
            PaymentDestination::Wisdom => Ok(WISDOM_WALLET.to_string()),
            PaymentDestination::Sales => self
                .directories
                .users
                .wallet_address(record.sponsor_tid, record.asset.code())
                .await?
                .ok_or_else(missing),
        }
    }

    /// Send the funds of an escrow back, and mark it canceled. The escrow is marked as
    /// pending cancellation before any funds move, and stays so if the refund fails.
    async fn refund(&self, mut record: EscrowPaymentRecord, cause: &str) -> ExplorerResult<()> {
        if !record.cancellation_pending {
            let expected = record.flags();
            record.cancellation_pending = true;
            record.cause = Some(cause.to_string());
            if !self.store.update_payment(&record, expected).await? {
                warn!(
                    "escrow of reservation {} changed concurrently, not refunding",
                    record.reservation_id
                );
                return Ok(());
            }
        }

        let account = self.escrow_account(&record).await?;
        if let Err(e) = self
            .wallet
            .refund(&account.secret, &record.memo(), &record.asset)
            .await
        {
            let e = ExplorerError::from(e);
            record
                .failures
                .push(PaymentFailure::new(PaymentOperation::Refund, &e));
            let expected = record.flags();
            if let Err(store_err) = self.store.update_payment(&record, expected).await {
                error!(
                    "could not record failed refund of reservation {}: {}",
                    record.reservation_id, store_err
                );
            }
            return Err(e);
        }

        let expected = record.flags();
        record.cancellation_pending = false;
        record.canceled = true;
        match self.store.update_payment(&record, expected).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "escrow of reservation {} changed concurrently after refund",
                record.reservation_id
            ),
            Err(e) => error!(
                "could not mark escrow of reservation {} as canceled: {}",
                record.reservation_id, e
            ),
        }
        self.metrics.escrow_refunded();
        info!(
            "refunded escrow of capacity reservation {}: {}",
            record.reservation_id, cause
        );
        Ok(())
    }

    async fn refund_expired_capacity_reservations(&self) -> ExplorerResult<()> {
        let records = self
            .store
            .unpaid_expired_payments(Utc::now().timestamp())
            .await?;
        for record in records {
            let reservation_id = record.reservation_id;
            info!("escrow of capacity reservation {} expired", reservation_id);
            if let Err(e) = self.refund(record, "expired").await {
                error!(
                    "failed to refund escrow of capacity reservation {}: {}",
                    reservation_id, e
                );
            }
        }
        Ok(())
    }

    /// Finish the escrows a previous run left behind. Unconfirmed refunds are retried, and
    /// paid out reservations are reported as paid again.
    async fn recover_pending_payments(&self) -> ExplorerResult<()> {
        let records = self.store.pending_payments().await?;
        debug!("recovering {} pending escrows", records.len());
        for record in records {
            let reservation_id = record.reservation_id;
            if record.cancellation_pending {
                info!(
                    "retrying refund of capacity reservation {}",
                    reservation_id
                );
                let cause = record.cause.clone().unwrap_or_default();
                if let Err(e) = self.refund(record, &cause).await {
                    error!(
                        "failed to refund escrow of capacity reservation {}: {}",
                        reservation_id, e
                    );
                }
            } else if record.released {
                self.push_paid(reservation_id).await;
            } else {
                // the payout may or may not have gone through
                error!(
                    "payout of capacity reservation {} is not confirmed, leaving it for manual inspection",
                    reservation_id
                );
            }
        }
        Ok(())
    }
}

/// The distribution to use for a payout. Farms which are not grid3 compliant are paid as on
/// grid2. Sponsored capacity is sold by a certified sales channel, unless the farmer sells its
/// own capacity.
fn payout_distribution(
    base: DistributionName,
    farm: &Farm,
    record: &EscrowPaymentRecord,
) -> DistributionName {
    if !farm.is_grid3_compliant {
        return DistributionName::Grid2;
    }
    if base != DistributionName::Grid3 {
        return base;
    }
    let mut distribution = base;
    if record.sponsor_tid != 0 {
        distribution = DistributionName::CertifiedSales;
    }
    if farm.threebot_id == record.customer_tid
        || (record.sponsor_tid != 0 && farm.threebot_id == record.sponsor_tid)
    {
        distribution = DistributionName::FarmerSales;
    }
    distribution
}

/// A cheap handle to register capacity reservations with a running [`Escrow`].
#[derive(Clone)]
pub struct EscrowClient {
    jobs: mpsc::Sender<EscrowJob>,
}

#[async_trait]
impl CapacityEscrow for EscrowClient {
    async fn capacity_reservation(
        &self,
        reservation: &CapacityReservation,
        currencies: &[String],
    ) -> ExplorerResult<EscrowInformation> {
        let (tx, rx) = oneshot::channel();
        let job = EscrowJob {
            reservation: reservation.clone(),
            currencies: currencies.to_vec(),
            response: tx,
        };
        self.jobs.send(job).await.map_err(|_| {
            ExplorerError::with_message(ExplorerErrorKind::Async, "escrow is not running")
        })?;
        rx.await.map_err(|_| {
            ExplorerError::with_message(
                ExplorerErrorKind::Async,
                "escrow stopped before answering",
            )
        })?
    }
}
