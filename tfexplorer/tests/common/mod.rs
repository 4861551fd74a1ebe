#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tfexplorer::capacity::pool::Pool;
use tfexplorer::capacity::reservation::{CapacityReservation, ReservationData};
use tfexplorer::config::{Config, EscrowConfig};
use tfexplorer::directory::{
    CloudUnitPrice, Directories, DirectoryError, Farm, FarmDirectory, GatewayDirectory,
    GridNetwork, NodeDirectory, UserDirectory, WalletAddress,
};
use tfexplorer::escrow::types::{CustomerAddress, EscrowPaymentRecord, PaymentFlags};
use tfexplorer::escrow::{DistributionName, Escrow};
use tfexplorer::store::{EscrowStore, MemoryStore, PoolStore, StoreError, StoreErrorKind};
use tfexplorer::wallet::{Account, Asset, PayoutInfo, Wallet, WalletError};
use tfexplorer::Id;

pub const ISSUER: &str = "GISSUER";
pub const FOUNDATION: &str = "GFOUNDATION";
pub const FARMER_ADDRESS: &str = "GFARMER";

/// A payout as executed by the [`MockWallet`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedPayout {
    pub secret: String,
    pub memo: String,
    pub payouts: Vec<PayoutInfo>,
}

#[derive(Default)]
struct WalletState {
    accounts: usize,
    balances: HashMap<(String, String), i64>,
    payouts: Vec<ExecutedPayout>,
    refunds: Vec<String>,
    payout_attempts: usize,
    fail_payouts: bool,
    fail_refunds: bool,
}

/// Wallet keeping everything in memory. Clones share their state.
#[derive(Clone, Default)]
pub struct MockWallet {
    state: Arc<Mutex<WalletState>>,
}

impl MockWallet {
    /// Pretend `amount` was sent to `address` with `memo`.
    pub fn fund(&self, address: &str, memo: &str, amount: i64) {
        let mut state = self.state.lock().unwrap();
        *state
            .balances
            .entry((address.to_string(), memo.to_string()))
            .or_default() += amount;
    }

    pub fn fail_payouts(&self) {
        self.state.lock().unwrap().fail_payouts = true;
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.state.lock().unwrap().fail_refunds = fail;
    }

    /// Payouts which were tried, including the failed ones.
    pub fn payout_attempts(&self) -> usize {
        self.state.lock().unwrap().payout_attempts
    }

    pub fn accounts_created(&self) -> usize {
        self.state.lock().unwrap().accounts
    }

    pub fn payouts(&self) -> Vec<ExecutedPayout> {
        self.state.lock().unwrap().payouts.clone()
    }

    /// Memos of all refunds.
    pub fn refunds(&self) -> Vec<String> {
        self.state.lock().unwrap().refunds.clone()
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn create_account(&self) -> Result<Account, WalletError> {
        let mut state = self.state.lock().unwrap();
        state.accounts += 1;
        Ok(Account {
            secret: format!("SSECRET{}", state.accounts),
            address: format!("GESCROW{}", state.accounts),
        })
    }

    async fn get_balance(
        &self,
        address: &str,
        memo: &str,
        _: &Asset,
    ) -> Result<(i64, Vec<String>), WalletError> {
        let state = self.state.lock().unwrap();
        let balance = state
            .balances
            .get(&(address.to_string(), memo.to_string()))
            .copied()
            .unwrap_or(0);
        Ok((balance, vec!["GCUSTOMER".to_string()]))
    }

    async fn payout_farmers(
        &self,
        secret: &str,
        payouts: &[PayoutInfo],
        memo: &str,
        _: &Asset,
    ) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        state.payout_attempts += 1;
        if state.fail_payouts {
            return Err(WalletError::permanent("destination account does not exist"));
        }
        state.payouts.push(ExecutedPayout {
            secret: secret.to_string(),
            memo: memo.to_string(),
            payouts: payouts.to_vec(),
        });
        Ok(())
    }

    async fn refund(&self, _: &str, memo: &str, _: &Asset) -> Result<(), WalletError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_refunds {
            return Err(WalletError::permanent("escrow account is locked"));
        }
        state.refunds.push(memo.to_string());
        Ok(())
    }

    fn asset_from_code(&self, code: &str) -> Result<Asset, WalletError> {
        match code {
            "TFT" | "FreeTFT" => Ok(Asset::new(code, ISSUER)),
            _ => Err(WalletError::unsupported_asset(code)),
        }
    }

    fn precision_digits(&self) -> u32 {
        7
    }

    fn public_address(&self) -> String {
        FOUNDATION.to_string()
    }
}

#[derive(Default)]
struct DirectoryState {
    nodes: HashMap<String, Id>,
    gateways: HashMap<String, Id>,
    farms: HashMap<Id, Farm>,
    prices: HashMap<(Id, Id), CloudUnitPrice>,
    users: HashMap<Id, String>,
}

/// All directories in one in memory structure. Clones share their state.
#[derive(Clone, Default)]
pub struct MockDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl MockDirectory {
    /// Register a farm with a TFT address, owned by `threebot_id`.
    pub fn add_farm(&self, farm_id: Id, threebot_id: Id) {
        self.add_farm_with_addresses(
            farm_id,
            threebot_id,
            vec![WalletAddress {
                asset: "TFT".to_string(),
                address: FARMER_ADDRESS.to_string(),
            }],
        );
    }

    pub fn add_farm_with_addresses(
        &self,
        farm_id: Id,
        threebot_id: Id,
        wallet_addresses: Vec<WalletAddress>,
    ) {
        self.state.lock().unwrap().farms.insert(
            farm_id,
            Farm {
                id: farm_id,
                threebot_id,
                name: format!("farm{}", farm_id),
                wallet_addresses,
                is_grid3_compliant: true,
            },
        );
    }

    pub fn set_grid3_compliant(&self, farm_id: Id, compliant: bool) {
        if let Some(farm) = self.state.lock().unwrap().farms.get_mut(&farm_id) {
            farm.is_grid3_compliant = compliant;
        }
    }

    pub fn add_node(&self, node_id: &str, farm_id: Id) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(node_id.to_string(), farm_id);
    }

    pub fn add_gateway(&self, gateway_id: &str, farm_id: Id) {
        self.state
            .lock()
            .unwrap()
            .gateways
            .insert(gateway_id.to_string(), farm_id);
    }

    pub fn set_custom_price(&self, farm_id: Id, threebot_id: Id, price: CloudUnitPrice) {
        self.state
            .lock()
            .unwrap()
            .prices
            .insert((farm_id, threebot_id), price);
    }

    pub fn set_user_address(&self, user_id: Id, address: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .insert(user_id, address.to_string());
    }

    pub fn directories(&self) -> Directories {
        Directories {
            nodes: Arc::new(self.clone()),
            gateways: Arc::new(self.clone()),
            farms: Arc::new(self.clone()),
            users: Arc::new(self.clone()),
        }
    }
}

#[async_trait]
impl NodeDirectory for MockDirectory {
    async fn farm_of_node(&self, node_id: &str) -> Result<Id, DirectoryError> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(node_id)
            .copied()
            .ok_or_else(|| DirectoryError::NotFound(format!("node {}", node_id)))
    }
}

#[async_trait]
impl GatewayDirectory for MockDirectory {
    async fn farm_of_gateway(&self, gateway_id: &str) -> Result<Id, DirectoryError> {
        self.state
            .lock()
            .unwrap()
            .gateways
            .get(gateway_id)
            .copied()
            .ok_or_else(|| DirectoryError::NotFound(format!("gateway {}", gateway_id)))
    }
}

#[async_trait]
impl FarmDirectory for MockDirectory {
    async fn farm(&self, farm_id: Id) -> Result<Farm, DirectoryError> {
        self.state
            .lock()
            .unwrap()
            .farms
            .get(&farm_id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(format!("farm {}", farm_id)))
    }

    async fn custom_price(
        &self,
        farm_id: Id,
        threebot_id: Id,
    ) -> Result<Option<CloudUnitPrice>, DirectoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .prices
            .get(&(farm_id, threebot_id))
            .copied())
    }
}

#[async_trait]
impl UserDirectory for MockDirectory {
    async fn wallet_address(
        &self,
        user_id: Id,
        _: &str,
    ) -> Result<Option<String>, DirectoryError> {
        Ok(self.state.lock().unwrap().users.get(&user_id).cloned())
    }
}

/// A config on the main network, checking balances every second, with the given reservation
/// timeout in seconds.
pub fn config(reservation_timeout: u64) -> Config {
    let mut distributions = std::collections::BTreeMap::new();
    distributions.insert("TFT".to_string(), DistributionName::Grid3);
    let mut cfg = Config::new(GridNetwork::Main);
    cfg.set_escrow(EscrowConfig::new(1, reservation_timeout, 10, distributions));
    cfg.validate().expect("valid config");
    cfg
}

/// An escrow over the mocks and a fresh in memory store.
pub fn escrow(
    wallet: &MockWallet,
    directory: &MockDirectory,
    cfg: &Config,
) -> (Escrow<MockWallet, MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (escrow_on(wallet, directory, cfg, store.clone()), store)
}

/// An escrow over the mocks and the given store.
pub fn escrow_on<S>(
    wallet: &MockWallet,
    directory: &MockDirectory,
    cfg: &Config,
    store: Arc<S>,
) -> Escrow<MockWallet, S>
where
    S: EscrowStore + PoolStore,
{
    Escrow::new(wallet.clone(), store, directory.directories(), cfg).expect("create escrow")
}

/// A [`MemoryStore`] which can't mark escrows as released while `fail_release` is set.
#[derive(Default)]
pub struct ReleaseFailingStore {
    pub inner: MemoryStore,
    pub fail_release: AtomicBool,
}

#[async_trait]
impl EscrowStore for ReleaseFailingStore {
    async fn insert_payment(&self, record: EscrowPaymentRecord) -> Result<(), StoreError> {
        self.inner.insert_payment(record).await
    }

    async fn payment(&self, reservation_id: Id) -> Result<Option<EscrowPaymentRecord>, StoreError> {
        self.inner.payment(reservation_id).await
    }

    async fn update_payment(
        &self,
        record: &EscrowPaymentRecord,
        expected: PaymentFlags,
    ) -> Result<bool, StoreError> {
        if record.released && !expected.released && self.fail_release.load(Ordering::SeqCst) {
            return Err(StoreError::new(
                StoreErrorKind::Backend,
                "connection reset",
            ));
        }
        self.inner.update_payment(record, expected).await
    }

    async fn unpaid_active_payments(
        &self,
        now: i64,
    ) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        self.inner.unpaid_active_payments(now).await
    }

    async fn unpaid_expired_payments(
        &self,
        now: i64,
    ) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        self.inner.unpaid_expired_payments(now).await
    }

    async fn pending_payments(&self) -> Result<Vec<EscrowPaymentRecord>, StoreError> {
        self.inner.pending_payments().await
    }

    async fn customer_address(
        &self,
        customer_tid: Id,
    ) -> Result<Option<CustomerAddress>, StoreError> {
        self.inner.customer_address(customer_tid).await
    }

    async fn save_customer_address(&self, address: CustomerAddress) -> Result<(), StoreError> {
        self.inner.save_customer_address(address).await
    }
}

#[async_trait]
impl PoolStore for ReleaseFailingStore {
    async fn pool(&self, id: Id) -> Result<Option<Pool>, StoreError> {
        self.inner.pool(id).await
    }

    async fn insert_pool(&self, pool: Pool) -> Result<Pool, StoreError> {
        self.inner.insert_pool(pool).await
    }

    async fn update_pool(&self, pool: &Pool) -> Result<Option<Pool>, StoreError> {
        self.inner.update_pool(pool).await
    }

    async fn pools_by_owner(&self, customer_tid: Id) -> Result<Vec<Pool>, StoreError> {
        self.inner.pools_by_owner(customer_tid).await
    }
}

/// A stored reservation of `customer_tid` for the given unit seconds on the given nodes.
pub fn reservation(
    id: Id,
    customer_tid: Id,
    units: (u64, u64, u64),
    node_ids: &[&str],
) -> CapacityReservation {
    let mut reservation = CapacityReservation::new(
        customer_tid,
        ReservationData {
            pool_id: 0,
            cus: units.0,
            sus: units.1,
            ipv4us: units.2,
            node_ids: node_ids.iter().map(|n| n.to_string()).collect(),
            currencies: vec!["TFT".to_string()],
        },
    )
    .expect("create reservation");
    reservation.id = id;
    reservation.customer_signature = "00".to_string();
    reservation
}

/// Like [`reservation`], but adding the capacity to an existing pool.
pub fn top_up(
    id: Id,
    customer_tid: Id,
    pool_id: Id,
    units: (u64, u64, u64),
    node_ids: &[&str],
) -> CapacityReservation {
    let mut top_up = reservation(id, customer_tid, units, node_ids);
    top_up.data_reservation.pool_id = pool_id;
    top_up.json = serde_json::to_string(&top_up.data_reservation).expect("encode reservation");
    top_up
}

pub fn currencies(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}
