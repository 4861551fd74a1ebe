use crate::capacity::units::CloudUnits;
use crate::Id;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Active rates below this value are considered to be 0. Repeated additions and subtractions
/// of float rates leave tiny residues behind, which would otherwise keep a pool draining.
const ACTIVE_RATE_EPSILON: f64 = 0.00001;

/// A capacity pool: a prepaid balance of compute and storage unit seconds, owned by a single
/// customer and usable on a fixed set of nodes.
///
/// Balances are only correct as of `last_updated`. Every mutation first drains the pool for
/// the time elapsed since then, at the active rates. Balances can go negative, which means the
/// pool ran out of capacity in the past.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pool {
    /// Id of the pool.
    pub id: Id,
    /// The customer owning the pool.
    pub customer_tid: Id,
    /// The threebot which sponsored the pool, 0 if there is none.
    #[serde(default)]
    pub sponsor_tid: Id,
    /// Nodes on which workloads can be funded by this pool.
    pub node_ids: BTreeSet<String>,
    /// Remaining compute unit seconds as of `last_updated`.
    pub cus: f64,
    /// Remaining storage unit seconds as of `last_updated`.
    pub sus: f64,
    /// Remaining ipv4 unit seconds as of `last_updated`.
    pub ipv4us: f64,
    /// Compute units consumed per second.
    pub active_cu: f64,
    /// Storage units consumed per second.
    pub active_su: f64,
    /// Ipv4 units consumed per second.
    pub active_ipv4: f64,
    /// Workloads currently consuming capacity from this pool.
    #[serde(default)]
    pub active_workload_ids: BTreeSet<Id>,
    /// Paid reservations whose capacity was added to this pool.
    #[serde(default)]
    pub paid_reservation_ids: BTreeSet<Id>,
    /// Unix timestamp of the last balance update.
    pub last_updated: i64,
    /// Unix timestamp at which the pool runs out of capacity at the current rates.
    pub empty_at: i64,
    /// Version of the stored pool, used to detect concurrent updates.
    #[serde(default)]
    pub version: u64,
}

impl Pool {
    /// Create a new empty pool.
    pub fn new(id: Id, customer_tid: Id, node_ids: impl IntoIterator<Item = String>) -> Self {
        Self::new_at(id, customer_tid, node_ids, Utc::now().timestamp())
    }

    /// Create a new empty pool, last updated at the given unix timestamp.
    pub fn new_at(
        id: Id,
        customer_tid: Id,
        node_ids: impl IntoIterator<Item = String>,
        now: i64,
    ) -> Self {
        Pool {
            id,
            customer_tid,
            sponsor_tid: 0,
            node_ids: node_ids.into_iter().collect(),
            cus: 0.,
            sus: 0.,
            ipv4us: 0.,
            active_cu: 0.,
            active_su: 0.,
            active_ipv4: 0.,
            active_workload_ids: BTreeSet::new(),
            paid_reservation_ids: BTreeSet::new(),
            last_updated: now,
            empty_at: i64::MAX,
            version: 0,
        }
    }

    /// Add purchased capacity to the pool.
    pub fn add_capacity(&mut self, units: CloudUnits) {
        self.add_capacity_at(units, Utc::now().timestamp())
    }

    /// Add purchased capacity to the pool at the given unix timestamp.
    pub fn add_capacity_at(&mut self, units: CloudUnits, now: i64) {
        self.sync_current_capacity(now);
        self.cus += units.cu;
        self.sus += units.su;
        self.ipv4us += units.ipv4u;
        self.sync_pool_expiration();
    }

    /// Add the capacity bought by a paid reservation at the given unix timestamp. The capacity
    /// of a reservation is only added once. Returns whether the pool changed.
    pub fn add_paid_capacity_at(&mut self, reservation_id: Id, units: CloudUnits, now: i64) -> bool {
        if !self.paid_reservation_ids.insert(reservation_id) {
            return false;
        }
        self.add_capacity_at(units, now);
        true
    }

    /// Start consuming capacity for a workload. Adding a workload which is already active has
    /// no effect. Returns whether the pool changed.
    pub fn add_workload(&mut self, workload_id: Id, units: CloudUnits) -> bool {
        self.add_workload_at(workload_id, units, Utc::now().timestamp())
    }

    /// Start consuming capacity for a workload at the given unix timestamp.
    pub fn add_workload_at(&mut self, workload_id: Id, units: CloudUnits, now: i64) -> bool {
        if self.active_workload_ids.contains(&workload_id) {
            return false;
        }
        self.sync_current_capacity(now);
        self.active_workload_ids.insert(workload_id);
        self.active_cu += units.cu;
        self.active_su += units.su;
        self.active_ipv4 += units.ipv4u;
        self.sync_pool_expiration();
        true
    }

    /// Stop consuming capacity for a workload. Removing a workload which is not active has no
    /// effect. Returns whether the pool changed.
    pub fn remove_workload(&mut self, workload_id: Id, units: CloudUnits) -> bool {
        self.remove_workload_at(workload_id, units, Utc::now().timestamp())
    }

    /// Stop consuming capacity for a workload at the given unix timestamp.
    pub fn remove_workload_at(&mut self, workload_id: Id, units: CloudUnits, now: i64) -> bool {
        if !self.active_workload_ids.remove(&workload_id) {
            return false;
        }
        self.sync_current_capacity(now);
        self.active_cu = clamp_rate(self.active_cu - units.cu);
        self.active_su = clamp_rate(self.active_su - units.su);
        self.active_ipv4 = clamp_rate(self.active_ipv4 - units.ipv4u);
        self.sync_pool_expiration();
        true
    }

    /// Check if workloads on the given node can be funded by this pool.
    pub fn allowed_in_pool(&self, node_id: &str) -> bool {
        self.node_ids.contains(node_id)
    }

    /// Seconds the pool can still run at the current rates, as of `now`. Negative if the pool
    /// is already empty.
    pub fn remaining_seconds(&self, now: i64) -> i64 {
        self.empty_at.saturating_sub(now)
    }

    /// Drain the balances for the time elapsed since the last update.
    pub fn sync_current_capacity(&mut self, now: i64) {
        let elapsed = (now - self.last_updated) as f64;
        self.cus -= self.active_cu * elapsed;
        self.sus -= self.active_su * elapsed;
        self.ipv4us -= self.active_ipv4 * elapsed;
        self.last_updated = now;
    }

    /// Recompute `empty_at` from the current balances and rates. A resource which is not
    /// consumed never runs out, so it does not bound the expiration.
    fn sync_pool_expiration(&mut self) {
        let shortest = [
            time_to_empty(self.cus, self.active_cu),
            time_to_empty(self.sus, self.active_su),
            time_to_empty(self.ipv4us, self.active_ipv4),
        ]
        .into_iter()
        .flatten()
        .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.min(t))));

        self.empty_at = match shortest {
            None => i64::MAX,
            // float to int casts saturate
            Some(t) => self.last_updated.saturating_add(t.floor() as i64),
        };
    }
}

fn time_to_empty(balance: f64, rate: f64) -> Option<f64> {
    if rate == 0. {
        None
    } else {
        Some(balance / rate)
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate < ACTIVE_RATE_EPSILON {
        0.
    } else {
        rate
    }
}
