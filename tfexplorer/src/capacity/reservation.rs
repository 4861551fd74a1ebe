use crate::capacity::units::CloudUnits;
use crate::crypto;
use crate::{ExplorerError, ExplorerResult, Id};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A signed request to buy capacity for a (new) pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CapacityReservation {
    /// Id of the reservation, 0 until it is stored.
    pub id: Id,
    /// The payload signed by the customer. Must encode the same data as `data_reservation`.
    pub json: String,
    /// The requested capacity.
    pub data_reservation: ReservationData,
    /// The customer buying the capacity.
    pub customer_tid: Id,
    /// Hex encoded signature of `json` by the customer.
    pub customer_signature: String,
    /// Threebot sponsoring the reservation, 0 if there is none.
    #[serde(default)]
    pub sponsor_tid: Id,
    /// Hex encoded signature of `json` by the sponsor.
    #[serde(default)]
    pub sponsor_signature: String,
}

/// The capacity requested in a [`CapacityReservation`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReservationData {
    /// Pool to add the capacity to. A new pool is created if this is 0.
    pub pool_id: Id,
    /// Compute unit seconds to buy.
    pub cus: u64,
    /// Storage unit seconds to buy.
    pub sus: u64,
    /// Ipv4 unit seconds to buy.
    #[serde(default)]
    pub ipv4us: u64,
    /// Nodes the pool can be used on.
    pub node_ids: Vec<String>,
    /// Currencies the customer is willing to pay with, in order of preference.
    pub currencies: Vec<String>,
}

impl CapacityReservation {
    /// Create a new unsigned reservation. The json payload is generated from the data.
    pub fn new(customer_tid: Id, data_reservation: ReservationData) -> ExplorerResult<Self> {
        Ok(CapacityReservation {
            id: 0,
            json: serde_json::to_string(&data_reservation)?,
            data_reservation,
            customer_tid,
            customer_signature: String::new(),
            sponsor_tid: 0,
            sponsor_signature: String::new(),
        })
    }

    /// Check the reservation is well formed, and the signed payload matches the data.
    pub fn validate(&self) -> ExplorerResult<()> {
        if self.customer_tid == 0 {
            return Err(ExplorerError::validation("customer_tid is required"));
        }
        if self.customer_signature.is_empty() {
            return Err(ExplorerError::validation("customer_signature is required"));
        }
        if self.data_reservation.node_ids.is_empty() {
            return Err(ExplorerError::validation(
                "a capacity reservation needs at least 1 node",
            ));
        }
        let mut seen = HashSet::new();
        for node_id in &self.data_reservation.node_ids {
            if !seen.insert(node_id) {
                return Err(ExplorerError::validation(format!(
                    "node {} is listed multiple times",
                    node_id
                )));
            }
        }
        let signed: ReservationData = serde_json::from_str(&self.json)?;
        if signed != self.data_reservation {
            return Err(ExplorerError::validation(
                "json data does not match the reservation data",
            ));
        }
        Ok(())
    }

    /// Verify the customer signature with the customer's hex encoded public key.
    pub fn verify(&self, pubkey_hex: &str) -> ExplorerResult<()> {
        crypto::verify_hex(pubkey_hex, self.json.as_bytes(), &self.customer_signature)?;
        Ok(())
    }

    /// Verify the sponsor signature with the sponsor's hex encoded public key.
    pub fn verify_sponsor(&self, pubkey_hex: &str) -> ExplorerResult<()> {
        if self.sponsor_tid == 0 {
            return Err(ExplorerError::validation("reservation has no sponsor"));
        }
        crypto::verify_hex(pubkey_hex, self.json.as_bytes(), &self.sponsor_signature)?;
        Ok(())
    }

    /// Id of the pool the capacity goes to. A reservation creating a new pool gives the pool
    /// its own id.
    pub fn target_pool_id(&self) -> Id {
        if self.data_reservation.pool_id != 0 {
            self.data_reservation.pool_id
        } else {
            self.id
        }
    }

    /// The purchased capacity in unit seconds.
    pub fn purchased_units(&self) -> CloudUnits {
        CloudUnits {
            cu: self.data_reservation.cus as f64,
            su: self.data_reservation.sus as f64,
            ipv4u: self.data_reservation.ipv4us as f64,
        }
    }
}
