use crate::Id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The grid network an explorer is serving. Every network scales prices with its own
/// divisor, to make testing on non production networks cheaper.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GridNetwork {
    /// The production network.
    Main,
    /// The test network.
    Test,
    /// The development network.
    Dev,
}

impl GridNetwork {
    /// The divisor applied to computed prices on this network.
    pub fn divisor(&self) -> u64 {
        match self {
            GridNetwork::Main => 1,
            GridNetwork::Test => 10,
            GridNetwork::Dev => 100,
        }
    }
}

impl fmt::Display for GridNetwork {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            GridNetwork::Main => "main",
            GridNetwork::Test => "test",
            GridNetwork::Dev => "dev",
        })
    }
}

/// A farm as known by the farm directory, limited to what settling payments needs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Farm {
    /// Id of the farm.
    pub id: Id,
    /// Id of the threebot owning the farm.
    pub threebot_id: Id,
    /// Name of the farm.
    pub name: String,
    /// Addresses the farmer wants to be paid on, per asset code.
    #[serde(default)]
    pub wallet_addresses: Vec<WalletAddress>,
    /// Farms which are not grid3 compliant are still paid out as on grid2.
    #[serde(default)]
    pub is_grid3_compliant: bool,
}

impl Farm {
    /// The address on which the farmer receives payments in the given asset, if any. An
    /// empty address counts as no address.
    pub fn wallet_address(&self, asset_code: &str) -> Option<&str> {
        self.wallet_addresses
            .iter()
            .find(|wa| wa.asset == asset_code)
            .map(|wa| wa.address.as_str())
            .filter(|address| !address.is_empty())
    }
}

/// A payout address of a farmer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WalletAddress {
    /// The asset code this address accepts.
    pub asset: String,
    /// The address itself.
    pub address: String,
}

/// Price of capacity, in dollars per month. A field set to 0 means the default price is used
/// for that unit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct CloudUnitPrice {
    /// Price of a compute unit.
    pub cu: f64,
    /// Price of a storage unit.
    pub su: f64,
    /// Price of a public ipv4 address.
    pub ipv4u: f64,
}

/// Access to registered nodes.
#[async_trait]
pub trait NodeDirectory: Send + Sync {
    /// Get the id of the farm which owns the node. Returns [`DirectoryError::NotFound`] if no
    /// such node is registered.
    async fn farm_of_node(&self, node_id: &str) -> Result<Id, DirectoryError>;
}

/// Access to registered gateways.
#[async_trait]
pub trait GatewayDirectory: Send + Sync {
    /// Get the id of the farm which owns the gateway. Returns [`DirectoryError::NotFound`] if
    /// no such gateway is registered.
    async fn farm_of_gateway(&self, gateway_id: &str) -> Result<Id, DirectoryError>;
}

/// Access to registered farms.
#[async_trait]
pub trait FarmDirectory: Send + Sync {
    /// Get a farm by its id.
    async fn farm(&self, farm_id: Id) -> Result<Farm, DirectoryError>;
    /// Get the price a farm set for a specific threebot, if there is one.
    async fn custom_price(
        &self,
        farm_id: Id,
        threebot_id: Id,
    ) -> Result<Option<CloudUnitPrice>, DirectoryError>;
}

/// Access to registered users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Get the address on which a user receives payments in the given asset, if any.
    async fn wallet_address(
        &self,
        user_id: Id,
        asset_code: &str,
    ) -> Result<Option<String>, DirectoryError>;
}

/// All directories the escrow consults, behind shared handles.
#[derive(Clone)]
pub struct Directories {
    /// Registered nodes.
    pub nodes: Arc<dyn NodeDirectory>,
    /// Registered gateways.
    pub gateways: Arc<dyn GatewayDirectory>,
    /// Registered farms.
    pub farms: Arc<dyn FarmDirectory>,
    /// Registered users.
    pub users: Arc<dyn UserDirectory>,
}

impl Directories {
    /// Get the farm owning a node or gateway. Nodes are looked up first, gateways only if no
    /// node with the id exists.
    pub async fn farm_of(&self, id: &str) -> Result<Id, DirectoryError> {
        match self.nodes.farm_of_node(id).await {
            Err(DirectoryError::NotFound(_)) => self.gateways.farm_of_gateway(id).await,
            other => other,
        }
    }
}

/// An error returned by a directory.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryError {
    /// The requested object does not exist.
    NotFound(String),
    /// Any other failure.
    Other(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DirectoryError::NotFound(what) => write!(f, "{} not found", what),
            DirectoryError::Other(msg) => write!(f, "directory failure: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[cfg(test)]
mod tests {
    use super::{Farm, GridNetwork, WalletAddress};

    #[test]
    fn network_divisors() {
        assert_eq!(GridNetwork::Main.divisor(), 1);
        assert_eq!(GridNetwork::Test.divisor(), 10);
        assert_eq!(GridNetwork::Dev.divisor(), 100);
    }

    #[test]
    fn farm_wallet_lookup() {
        let farm = Farm {
            id: 1,
            threebot_id: 5,
            name: "freefarm".to_string(),
            wallet_addresses: vec![
                WalletAddress {
                    asset: "TFT".to_string(),
                    address: "GTFT".to_string(),
                },
                WalletAddress {
                    asset: "TFTA".to_string(),
                    address: "GTFTA".to_string(),
                },
                WalletAddress {
                    asset: "FreeTFT".to_string(),
                    address: String::new(),
                },
            ],
            is_grid3_compliant: true,
        };
        assert_eq!(farm.wallet_address("TFTA"), Some("GTFTA"));
        assert_eq!(farm.wallet_address("FreeTFT"), None);
        assert_eq!(farm.wallet_address("BTC"), None);
    }

    #[test]
    fn farms_are_not_grid3_compliant_by_default() {
        let farm: Farm =
            serde_json::from_str(r#"{"id": 1, "threebot_id": 5, "name": "oldfarm"}"#).unwrap();
        assert!(!farm.is_grid3_compliant);
        assert!(farm.wallet_addresses.is_empty());
    }
}
