#![deny(missing_docs)]
#![deny(unused_doc_comments)]
#![deny(dead_code)]

//! This crate contains the capacity accounting and payment settlement engine of the grid
//! explorer. This includes the capacity pool ledger, the escrow which settles capacity
//! purchases over a wallet, the payout splitter and the reservation / workload pipelines.
//! There are also config structs and store abstractions available.

use actix::MailboxError;
use config::ConfigError;
use crypto::SignatureError;
use directory::DirectoryError;
use std::fmt;
use store::{StoreError, StoreErrorKind};
use wallet::WalletError;

/// Implementations of long running components as actors.
pub mod actors;
/// Capacity pools, capacity reservations and the planner managing them.
pub mod capacity;
/// Contains global configuration details.
pub mod config;
/// Signature verification helpers.
pub mod crypto;
/// Interfaces to the node, gateway, farm and user directories.
pub mod directory;
/// The escrow settling capacity reservations.
pub mod escrow;
/// Persistence abstractions, and an in memory implementation.
pub mod store;
/// The wallet capability used to move funds.
pub mod wallet;
/// Workload and reservation types, and the pipeline driving their lifecycle.
pub mod workloads;

/// Identifier of persisted objects.
pub type Id = i64;

/// Global result type for explorer operations
pub type ExplorerResult<T> = Result<T, ExplorerError>;

/// An error originating in the explorer
#[derive(Debug)]
pub struct ExplorerError {
    kind: ExplorerErrorKind,
    internal: InternalError,
}

impl fmt::Display for ExplorerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error during {}: {}", self.kind, self.internal)
    }
}

impl std::error::Error for ExplorerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.internal {
            InternalError::Wallet(ref e) => Some(e),
            InternalError::Other(ref e) => Some(e.as_ref()),
            InternalError::Message(_) => None,
        }
    }
}

impl ExplorerError {
    /// Create a new ExplorerError from any kind, with the underlying error included
    pub fn new(kind: ExplorerErrorKind, internal: Box<dyn std::error::Error + Send + Sync>) -> Self {
        ExplorerError {
            kind,
            internal: InternalError::Other(internal),
        }
    }

    /// Create a new ExplorerError which only carries a message.
    pub fn with_message(kind: ExplorerErrorKind, msg: impl Into<String>) -> Self {
        ExplorerError {
            kind,
            internal: InternalError::Message(msg.into()),
        }
    }

    /// Shorthand for a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ExplorerErrorKind::Validation, msg)
    }

    /// The error returned when a pool can't be found.
    pub fn pool_not_found(id: Id) -> Self {
        Self::with_message(ExplorerErrorKind::PoolNotFound(id), "pool does not exist")
    }

    /// Return the kind of this error.
    pub fn kind(&self) -> &ExplorerErrorKind {
        &self.kind
    }

    /// Return a reference to the embedded [`WalletError`], if this error is caused by
    /// a WalletError, or nothing otherwise.
    pub fn wallet_error(&self) -> Option<&WalletError> {
        match self.internal {
            InternalError::Wallet(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Wrapper error for the ExplorerError
#[derive(Debug)]
enum InternalError {
    Wallet(WalletError),
    Other(Box<dyn std::error::Error + Send + Sync>),
    Message(String),
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InternalError::Wallet(ref e) => write!(f, "{}", e),
            InternalError::Other(e) => write!(f, "{}", e),
            InternalError::Message(msg) => f.write_str(msg),
        }
    }
}

/// Information about what went wrong, and in which part of the system.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplorerErrorKind {
    /// The input is malformed or violates a business rule.
    Validation,
    /// The referenced capacity pool does not exist.
    PoolNotFound(Id),
    /// There is no escrow record for the referenced reservation.
    EscrowNotFound(Id),
    /// None of the offered currencies can be used for payment.
    NoCurrencySupported,
    /// None of the supported currencies is accepted by the farmer.
    NoCurrencyShared,
    /// The request conflicts with existing state.
    Conflict,
    /// The caller is not allowed to act on the referenced object.
    Unauthorized,
    /// An error in the backing store.
    Storage,
    /// An error while talking to the wallet.
    Wallet,
    /// An error while talking to one of the directories.
    Directory,
    /// An error in the configuration.
    Config,
    /// An error while waiting for an asynchronous task or actor to respond.
    Async,
    /// An error while collecting metrics.
    Metrics,
}

/// The class of response a caller should produce for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// The request itself is wrong.
    BadRequest,
    /// The request can't be paid for.
    PaymentRequired,
    /// The request conflicts with existing state.
    Conflict,
    /// The caller is not allowed to do this.
    Forbidden,
    /// The referenced object does not exist.
    NotFound,
    /// Something on our side failed.
    Internal,
}

impl ExplorerErrorKind {
    /// Map the error kind to the response class presented to a caller.
    pub fn response_class(&self) -> ResponseClass {
        match self {
            ExplorerErrorKind::Validation => ResponseClass::BadRequest,
            ExplorerErrorKind::PoolNotFound(_) | ExplorerErrorKind::EscrowNotFound(_) => {
                ResponseClass::NotFound
            }
            ExplorerErrorKind::NoCurrencySupported | ExplorerErrorKind::NoCurrencyShared => {
                ResponseClass::PaymentRequired
            }
            ExplorerErrorKind::Conflict => ResponseClass::Conflict,
            ExplorerErrorKind::Unauthorized => ResponseClass::Forbidden,
            ExplorerErrorKind::Storage
            | ExplorerErrorKind::Wallet
            | ExplorerErrorKind::Directory
            | ExplorerErrorKind::Config
            | ExplorerErrorKind::Async
            | ExplorerErrorKind::Metrics => ResponseClass::Internal,
        }
    }
}

impl fmt::Display for ExplorerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ExplorerErrorKind::Validation => "validation".to_string(),
                ExplorerErrorKind::PoolNotFound(id) => format!("lookup of pool {}", id),
                ExplorerErrorKind::EscrowNotFound(id) =>
                    format!("lookup of escrow for reservation {}", id),
                ExplorerErrorKind::NoCurrencySupported => "currency selection".to_string(),
                ExplorerErrorKind::NoCurrencyShared => "currency negotiation".to_string(),
                ExplorerErrorKind::Conflict => "conflict check".to_string(),
                ExplorerErrorKind::Unauthorized => "authorization".to_string(),
                ExplorerErrorKind::Storage => "storage".to_string(),
                ExplorerErrorKind::Wallet => "wallet operation".to_string(),
                ExplorerErrorKind::Directory => "directory lookup".to_string(),
                ExplorerErrorKind::Config => "configuration".to_string(),
                ExplorerErrorKind::Async => "waiting for async task completion".to_string(),
                ExplorerErrorKind::Metrics => "metrics collection".to_string(),
            }
        )
    }
}

impl From<WalletError> for ExplorerError {
    fn from(e: WalletError) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Wallet,
            internal: InternalError::Wallet(e),
        }
    }
}

impl From<StoreError> for ExplorerError {
    fn from(e: StoreError) -> Self {
        ExplorerError {
            kind: match e.kind() {
                StoreErrorKind::Conflict => ExplorerErrorKind::Conflict,
                _ => ExplorerErrorKind::Storage,
            },
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<DirectoryError> for ExplorerError {
    fn from(e: DirectoryError) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Directory,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<SignatureError> for ExplorerError {
    fn from(e: SignatureError) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Unauthorized,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<ConfigError> for ExplorerError {
    fn from(e: ConfigError) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Config,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<toml::de::Error> for ExplorerError {
    fn from(e: toml::de::Error) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Config,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(e: serde_json::Error) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Validation,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<MailboxError> for ExplorerError {
    fn from(e: MailboxError) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Async,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<prometheus::Error> for ExplorerError {
    fn from(e: prometheus::Error) -> Self {
        ExplorerError {
            kind: ExplorerErrorKind::Metrics,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}
