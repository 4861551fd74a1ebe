use crate::config::BackoffConfig;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::time::{self, Instant};

/// The TFT asset on the public network.
pub const TFT_MAINNET: &str = "TFT:GBOVQKJYHXRR3DX6NOX2RRYFRCUMSADGDESTDNBDS6CDVLGVESRTAC47";
/// The TFT asset on the test network.
pub const TFT_TESTNET: &str = "TFT:GA47YZA3PKFUZMPLQ3B5F2E3CJIB57TGGU7SPCQT2WAEYKN766PWIMB3";

/// An asset in the form `CODE:ISSUER`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Asset(String);

impl Asset {
    /// Create a new asset from its code and issuer.
    pub fn new(code: &str, issuer: &str) -> Self {
        Asset(format!("{}:{}", code, issuer))
    }

    /// Parse an asset from its full `CODE:ISSUER` form.
    pub fn parse(s: &str) -> Result<Self, WalletError> {
        let asset = Asset(s.to_string());
        asset.validate()?;
        Ok(asset)
    }

    /// Check that the asset has exactly a non empty code and issuer.
    pub fn validate(&self) -> Result<(), WalletError> {
        let parts: Vec<&str> = self.0.split(':').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(WalletError::permanent(format!(
                "invalid asset string {}",
                self.0
            )));
        }
        Ok(())
    }

    /// The asset code.
    pub fn code(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    /// The issuer of the asset. Funds sent to the issuer are burned.
    pub fn issuer(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// The full `CODE:ISSUER` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single payment of a payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutInfo {
    /// Receiving address.
    pub address: String,
    /// Amount in the smallest unit of the asset.
    pub amount: i64,
}

/// The credentials of a freshly created account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Secret seed of the account.
    pub secret: String,
    /// Public address of the account.
    pub address: String,
}

/// Capability to move funds on a ledger. Amounts are expressed in the smallest unit of the
/// asset, with [`Wallet::precision_digits`] decimals.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Create a new account, funded well enough to hold the supported assets.
    async fn create_account(&self) -> Result<Account, WalletError>;
    /// Get the amount of `asset` received on `address` with the given memo, and the addresses
    /// which sent it.
    async fn get_balance(
        &self,
        address: &str,
        memo: &str,
        asset: &Asset,
    ) -> Result<(i64, Vec<String>), WalletError>;
    /// Pay out funds received with `memo` from the account with the given secret.
    async fn payout_farmers(
        &self,
        secret: &str,
        payouts: &[PayoutInfo],
        memo: &str,
        asset: &Asset,
    ) -> Result<(), WalletError>;
    /// Send everything received with `memo` back to the funders.
    async fn refund(&self, secret: &str, memo: &str, asset: &Asset) -> Result<(), WalletError>;
    /// Resolve an asset code to a full asset. Returns an error of kind
    /// [`WalletErrorKind::UnsupportedAsset`] if the wallet does not know the code.
    fn asset_from_code(&self, code: &str) -> Result<Asset, WalletError>;
    /// Amount of decimals of the smallest unit of an asset.
    fn precision_digits(&self) -> u32;
    /// The public address of the wallet itself.
    fn public_address(&self) -> String;
}

/// Wallet wrapper which retries transient failures of mutating operations with an
/// exponential backoff. Reads are passed through as is, since the reconciliation loop
/// already repeats them.
pub struct RetryWallet<W> {
    inner: W,
    backoff: BackoffConfig,
}

impl<W: Wallet> RetryWallet<W> {
    /// Wrap a wallet.
    pub fn new(inner: W, backoff: BackoffConfig) -> Self {
        RetryWallet { inner, backoff }
    }

    /// Get a reference to the wrapped wallet.
    pub fn inner(&self) -> &W {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, WalletError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WalletError>>,
    {
        let start = Instant::now();
        let mut interval = self.backoff.initial_interval();
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if start.elapsed() + interval > self.backoff.max_elapsed() {
                        warn!("giving up on {} after {} attempts: {}", op, attempt, e);
                        return Err(e);
                    }
                    debug!("{} attempt {} failed, retrying in {:?}: {}", op, attempt, interval, e);
                    time::sleep(interval).await;
                    attempt += 1;
                    interval = interval
                        .mul_f64(self.backoff.multiplier())
                        .min(self.backoff.max_interval());
                }
            }
        }
    }
}

#[async_trait]
impl<W: Wallet> Wallet for RetryWallet<W> {
    async fn create_account(&self) -> Result<Account, WalletError> {
        self.retry("account creation", || self.inner.create_account())
            .await
    }

    async fn get_balance(
        &self,
        address: &str,
        memo: &str,
        asset: &Asset,
    ) -> Result<(i64, Vec<String>), WalletError> {
        self.inner.get_balance(address, memo, asset).await
    }

    async fn payout_farmers(
        &self,
        secret: &str,
        payouts: &[PayoutInfo],
        memo: &str,
        asset: &Asset,
    ) -> Result<(), WalletError> {
        self.retry("payout", || {
            self.inner.payout_farmers(secret, payouts, memo, asset)
        })
        .await
    }

    async fn refund(&self, secret: &str, memo: &str, asset: &Asset) -> Result<(), WalletError> {
        self.retry("refund", || self.inner.refund(secret, memo, asset))
            .await
    }

    fn asset_from_code(&self, code: &str) -> Result<Asset, WalletError> {
        self.inner.asset_from_code(code)
    }

    fn precision_digits(&self) -> u32 {
        self.inner.precision_digits()
    }

    fn public_address(&self) -> String {
        self.inner.public_address()
    }
}

/// An error returned by a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletError {
    kind: WalletErrorKind,
    msg: String,
}

/// The kind of wallet failure. Determines if an operation can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletErrorKind {
    /// A temporary failure, e.g. the ledger node is unreachable. Safe to retry.
    Transient,
    /// The operation can not succeed by retrying it.
    Permanent,
    /// The asset code is not known to the wallet.
    UnsupportedAsset,
}

impl WalletError {
    /// Create a new wallet error.
    pub fn new(kind: WalletErrorKind, msg: impl Into<String>) -> Self {
        WalletError {
            kind,
            msg: msg.into(),
        }
    }

    /// Create a new transient error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(WalletErrorKind::Transient, msg)
    }

    /// Create a new permanent error.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::new(WalletErrorKind::Permanent, msg)
    }

    /// The error returned when an asset code is not supported.
    pub fn unsupported_asset(code: &str) -> Self {
        Self::new(
            WalletErrorKind::UnsupportedAsset,
            format!("asset {} is not supported", code),
        )
    }

    /// The kind of this error.
    pub fn kind(&self) -> WalletErrorKind {
        self.kind
    }

    /// Whether the failed operation can be retried.
    pub fn is_transient(&self) -> bool {
        self.kind == WalletErrorKind::Transient
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} wallet error: {}",
            match self.kind {
                WalletErrorKind::Transient => "transient",
                WalletErrorKind::Permanent => "permanent",
                WalletErrorKind::UnsupportedAsset => "asset",
            },
            self.msg
        )
    }
}

impl std::error::Error for WalletError {}
