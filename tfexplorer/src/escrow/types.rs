use crate::wallet::Asset;
use crate::Id;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Memo attached to payments for a capacity reservation.
pub fn capacity_reservation_memo(reservation_id: Id) -> String {
    format!("p-{}", reservation_id)
}

/// Payment information of a capacity reservation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EscrowPaymentRecord {
    /// The reservation being paid for.
    pub reservation_id: Id,
    /// Customer paying.
    pub customer_tid: Id,
    /// Sponsor of the reservation, 0 if there is none.
    pub sponsor_tid: Id,
    /// Farm receiving the payout.
    pub farmer_id: Id,
    /// Escrow address the customer pays to.
    pub address: String,
    /// Asset to pay with.
    pub asset: Asset,
    /// Amount to pay, in the smallest unit of the asset.
    pub amount: i64,
    /// Unix timestamp after which an unreleased escrow is refunded.
    pub expiration: i64,
    /// The full amount has been received.
    pub paid: bool,
    /// The amount has been paid out.
    pub released: bool,
    /// The escrow has been refunded.
    pub canceled: bool,
    /// A refund was started but is not confirmed yet.
    #[serde(default)]
    pub cancellation_pending: bool,
    /// Why the escrow was canceled.
    pub cause: Option<String>,
    /// Wallet operations which failed for this escrow, oldest first.
    #[serde(default)]
    pub failures: Vec<PaymentFailure>,
}

/// A wallet operation on an escrow which failed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PaymentFailure {
    /// The operation which failed.
    pub operation: PaymentOperation,
    /// The error returned by the wallet.
    pub error: String,
    /// Unix timestamp of the failure.
    pub timestamp: i64,
}

impl PaymentFailure {
    /// A failure of `operation` which happened just now.
    pub fn new(operation: PaymentOperation, error: &impl fmt::Display) -> Self {
        PaymentFailure {
            operation,
            error: error.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// A wallet operation moving the funds of an escrow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOperation {
    /// Paying out the farmer and the other destinations.
    Payout,
    /// Sending the funds back to the customer.
    Refund,
}

/// The settlement flags of a payment record. Stored records are only updated if their flags
/// still match the flags the update was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentFlags {
    /// See [`EscrowPaymentRecord::paid`].
    pub paid: bool,
    /// See [`EscrowPaymentRecord::released`].
    pub released: bool,
    /// See [`EscrowPaymentRecord::canceled`].
    pub canceled: bool,
    /// See [`EscrowPaymentRecord::cancellation_pending`].
    pub cancellation_pending: bool,
}

impl EscrowPaymentRecord {
    /// Current settlement flags.
    pub fn flags(&self) -> PaymentFlags {
        PaymentFlags {
            paid: self.paid,
            released: self.released,
            canceled: self.canceled,
            cancellation_pending: self.cancellation_pending,
        }
    }

    /// The funds are being or have been moved, the escrow is settled one way or another.
    pub fn is_settled(&self) -> bool {
        self.released || self.canceled || self.cancellation_pending
    }

    /// The memo payments for this record must carry.
    pub fn memo(&self) -> String {
        capacity_reservation_memo(self.reservation_id)
    }
}

/// The escrow account of a customer, reused for all of its reservations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CustomerAddress {
    /// The customer.
    pub customer_tid: Id,
    /// Public address of the account.
    pub address: String,
    /// Secret of the account.
    pub secret: String,
}

/// What a customer needs to pay for a capacity reservation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EscrowInformation {
    /// Address to pay to.
    pub address: String,
    /// Asset to pay with, none if nothing needs to be paid.
    pub asset: Option<Asset>,
    /// Amount to pay, in the smallest unit of the asset.
    pub amount: i64,
}
