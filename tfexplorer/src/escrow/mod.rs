/// Counters of escrow activity.
pub mod metrics;
/// Payout distributions and the payout splitter.
pub mod payout;
/// Conversion of capacity into an amount to pay.
pub mod pricing;
/// Escrow records.
pub mod types;
/// The escrow worker and the client to talk to it.
pub mod worker;

pub use metrics::EscrowMetrics;
pub use payout::{split_payout, DistributionName, PaymentDestination, PaymentDistribution};
pub use pricing::Pricing;
pub use types::{
    capacity_reservation_memo, CustomerAddress, EscrowInformation, EscrowPaymentRecord,
    PaymentFailure, PaymentOperation,
};
pub use worker::{Escrow, EscrowClient};
