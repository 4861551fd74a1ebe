use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Counters of the money movements handled by the escrow. Every escrow owns its own registry,
/// so multiple escrows can live in the same process.
#[derive(Clone)]
pub struct EscrowMetrics {
    registry: Registry,
    reservations_processed: IntCounter,
    new_accounts: IntCounter,
    paid: IntCounter,
    refunded: IntCounter,
    payout_failures: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl EscrowMetrics {
    /// Create and register all escrow counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(EscrowMetrics {
            reservations_processed: counter(
                &registry,
                "escrow_reservations_processed",
                "Capacity reservations for which an escrow was set up",
            )?,
            new_accounts: counter(
                &registry,
                "escrow_new_accounts",
                "Escrow accounts created for new customers",
            )?,
            paid: counter(
                &registry,
                "escrow_paid",
                "Escrows which were funded and paid out",
            )?,
            refunded: counter(&registry, "escrow_refunded", "Escrows which were refunded")?,
            payout_failures: counter(
                &registry,
                "escrow_payout_failures",
                "Funded escrows for which the payout failed",
            )?,
            registry,
        })
    }

    pub(crate) fn reservation_processed(&self) {
        self.reservations_processed.inc();
    }

    pub(crate) fn account_created(&self) {
        self.new_accounts.inc();
    }

    pub(crate) fn escrow_paid(&self) {
        self.paid.inc();
    }

    pub(crate) fn escrow_refunded(&self) {
        self.refunded.inc();
    }

    pub(crate) fn payout_failed(&self) {
        self.payout_failures.inc();
    }

    /// Render all counters in the prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
