use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Amount of decimals a computed cost has, at most.
pub const COST_PRECISION: u32 = 6;

/// Address of the wisdom wallet.
pub const WISDOM_WALLET: &str = "GAI4C2BGOA3YHVQZZW7OW4FHOGGYWTUBEVNHB6MW4ZAFG7ZAA7D5IPC3";

/// A receiver of part of a payout. The order of the variants decides which destination
/// receives rounding leftovers.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PaymentDestination {
    /// The farmer providing the capacity.
    Farmer,
    /// Taken out of circulation by sending it back to the issuer.
    Burned,
    /// The foundation.
    Foundation,
    /// The sales channel which brought in the customer.
    Sales,
    /// The wisdom council.
    Wisdom,
}

impl fmt::Display for PaymentDestination {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            PaymentDestination::Farmer => "farmer",
            PaymentDestination::Burned => "burned",
            PaymentDestination::Foundation => "foundation",
            PaymentDestination::Sales => "sales",
            PaymentDestination::Wisdom => "wisdom",
        })
    }
}

/// Percentages of a payout per destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDistribution(BTreeMap<PaymentDestination, u8>);

impl PaymentDistribution {
    /// Create a distribution from (destination, percentage) pairs.
    pub fn new(shares: &[(PaymentDestination, u8)]) -> Self {
        PaymentDistribution(shares.iter().copied().collect())
    }

    /// A distribution is valid if the percentages add up to exactly 100.
    pub fn is_valid(&self) -> bool {
        self.0.values().map(|&p| p as u32).sum::<u32>() == 100
    }

    /// Percentage going to the destination.
    pub fn share(&self, destination: PaymentDestination) -> u8 {
        self.0.get(&destination).copied().unwrap_or(0)
    }

    /// All destinations with their percentage, in destination order.
    pub fn shares(&self) -> impl Iterator<Item = (PaymentDestination, u8)> + '_ {
        self.0.iter().map(|(d, p)| (*d, *p))
    }
}

/// The known payout distributions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionName {
    /// Farmer keeps nearly everything.
    Grid2,
    /// The default grid 3 split.
    Grid3,
    /// Capacity sold through a certified sales channel.
    CertifiedSales,
    /// Capacity sold by the farmer itself.
    FarmerSales,
}

impl DistributionName {
    /// The percentages of this distribution.
    pub fn distribution(&self) -> PaymentDistribution {
        use PaymentDestination::*;
        match self {
            DistributionName::Grid2 => PaymentDistribution::new(&[(Farmer, 90), (Foundation, 10)]),
            DistributionName::Grid3 => PaymentDistribution::new(&[
                (Farmer, 10),
                (Burned, 40),
                (Foundation, 10),
                (Wisdom, 40),
            ]),
            DistributionName::CertifiedSales => PaymentDistribution::new(&[
                (Farmer, 10),
                (Burned, 25),
                (Foundation, 10),
                (Sales, 55),
            ]),
            DistributionName::FarmerSales => {
                PaymentDistribution::new(&[(Farmer, 70), (Burned, 25), (Foundation, 5)])
            }
        }
    }
}

impl fmt::Display for DistributionName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            DistributionName::Grid2 => "grid2",
            DistributionName::Grid3 => "grid3",
            DistributionName::CertifiedSales => "certified-sales",
            DistributionName::FarmerSales => "farmer-sales",
        })
    }
}

impl std::str::FromStr for DistributionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grid2" => Ok(DistributionName::Grid2),
            "grid3" => Ok(DistributionName::Grid3),
            "certified-sales" => Ok(DistributionName::CertifiedSales),
            "farmer-sales" => Ok(DistributionName::FarmerSales),
            _ => Err(format!("unknown distribution {}", s)),
        }
    }
}

/// Split `total` over the destinations of a distribution, in destination order.
///
/// The amount is scaled up so every percentage can be applied without losing precision the
/// cost could have. Whatever is lost when scaling back down is added to the first destination
/// which receives a non zero amount. The split is exact if `total` scaled by the missing
/// precision is a multiple of 100, which holds for every cost truncated to
/// [`COST_PRECISION`].
pub fn split_payout(
    total: i64,
    distribution: &PaymentDistribution,
    precision_digits: u32,
) -> Vec<(PaymentDestination, i64)> {
    // 2 digits for the percentage
    let required_precision = 2 + COST_PRECISION;
    let missing_precision = required_precision.saturating_sub(precision_digits);
    let multiplier = 10i128.pow(missing_precision);

    let base = total as i128 * multiplier / 100;

    let mut change = 0i128;
    let mut amounts: Vec<(PaymentDestination, i128)> = distribution
        .shares()
        .map(|(destination, percentage)| {
            let amount = base * percentage as i128;
            change += amount % multiplier;
            (destination, amount / multiplier)
        })
        .collect();
    change /= multiplier;

    if let Some((_, amount)) = amounts.iter_mut().find(|(_, amount)| *amount != 0) {
        *amount += change;
    }

    amounts
        .into_iter()
        .map(|(destination, amount)| (destination, amount as i64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{split_payout, DistributionName, PaymentDestination::*, PaymentDistribution};
    use rand::Rng;

    fn amounts(split: Vec<(super::PaymentDestination, i64)>) -> Vec<i64> {
        split.into_iter().map(|(_, a)| a).collect()
    }

    #[test]
    fn known_distributions_are_valid() {
        for name in [
            DistributionName::Grid2,
            DistributionName::Grid3,
            DistributionName::CertifiedSales,
            DistributionName::FarmerSales,
        ] {
            assert!(name.distribution().is_valid(), "{}", name);
            assert_eq!(name.to_string().parse::<DistributionName>(), Ok(name));
        }
        assert!(!PaymentDistribution::new(&[(Farmer, 50), (Burned, 40)]).is_valid());
    }

    #[test]
    fn change_goes_to_first_destination() {
        let dist = PaymentDistribution::new(&[(Farmer, 34), (Burned, 33), (Foundation, 33)]);
        assert_eq!(amounts(split_payout(330, &dist, 7)), vec![114, 108, 108]);
    }

    #[test]
    fn destination_order_is_fixed() {
        let dist = PaymentDistribution::new(&[(Foundation, 33), (Farmer, 34), (Burned, 33)]);
        let split = split_payout(330, &dist, 7);
        assert_eq!(split[0], (Farmer, 114));
        assert_eq!(split[2], (Foundation, 108));
    }

    #[test]
    fn change_skips_empty_amounts() {
        let dist = PaymentDistribution::new(&[(Farmer, 0), (Burned, 50), (Foundation, 50)]);
        assert_eq!(amounts(split_payout(10, &dist, 7)), vec![0, 5, 5]);

        let dist = PaymentDistribution::new(&[(Farmer, 0), (Burned, 34), (Foundation, 66)]);
        assert_eq!(amounts(split_payout(330, &dist, 7)), vec![0, 113, 217]);
    }

    #[test]
    fn grid3_split() {
        let split = split_payout(1_250_000_000, &DistributionName::Grid3.distribution(), 7);
        assert_eq!(
            split,
            vec![
                (Farmer, 125_000_000),
                (Burned, 500_000_000),
                (Foundation, 125_000_000),
                (Wisdom, 500_000_000)
            ]
        );
    }

    #[test]
    fn high_precision_wallet_needs_no_scaling() {
        let dist = PaymentDistribution::new(&[(Farmer, 34), (Burned, 33), (Foundation, 33)]);
        assert_eq!(amounts(split_payout(300, &dist, 9)), vec![102, 99, 99]);
        assert_eq!(amounts(split_payout(301, &dist, 9)), vec![102, 99, 99]);
    }

    #[test]
    fn conservation() {
        let mut rng = rand::thread_rng();
        let distributions = [
            DistributionName::Grid2.distribution(),
            DistributionName::Grid3.distribution(),
            DistributionName::CertifiedSales.distribution(),
            DistributionName::FarmerSales.distribution(),
            PaymentDistribution::new(&[(Farmer, 34), (Burned, 33), (Foundation, 33)]),
            PaymentDistribution::new(&[(Farmer, 1), (Burned, 1), (Foundation, 98)]),
        ];
        for _ in 0..1000 {
            // costs are truncated to 6 digits of a 7 digit asset
            let total = rng.gen_range(0..1_000_000_000i64) * 10;
            for dist in &distributions {
                let split = split_payout(total, dist, 7);
                assert!(split.iter().all(|(_, a)| *a >= 0));
                assert_eq!(split.iter().map(|(_, a)| a).sum::<i64>(), total);
                assert_eq!(split, split_payout(total, dist, 7));
            }
        }
    }
}
