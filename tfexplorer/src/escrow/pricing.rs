use super::payout::COST_PRECISION;
use crate::capacity::reservation::ReservationData;
use crate::config::PriceConfig;
use crate::directory::{CloudUnitPrice, GridNetwork};
use crate::{ExplorerError, ExplorerResult};
use std::convert::TryFrom;

/// Length of a month used for pricing, in seconds.
pub const SECONDS_PER_MONTH: u128 = 60 * 60 * 24 * 30;

/// Computes the cost of capacity. Prices are fixed at construction.
#[derive(Debug, Clone)]
pub struct Pricing {
    defaults: PriceConfig,
    network: GridNetwork,
}

fn to_mill(dollars: f64) -> u128 {
    (dollars * 1000.).round() as u128
}

impl Pricing {
    /// Create a new price calculator for a network.
    pub fn new(defaults: PriceConfig, network: GridNetwork) -> Self {
        Pricing { defaults, network }
    }

    /// The default prices.
    pub fn defaults(&self) -> CloudUnitPrice {
        CloudUnitPrice {
            cu: self.defaults.cu,
            su: self.defaults.su,
            ipv4u: self.defaults.ipv4u,
        }
    }

    /// Merge a custom price with the defaults. Fields which are not set in the custom price
    /// use the default.
    pub fn effective(&self, custom: Option<CloudUnitPrice>) -> CloudUnitPrice {
        let defaults = self.defaults();
        match custom {
            None => defaults,
            Some(custom) => CloudUnitPrice {
                cu: if custom.cu > 0. { custom.cu } else { defaults.cu },
                su: if custom.su > 0. { custom.su } else { defaults.su },
                ipv4u: if custom.ipv4u > 0. {
                    custom.ipv4u
                } else {
                    defaults.ipv4u
                },
            },
        }
    }

    /// Cost of the capacity in a reservation, in the smallest unit of an asset with
    /// `precision_digits` decimals. The cost keeps at most [`COST_PRECISION`] decimals.
    pub fn cost(
        &self,
        data: &ReservationData,
        price: &CloudUnitPrice,
        precision_digits: u32,
    ) -> ExplorerResult<i64> {
        let overflow = || ExplorerError::validation("reservation cost overflows");

        let mill = (data.cus as u128)
            .checked_mul(to_mill(price.cu))
            .and_then(|cu| {
                (data.sus as u128)
                    .checked_mul(to_mill(price.su))
                    .and_then(|su| su.checked_add(cu))
            })
            .and_then(|total| {
                (data.ipv4us as u128)
                    .checked_mul(to_mill(price.ipv4u))
                    .and_then(|ip| ip.checked_add(total))
            })
            .ok_or_else(overflow)?;

        let numerator = mill
            .checked_mul(10u128.pow(precision_digits))
            .ok_or_else(overflow)?;
        let denominator = self.defaults.tft_price_mill as u128
            * SECONDS_PER_MONTH
            * self.network.divisor() as u128;
        if denominator == 0 {
            return Err(ExplorerError::validation("token price is not set"));
        }

        let mut amount = numerator / denominator;
        if precision_digits > COST_PRECISION {
            let step = 10u128.pow(precision_digits - COST_PRECISION);
            amount -= amount % step;
        }

        i64::try_from(amount).map_err(|_| overflow())
    }
}

#[cfg(test)]
mod tests {
    use super::{Pricing, SECONDS_PER_MONTH};
    use crate::capacity::reservation::ReservationData;
    use crate::config::PriceConfig;
    use crate::directory::{CloudUnitPrice, GridNetwork};

    fn data(cus: u64, sus: u64, ipv4us: u64) -> ReservationData {
        ReservationData {
            pool_id: 0,
            cus,
            sus,
            ipv4us,
            node_ids: vec!["node".to_string()],
            currencies: vec!["TFT".to_string()],
        }
    }

    const MONTH: u64 = SECONDS_PER_MONTH as u64;

    #[test]
    fn month_of_compute() {
        let pricing = Pricing::new(PriceConfig::default(), GridNetwork::Main);
        // 10 dollar at 0.08 dollar per token
        let cost = pricing
            .cost(&data(MONTH, 0, 0), &pricing.effective(None), 7)
            .unwrap();
        assert_eq!(cost, 125 * 10_000_000);
    }

    #[test]
    fn network_divisor() {
        let pricing = Pricing::new(PriceConfig::default(), GridNetwork::Test);
        let price = pricing.effective(None);
        assert_eq!(
            pricing.cost(&data(MONTH, MONTH, MONTH), &price, 7).unwrap(),
            // (10 + 8 + 6) / 0.08 / 10 tokens
            30 * 10_000_000
        );
    }

    #[test]
    fn truncated_to_cost_precision() {
        let pricing = Pricing::new(PriceConfig::default(), GridNetwork::Main);
        let cost = pricing.cost(&data(1, 0, 0), &pricing.effective(None), 7).unwrap();
        // 10 / 0.08 / 2592000 = 0.0000482253.. tokens
        assert_eq!(cost, 480);
        assert_eq!(cost % 10, 0);
    }

    #[test]
    fn custom_prices() {
        let pricing = Pricing::new(PriceConfig::default(), GridNetwork::Main);
        let price = pricing.effective(Some(CloudUnitPrice {
            cu: 20.,
            su: 0.,
            ipv4u: 0.,
        }));
        assert_eq!(price.cu, 20.);
        assert_eq!(price.su, 8.);
        assert_eq!(
            pricing.cost(&data(MONTH, 0, 0), &price, 7).unwrap(),
            250 * 10_000_000
        );
    }

    #[test]
    fn free_capacity() {
        let pricing = Pricing::new(
            PriceConfig {
                cu: 0.,
                su: 0.,
                ipv4u: 0.,
                tft_price_mill: 80,
            },
            GridNetwork::Dev,
        );
        assert_eq!(
            pricing
                .cost(&data(MONTH, MONTH, 0), &pricing.effective(None), 7)
                .unwrap(),
            0
        );
    }

    #[test]
    fn overflow_is_an_error() {
        let pricing = Pricing::new(PriceConfig::default(), GridNetwork::Main);
        assert!(pricing
            .cost(&data(u64::MAX, u64::MAX, 0), &pricing.effective(None), 7)
            .is_err());
    }
}
