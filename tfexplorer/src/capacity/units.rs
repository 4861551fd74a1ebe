use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Raw resource amounts. Memory and disk are expressed in GB.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUnits {
    /// Virtual cores.
    pub cru: f64,
    /// Memory.
    pub mru: f64,
    /// HDD storage.
    pub hru: f64,
    /// SSD storage.
    pub sru: f64,
    /// Public ipv4 addresses.
    pub ipv4u: f64,
}

/// Normalized resource amounts used for accounting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct CloudUnits {
    /// Compute units.
    pub cu: f64,
    /// Storage units.
    pub su: f64,
    /// Public ipv4 units.
    pub ipv4u: f64,
}

impl ResourceUnits {
    /// Convert resource units to cloud units.
    ///
    /// A compute unit is 2 virtual cores or 4 GB of memory, whichever is smaller, after 1 GB of
    /// memory is set aside for the system. A storage unit is 1.2 TB of HDD or 240 GB of SSD.
    pub fn cloud_units(&self) -> CloudUnits {
        let cu = f64::min(self.cru * 2., (self.mru - 1.) / 4.);
        let su = (self.hru / 1000. + self.sru / 200.) / 1.2;
        CloudUnits {
            cu,
            su,
            ipv4u: self.ipv4u,
        }
    }
}

impl Add for CloudUnits {
    type Output = CloudUnits;

    fn add(self, rhs: CloudUnits) -> CloudUnits {
        CloudUnits {
            cu: self.cu + rhs.cu,
            su: self.su + rhs.su,
            ipv4u: self.ipv4u + rhs.ipv4u,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceUnits;

    const EPSILON: f64 = 1e-9;

    fn ru(cru: f64, mru: f64, hru: f64, sru: f64) -> ResourceUnits {
        ResourceUnits {
            cru,
            mru,
            hru,
            sru,
            ipv4u: 0.,
        }
    }

    #[test]
    fn compute_units() {
        let cases = [
            (ru(1., 1., 0., 0.), 0.),
            (ru(2., 4., 0., 0.), 0.75),
            (ru(4., 8., 0., 0.), 1.75),
            (ru(4., 64., 0., 0.), 8.),
            (ru(4., 32., 0., 0.), 7.75),
            (ru(0., 0., 1200., 120.), -0.25),
        ];
        for (input, expected) in cases {
            let cu = input.cloud_units().cu;
            assert!((cu - expected).abs() < EPSILON, "{:?} => {}", input, cu);
        }
    }

    #[test]
    fn storage_units() {
        let cases = [
            (ru(0., 0., 1200., 120.), 1.5),
            (ru(0., 0., 1000., 40.), 1.),
            (ru(0., 0., 0., 1200.), 5.),
            (ru(0., 0., 12000., 0.), 10.),
        ];
        for (input, expected) in cases {
            let su = input.cloud_units().su;
            assert!((su - expected).abs() < EPSILON, "{:?} => {}", input, su);
        }
    }

    #[test]
    fn ipv4_passes_through() {
        let units = ResourceUnits {
            ipv4u: 1.,
            ..ResourceUnits::default()
        };
        assert_eq!(units.cloud_units().ipv4u, 1.);
    }
}
