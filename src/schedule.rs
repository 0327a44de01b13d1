//! Learning-rate schedules: pure maps from (base rate, iteration) to the
//! rate used for that iteration.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum RatePolicy {
    #[default]
    Fixed,
    Step {
        gamma: f64,
        step_size: u32,
    },
    Exp {
        gamma: f64,
    },
    Inv {
        gamma: f64,
        power: f64,
    },
    CosineAnnealing {
        period: u32,
        min_rate: f64,
    },
}

impl RatePolicy {
    pub fn rate(&self, base: f64, iteration: u32) -> f64 {
        match *self {
            RatePolicy::Fixed => base,
            RatePolicy::Step { gamma, step_size } => {
                base * gamma.powi((iteration / step_size.max(1)) as i32)
            }
            RatePolicy::Exp { gamma } => base * gamma.powi(iteration as i32),
            RatePolicy::Inv { gamma, power } => base / (1. + gamma * (iteration as f64).powf(power)),
            RatePolicy::CosineAnnealing { period, min_rate } => {
                let t = (iteration % period.max(1)) as f64 / period.max(1) as f64;
                min_rate + 0.5 * (base - min_rate) * (1. + (PI * t).cos())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_is_constant() {
        for t in [0, 1, 10, 1000] {
            assert_relative_eq!(RatePolicy::Fixed.rate(0.3, t), 0.3);
        }
    }

    #[test]
    fn test_step_decays_every_step_size() {
        let policy = RatePolicy::Step {
            gamma: 0.5,
            step_size: 10,
        };
        assert_relative_eq!(policy.rate(1., 0), 1.);
        assert_relative_eq!(policy.rate(1., 9), 1.);
        assert_relative_eq!(policy.rate(1., 10), 0.5);
        assert_relative_eq!(policy.rate(1., 25), 0.25);
    }

    #[test]
    fn test_exp_decays_geometrically() {
        let policy = RatePolicy::Exp { gamma: 0.9 };
        assert_relative_eq!(policy.rate(2., 0), 2.);
        assert_relative_eq!(policy.rate(2., 3), 2. * 0.9f64.powi(3));
    }

    #[test]
    fn test_inv_matches_formula() {
        let policy = RatePolicy::Inv {
            gamma: 0.1,
            power: 2.,
        };
        for t in [0u32, 1, 7, 40] {
            assert_relative_eq!(
                policy.rate(0.5, t),
                0.5 / (1. + 0.1 * (t as f64).powf(2.))
            );
        }
    }

    #[test]
    fn test_cosine_annealing_endpoints_and_dip() {
        let policy = RatePolicy::CosineAnnealing {
            period: 100,
            min_rate: 0.01,
        };
        let base = 0.4;
        assert_relative_eq!(policy.rate(base, 0), base, epsilon = 1e-12);
        // period restart
        assert_relative_eq!(policy.rate(base, 100), base, epsilon = 1e-12);
        // halfway down at mid-cycle, approaching the floor late in the cycle
        assert_relative_eq!(policy.rate(base, 50), (base + 0.01) / 2., epsilon = 1e-12);
        assert!(policy.rate(base, 99) < 0.012);
        for t in 0..200 {
            let r = policy.rate(base, t);
            assert!((0.01..=base + 1e-12).contains(&r));
        }
    }

    #[test]
    fn test_schedules_stay_non_negative() {
        let policies = [
            RatePolicy::Fixed,
            RatePolicy::Step {
                gamma: 0.7,
                step_size: 3,
            },
            RatePolicy::Exp { gamma: 0.99 },
            RatePolicy::Inv {
                gamma: 0.3,
                power: 1.5,
            },
            RatePolicy::CosineAnnealing {
                period: 16,
                min_rate: 0.,
            },
        ];
        for policy in policies {
            for t in 0..64 {
                assert!(policy.rate(0.25, t) >= 0.);
            }
        }
    }
}
