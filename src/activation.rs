//! The activation registry: named differentiable scalar squashes.
//!
//! Nodes carry an [Activation] tag rather than a function pointer so that
//! genomes serialize by name and deserialize by lookup. Unknown names fall
//! back to [Activation::Identity] with a warning rather than failing the
//! whole load.

use serde::{Deserialize, Serialize};
use std::fmt;

const SELU_ALPHA: f64 = 1.673_263_242_354_377_2;
const SELU_SCALE: f64 = 1.050_700_987_355_480_5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Logistic,
    Tanh,
    Identity,
    Step,
    Relu,
    Softsign,
    Sinusoid,
    Gaussian,
    BentIdentity,
    Bipolar,
    BipolarSigmoid,
    HardTanh,
    Absolute,
    Inverse,
    Selu,
}

impl Activation {
    pub const ALL: [Activation; 15] = [
        Activation::Logistic,
        Activation::Tanh,
        Activation::Identity,
        Activation::Step,
        Activation::Relu,
        Activation::Softsign,
        Activation::Sinusoid,
        Activation::Gaussian,
        Activation::BentIdentity,
        Activation::Bipolar,
        Activation::BipolarSigmoid,
        Activation::HardTanh,
        Activation::Absolute,
        Activation::Inverse,
        Activation::Selu,
    ];

    pub fn value(&self, x: f64) -> f64 {
        match self {
            Activation::Logistic => 1. / (1. + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
            Activation::Step => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
            Activation::Relu => {
                if x > 0. {
                    x
                } else {
                    0.
                }
            }
            Activation::Softsign => x / (1. + x.abs()),
            Activation::Sinusoid => x.sin(),
            Activation::Gaussian => (-x * x).exp(),
            Activation::BentIdentity => ((x * x + 1.).sqrt() - 1.) / 2. + x,
            Activation::Bipolar => {
                if x > 0. {
                    1.
                } else {
                    -1.
                }
            }
            Activation::BipolarSigmoid => 2. / (1. + (-x).exp()) - 1.,
            Activation::HardTanh => x.clamp(-1., 1.),
            Activation::Absolute => x.abs(),
            Activation::Inverse => 1. - x,
            Activation::Selu => {
                let y = if x > 0. { x } else { SELU_ALPHA * (x.exp() - 1.) };
                y * SELU_SCALE
            }
        }
    }

    /// d value / d x. Non-differentiable points take the conventional
    /// subgradient (0 for step-like kinks, sign at 0 treated as 0).
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            Activation::Logistic => {
                let f = self.value(x);
                f * (1. - f)
            }
            Activation::Tanh => 1. - x.tanh().powi(2),
            Activation::Identity => 1.,
            Activation::Step => 0.,
            Activation::Relu => {
                if x > 0. {
                    1.
                } else {
                    0.
                }
            }
            Activation::Softsign => 1. / (1. + x.abs()).powi(2),
            Activation::Sinusoid => x.cos(),
            Activation::Gaussian => -2. * x * (-x * x).exp(),
            Activation::BentIdentity => x / (2. * (x * x + 1.).sqrt()) + 1.,
            Activation::Bipolar => 0.,
            Activation::BipolarSigmoid => {
                let f = 1. / (1. + (-x).exp());
                2. * f * (1. - f)
            }
            Activation::HardTanh => {
                if x.abs() < 1. {
                    1.
                } else {
                    0.
                }
            }
            Activation::Absolute => {
                if x == 0. {
                    0.
                } else {
                    x.signum()
                }
            }
            Activation::Inverse => -1.,
            Activation::Selu => {
                if x > 0. {
                    SELU_SCALE
                } else {
                    SELU_ALPHA * x.exp() * SELU_SCALE
                }
            }
        }
    }

    /// The stable serialized name.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Logistic => "logistic",
            Activation::Tanh => "tanh",
            Activation::Identity => "identity",
            Activation::Step => "step",
            Activation::Relu => "relu",
            Activation::Softsign => "softsign",
            Activation::Sinusoid => "sinusoid",
            Activation::Gaussian => "gaussian",
            Activation::BentIdentity => "bent_identity",
            Activation::Bipolar => "bipolar",
            Activation::BipolarSigmoid => "bipolar_sigmoid",
            Activation::HardTanh => "hard_tanh",
            Activation::Absolute => "absolute",
            Activation::Inverse => "inverse",
            Activation::Selu => "selu",
        }
    }

    /// Lookup by serialized name.
    pub fn from_name(name: &str) -> Option<Activation> {
        Activation::ALL.iter().find(|a| a.name() == name).copied()
    }

    /// Lenient lookup for deserialization: unknown names substitute
    /// [Activation::Identity] and log a warning.
    pub fn from_name_lossy(name: &str) -> Activation {
        Activation::from_name(name).unwrap_or_else(|| {
            tracing::warn!(squash = name, "unknown squash, substituting identity");
            Activation::Identity
        })
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_name_round_trip() {
        for a in Activation::ALL {
            assert_eq!(Activation::from_name(a.name()), Some(a));
        }
    }

    #[test]
    fn test_unknown_name_falls_back_to_identity() {
        assert_eq!(Activation::from_name("swish"), None);
        assert_eq!(Activation::from_name_lossy("swish"), Activation::Identity);
    }

    #[test]
    fn test_logistic_values() {
        assert_relative_eq!(Activation::Logistic.value(0.), 0.5);
        assert_relative_eq!(Activation::Logistic.derivative(0.), 0.25);
        assert!(Activation::Logistic.value(40.) > 0.999);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        // skip the discontinuous ones, and probe away from their kinks
        let smooth = [
            Activation::Logistic,
            Activation::Tanh,
            Activation::Identity,
            Activation::Softsign,
            Activation::Sinusoid,
            Activation::Gaussian,
            Activation::BentIdentity,
            Activation::BipolarSigmoid,
            Activation::Inverse,
            Activation::Selu,
        ];
        let h = 1e-6;
        for a in smooth {
            for &x in &[-1.7, -0.3, 0.2, 0.9, 2.4] {
                let numeric = (a.value(x + h) - a.value(x - h)) / (2. * h);
                assert_relative_eq!(a.derivative(x), numeric, max_relative = 1e-4, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_hard_clamps() {
        assert_eq!(Activation::Step.value(-0.1), 0.);
        assert_eq!(Activation::Step.value(0.1), 1.);
        assert_eq!(Activation::HardTanh.value(3.), 1.);
        assert_eq!(Activation::HardTanh.value(-3.), -1.);
        assert_eq!(Activation::Bipolar.value(-2.), -1.);
        assert_eq!(Activation::Relu.value(-5.), 0.);
        assert_eq!(Activation::Relu.derivative(5.), 1.);
    }

    #[test]
    fn test_selu_continuous_at_zero() {
        let below = Activation::Selu.value(-1e-9);
        let above = Activation::Selu.value(1e-9);
        assert!((below - above).abs() < 1e-6);
    }
}
