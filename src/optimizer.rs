//! First-order optimizers applied per parameter at minibatch boundaries.
//!
//! Every connection (and every node bias) embeds a [Moments] slot pair; the
//! optimizer interprets the slots its own way. The returned delta is added
//! to the parameter: gradients here already point in the direction that
//! reduces the output error.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-parameter optimizer state. `m`/`v` hold first/second moments (or the
/// adagrad cache, or the adamax infinity norm); `step` drives bias
/// correction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Moments {
    pub m: f64,
    pub v: f64,
    pub step: u64,
}

impl Moments {
    pub fn reset(&mut self) {
        *self = Moments::default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Optimizer {
    Sgd,
    Rmsprop { decay: f64, eps: f64 },
    Adagrad { eps: f64 },
    Adam { beta1: f64, beta2: f64, eps: f64 },
    AdamW { beta1: f64, beta2: f64, eps: f64, weight_decay: f64 },
    Adamax { beta1: f64, beta2: f64, eps: f64 },
    Nadam { beta1: f64, beta2: f64, eps: f64 },
    Lion { beta1: f64, beta2: f64 },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Sgd
    }
}

impl Optimizer {
    pub fn rmsprop() -> Self {
        Optimizer::Rmsprop {
            decay: 0.9,
            eps: 1e-8,
        }
    }

    pub fn adagrad() -> Self {
        Optimizer::Adagrad { eps: 1e-8 }
    }

    pub fn adam() -> Self {
        Optimizer::Adam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn adamw(weight_decay: f64) -> Self {
        Optimizer::AdamW {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay,
        }
    }

    pub fn adamax() -> Self {
        Optimizer::Adamax {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn nadam() -> Self {
        Optimizer::Nadam {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    pub fn lion() -> Self {
        Optimizer::Lion {
            beta1: 0.9,
            beta2: 0.99,
        }
    }

    /// Decoupled weight decay factor, if this optimizer carries one. Applied
    /// by the caller directly to the parameter, never to the gradient.
    pub fn decoupled_decay(&self) -> f64 {
        match self {
            Optimizer::AdamW { weight_decay, .. } => *weight_decay,
            _ => 0.,
        }
    }

    /// One update for a single parameter. `prev_delta` is the classical
    /// momentum slot, only meaningful for plain SGD.
    pub fn step(
        &self,
        grad: f64,
        rate: f64,
        momentum: f64,
        moments: &mut Moments,
        prev_delta: &mut f64,
    ) -> f64 {
        match *self {
            Optimizer::Sgd => {
                let delta = rate * grad + momentum * *prev_delta;
                *prev_delta = delta;
                delta
            }
            Optimizer::Rmsprop { decay, eps } => {
                moments.v = decay * moments.v + (1. - decay) * grad * grad;
                rate * grad / (moments.v.sqrt() + eps)
            }
            Optimizer::Adagrad { eps } => {
                moments.v += grad * grad;
                rate * grad / (moments.v.sqrt() + eps)
            }
            Optimizer::Adam { beta1, beta2, eps } | Optimizer::AdamW { beta1, beta2, eps, .. } => {
                moments.step += 1;
                let t = moments.step as i32;
                moments.m = beta1 * moments.m + (1. - beta1) * grad;
                moments.v = beta2 * moments.v + (1. - beta2) * grad * grad;
                let m_hat = moments.m / (1. - beta1.powi(t));
                let v_hat = moments.v / (1. - beta2.powi(t));
                rate * m_hat / (v_hat.sqrt() + eps)
            }
            Optimizer::Adamax { beta1, beta2, eps } => {
                moments.step += 1;
                let t = moments.step as i32;
                moments.m = beta1 * moments.m + (1. - beta1) * grad;
                moments.v = (beta2 * moments.v).max(grad.abs());
                rate / (1. - beta1.powi(t)) * moments.m / (moments.v + eps)
            }
            Optimizer::Nadam { beta1, beta2, eps } => {
                moments.step += 1;
                let t = moments.step as i32;
                moments.m = beta1 * moments.m + (1. - beta1) * grad;
                moments.v = beta2 * moments.v + (1. - beta2) * grad * grad;
                let m_hat = moments.m / (1. - beta1.powi(t));
                let v_hat = moments.v / (1. - beta2.powi(t));
                let nesterov = beta1 * m_hat + (1. - beta1) * grad / (1. - beta1.powi(t));
                rate * nesterov / (v_hat.sqrt() + eps)
            }
            Optimizer::Lion { beta1, beta2 } => {
                let update = beta1 * moments.m + (1. - beta1) * grad;
                moments.m = beta2 * moments.m + (1. - beta2) * grad;
                rate * sign(update)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Optimizer::Sgd => "sgd",
            Optimizer::Rmsprop { .. } => "rmsprop",
            Optimizer::Adagrad { .. } => "adagrad",
            Optimizer::Adam { .. } => "adam",
            Optimizer::AdamW { .. } => "adamw",
            Optimizer::Adamax { .. } => "adamax",
            Optimizer::Nadam { .. } => "nadam",
            Optimizer::Lion { .. } => "lion",
        }
    }
}

impl FromStr for Optimizer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(Optimizer::Sgd),
            "rmsprop" => Ok(Optimizer::rmsprop()),
            "adagrad" => Ok(Optimizer::adagrad()),
            "adam" => Ok(Optimizer::adam()),
            "adamw" => Ok(Optimizer::adamw(0.01)),
            "adamax" => Ok(Optimizer::adamax()),
            "nadam" => Ok(Optimizer::nadam()),
            "lion" => Ok(Optimizer::lion()),
            other => Err(Error::InvalidOptimizer(other.to_string())),
        }
    }
}

/// L1/L2 penalty folded into the gradient (coupled). AdamW's decay is the
/// decoupled path and bypasses this entirely.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "lambda")]
pub enum Regularization {
    #[default]
    None,
    L1(f64),
    L2(f64),
}

impl Regularization {
    /// Adjust an error-reducing gradient for the penalty on `weight`.
    pub fn apply(&self, grad: f64, weight: f64) -> f64 {
        match *self {
            Regularization::None => grad,
            Regularization::L1(lambda) => grad - lambda * sign(weight),
            Regularization::L2(lambda) => grad - lambda * weight,
        }
    }
}

fn sign(x: f64) -> f64 {
    if x > 0. {
        1.
    } else if x < 0. {
        -1.
    } else {
        0.
    }
}
