//! Loss functions for the supervised training loop.
//!
//! Each cost knows its scalar loss over a target/output pair and its
//! per-output derivative. The training loop monitors the loss; the
//! derivative surface exists for callers composing their own updates (the
//! backward kernel itself works from the raw output error).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Clamp for log arguments so cross-entropy never sees exactly 0 or 1.
const EPS: f64 = 1e-15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cost {
    #[default]
    Mse,
    Mae,
    Bce,
    CrossEntropy,
    SoftmaxCrossEntropy,
    Hinge,
}

impl Cost {
    pub fn loss(&self, target: &[f64], output: &[f64]) -> f64 {
        debug_assert_eq!(target.len(), output.len());
        let n = target.len().max(1) as f64;
        match self {
            Cost::Mse => {
                target
                    .iter()
                    .zip(output)
                    .map(|(t, o)| (t - o).powi(2))
                    .sum::<f64>()
                    / n
            }
            Cost::Mae => {
                target
                    .iter()
                    .zip(output)
                    .map(|(t, o)| (t - o).abs())
                    .sum::<f64>()
                    / n
            }
            Cost::Bce => {
                target
                    .iter()
                    .zip(output)
                    .map(|(t, o)| {
                        let o = o.clamp(EPS, 1. - EPS);
                        -(t * o.ln() + (1. - t) * (1. - o).ln())
                    })
                    .sum::<f64>()
                    / n
            }
            Cost::CrossEntropy => {
                target
                    .iter()
                    .zip(output)
                    .map(|(t, o)| -t * o.clamp(EPS, 1. - EPS).ln())
                    .sum::<f64>()
                    / n
            }
            Cost::SoftmaxCrossEntropy => {
                let soft = softmax(output);
                target
                    .iter()
                    .zip(&soft)
                    .map(|(t, s)| -t * s.max(EPS).ln())
                    .sum::<f64>()
            }
            Cost::Hinge => {
                target
                    .iter()
                    .zip(output)
                    .map(|(t, o)| (1. - t * o).max(0.))
                    .sum::<f64>()
                    / n
            }
        }
    }

    /// Per-output derivative of the loss with respect to each output.
    pub fn delta(&self, target: &[f64], output: &[f64]) -> Vec<f64> {
        debug_assert_eq!(target.len(), output.len());
        let n = target.len().max(1) as f64;
        match self {
            Cost::Mse => target
                .iter()
                .zip(output)
                .map(|(t, o)| 2. * (o - t) / n)
                .collect(),
            Cost::Mae => target
                .iter()
                .zip(output)
                .map(|(t, o)| (o - t).signum() / n)
                .collect(),
            Cost::Bce | Cost::CrossEntropy => target
                .iter()
                .zip(output)
                .map(|(t, o)| {
                    let o = o.clamp(EPS, 1. - EPS);
                    (o - t) / (o * (1. - o)) / n
                })
                .collect(),
            // across the whole layer, softmax + CE collapse to output - target
            Cost::SoftmaxCrossEntropy => softmax(output)
                .iter()
                .zip(target)
                .map(|(s, t)| s - t)
                .collect(),
            Cost::Hinge => target
                .iter()
                .zip(output)
                .map(|(t, o)| if t * o < 1. { -t / n } else { 0. })
                .collect(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Cost::Mse => "mse",
            Cost::Mae => "mae",
            Cost::Bce => "bce",
            Cost::CrossEntropy => "cross_entropy",
            Cost::SoftmaxCrossEntropy => "softmax_cross_entropy",
            Cost::Hinge => "hinge",
        }
    }
}

impl FromStr for Cost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mse" => Ok(Cost::Mse),
            "mae" => Ok(Cost::Mae),
            "bce" => Ok(Cost::Bce),
            "cross_entropy" => Ok(Cost::CrossEntropy),
            "softmax_cross_entropy" => Ok(Cost::SoftmaxCrossEntropy),
            "hinge" => Ok(Cost::Hinge),
            other => Err(Error::InvalidCostFunction(other.to_string())),
        }
    }
}

fn softmax(output: &[f64]) -> Vec<f64> {
    let max = output.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = output.iter().map(|o| (o - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
