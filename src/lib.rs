//! A NEAT neuro-evolution engine with gradient-based refinement.
//!
//! Genomes are heterogeneous, possibly recurrent networks whose topology
//! grows by structural mutation and recombines by innovation-aligned
//! crossover. The same genome can also be trained directly with
//! minibatched backpropagation through its eligibility and extended
//! traces, so evolved structure and gradient refinement compose.

pub mod activation;
pub mod architect;
pub mod cost;
pub mod error;
pub mod neat;
pub mod network;
pub mod optimizer;
pub mod random;
pub mod schedule;
pub mod smoothing;
pub mod train;

pub use activation::Activation;
pub use cost::Cost;
pub use error::{Error, Result};
pub use neat::{EvolveOptions, EvolveResult, Fitness, Neat, NeatOptions, Selection};
pub use network::{Connection, Mutation, Network, Node, NodeKind};
pub use optimizer::{Optimizer, Regularization};
pub use random::{default_rng, WyRng};
pub use schedule::RatePolicy;
pub use smoothing::{EarlyStop, Smoothing};
pub use train::{Sample, TrainOptions, TrainResult};
