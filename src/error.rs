//! The crate-wide error taxonomy. Every public operation surfaces one of
//! these as its outermost result; only deserialization recovers per-element
//! defects (logged and elided) instead of failing the whole load.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("input vector has length {found}, network expects {expected}")]
    InvalidInputSize { expected: usize, found: usize },
    #[error("target vector has length {found}, network expects {expected}")]
    InvalidTargetSize { expected: usize, found: usize },
    #[error("dataset sample {index} has input/output lengths {input}/{output}, network expects {expected_input}/{expected_output}")]
    DatasetShapeMismatch {
        index: usize,
        input: usize,
        output: usize,
        expected_input: usize,
        expected_output: usize,
    },
    #[error("training requires an iteration budget or an error target")]
    MissingStoppingCondition,
    #[error("batch size {batch_size} exceeds dataset length {dataset_len}")]
    BatchSizeExceedsDataset { batch_size: usize, dataset_len: usize },
    #[error("cannot cross over networks of shape {a_input}x{a_output} and {b_input}x{b_output}")]
    ArchMismatch {
        a_input: usize,
        a_output: usize,
        b_input: usize,
        b_output: usize,
    },
    #[error("tournament size {size} exceeds population size {popsize}")]
    TournamentTooLarge { size: usize, popsize: usize },
    #[error("connection is not gated")]
    ConnectionNotGated,
    #[error("cannot merge: first network has {output} outputs, second expects {input} inputs")]
    OutputInputMismatch { output: usize, input: usize },
    #[error("network has no output nodes")]
    NoOutputNodes,
    #[error("malformed genome: {0}")]
    MalformedGenome(String),
    #[error("unknown cost function {0:?}")]
    InvalidCostFunction(String),
    #[error("unknown optimizer {0:?}")]
    InvalidOptimizer(String),
    #[error("network holds no nodes")]
    CorruptedStructure,
}

pub type Result<T> = std::result::Result<T, Error>;
