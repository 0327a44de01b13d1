//! The supervised training loop: minibatched backpropagation over a
//! dataset, with rate schedules, smoothing of the monitored error,
//! cross-validation, early stopping, and mixed-precision accounting.

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    cost::Cost,
    error::{Error, Result},
    network::{BackpropConfig, Network, StepOutcome},
    optimizer::{Optimizer, Regularization},
    random::WyRng,
    schedule::RatePolicy,
    smoothing::{EarlyStop, EarlyStopState, PlateauState, Smoother, Smoothing},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub input: Vec<f64>,
    pub output: Vec<f64>,
}

impl Sample {
    pub fn new(input: Vec<f64>, output: Vec<f64>) -> Self {
        Self { input, output }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossValidate {
    /// Fraction of the dataset reserved for testing.
    pub test_size: f64,
    /// Stop once the test error reaches this.
    pub test_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicLossScale {
    pub min_scale: f64,
    pub max_scale: f64,
    /// Consecutive overflow-free steps before the scale doubles.
    pub increase_every: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixedPrecision {
    pub loss_scale: f64,
    pub dynamic: Option<DynamicLossScale>,
}

/// Mixed-precision counters surfaced in the training result.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingStats {
    pub loss_scale: f64,
    pub overflow_count: u32,
    pub last_overflow_step: Option<u64>,
}

/// Snapshot handed to the scheduled callback.
#[derive(Debug, Clone, Copy)]
pub struct TrainSnapshot {
    pub iteration: u32,
    pub error: f64,
    pub smoothed_error: f64,
    pub rate: f64,
    pub loss_scale: f64,
    /// True when the plateau window reports no movement.
    pub plateaued: bool,
}

/// Periodic callback; returning `ControlFlow::Break` stops training.
pub struct TrainSchedule {
    pub iterations: u32,
    pub function: Box<dyn FnMut(&TrainSnapshot) -> ControlFlow<()>>,
}

pub struct TrainOptions {
    /// Stop after this many iterations; at least one of `iterations` and
    /// `error` is required.
    pub iterations: Option<u32>,
    /// Stop once the monitored error reaches this.
    pub error: Option<f64>,
    /// Base learning rate. Defaults to 0.3 with a warning.
    pub rate: Option<f64>,
    pub rate_policy: RatePolicy,
    pub momentum: f64,
    pub batch_size: usize,
    pub cost: Cost,
    pub shuffle: bool,
    pub dropout: f64,
    pub dropconnect: f64,
    pub cross_validate: Option<CrossValidate>,
    pub regularization: Regularization,
    pub schedule: Option<TrainSchedule>,
    /// Emit a log record every n iterations.
    pub log: Option<u32>,
    /// Reset recurrent state between samples.
    pub clear: bool,
    pub optimizer: Optimizer,
    pub mixed_precision: Option<MixedPrecision>,
    pub gradient_clip: Option<f64>,
    pub moving_average: Option<Smoothing>,
    pub plateau: Option<Smoothing>,
    pub early_stop: Option<EarlyStop>,
    pub seed: Option<u64>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            iterations: None,
            error: None,
            rate: None,
            rate_policy: RatePolicy::Fixed,
            momentum: 0.,
            batch_size: 1,
            cost: Cost::Mse,
            shuffle: false,
            dropout: 0.,
            dropconnect: 0.,
            cross_validate: None,
            regularization: Regularization::None,
            schedule: None,
            log: None,
            clear: false,
            optimizer: Optimizer::Sgd,
            mixed_precision: None,
            gradient_clip: None,
            moving_average: None,
            plateau: None,
            early_stop: None,
            seed: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainResult {
    pub error: f64,
    pub iterations: u32,
    pub elapsed: Duration,
    pub cancelled: bool,
    pub stats: TrainingStats,
}

/// Dynamic loss scaler: halves on overflow, doubles after a run of clean
/// steps, always inside the configured bounds.
#[derive(Debug, Clone)]
struct LossScaler {
    scale: f64,
    dynamic: Option<DynamicLossScale>,
    clean_steps: u32,
    overflow_count: u32,
    last_overflow_step: Option<u64>,
}

impl LossScaler {
    fn new(config: Option<MixedPrecision>) -> Self {
        Self {
            scale: config.map(|mp| mp.loss_scale).unwrap_or(1.),
            dynamic: config.and_then(|mp| mp.dynamic),
            clean_steps: 0,
            overflow_count: 0,
            last_overflow_step: None,
        }
    }

    fn scale(&self) -> f64 {
        self.scale
    }

    fn overflow(&mut self, step: u64) {
        self.overflow_count += 1;
        self.last_overflow_step = Some(step);
        self.clean_steps = 0;
        if let Some(d) = self.dynamic {
            self.scale = (self.scale / 2.).max(d.min_scale);
        }
    }

    fn clean(&mut self) {
        if let Some(d) = self.dynamic {
            self.clean_steps += 1;
            if self.clean_steps >= d.increase_every {
                self.scale = (self.scale * 2.).min(d.max_scale);
                self.clean_steps = 0;
            }
        }
    }

    fn stats(&self) -> TrainingStats {
        TrainingStats {
            loss_scale: self.scale,
            overflow_count: self.overflow_count,
            last_overflow_step: self.last_overflow_step,
        }
    }
}

pub(crate) fn validate_dataset(net: &Network, set: &[Sample]) -> Result<()> {
    for (index, sample) in set.iter().enumerate() {
        if sample.input.len() != net.input || sample.output.len() != net.output {
            return Err(Error::DatasetShapeMismatch {
                index,
                input: sample.input.len(),
                output: sample.output.len(),
                expected_input: net.input,
                expected_output: net.output,
            });
        }
    }
    Ok(())
}

impl Network {
    /// Mean cost over a dataset, traces off, masks restored.
    pub fn test(&mut self, set: &[Sample], cost: Cost) -> Result<f64> {
        validate_dataset(self, set)?;
        let mut total = 0.;
        for sample in set {
            let out = self.no_trace_activate(&sample.input)?;
            total += cost.loss(&sample.output, &out);
        }
        Ok(total / set.len().max(1) as f64)
    }

    pub fn train(&mut self, set: &[Sample], mut options: TrainOptions) -> Result<TrainResult> {
        validate_dataset(self, set)?;
        if options.iterations.is_none() && options.error.is_none() {
            return Err(Error::MissingStoppingCondition);
        }
        let batch_size = options.batch_size.max(1);
        if batch_size > set.len() {
            return Err(Error::BatchSizeExceedsDataset {
                batch_size: options.batch_size,
                dataset_len: set.len(),
            });
        }
        let base_rate = options.rate.unwrap_or_else(|| {
            tracing::warn!("no learning rate given, defaulting to 0.3");
            0.3
        });

        if let Some(seed) = options.seed {
            self.reseed(seed);
        }
        self.dropout = options.dropout;
        self.dropconnect = options.dropconnect;

        let (train_set, test_set): (&[Sample], &[Sample]) = match options.cross_validate {
            Some(cv) => {
                let n_test = ((set.len() as f64) * cv.test_size).ceil() as usize;
                // always leave at least one training sample
                let n_test = n_test.min(set.len().saturating_sub(1));
                set.split_at(set.len() - n_test)
            }
            None => (set, &[]),
        };

        let mut scaler = LossScaler::new(options.mixed_precision);
        let mut smoother = Smoother::new(options.moving_average);
        let mut plateau = options.plateau.map(PlateauState::new);
        let mut early_stop = options.early_stop.map(EarlyStopState::new);
        let mut shuffle_rng = WyRng::seeded(options.seed.unwrap_or(0x7261_6e64));

        let start = Instant::now();
        let mut iteration = 0u32;
        let mut step = 0u64;
        let mut monitored = f64::INFINITY;
        let mut cancelled = false;
        let target_error = match options.cross_validate {
            Some(cv) => Some(cv.test_error),
            None => options.error,
        };

        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        'training: loop {
            if let Some(max) = options.iterations {
                if iteration >= max {
                    break;
                }
            }
            if let Some(token) = &options.cancel {
                if token.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }

            let rate = options.rate_policy.rate(base_rate, iteration);
            iteration += 1;
            if options.shuffle {
                shuffle_rng.shuffle(&mut indices);
            }

            let mut error_sum = 0.;
            let last = train_set.len() - 1;
            for (position, index) in indices.iter().enumerate() {
                let sample = &train_set[*index];
                if options.clear {
                    self.clear();
                }
                let out = self.activate(&sample.input, true)?;
                let update = (position + 1) % batch_size == 0 || position == last;
                let config = BackpropConfig {
                    rate,
                    momentum: options.momentum,
                    optimizer: options.optimizer,
                    regularization: options.regularization,
                    gradient_clip: options.gradient_clip,
                    loss_scale: scaler.scale(),
                };
                let outcome = self.propagate_with(&config, update, &sample.output)?;
                if update {
                    step += 1;
                    match outcome {
                        StepOutcome::Overflow => scaler.overflow(step),
                        StepOutcome::Applied => scaler.clean(),
                        StepOutcome::Accumulated => {}
                    }
                }
                error_sum += options.cost.loss(&sample.output, &out);
            }

            if self.dropout > 0. || self.dropconnect > 0. {
                self.restore_masks();
            }

            let raw_error = if test_set.is_empty() {
                error_sum / train_set.len() as f64
            } else {
                self.test(test_set, options.cost)?
            };
            monitored = smoother.update(raw_error);
            let plateaued = plateau
                .as_mut()
                .map(|p| p.observe(monitored))
                .unwrap_or(false);

            if let Some(every) = options.log {
                if every > 0 && iteration % every == 0 {
                    tracing::info!(iteration, error = monitored, rate, "training");
                }
            }
            if let Some(schedule) = options.schedule.as_mut() {
                if schedule.iterations > 0 && iteration % schedule.iterations == 0 {
                    let snapshot = TrainSnapshot {
                        iteration,
                        error: raw_error,
                        smoothed_error: monitored,
                        rate,
                        loss_scale: scaler.scale(),
                        plateaued,
                    };
                    if (schedule.function)(&snapshot).is_break() {
                        break 'training;
                    }
                }
            }

            if let Some(target) = target_error {
                if monitored <= target {
                    break;
                }
            }
            if let Some(es) = early_stop.as_mut() {
                if es.observe(monitored) {
                    break;
                }
            }
        }

        Ok(TrainResult {
            error: monitored,
            iterations: iteration,
            elapsed: start.elapsed(),
            cancelled,
            stats: scaler.stats(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn and_gate() -> Vec<Sample> {
        vec![
            Sample::new(vec![0., 0.], vec![0.]),
            Sample::new(vec![0., 1.], vec![0.]),
            Sample::new(vec![1., 0.], vec![0.]),
            Sample::new(vec![1., 1.], vec![1.]),
        ]
    }

    #[test]
    fn test_train_learns_and_gate() {
        let mut net = Network::with_seed(2, 1, 42);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(3000),
                    error: Some(0.01),
                    rate: Some(0.3),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.error < 0.35, "AND error too high: {}", result.error);
        assert!(result.iterations <= 3000);
        assert!(!result.cancelled);
    }

    #[test]
    fn test_train_requires_stopping_condition() {
        let mut net = Network::with_seed(2, 1, 1);
        assert!(matches!(
            net.train(&and_gate(), TrainOptions::default()),
            Err(Error::MissingStoppingCondition)
        ));
    }

    #[test]
    fn test_train_validates_shapes() {
        let mut net = Network::with_seed(3, 1, 1);
        let result = net.train(
            &and_gate(),
            TrainOptions {
                iterations: Some(1),
                rate: Some(0.3),
                ..TrainOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(Error::DatasetShapeMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_train_rejects_oversized_batch() {
        let mut net = Network::with_seed(2, 1, 1);
        let result = net.train(
            &and_gate(),
            TrainOptions {
                iterations: Some(1),
                rate: Some(0.3),
                batch_size: 5,
                ..TrainOptions::default()
            },
        );
        assert!(matches!(
            result,
            Err(Error::BatchSizeExceedsDataset {
                batch_size: 5,
                dataset_len: 4
            })
        ));
    }

    #[test]
    fn test_batched_training_still_learns() {
        let mut net = Network::with_seed(2, 1, 7);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(2000),
                    rate: Some(0.3),
                    batch_size: 4,
                    momentum: 0.3,
                    shuffle: true,
                    seed: Some(7),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.error < 0.4, "batched error: {}", result.error);
    }

    #[test]
    fn test_adam_trains_and_gate() {
        let mut net = Network::with_seed(2, 1, 99);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(1500),
                    rate: Some(0.01),
                    optimizer: Optimizer::adam(),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.error < 0.4, "adam error: {}", result.error);
    }

    #[test]
    fn test_dropout_masks_restored_after_training() {
        let mut net = Network::with_seed(2, 1, 5);
        net.mutate(crate::network::Mutation::AddNode);
        net.mutate(crate::network::Mutation::AddNode);
        net.train(
            &and_gate(),
            TrainOptions {
                iterations: Some(20),
                rate: Some(0.3),
                dropout: 0.5,
                seed: Some(5),
                ..TrainOptions::default()
            },
        )
        .unwrap();
        for id in net.node_order() {
            assert_eq!(net.node(*id).mask, 1.);
        }
    }

    #[test]
    fn test_cross_validation_monitors_test_split() {
        let mut net = Network::with_seed(2, 1, 11);
        let mut set = and_gate();
        set.extend(and_gate());
        let result = net
            .train(
                &set,
                TrainOptions {
                    iterations: Some(200),
                    rate: Some(0.3),
                    cross_validate: Some(CrossValidate {
                        test_size: 0.25,
                        test_error: 1e-9,
                    }),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.iterations <= 200);
        assert!(result.error.is_finite());
    }

    #[test]
    fn test_schedule_callback_can_stop_training() {
        let mut net = Network::with_seed(2, 1, 13);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(1000),
                    rate: Some(0.3),
                    schedule: Some(TrainSchedule {
                        iterations: 10,
                        function: Box::new(|snapshot| {
                            if snapshot.iteration >= 10 {
                                ControlFlow::Break(())
                            } else {
                                ControlFlow::Continue(())
                            }
                        }),
                    }),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert_eq!(result.iterations, 10);
    }

    #[test]
    fn test_cancellation_token_stops_between_iterations() {
        let mut net = Network::with_seed(2, 1, 17);
        let token = Arc::new(AtomicBool::new(true));
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(1000),
                    rate: Some(0.3),
                    cancel: Some(token),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_early_stop_cuts_run_short() {
        let mut net = Network::with_seed(2, 1, 19);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(5000),
                    rate: Some(1e-12), // effectively frozen: error cannot improve
                    early_stop: Some(EarlyStop {
                        patience: 5,
                        min_delta: 1e-6,
                    }),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.iterations < 100);
    }

    #[test]
    fn test_moving_average_smooths_reported_error() {
        let mut net = Network::with_seed(2, 1, 23);
        let result = net
            .train(
                &and_gate(),
                TrainOptions {
                    iterations: Some(50),
                    rate: Some(0.3),
                    moving_average: Some(Smoothing::Sma { window: 10 }),
                    ..TrainOptions::default()
                },
            )
            .unwrap();
        assert!(result.error.is_finite());
    }

    #[test]
    fn test_forced_overflow_bumps_counters_and_shrinks_scale() {
        let mut net = Network::with_seed(2, 1, 42);
        let mp = MixedPrecision {
            loss_scale: 1024.,
            dynamic: Some(DynamicLossScale {
                min_scale: 1.,
                max_scale: 2048.,
                increase_every: 5,
            }),
        };
        let options = |mp| TrainOptions {
            iterations: Some(1),
            rate: Some(0.01),
            optimizer: Optimizer::adam(),
            mixed_precision: Some(mp),
            ..TrainOptions::default()
        };
        let before = net.train(&and_gate(), options(mp)).unwrap();
        assert_eq!(before.stats.overflow_count, 0);
        let scale_before = before.stats.loss_scale;

        net.force_overflow();
        let after = net.train(&and_gate(), options(mp)).unwrap();
        assert!(after.stats.overflow_count >= 1);
        assert!(after.stats.last_overflow_step.is_some());
        assert!(after.stats.loss_scale <= scale_before);
    }

    #[test]
    fn test_dynamic_scaler_doubles_after_clean_run() {
        let mut scaler = LossScaler::new(Some(MixedPrecision {
            loss_scale: 512.,
            dynamic: Some(DynamicLossScale {
                min_scale: 1.,
                max_scale: 2048.,
                increase_every: 3,
            }),
        }));
        for _ in 0..3 {
            scaler.clean();
        }
        assert_eq!(scaler.scale(), 1024.);
        scaler.overflow(7);
        assert_eq!(scaler.scale(), 512.);
        assert_eq!(scaler.stats().overflow_count, 1);
        assert_eq!(scaler.stats().last_overflow_step, Some(7));
        // never escapes the bounds
        for _ in 0..50 {
            scaler.overflow(8);
        }
        assert_eq!(scaler.scale(), 1.);
        for _ in 0..500 {
            scaler.clean();
        }
        assert_eq!(scaler.scale(), 2048.);
    }
}
