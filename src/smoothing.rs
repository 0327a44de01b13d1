//! Moving-average smoothing for the training loop's monitored error, plus
//! the plateau / early-stop bookkeeping built on top of it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Smoothing {
    Sma { window: usize },
    Wma { window: usize },
    Ema { window: usize, alpha: Option<f64> },
    AdaptiveEma { window: usize },
    Median { window: usize },
    Trimmed { window: usize, ratio: f64 },
    Gaussian { window: usize },
}

impl Smoothing {
    fn window(&self) -> usize {
        match *self {
            Smoothing::Sma { window }
            | Smoothing::Wma { window }
            | Smoothing::Ema { window, .. }
            | Smoothing::AdaptiveEma { window }
            | Smoothing::Median { window }
            | Smoothing::Trimmed { window, .. }
            | Smoothing::Gaussian { window } => window.max(1),
        }
    }
}

/// Streaming smoother over the monitored error. `update` folds in the next
/// raw value and returns the smoothed one; with no configuration the value
/// passes through untouched.
#[derive(Debug, Clone)]
pub struct Smoother {
    kind: Option<Smoothing>,
    buffer: VecDeque<f64>,
    ema: Option<f64>,
}

impl Smoother {
    pub fn new(kind: Option<Smoothing>) -> Self {
        Self {
            kind,
            buffer: VecDeque::new(),
            ema: None,
        }
    }

    pub fn update(&mut self, value: f64) -> f64 {
        let Some(kind) = self.kind else {
            return value;
        };

        let window = kind.window();
        self.buffer.push_back(value);
        while self.buffer.len() > window {
            self.buffer.pop_front();
        }

        match kind {
            Smoothing::Sma { .. } => mean(self.buffer.iter()),
            Smoothing::Wma { .. } => {
                // linear weights, newest heaviest
                let n = self.buffer.len();
                let denom = (n * (n + 1)) as f64 / 2.;
                self.buffer
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i + 1) as f64 * v)
                    .sum::<f64>()
                    / denom
            }
            Smoothing::Ema { window, alpha } => {
                let alpha = alpha.unwrap_or(2. / (window.max(1) as f64 + 1.));
                let next = match self.ema {
                    Some(prev) => alpha * value + (1. - alpha) * prev,
                    None => value,
                };
                self.ema = Some(next);
                next
            }
            Smoothing::AdaptiveEma { .. } => {
                // Kaufman-style efficiency ratio: trend swings fast, noise slow
                let first = *self.buffer.front().unwrap();
                let change = (value - first).abs();
                let volatility: f64 = self
                    .buffer
                    .iter()
                    .zip(self.buffer.iter().skip(1))
                    .map(|(a, b)| (b - a).abs())
                    .sum();
                let er = if volatility > 0. { change / volatility } else { 1. };
                let alpha = (er * (2. / 3. - 2. / 31.) + 2. / 31.).powi(2);
                let next = match self.ema {
                    Some(prev) => alpha * value + (1. - alpha) * prev,
                    None => value,
                };
                self.ema = Some(next);
                next
            }
            Smoothing::Median { .. } => {
                let mut sorted: Vec<f64> = self.buffer.iter().copied().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.
                } else {
                    sorted[mid]
                }
            }
            Smoothing::Trimmed { ratio, .. } => {
                let mut sorted: Vec<f64> = self.buffer.iter().copied().collect();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let cut = (sorted.len() as f64 * ratio.clamp(0., 0.5)).floor() as usize;
                let kept = &sorted[cut..sorted.len() - cut];
                if kept.is_empty() {
                    mean(sorted.iter())
                } else {
                    mean(kept.iter())
                }
            }
            Smoothing::Gaussian { window } => {
                let sigma = window.max(1) as f64 / 3.;
                let n = self.buffer.len();
                let mut num = 0.;
                let mut den = 0.;
                for (i, v) in self.buffer.iter().enumerate() {
                    let dist = (n - 1 - i) as f64;
                    let w = (-dist * dist / (2. * sigma * sigma)).exp();
                    num += w * v;
                    den += w;
                }
                num / den
            }
        }
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    let mut sum = 0.;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    sum / count.max(1) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStop {
    pub patience: u32,
    pub min_delta: f64,
}

/// Tracks whether the monitored error has stopped improving. `observe`
/// returns true once `patience` consecutive iterations fail to improve on
/// the best seen value by at least `min_delta`.
#[derive(Debug, Clone)]
pub struct EarlyStopState {
    config: EarlyStop,
    best: f64,
    stale: u32,
}

impl EarlyStopState {
    pub fn new(config: EarlyStop) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            stale: 0,
        }
    }

    pub fn observe(&mut self, error: f64) -> bool {
        if error < self.best - self.config.min_delta {
            self.best = error;
            self.stale = 0;
        } else {
            self.stale += 1;
        }
        self.stale >= self.config.patience
    }
}

/// Plateau detector: smooths the error with its own window and reports
/// whether the smoothed value has stopped moving.
#[derive(Debug, Clone)]
pub struct PlateauState {
    smoother: Smoother,
    last: Option<f64>,
    pub plateaued: bool,
}

impl PlateauState {
    pub fn new(kind: Smoothing) -> Self {
        Self {
            smoother: Smoother::new(Some(kind)),
            last: None,
            plateaued: false,
        }
    }

    pub fn observe(&mut self, error: f64) -> bool {
        let smoothed = self.smoother.update(error);
        self.plateaued = match self.last {
            Some(prev) => (prev - smoothed).abs() < 1e-9 || smoothed >= prev,
            None => false,
        };
        self.last = Some(smoothed);
        self.plateaued
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma_averages_window() {
        let mut s = Smoother::new(Some(Smoothing::Sma { window: 3 }));
        assert_relative_eq!(s.update(3.), 3.);
        assert_relative_eq!(s.update(6.), 4.5);
        assert_relative_eq!(s.update(9.), 6.);
        // 3 falls out of the window
        assert_relative_eq!(s.update(12.), 9.);
    }

    #[test]
    fn test_wma_weights_recent_heavier() {
        let mut s = Smoother::new(Some(Smoothing::Wma { window: 2 }));
        s.update(0.);
        // (1*0 + 2*3) / 3
        assert_relative_eq!(s.update(3.), 2.);
    }

    #[test]
    fn test_ema_default_alpha() {
        let mut s = Smoother::new(Some(Smoothing::Ema {
            window: 3,
            alpha: None,
        }));
        assert_relative_eq!(s.update(1.), 1.);
        // alpha = 2 / 4 = 0.5
        assert_relative_eq!(s.update(3.), 2.);
    }

    #[test]
    fn test_median_rejects_spikes() {
        let mut s = Smoother::new(Some(Smoothing::Median { window: 5 }));
        for v in [1., 1., 100., 1., 1.] {
            s.update(v);
        }
        assert_relative_eq!(s.update(1.), 1.);
    }

    #[test]
    fn test_trimmed_drops_extremes() {
        let mut s = Smoother::new(Some(Smoothing::Trimmed {
            window: 5,
            ratio: 0.2,
        }));
        let mut last = 0.;
        for v in [0., 10., 10., 10., 1000.] {
            last = s.update(v);
        }
        // extremes 0 and 1000 trimmed
        assert_relative_eq!(last, 10.);
    }

    #[test]
    fn test_gaussian_tracks_level() {
        let mut s = Smoother::new(Some(Smoothing::Gaussian { window: 4 }));
        let mut last = 0.;
        for _ in 0..10 {
            last = s.update(2.);
        }
        assert_relative_eq!(last, 2., epsilon = 1e-9);
    }

    #[test]
    fn test_adaptive_ema_follows_clean_trend_fast() {
        let mut s = Smoother::new(Some(Smoothing::AdaptiveEma { window: 5 }));
        let mut last = 0.;
        for i in 0..20 {
            last = s.update(i as f64);
        }
        // monotone input has efficiency ratio 1, so the tracker stays close
        assert!(last > 15.);
    }

    #[test]
    fn test_passthrough_without_config() {
        let mut s = Smoother::new(None);
        assert_relative_eq!(s.update(0.123), 0.123);
    }

    #[test]
    fn test_early_stop_patience() {
        let mut es = EarlyStopState::new(EarlyStop {
            patience: 3,
            min_delta: 0.01,
        });
        assert!(!es.observe(1.0));
        assert!(!es.observe(0.5));
        assert!(!es.observe(0.499)); // within min_delta: stale 1
        assert!(!es.observe(0.498)); // stale 2
        assert!(es.observe(0.497)); // stale 3 -> stop
    }

    #[test]
    fn test_early_stop_resets_on_improvement() {
        let mut es = EarlyStopState::new(EarlyStop {
            patience: 2,
            min_delta: 0.,
        });
        assert!(!es.observe(1.0));
        assert!(!es.observe(1.0));
        assert!(!es.observe(0.5));
        assert!(!es.observe(0.5));
        assert!(es.observe(0.5));
    }

    #[test]
    fn test_plateau_flags_flat_error() {
        let mut p = PlateauState::new(Smoothing::Sma { window: 2 });
        p.observe(1.0);
        p.observe(1.0);
        assert!(p.observe(1.0));
    }
}
