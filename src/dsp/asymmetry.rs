//! Waveform Asymmetry Restorer
//!
//! # Perceptual Contract
//! - **Target Source**: Input signal, before any clipping.
//! - **Intended Effect**: When one polarity peaks noticeably higher than the
//!   other (ratio above 1.15), pull the dominant polarity's near-full-scale
//!   samples back toward the weaker side so the clippers treat both halves
//!   alike.
//! - **Will Not Do**:
//!   - Touch anything below 90 % of full scale.
//!   - Touch the weaker polarity.
//!
//! # Lifecycle
//! - `analyze_block` once per block, then `process` per sample.

use crate::dsp::control_slew::ControlSlewLimiter;
use crate::dsp::utils::{smoothstep, DB_EPS};

/// Peak ratio above which correction engages.
pub const ASYMMETRY_RATIO_THRESHOLD: f32 = 1.15;
/// Level (fraction of full scale) where the correction starts to fade in.
const CORRECTION_KNEE: f32 = 0.9;
/// Correction slew (gain units per second).
const CORRECTION_RATE_PER_SEC: f32 = 2.0;

pub struct AsymmetryRestorer {
    sample_rate: f32,
    positive_gain: ControlSlewLimiter,
    negative_gain: ControlSlewLimiter,
}

impl AsymmetryRestorer {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            positive_gain: ControlSlewLimiter::new(1.0, CORRECTION_RATE_PER_SEC),
            negative_gain: ControlSlewLimiter::new(1.0, CORRECTION_RATE_PER_SEC),
        }
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.reset();
    }

    /// Scans a block for polarity peaks and updates the correction targets.
    ///
    /// `enabled == false` relaxes both corrections back to unity.
    pub fn analyze_block(&mut self, block: &[f32], enabled: bool) {
        let mut pos_peak = 0.0f32;
        let mut neg_peak = 0.0f32;
        for &x in block {
            if x > pos_peak {
                pos_peak = x;
            } else if -x > neg_peak {
                neg_peak = -x;
            }
        }

        let (pos_target, neg_target) = if !enabled {
            (1.0, 1.0)
        } else if pos_peak > neg_peak * ASYMMETRY_RATIO_THRESHOLD && neg_peak > DB_EPS {
            (neg_peak / pos_peak, 1.0)
        } else if neg_peak > pos_peak * ASYMMETRY_RATIO_THRESHOLD && pos_peak > DB_EPS {
            (1.0, pos_peak / neg_peak)
        } else {
            (1.0, 1.0)
        };

        let n = block.len();
        self.positive_gain.process(pos_target, n, self.sample_rate);
        self.negative_gain.process(neg_target, n, self.sample_rate);
    }

    #[inline]
    pub fn process(&self, input: f32) -> f32 {
        let level = input.abs();
        if level <= CORRECTION_KNEE {
            return input;
        }
        let correction = if input > 0.0 {
            self.positive_gain.current()
        } else {
            self.negative_gain.current()
        };
        let weight = smoothstep(CORRECTION_KNEE, 1.0, level);
        input * (1.0 + (correction - 1.0) * weight)
    }

    /// Current `(positive, negative)` correction factors.
    pub fn correction(&self) -> (f32, f32) {
        (self.positive_gain.current(), self.negative_gain.current())
    }

    pub fn reset(&mut self) {
        self.positive_gain.reset(1.0);
        self.negative_gain.reset(1.0);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_block(n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| {
                let s = (2.0 * std::f32::consts::PI * i as f32 / 48.0).sin();
                if s > 0.0 {
                    s
                } else {
                    0.7 * s
                }
            })
            .collect()
    }

    #[test]
    fn test_symmetric_signal_untouched() {
        let mut r = AsymmetryRestorer::new(48_000.0);
        let block: Vec<f32> = (0..480)
            .map(|i| (2.0 * std::f32::consts::PI * i as f32 / 48.0).sin())
            .collect();
        for _ in 0..50 {
            r.analyze_block(&block, true);
        }
        assert_eq!(r.correction(), (1.0, 1.0));
        for &x in &block {
            assert_eq!(r.process(x), x);
        }
    }

    #[test]
    fn test_dominant_polarity_pulled_in() {
        let mut r = AsymmetryRestorer::new(48_000.0);
        let block = skewed_block(480);
        for _ in 0..100 {
            r.analyze_block(&block, true);
        }
        let (pos, neg) = r.correction();
        assert!((pos - 0.7).abs() < 0.01, "pos = {pos}");
        assert_eq!(neg, 1.0);
        assert!(r.process(1.0) < 0.75);
        assert_eq!(r.process(0.5), 0.5);
        assert_eq!(r.process(-0.7), -0.7);
    }

    #[test]
    fn test_correction_is_slewed() {
        let mut r = AsymmetryRestorer::new(48_000.0);
        let block = skewed_block(48);
        r.analyze_block(&block, true);
        let (pos, _) = r.correction();
        // 1 ms block at 2/s allows a 0.002 step
        assert!(pos > 0.99);
    }

    #[test]
    fn test_disabled_relaxes_to_unity() {
        let mut r = AsymmetryRestorer::new(48_000.0);
        let block = skewed_block(480);
        for _ in 0..100 {
            r.analyze_block(&block, true);
        }
        for _ in 0..100 {
            r.analyze_block(&block, false);
        }
        assert_eq!(r.correction(), (1.0, 1.0));
    }
}
