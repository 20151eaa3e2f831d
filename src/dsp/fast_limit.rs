//! Fast Limit
//!
//! # Perceptual Contract
//! - **Target Source**: Oversampled blend input.
//! - **Intended Effect**: Tight, transparent-until-driven peak control with a
//!   hard knee and a short fixed release.
//! - **Failure Modes**:
//!   - Low-frequency distortion when driven hard (release is shorter than a
//!     bass period).
//!
//! Detection runs on the incoming sample; the gain is applied to the
//! lookahead-delayed sample after a one-pole control low-pass.

use crate::dsp::delay::DelayLine;
use crate::dsp::envelope::EnvelopeFollower;
use crate::dsp::hard_clip::MIN_THRESHOLD;
use crate::dsp::utils::lin_to_db;
use crate::dsp::ProcessorOutput;

const ATTACK_MS: f32 = 0.05;
const RELEASE_MS: f32 = 25.0;

/// Control low-pass time constant as a fraction of the lookahead.
const CONTROL_LP_FRACTION: f32 = 0.125;

pub struct FastLimit {
    lookahead: DelayLine,
    detector: EnvelopeFollower,
    lp_coeff: f32,
    gain: f32,
}

impl Default for FastLimit {
    fn default() -> Self {
        Self::new(48_000.0)
    }
}

impl FastLimit {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            lookahead: DelayLine::default(),
            detector: EnvelopeFollower::new(ATTACK_MS, RELEASE_MS, sample_rate),
            lp_coeff: 0.0,
            gain: 1.0,
        }
    }

    pub fn allocate(&mut self, max_lookahead: usize) {
        self.lookahead.allocate(max_lookahead.max(1));
    }

    pub fn configure(&mut self, sample_rate: f32, lookahead: usize) {
        let lookahead = lookahead.max(1);
        self.lookahead.set_delay(lookahead);
        self.detector.prepare(sample_rate);
        self.lp_coeff = (-1.0 / (lookahead as f32 * CONTROL_LP_FRACTION).max(1.0)).exp();
        self.reset();
    }

    #[inline]
    pub fn process(&mut self, input: f32, threshold: f32) -> ProcessorOutput {
        let t = threshold.max(MIN_THRESHOLD);
        let current = self.lookahead.push(input);

        let env = self.detector.process(input);
        let target = if env > t { t / env } else { 1.0 };
        self.gain = self.lp_coeff * self.gain + (1.0 - self.lp_coeff) * target;

        ProcessorOutput {
            sample: current * self.gain,
            gain_reduction_db: -lin_to_db(self.gain).min(0.0),
        }
    }

    pub fn reset(&mut self) {
        self.lookahead.clear();
        self.detector.reset();
        self.gain = 1.0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_signal_untouched() {
        let sr = 48_000.0;
        let mut l = FastLimit::new(sr);
        l.allocate(48);
        l.configure(sr, 48);
        let input: Vec<f32> = (0..4800).map(|i| 0.1 * (i as f32 * 0.02).sin()).collect();
        let out: Vec<f32> = input.iter().map(|&x| l.process(x, 0.5).sample).collect();
        for i in 48..4800 {
            assert_eq!(out[i], input[i - 48]);
        }
    }

    #[test]
    fn test_loud_tone_held_at_threshold() {
        let sr = 384_000.0;
        let lookahead = 384;
        let mut l = FastLimit::new(sr);
        l.allocate(lookahead);
        l.configure(sr, lookahead);
        let mut peak = 0.0f32;
        let mut gr = 0.0f32;
        for n in 0..(sr as usize / 4) {
            let x = 2.0 * (2.0 * std::f32::consts::PI * 1000.0 * n as f32 / sr).sin();
            let out = l.process(x, 0.5);
            if n > sr as usize / 8 {
                peak = peak.max(out.sample.abs());
                gr = gr.max(out.gain_reduction_db);
            }
        }
        assert!(peak <= 0.5 * 1.05, "peak = {peak}");
        assert!(gr > 11.0);
    }
}
