//! Transient / Sustain Shaper
//!
//! # Perceptual Contract
//! - **Target Source**: Pre-processor signal at native rate.
//! - **Intended Effect**: Emphasise or soften attacks and tails independently
//!   before the clip/limit stages see them.
//! - **Will Not Do**:
//!   - Change anything at 0 dB / 0 dB (gain is exactly unity).
//!   - Exceed ±12 dB of emphasis in either direction.
//!
//! Two peak followers (fast 0.5/20 ms, slow 10/100 ms) give
//! `transientness = clamp((fast - slow) / (fast + slow + eps), 0, 1)`.
//! The applied gain interpolates in dB between the smoothed sustain and
//! attack emphasis.

use crate::dsp::envelope::EnvelopeFollower;
use crate::dsp::utils::{db_to_lin, time_constant_coeff, DB_EPS};

const FAST_ATTACK_MS: f32 = 0.5;
const FAST_RELEASE_MS: f32 = 20.0;
const SLOW_ATTACK_MS: f32 = 10.0;
const SLOW_RELEASE_MS: f32 = 100.0;

/// Emphasis limit in either direction (dB).
pub const MAX_EMPHASIS_DB: f32 = 12.0;

/// Smoothing of the emphasis targets (ms).
const EMPHASIS_SMOOTH_MS: f32 = 5.0;

pub struct TransientShaper {
    fast: EnvelopeFollower,
    slow: EnvelopeFollower,
    smooth_coeff: f32,
    attack_target_db: f32,
    sustain_target_db: f32,
    attack_db: f32,
    sustain_db: f32,
    transientness: f32,
}

impl TransientShaper {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            fast: EnvelopeFollower::new(FAST_ATTACK_MS, FAST_RELEASE_MS, sample_rate),
            slow: EnvelopeFollower::new(SLOW_ATTACK_MS, SLOW_RELEASE_MS, sample_rate),
            smooth_coeff: time_constant_coeff(EMPHASIS_SMOOTH_MS, sample_rate),
            attack_target_db: 0.0,
            sustain_target_db: 0.0,
            attack_db: 0.0,
            sustain_db: 0.0,
            transientness: 0.0,
        }
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.fast.prepare(sample_rate);
        self.slow.prepare(sample_rate);
        self.smooth_coeff = time_constant_coeff(EMPHASIS_SMOOTH_MS, sample_rate);
        self.reset();
    }

    /// Sets attack and sustain emphasis in dB, clamped to ±12 dB.
    pub fn set_emphasis(&mut self, attack_db: f32, sustain_db: f32) {
        self.attack_target_db = attack_db.clamp(-MAX_EMPHASIS_DB, MAX_EMPHASIS_DB);
        self.sustain_target_db = sustain_db.clamp(-MAX_EMPHASIS_DB, MAX_EMPHASIS_DB);
    }

    pub fn emphasis_targets_db(&self) -> (f32, f32) {
        (self.attack_target_db, self.sustain_target_db)
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let fast = self.fast.process(input);
        let slow = self.slow.process(input);
        self.transientness = ((fast - slow) / (fast + slow + DB_EPS)).clamp(0.0, 1.0);

        let c = self.smooth_coeff;
        self.attack_db = c * self.attack_db + (1.0 - c) * self.attack_target_db;
        self.sustain_db = c * self.sustain_db + (1.0 - c) * self.sustain_target_db;

        let gain_db = self.sustain_db + (self.attack_db - self.sustain_db) * self.transientness;
        input * db_to_lin(gain_db)
    }

    /// Last computed transientness, 0..1.
    pub fn transientness(&self) -> f32 {
        self.transientness
    }

    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.attack_db = self.attack_target_db;
        self.sustain_db = self.sustain_target_db;
        self.transientness = 0.0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extreme_emphasis_clamps_exactly() {
        let mut shaper = TransientShaper::new(48_000.0);
        shaper.set_emphasis(20.0, -20.0);
        assert_eq!(shaper.emphasis_targets_db(), (12.0, -12.0));
        shaper.set_emphasis(-20.0, 20.0);
        assert_eq!(shaper.emphasis_targets_db(), (-12.0, 12.0));
    }

    #[test]
    fn test_neutral_is_bit_transparent() {
        let mut shaper = TransientShaper::new(48_000.0);
        for i in 0..4800 {
            let x = ((i as f32) * 0.05).sin() * if i % 1000 < 20 { 1.0 } else { 0.2 };
            assert_eq!(shaper.process(x), x);
        }
    }

    #[test]
    fn test_transientness_bounded() {
        let mut shaper = TransientShaper::new(48_000.0);
        shaper.set_emphasis(6.0, -6.0);
        for i in 0..48_000 {
            let burst = if i % 6000 < 100 { 1.0 } else { 0.05 };
            shaper.process(((i as f32) * 0.1).sin() * burst);
            let t = shaper.transientness();
            assert!((0.0..=1.0).contains(&t));
        }
    }

    #[test]
    fn test_attack_emphasis_boosts_onset() {
        let sr = 48_000.0;
        let mut shaper = TransientShaper::new(sr);
        shaper.set_emphasis(12.0, 0.0);
        shaper.reset();
        let mut onset_peak = 0.0f32;
        for i in 0..480 {
            let x = 0.25 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr).sin();
            onset_peak = onset_peak.max(shaper.process(x).abs());
        }
        assert!(onset_peak > 0.3);
    }
}
