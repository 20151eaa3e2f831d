//! Slow Limit (adaptive release)
//!
//! # Perceptual Contract
//! - **Target Source**: Oversampled blend input.
//! - **Intended Effect**: Musical, programme-dependent limiting. Release
//!   stretches on dense or bass-heavy material and shortens on sparse, bright
//!   transients.
//! - **Failure Modes**:
//!   - Slight pumping on very sparse material with long gaps, where the
//!     release is at its shortest.
//! - **Will Not Do**:
//!   - Guarantee a hard ceiling (the protection stage does that).
//!
//! # Design Notes
//! - Detector: peak follower with instant attack, release driven per sample by
//!   [`SignalCharacter`] and the crest factor from [`HybridFollower`].
//! - The gain curve passes through two cascaded one-poles before it touches
//!   audio, so gain changes stay well below the processing rate. Their time
//!   constant is a fraction of the lookahead, so the gain still settles before
//!   the delayed peak arrives.

use crate::dsp::delay::DelayLine;
use crate::dsp::envelope::{EnvelopeFollower, HybridFollower, SignalCharacter};
use crate::dsp::hard_clip::MIN_THRESHOLD;
use crate::dsp::utils::{lin_to_db, time_constant_coeff};
use crate::dsp::ProcessorOutput;

// =============================================================================
// Constants
// =============================================================================

/// Release before adaptation (ms).
const BASE_RELEASE_MS: f32 = 120.0;
/// Adaptive release bounds (ms).
pub const MIN_RELEASE_MS: f32 = 10.0;
pub const MAX_RELEASE_MS: f32 = 1000.0;

/// Crest factor (linear) at which crest shaping is neutral (~12 dB).
const CREST_REFERENCE: f32 = 4.0;
const CREST_FACTOR_MIN: f32 = 0.5;
const CREST_FACTOR_MAX: f32 = 1.5;

/// Control low-pass time constant as a fraction of the lookahead.
const CONTROL_LP_FRACTION: f32 = 0.25;

pub struct SlowLimit {
    sample_rate: f32,
    lookahead: DelayLine,
    detector: EnvelopeFollower,
    character: SignalCharacter,
    crest: HybridFollower,
    lp_coeff: f32,
    lp1: f32,
    lp2: f32,
    release_ms: f32,
}

impl Default for SlowLimit {
    fn default() -> Self {
        Self::new(48_000.0)
    }
}

impl SlowLimit {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            lookahead: DelayLine::default(),
            detector: EnvelopeFollower::new(0.0, BASE_RELEASE_MS, sample_rate),
            character: SignalCharacter::new(sample_rate),
            crest: HybridFollower::new(sample_rate),
            lp_coeff: 0.0,
            lp1: 1.0,
            lp2: 1.0,
            release_ms: BASE_RELEASE_MS,
        }
    }

    pub fn allocate(&mut self, max_lookahead: usize) {
        self.lookahead.allocate(max_lookahead.max(1));
    }

    pub fn configure(&mut self, sample_rate: f32, lookahead: usize) {
        let lookahead = lookahead.max(1);
        self.sample_rate = sample_rate;
        self.lookahead.set_delay(lookahead);
        self.detector.prepare(sample_rate);
        self.character.prepare(sample_rate);
        self.crest.prepare(sample_rate);
        self.lp_coeff = (-1.0 / (lookahead as f32 * CONTROL_LP_FRACTION).max(1.0)).exp();
        self.reset();
    }

    #[inline]
    pub fn process(&mut self, input: f32, threshold: f32) -> ProcessorOutput {
        let t = threshold.max(MIN_THRESHOLD);
        let current = self.lookahead.push(input);

        self.character.update(input, t);
        let crest = self.crest.process(input).crest();
        let crest_factor = (CREST_REFERENCE / crest)
            .sqrt()
            .clamp(CREST_FACTOR_MIN, CREST_FACTOR_MAX);
        self.release_ms = (BASE_RELEASE_MS * self.character.release_multiplier() * crest_factor)
            .clamp(MIN_RELEASE_MS, MAX_RELEASE_MS);
        self.detector
            .set_release_coeff(time_constant_coeff(self.release_ms, self.sample_rate));

        let env = self.detector.process(input);
        let target = if env > t { t / env } else { 1.0 };

        let c = self.lp_coeff;
        self.lp1 = c * self.lp1 + (1.0 - c) * target;
        self.lp2 = c * self.lp2 + (1.0 - c) * self.lp1;
        let gain = self.lp2;

        ProcessorOutput {
            sample: current * gain,
            gain_reduction_db: -lin_to_db(gain).min(0.0),
        }
    }

    /// Release time chosen for the latest sample (ms).
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    pub fn reset(&mut self) {
        self.lookahead.clear();
        self.detector.reset();
        self.character.reset();
        self.crest.reset();
        self.lp1 = 1.0;
        self.lp2 = 1.0;
        self.release_ms = BASE_RELEASE_MS;
    }
}

// =============================================================================
// Tests
// =============================================================================
