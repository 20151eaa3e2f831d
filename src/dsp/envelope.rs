//! Envelope Primitives
//!
//! Time-domain level tracking shared by the dynamics processors.
//!
//! # Purpose
//! - [`EnvelopeFollower`]: single-pole attack/release peak follower
//! - [`HybridFollower`]: RMS + peak tracking, exposes crest factor
//! - [`SignalCharacter`]: peak-density and spectral estimates that stretch
//!   or shorten a release time to suit the material
//!
//! # Design Notes
//! - One instance per channel, per consumer
//! - **No Allocations**: plain `f32` state, O(1) per sample
//! - Output of every follower is non-negative and never exceeds the largest
//!   recent input magnitude (convex update)

use crate::dsp::utils::{time_constant_coeff, DB_EPS};

// =============================================================================
// Time Constants
// =============================================================================

/// Hybrid follower RMS integration (ms).
const HYBRID_RMS_MS: f32 = 300.0;
/// Hybrid follower peak attack (ms).
const HYBRID_PEAK_ATTACK_MS: f32 = 0.1;
/// Hybrid follower peak release (ms).
const HYBRID_PEAK_RELEASE_MS: f32 = 300.0;
/// RMS share of the hybrid level.
const HYBRID_RMS_WEIGHT: f32 = 0.7;

/// Fraction of the threshold a peak must cross to count as a density event.
const DENSITY_TRIGGER: f32 = 0.5;
/// Density gained per peak event (moves toward 1).
const DENSITY_RISE: f32 = 0.05;
/// Density decay time when no peaks arrive (ms).
const DENSITY_DECAY_MS: f32 = 1500.0;
/// Release stretch at full density.
const DENSITY_RELEASE_WEIGHT: f32 = 4.0;

/// Averaging time of the spectral estimate (ms).
const SPECTRAL_AVERAGE_MS: f32 = 50.0;
/// Estimated frequency at which the spectral factor is neutral.
const SPECTRAL_PIVOT_HZ: f32 = 1000.0;
const SPECTRAL_FACTOR_MIN: f32 = 0.5;
const SPECTRAL_FACTOR_MAX: f32 = 2.0;

// =============================================================================
// Attack / Release Follower
// =============================================================================

/// `y[n] = c*y[n-1] + (1-c)*|x[n]|`, attack coefficient while rising.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeFollower {
    attack_ms: f32,
    release_ms: f32,
    atk: f32,
    rel: f32,
    env: f32,
}

impl EnvelopeFollower {
    pub fn new(attack_ms: f32, release_ms: f32, sample_rate: f32) -> Self {
        let mut follower = Self {
            attack_ms,
            release_ms,
            atk: 0.0,
            rel: 0.0,
            env: 0.0,
        };
        follower.prepare(sample_rate);
        follower
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.atk = time_constant_coeff(self.attack_ms, sample_rate);
        self.rel = time_constant_coeff(self.release_ms, sample_rate);
    }

    /// Changes the release coefficient directly (per-sample adaptive release).
    #[inline]
    pub fn set_release_coeff(&mut self, coeff: f32) {
        self.rel = coeff.clamp(0.0, 1.0);
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let x = input.abs();
        let c = if x > self.env { self.atk } else { self.rel };
        self.env = c * self.env + (1.0 - c) * x;
        self.env
    }

    pub fn value(&self) -> f32 {
        self.env
    }

    pub fn reset(&mut self) {
        self.env = 0.0;
    }
}

// =============================================================================
// Hybrid RMS + Peak Follower
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct HybridLevel {
    pub rms: f32,
    pub peak: f32,
    /// Weighted blend of RMS and peak.
    pub hybrid: f32,
}

impl HybridLevel {
    /// Peak-to-RMS ratio (linear, >= 1 for real signals).
    pub fn crest(&self) -> f32 {
        if self.rms <= DB_EPS {
            1.0
        } else {
            (self.peak / self.rms).max(1.0)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridFollower {
    rms_coeff: f32,
    rms_sq: f32,
    peak: EnvelopeFollower,
}

impl HybridFollower {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            rms_coeff: time_constant_coeff(HYBRID_RMS_MS, sample_rate),
            rms_sq: 0.0,
            peak: EnvelopeFollower::new(HYBRID_PEAK_ATTACK_MS, HYBRID_PEAK_RELEASE_MS, sample_rate),
        }
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.rms_coeff = time_constant_coeff(HYBRID_RMS_MS, sample_rate);
        self.peak.prepare(sample_rate);
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> HybridLevel {
        let sq = input * input;
        self.rms_sq = (self.rms_coeff * self.rms_sq + (1.0 - self.rms_coeff) * sq).max(0.0);
        let rms = self.rms_sq.sqrt();
        let peak = self.peak.process(input);
        HybridLevel {
            rms,
            peak,
            hybrid: HYBRID_RMS_WEIGHT * rms + (1.0 - HYBRID_RMS_WEIGHT) * peak,
        }
    }

    pub fn reset(&mut self) {
        self.rms_sq = 0.0;
        self.peak.reset();
    }
}

// =============================================================================
// Signal Character (adaptive release analysis)
// =============================================================================

/// Tracks how dense and how bright the material is.
///
/// Density counts peak events (upward crossings of a fraction of the
/// threshold), so it behaves the same at every oversampling factor. The
/// spectral estimate uses `mean|x[n]-x[n-1]| / mean|x|`, which for a sine
/// equals `2*pi*f/fs`.
#[derive(Debug, Clone, Copy)]
pub struct SignalCharacter {
    sample_rate: f32,
    density: f32,
    density_decay: f32,
    above: bool,
    avg_coeff: f32,
    mean_abs: f32,
    mean_diff: f32,
    prev: f32,
}

impl SignalCharacter {
    pub fn new(sample_rate: f32) -> Self {
        let mut analyzer = Self {
            sample_rate,
            density: 0.0,
            density_decay: 0.0,
            above: false,
            avg_coeff: 0.0,
            mean_abs: 0.0,
            mean_diff: 0.0,
            prev: 0.0,
        };
        analyzer.prepare(sample_rate);
        analyzer
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        self.density_decay = time_constant_coeff(DENSITY_DECAY_MS, sample_rate);
        self.avg_coeff = time_constant_coeff(SPECTRAL_AVERAGE_MS, sample_rate);
    }

    #[inline]
    pub fn update(&mut self, input: f32, threshold: f32) {
        let level = input.abs();
        let trigger = threshold * DENSITY_TRIGGER;

        self.density *= self.density_decay;
        let above = level > trigger;
        if above && !self.above {
            self.density += (1.0 - self.density) * DENSITY_RISE;
        }
        self.above = above;

        let diff = (input - self.prev).abs();
        self.prev = input;
        let c = self.avg_coeff;
        self.mean_abs = c * self.mean_abs + (1.0 - c) * level;
        self.mean_diff = c * self.mean_diff + (1.0 - c) * diff;
    }

    /// Peak-event density, 0..1.
    pub fn density(&self) -> f32 {
        self.density
    }

    /// Rough spectral centroid in Hz, `None` while the input is silent.
    pub fn centroid_hz(&self) -> Option<f32> {
        if self.mean_abs <= 1e-6 {
            return None;
        }
        let ratio = self.mean_diff / self.mean_abs;
        Some(ratio * self.sample_rate / std::f32::consts::TAU)
    }

    /// Release multiplier: above 1 for dense or dark material.
    pub fn release_multiplier(&self) -> f32 {
        let density = 1.0 + DENSITY_RELEASE_WEIGHT * self.density;
        let spectral = match self.centroid_hz() {
            Some(hz) => (SPECTRAL_PIVOT_HZ / hz.max(1.0))
                .sqrt()
                .clamp(SPECTRAL_FACTOR_MIN, SPECTRAL_FACTOR_MAX),
            None => 1.0,
        };
        density * spectral
    }

    pub fn reset(&mut self) {
        self.density = 0.0;
        self.above = false;
        self.mean_abs = 0.0;
        self.mean_diff = 0.0;
        self.prev = 0.0;
    }
}

// =============================================================================
// Tests
// =============================================================================
