//! Biquad Filter (IIR 2nd Order) and three-band analysis splitter
//!
//! RBJ-cookbook designs, transposed direct form II. Coefficients are computed
//! in double precision once at preparation and stored separately from the
//! filter state, so several channels can share one design.
//!
//! # Design Notes
//! - Used only on the analysis side (release control), never in the audio path
//! - Coefficients are fixed per sample rate; nothing here allocates

use std::f64::consts::PI;

/// Crossover between the low and mid analysis bands.
pub const LOW_MID_CROSSOVER_HZ: f32 = 200.0;
/// Crossover between the mid and high analysis bands.
pub const MID_HIGH_CROSSOVER_HZ: f32 = 4000.0;

const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Normalised biquad coefficients (`a0` folded in).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn from_raw(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        let inv = 1.0 / a0;
        Self {
            b0: (b0 * inv) as f32,
            b1: (b1 * inv) as f32,
            b2: (b2 * inv) as f32,
            a1: (a1 * inv) as f32,
            a2: (a2 * inv) as f32,
        }
    }

    fn warp(cutoff: f32, q: f64, sr: f32) -> (f64, f64) {
        let nyquist_guard = sr as f64 * 0.499;
        let w0 = 2.0 * PI * (cutoff as f64).clamp(1.0, nyquist_guard) / sr as f64;
        let alpha = w0.sin() / (2.0 * q.max(1e-6));
        (w0.cos(), alpha)
    }

    pub fn lowpass(cutoff: f32, q: f64, sr: f32) -> Self {
        let (cw0, alpha) = Self::warp(cutoff, q, sr);
        Self::from_raw(
            (1.0 - cw0) * 0.5,
            1.0 - cw0,
            (1.0 - cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        )
    }

    pub fn highpass(cutoff: f32, q: f64, sr: f32) -> Self {
        let (cw0, alpha) = Self::warp(cutoff, q, sr);
        Self::from_raw(
            (1.0 + cw0) * 0.5,
            -(1.0 + cw0),
            (1.0 + cw0) * 0.5,
            1.0 + alpha,
            -2.0 * cw0,
            1.0 - alpha,
        )
    }

    /// Band-pass with 0 dB peak gain at `center`.
    pub fn bandpass(center: f32, q: f64, sr: f32) -> Self {
        let (cw0, alpha) = Self::warp(center, q, sr);
        Self::from_raw(alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cw0, 1.0 - alpha)
    }
}

/// Biquad filter state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Swap the design without touching the delay state.
    pub fn set_coeffs(&mut self, coeffs: BiquadCoeffs) {
        self.coeffs = coeffs;
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let out = input * c.b0 + self.z1;

        // Anti-denormal: tiny DC offset
        self.z1 = input * c.b1 + self.z2 - c.a1 * out + 1e-25;
        self.z2 = input * c.b2 - c.a2 * out + 1e-25;

        out
    }

    #[inline]
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

// =============================================================================
// Three-band splitter
// =============================================================================

/// Low / mid / high analysis filters for one channel.
///
/// The bands are not phase-matched and do not sum back to the input; they
/// only feed energy estimates.
#[derive(Debug, Clone, Copy, Default)]
pub struct BandSplitter {
    low: Biquad,
    mid: Biquad,
    high: Biquad,
}

impl BandSplitter {
    pub fn new(sample_rate: f32) -> Self {
        let mut splitter = Self::default();
        splitter.prepare(sample_rate);
        splitter
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        let lo = LOW_MID_CROSSOVER_HZ as f64;
        let hi = MID_HIGH_CROSSOVER_HZ as f64;
        let center = (lo * hi).sqrt();
        let mid_q = center / (hi - lo);

        self.low
            .set_coeffs(BiquadCoeffs::lowpass(LOW_MID_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate));
        self.mid
            .set_coeffs(BiquadCoeffs::bandpass(center as f32, mid_q, sample_rate));
        self.high
            .set_coeffs(BiquadCoeffs::highpass(MID_HIGH_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate));
        self.reset();
    }

    /// Returns `[low, mid, high]` band samples.
    #[inline]
    pub fn process(&mut self, input: f32) -> [f32; 3] {
        [
            self.low.process(input),
            self.mid.process(input),
            self.high.process(input),
        ]
    }

    pub fn reset(&mut self) {
        self.low.reset();
        self.mid.reset();
        self.high.reset();
    }
}

// =============================================================================
// Tests
// =============================================================================
