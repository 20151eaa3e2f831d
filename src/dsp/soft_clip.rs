//! Soft Clip (antiderivative antialiased)
//!
//! # Perceptual Contract
//! - **Target Source**: Oversampled blend input.
//! - **Intended Effect**: Warm saturation that is linear below the knee and
//!   approaches the threshold asymptotically above it.
//! - **Will Not Do**:
//!   - Exceed the threshold (the ADAA quotient is a mean of a bounded curve).
//!
//! # Design Notes
//! - Curve: `x` for `|x| <= k`, `sign(x) * (k + h*tanh((|x|-k)/h))` above,
//!   with `k = threshold*(1-knee)` and `h = threshold*knee`.
//! - First-order ADAA over the closed-form antiderivative
//!   `k^2/2 + k(|x|-k) + h^2*ln(cosh((|x|-k)/h))`, evaluated in f64.
//! - First-order ADAA lags by half a sample. Two consecutive ADAA outputs are
//!   averaged, giving an exact one-sample lag, and the input is read one
//!   sample early from the lookahead buffer so the result lines up with the
//!   other processors.
//! - On a linear stretch the average reduces to a `[1, 2, 1] / 4` low-pass
//!   (about -4 dB at 10 kHz at 1×). When the three samples it spans all sit
//!   inside the knee the curve is the identity there, so the aligned input
//!   sample is returned as is and the linear region stays flat.

use crate::dsp::delay::DelayLine;
use crate::dsp::hard_clip::MIN_THRESHOLD;
use crate::dsp::utils::reduction_db;
use crate::dsp::ProcessorOutput;

/// Narrowest knee (fraction of the threshold).
pub const MIN_KNEE: f32 = 0.05;

/// Input step below which the ADAA quotient falls back to the midpoint.
const ADAA_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
struct SoftCurve {
    knee_start: f64,
    headroom: f64,
}

impl SoftCurve {
    fn new(threshold: f32, knee: f32) -> Self {
        let t = threshold.max(MIN_THRESHOLD) as f64;
        let k = knee.clamp(MIN_KNEE, 1.0) as f64;
        Self {
            knee_start: t * (1.0 - k),
            headroom: t * k,
        }
    }

    #[inline]
    fn shape(&self, x: f64) -> f64 {
        let ax = x.abs();
        if ax <= self.knee_start {
            x
        } else {
            let y = self.knee_start + self.headroom * ((ax - self.knee_start) / self.headroom).tanh();
            y.copysign(x)
        }
    }

    #[inline]
    fn antiderivative(&self, x: f64) -> f64 {
        let ax = x.abs();
        let k = self.knee_start;
        if ax <= k {
            0.5 * x * x
        } else {
            let h = self.headroom;
            let u = (ax - k) / h;
            0.5 * k * k + k * (ax - k) + h * h * log_cosh(u)
        }
    }
}

/// `ln(cosh(u))` without overflow for large `u`.
#[inline]
fn log_cosh(u: f64) -> f64 {
    let a = u.abs();
    a + (-2.0 * a).exp().ln_1p() - std::f64::consts::LN_2
}

#[derive(Debug, Clone)]
pub struct SoftClip {
    lookahead: DelayLine,
    curve: SoftCurve,
    x1: f64,
    x2: f64,
    f1: f64,
    adaa_prev: f64,
}

impl Default for SoftClip {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftClip {
    pub fn new() -> Self {
        Self {
            lookahead: DelayLine::default(),
            curve: SoftCurve::new(1.0, 0.5),
            x1: 0.0,
            x2: 0.0,
            f1: 0.0,
            adaa_prev: 0.0,
        }
    }

    pub fn allocate(&mut self, max_lookahead: usize) {
        self.lookahead.allocate(max_lookahead.max(1));
    }

    pub fn configure(&mut self, lookahead: usize) {
        self.lookahead.set_delay(lookahead.max(1));
        self.reset();
    }

    #[inline]
    pub fn process(&mut self, input: f32, threshold: f32, knee: f32) -> ProcessorOutput {
        let current = self.lookahead.push(input);
        let x = self.lookahead.tap(self.lookahead.delay() - 1) as f64;

        let curve = SoftCurve::new(threshold, knee);
        if curve != self.curve {
            self.curve = curve;
            self.f1 = curve.antiderivative(self.x1);
        }

        let fx = curve.antiderivative(x);
        let dx = x - self.x1;
        let adaa = if dx.abs() > ADAA_EPS {
            (fx - self.f1) / dx
        } else {
            curve.shape(0.5 * (x + self.x1))
        };
        let k = curve.knee_start;
        let linear = x.abs() <= k && self.x1.abs() <= k && self.x2.abs() <= k;
        // x1 is the sample aligned with `current`
        let y = if linear {
            self.x1
        } else {
            0.5 * (adaa + self.adaa_prev)
        };

        self.x2 = self.x1;
        self.x1 = x;
        self.f1 = fx;
        self.adaa_prev = adaa;

        let sample = y as f32;
        ProcessorOutput {
            sample,
            gain_reduction_db: reduction_db(current, sample),
        }
    }

    pub fn reset(&mut self) {
        self.lookahead.clear();
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.f1 = self.curve.antiderivative(0.0);
        self.adaa_prev = 0.0;
    }
}

// =============================================================================
// Tests
// =============================================================================
