//! Hard Clip
//!
//! # Perceptual Contract
//! - **Target Source**: Oversampled blend input.
//! - **Intended Effect**: Instant, brick-flat ceiling at the threshold with the
//!   loudest, most aggressive character of the four layers.
//! - **Failure Modes**:
//!   - Audible aliasing when run at 1× on bright material (reduced, not
//!     removed, by the boundary correction).
//! - **Will Not Do**:
//!   - Round the knee (that is Soft Clip's job).
//!
//! # Design Notes
//! - The output sample is taken from the lookahead buffer, so both of its
//!   neighbours are known. A two-point polyBLAMP residual is added only when
//!   the waveform crosses `±threshold` between the output sample and one of
//!   its neighbours; elsewhere the clamp is untouched.
//! - A DC blocker removes the offset left by asymmetric clipping.

use crate::dsp::delay::DelayLine;
use crate::dsp::utils::reduction_db;
use crate::dsp::ProcessorOutput;

/// Lowest usable threshold (linear).
pub const MIN_THRESHOLD: f32 = 1e-3;

/// DC blocker corner frequency.
const DC_BLOCK_HZ: f32 = 5.0;

#[derive(Debug, Clone, Copy, Default)]
struct DcBlocker {
    r: f32,
    x1: f32,
    y1: f32,
}

impl DcBlocker {
    fn prepare(&mut self, sample_rate: f32) {
        self.r = (1.0 - std::f32::consts::TAU * DC_BLOCK_HZ / sample_rate).clamp(0.0, 1.0);
        self.reset();
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = x - self.x1 + self.r * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }

    fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }
}

/// Band-limited ramp residual `(1 - |t|)^3 / 6` for a slope discontinuity
/// between samples `a` (earlier) and `b` (later).
///
/// `after == true` evaluates it for `b`, otherwise for `a`.
#[inline]
fn blamp_correction(a: f32, b: f32, threshold: f32, after: bool) -> f32 {
    let mut correction = 0.0;
    for level in [threshold, -threshold] {
        if (a - level) * (b - level) >= 0.0 {
            continue;
        }
        let slope = b - a;
        let frac = (level - a) / slope;
        let entering = if level > 0.0 { b > level } else { b < level };
        let slope_change = if entering { -slope } else { slope };
        let d = if after { frac } else { 1.0 - frac };
        correction += slope_change * d * d * d / 6.0;
    }
    correction
}

#[derive(Debug, Clone, Default)]
pub struct HardClip {
    lookahead: DelayLine,
    prev: f32,
    dc: DcBlocker,
}

impl HardClip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates lookahead room. Call from `prepare` only.
    pub fn allocate(&mut self, max_lookahead: usize) {
        self.lookahead.allocate(max_lookahead.max(1));
    }

    /// Adopts a new processing rate and lookahead (at that rate). Clears state.
    pub fn configure(&mut self, sample_rate: f32, lookahead: usize) {
        self.lookahead.set_delay(lookahead.max(1));
        self.dc.prepare(sample_rate);
        self.reset();
    }

    #[inline]
    pub fn process(&mut self, input: f32, threshold: f32) -> ProcessorOutput {
        let t = threshold.max(MIN_THRESHOLD);
        let current = self.lookahead.push(input);
        let next = self.lookahead.tap(self.lookahead.delay() - 1);
        let prev = self.prev;
        self.prev = current;

        let clipped = current.clamp(-t, t);
        let corrected = clipped
            + blamp_correction(prev, current, t, true)
            + blamp_correction(current, next, t, false);

        ProcessorOutput {
            sample: self.dc.process(corrected),
            gain_reduction_db: reduction_db(current, clipped),
        }
    }

    pub fn reset(&mut self) {
        self.lookahead.clear();
        self.prev = 0.0;
        self.dc.reset();
    }
}

// =============================================================================
// Tests
// =============================================================================
