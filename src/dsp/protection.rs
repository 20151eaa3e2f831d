//! Protection Limiter
//!
//! # Perceptual Contract
//! - **Target Source**: Blended signal, still oversampled.
//! - **Intended Effect**: Enforce the output ceiling after the character
//!   stages.
//!   - *Overshoot suppression*: slow attack lets very short transients poke
//!     through; a tanh soft ceiling keeps them within +0.5 dB. Keeps punch.
//!   - *True-peak limiting*: windowed true-peak maximum over the lookahead,
//!     attack that completes inside the lookahead, release steered by
//!     three-band energy (IRC), final safety clamp at the ceiling.
//! - **Will Not Do**:
//!   - Change latency when either behaviour is switched (the delay line is
//!     always in the path).
//!
//! # Design Notes
//! - At 1× the true peak comes from a 4× polyphase detector, which adds
//!   [`TRUE_PEAK_DETECT_DELAY`] native samples. That delay is part of the
//!   stage's latency at every rate, so reported latency never depends on
//!   the oversampling mode.
//! - Band analysis runs once per native sample (every `factor` calls), so
//!   the crossover biquads never operate at 16× rates where f32 coefficients
//!   lose precision.
//! - The oversampled stage bounds the signal at the high rate only. Shaping
//!   adds harmonics the decimation filter then removes, which rebuilds peaks
//!   above the ceiling, so [`ProtectionLimiter::finish`] applies the same
//!   ceiling again at the native rate after downsampling.

use crate::dsp::biquad::BandSplitter;
use crate::dsp::delay::DelayLine;
use crate::dsp::true_peak::{TruePeakDetector, TRUE_PEAK_DETECT_DELAY};
use crate::dsp::utils::{db_to_lin, reduction_db, time_constant_coeff, DB_EPS};
use crate::dsp::ProcessorOutput;

// =============================================================================
// Constants
// =============================================================================

/// Largest overshoot the soft ceiling allows (dB).
const OVERSHOOT_ALLOWANCE_DB: f32 = 0.5;

/// True-peak attack time constant as a fraction of the lookahead window.
const TRUE_PEAK_ATTACK_FRACTION: f32 = 0.2;
/// Overshoot attack time constant as a fraction of the lookahead window.
const OVERSHOOT_ATTACK_FRACTION: f32 = 0.66;

/// IRC band envelope timing (ms, native rate).
const BAND_ATTACK_MS: f32 = 1.0;
const BAND_RELEASE_MS: f32 = 60.0;

/// Release per band: low, mid, high (ms).
const BAND_RELEASE_TIMES_MS: [f32; 3] = [250.0, 80.0, 20.0];

/// Detection at or above this factor reads the oversampled samples directly.
const DIRECT_TRUE_PEAK_FACTOR: usize = 4;

/// Which protection behaviours are engaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionModes {
    pub overshoot: bool,
    pub true_peak: bool,
}

impl ProtectionModes {
    pub fn any(&self) -> bool {
        self.overshoot || self.true_peak
    }
}

// =============================================================================
// Sliding window maximum
// =============================================================================

/// Monotonic-deque running maximum over the last `window` pushes.
#[derive(Debug, Clone, Default)]
pub struct SlidingMax {
    values: Vec<f32>,
    stamps: Vec<u64>,
    head: usize,
    len: usize,
    window: u64,
    time: u64,
}

impl SlidingMax {
    pub fn allocate(&mut self, max_window: usize) {
        let cap = max_window.max(1) + 1;
        self.values = vec![0.0; cap];
        self.stamps = vec![0; cap];
        self.set_window(max_window.max(1));
    }

    /// Sets the window (clamped to the allocation) and clears the history.
    pub fn set_window(&mut self, window: usize) {
        let max = self.values.len().saturating_sub(1).max(1);
        self.window = window.clamp(1, max) as u64;
        self.clear();
    }

    #[inline]
    pub fn push(&mut self, value: f32) -> f32 {
        let cap = self.values.len();
        if cap == 0 {
            return value;
        }
        self.time += 1;
        while self.len > 0 {
            let back = (self.head + self.len - 1) % cap;
            if self.values[back] > value {
                break;
            }
            self.len -= 1;
        }
        let slot = (self.head + self.len) % cap;
        self.values[slot] = value;
        self.stamps[slot] = self.time;
        self.len += 1;
        while self.stamps[self.head] + self.window <= self.time {
            self.head = (self.head + 1) % cap;
            self.len -= 1;
        }
        self.values[self.head]
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
        self.time = 0;
    }
}

// =============================================================================
// Protection limiter
// =============================================================================

pub struct ProtectionLimiter {
    native_rate: f32,
    stage_rate: f32,
    factor: usize,
    lookahead_native: usize,

    delay: DelayLine,
    true_peak_window: SlidingMax,
    sample_peak_window: SlidingMax,
    detector: TruePeakDetector,

    splitter: BandSplitter,
    band_env: [f32; 3],
    band_atk: f32,
    band_rel: f32,
    decimation_phase: usize,
    release_coeff: f32,

    true_peak_gain: f32,
    overshoot_gain: f32,
    true_peak_atk: f32,
    overshoot_atk: f32,
    overshoot_room: f32,
}

impl ProtectionLimiter {
    pub fn new(native_rate: f32) -> Self {
        Self {
            native_rate,
            stage_rate: native_rate,
            factor: 1,
            lookahead_native: 1,
            delay: DelayLine::default(),
            true_peak_window: SlidingMax::default(),
            sample_peak_window: SlidingMax::default(),
            detector: TruePeakDetector::new(),
            splitter: BandSplitter::new(native_rate),
            band_env: [0.0; 3],
            band_atk: 0.0,
            band_rel: 0.0,
            decimation_phase: 0,
            release_coeff: 0.0,
            true_peak_gain: 1.0,
            overshoot_gain: 1.0,
            true_peak_atk: 0.0,
            overshoot_atk: 0.0,
            overshoot_room: db_to_lin(OVERSHOOT_ALLOWANCE_DB) - 1.0,
        }
    }

    /// Latency added by this stage, in native samples.
    pub fn latency_for(lookahead_native: usize) -> usize {
        lookahead_native.max(1) + TRUE_PEAK_DETECT_DELAY
    }

    /// Allocates for `lookahead_native` samples of lookahead at up to
    /// `max_factor` times the native rate. Call from `prepare` only.
    pub fn allocate(&mut self, native_rate: f32, lookahead_native: usize, max_factor: usize) {
        self.native_rate = native_rate;
        self.lookahead_native = lookahead_native.max(1);
        let max_delay = Self::latency_for(self.lookahead_native) * max_factor.max(1);
        self.delay.allocate(max_delay);
        self.true_peak_window.allocate(max_delay + 1);
        self.sample_peak_window.allocate(max_delay + 1);
        self.splitter.prepare(native_rate);
        self.band_atk = time_constant_coeff(BAND_ATTACK_MS, native_rate);
        self.band_rel = time_constant_coeff(BAND_RELEASE_MS, native_rate);
    }

    /// Adopts an oversampling factor. Clears state, never allocates.
    pub fn configure(&mut self, factor: usize) {
        self.factor = factor.max(1);
        self.stage_rate = self.native_rate * self.factor as f32;

        let delay = Self::latency_for(self.lookahead_native) * self.factor;
        self.delay.set_delay(delay);
        self.true_peak_window.set_window(delay + 1);
        self.sample_peak_window.set_window(delay + 1);

        let window = (delay + 1) as f32;
        self.true_peak_atk = (-1.0 / (window * TRUE_PEAK_ATTACK_FRACTION)).exp();
        self.overshoot_atk = (-1.0 / (window * OVERSHOOT_ATTACK_FRACTION)).exp();
        self.reset();
    }

    fn update_bands(&mut self, input: f32) {
        let bands = self.splitter.process(input);
        for (env, b) in self.band_env.iter_mut().zip(bands) {
            let level = b.abs();
            let c = if level > *env { self.band_atk } else { self.band_rel };
            *env = c * *env + (1.0 - c) * level;
        }

        let total: f32 = self.band_env.iter().sum();
        let release_ms = if total <= DB_EPS {
            BAND_RELEASE_TIMES_MS[1]
        } else {
            self.band_env
                .iter()
                .zip(BAND_RELEASE_TIMES_MS)
                .map(|(e, r)| e / total * r)
                .sum()
        };
        self.release_coeff = time_constant_coeff(release_ms, self.stage_rate);
    }

    #[inline]
    fn follow(gain: f32, target: f32, atk: f32, rel: f32) -> f32 {
        let c = if target < gain { atk } else { rel };
        c * gain + (1.0 - c) * target
    }

    #[inline]
    fn soft_ceiling(&self, x: f32, ceiling: f32) -> f32 {
        let level = x.abs();
        if level <= ceiling {
            return x;
        }
        let room = (ceiling * self.overshoot_room).max(DB_EPS);
        (ceiling + room * ((level - ceiling) / room).tanh()).copysign(x)
    }

    #[inline]
    pub fn process(&mut self, input: f32, ceiling: f32, modes: ProtectionModes) -> ProcessorOutput {
        let ceiling = ceiling.max(DB_EPS);
        let delayed = self.delay.push(input);

        if self.decimation_phase == 0 {
            self.update_bands(input);
        }
        self.decimation_phase = (self.decimation_phase + 1) % self.factor;

        let true_peak = if self.factor >= DIRECT_TRUE_PEAK_FACTOR {
            input.abs()
        } else {
            self.detector.process(input)
        };

        let tp_max = self.true_peak_window.push(true_peak);
        let sp_max = self.sample_peak_window.push(input.abs());

        let tp_target = if tp_max > ceiling { ceiling / tp_max } else { 1.0 };
        let os_target = if sp_max > ceiling { ceiling / sp_max } else { 1.0 };
        self.true_peak_gain =
            Self::follow(self.true_peak_gain, tp_target, self.true_peak_atk, self.release_coeff);
        self.overshoot_gain =
            Self::follow(self.overshoot_gain, os_target, self.overshoot_atk, self.release_coeff);

        if !modes.any() {
            return ProcessorOutput {
                sample: delayed,
                gain_reduction_db: 0.0,
            };
        }

        let gain = match (modes.overshoot, modes.true_peak) {
            (true, true) => self.true_peak_gain.min(self.overshoot_gain),
            (false, true) => self.true_peak_gain,
            _ => self.overshoot_gain,
        };
        let mut y = delayed * gain;
        if modes.overshoot {
            y = self.soft_ceiling(y, ceiling);
        }
        if modes.true_peak {
            y = y.clamp(-ceiling, ceiling);
        }

        ProcessorOutput {
            sample: y,
            gain_reduction_db: reduction_db(delayed, y),
        }
    }

    /// Smoothed band levels `[low, mid, high]`.
    pub fn band_levels(&self) -> [f32; 3] {
        self.band_env
    }

    /// Native-rate ceiling, applied after downsampling. Engaged modes only:
    /// overshoot gets the soft ceiling, true peak the hard clamp.
    #[inline]
    pub fn finish(&self, x: f32, ceiling: f32, modes: ProtectionModes) -> f32 {
        let ceiling = ceiling.max(DB_EPS);
        let mut y = x;
        if modes.overshoot {
            y = self.soft_ceiling(y, ceiling);
        }
        if modes.true_peak {
            y = y.clamp(-ceiling, ceiling);
        }
        y
    }

    pub fn reset(&mut self) {
        self.delay.clear();
        self.true_peak_window.clear();
        self.sample_peak_window.clear();
        self.detector.reset();
        self.splitter.reset();
        self.band_env = [0.0; 3];
        self.decimation_phase = 0;
        self.release_coeff = time_constant_coeff(BAND_RELEASE_TIMES_MS[1], self.stage_rate);
        self.true_peak_gain = 1.0;
        self.overshoot_gain = 1.0;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn limiter(factor: usize) -> ProtectionLimiter {
        let mut p = ProtectionLimiter::new(SR);
        p.allocate(SR, 72, 16);
        p.configure(factor);
        p
    }

    fn run_tone(p: &mut ProtectionLimiter, factor: usize, amp: f32, modes: ProtectionModes) -> f32 {
        let rate = SR * factor as f32;
        let n = (rate * 0.5) as usize;
        let mut peak = 0.0f32;
        for i in 0..n {
            let x = amp * (2.0 * std::f32::consts::PI * 997.0 * i as f32 / rate).sin();
            let y = p.process(x, 0.5, modes).sample;
            if i > n / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn test_sliding_max_window() {
        let mut m = SlidingMax::default();
        m.allocate(3);
        let out: Vec<f32> = [1.0, 3.0, 2.0, 0.0, 0.0, 0.0, 5.0]
            .iter()
            .map(|&v| m.push(v))
            .collect();
        assert_eq!(out, vec![1.0, 3.0, 3.0, 3.0, 2.0, 0.0, 5.0]);
    }

    #[test]
    fn test_disabled_is_pure_delay() {
        let mut p = limiter(1);
        let delay = ProtectionLimiter::latency_for(72);
        let input: Vec<f32> = (0..1000).map(|i| 2.0 * (i as f32 * 0.1).sin()).collect();
        let out: Vec<f32> = input
            .iter()
            .map(|&x| p.process(x, 0.5, ProtectionModes::default()).sample)
            .collect();
        for i in delay..1000 {
            assert_eq!(out[i], input[i - delay]);
        }
    }

    #[test]
    fn test_true_peak_holds_ceiling() {
        let modes = ProtectionModes {
            overshoot: false,
            true_peak: true,
        };
        for factor in [1, 8] {
            let mut p = limiter(factor);
            let peak = run_tone(&mut p, factor, 2.0, modes);
            assert!(peak <= 0.5 + 1e-6, "factor {factor}: {peak}");
            assert!(peak > 0.45, "factor {factor}: {peak}");
        }
    }

    #[test]
    fn test_overshoot_bounded_by_allowance() {
        let modes = ProtectionModes {
            overshoot: true,
            true_peak: false,
        };
        let mut p = limiter(1);
        let mut peak = 0.0f32;
        // bursts so the slow attack is caught out
        for i in 0..48_000 {
            let burst = if i % 4800 < 30 { 4.0 } else { 0.1 };
            let x = burst * (i as f32 * 0.3).sin();
            peak = peak.max(p.process(x, 0.5, modes).sample.abs());
        }
        assert!(peak <= 0.5 * db_to_lin(OVERSHOOT_ALLOWANCE_DB) + 1e-6);
        assert!(peak > 0.5);
    }

    #[test]
    fn test_bass_releases_slower_than_treble() {
        let mut low = limiter(1);
        let mut high = limiter(1);
        for i in 0..24_000 {
            let t = i as f32 / SR;
            low.process((2.0 * std::f32::consts::PI * 60.0 * t).sin(), 1.0, ProtectionModes::default());
            high.process((2.0 * std::f32::consts::PI * 9000.0 * t).sin(), 1.0, ProtectionModes::default());
        }
        assert!(low.release_coeff > high.release_coeff);
        let bands = low.band_levels();
        assert!(bands[0] > bands[2]);
    }

    #[test]
    fn test_finish_bounds_each_mode() {
        let p = limiter(1);
        let limit = 0.5 * db_to_lin(OVERSHOOT_ALLOWANCE_DB);
        let overshoot = ProtectionModes {
            overshoot: true,
            true_peak: false,
        };
        let true_peak = ProtectionModes {
            overshoot: false,
            true_peak: true,
        };
        assert_eq!(p.finish(0.3, 0.5, overshoot), 0.3);
        assert_eq!(p.finish(4.0, 0.5, ProtectionModes::default()), 4.0);
        for x in [0.6, 1.0, 8.0, -3.0] {
            let y = p.finish(x, 0.5, overshoot);
            assert!(y.abs() > 0.5 && y.abs() <= limit + 1e-6, "{x} -> {y}");
            assert_eq!(y.signum(), x.signum());
            assert_eq!(p.finish(x, 0.5, true_peak).abs(), 0.5);
        }
    }
}
