//! 4× polyphase true-peak detector
//!
//! Estimates inter-sample peaks of a native-rate signal by interpolating
//! three extra points between samples. The kernel is a 49-tap
//! Kaiser-windowed sinc at the 4× rate centred on tap 24, so phase 0 is the
//! input delayed by exactly [`TRUE_PEAK_DETECT_DELAY`] samples and every
//! reading describes the signal that many samples ago.

use once_cell::sync::Lazy;

use crate::dsp::utils::kaiser;

const PHASES: usize = 4;
/// History length per phase (taps / phases, rounded up).
const TAPS_PER_PHASE: usize = 13;
const CENTER: usize = 24;
const KAISER_BETA: f64 = 6.0;

/// Delay (native samples) between an input and the peak reading describing it.
pub const TRUE_PEAK_DETECT_DELAY: usize = CENTER / PHASES;

/// `KERNEL[p][k]` weights the input `k` samples old for phase `p`.
static KERNEL: Lazy<[[f32; TAPS_PER_PHASE]; PHASES]> = Lazy::new(|| {
    let mut kernel = [[0.0f32; TAPS_PER_PHASE]; PHASES];
    for (p, phase) in kernel.iter_mut().enumerate() {
        let mut taps = [0.0f64; TAPS_PER_PHASE];
        for (k, tap) in taps.iter_mut().enumerate() {
            let j = PHASES * k + p;
            if j > 2 * CENTER {
                continue;
            }
            let offset = j as f64 - CENTER as f64;
            let x = std::f64::consts::PI * offset / PHASES as f64;
            let sinc = if offset == 0.0 { 1.0 } else { x.sin() / x };
            *tap = sinc * kaiser(offset, (CENTER + 1) as f64, KAISER_BETA);
        }
        let sum: f64 = taps.iter().sum();
        for (dst, src) in phase.iter_mut().zip(taps) {
            *dst = (src / sum) as f32;
        }
    }
    kernel
});

#[derive(Debug, Clone, Default)]
pub struct TruePeakDetector {
    hist: [f32; TAPS_PER_PHASE],
    head: usize,
}

impl TruePeakDetector {
    pub fn new() -> Self {
        Lazy::force(&KERNEL);
        Self::default()
    }

    /// Pushes one sample, returns the largest magnitude among the four
    /// interpolated points `TRUE_PEAK_DETECT_DELAY` samples back.
    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.head = (self.head + 1) % TAPS_PER_PHASE;
        self.hist[self.head] = input;

        let mut peak = 0.0f32;
        for phase in KERNEL.iter() {
            let mut acc = 0.0f32;
            for (k, &c) in phase.iter().enumerate() {
                acc += c * self.hist[(self.head + TAPS_PER_PHASE - k) % TAPS_PER_PHASE];
            }
            peak = peak.max(acc.abs());
        }
        peak
    }

    pub fn reset(&mut self) {
        self.hist = [0.0; TAPS_PER_PHASE];
    }
}
