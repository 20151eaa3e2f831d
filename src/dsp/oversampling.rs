//! Oversampling Manager
//!
//! Cascaded polyphase half-band interpolators/decimators. Three complete
//! chains are resident at all times (1×, 8×, 16×) so a mode switch is an
//! index change plus a state clear, never an allocation.
//!
//! # Design Notes
//! - Stage kernels are Kaiser-windowed half-band designs (every other tap is
//!   zero, centre tap is 0.5). They depend only on the stage, not on the
//!   sample rate, so they are designed once per process and shared.
//! - An interpolator stage emits two outputs per input: one phase is a pure
//!   delay, the other a short FIR. A decimator stage only convolves on even
//!   samples and skips zero taps.
//! - A stage whose kernel is centred on tap `c` adds `c` samples of latency at
//!   its lower rate for the up/down round trip. Centres are chosen so every
//!   mode's latency is a whole number of native samples:
//!   1× = 0, 8× = 31 + 10/2 + 8/4 = 38, 16× = 38 + 8/8 = 39.
//!
//! # Lifecycle
//! - `prepare`: allocates per-channel filter state for all chains and the
//!   shared stage buffers sized for the largest block at 16×.
//! - `set_mode`: audio-thread only; clears the newly selected chain.
//! - `upsample` / `downsample`: per channel, per block.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::dsp::utils::kaiser;

// =============================================================================
// Constants
// =============================================================================

/// Kernel centre per cascade stage (stage 0 runs at the native rate).
const STAGE_CENTERS: [usize; MAX_STAGES] = [31, 10, 8, 8];

/// Kaiser beta for all stages (~90 dB stopband).
const KAISER_BETA: f64 = 9.0;

/// Deepest cascade (16×).
pub const MAX_STAGES: usize = 4;

/// Largest oversampling factor.
pub const MAX_FACTOR: usize = 1 << MAX_STAGES;

static KERNELS: Lazy<[HalfBandKernel; MAX_STAGES]> =
    Lazy::new(|| STAGE_CENTERS.map(HalfBandKernel::design));

// =============================================================================
// Mode
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversamplingMode {
    /// No oversampling (copy passthrough).
    Off,
    #[default]
    X8,
    X16,
}

impl OversamplingMode {
    pub const ALL: [Self; 3] = [Self::Off, Self::X8, Self::X16];

    /// Maps a control index (0, 1, 2) to a mode. Anything else is rejected.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Off),
            1 => Some(Self::X8),
            2 => Some(Self::X16),
            _ => None,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::X8 => 1,
            Self::X16 => 2,
        }
    }

    /// Number of half-band stages in the cascade.
    pub fn stages(self) -> usize {
        match self {
            Self::Off => 0,
            Self::X8 => 3,
            Self::X16 => 4,
        }
    }

    pub fn factor(self) -> usize {
        1 << self.stages()
    }
}

// =============================================================================
// Half-band kernel
// =============================================================================

struct HalfBandKernel {
    center: usize,
    /// Non-zero taps `(k, h[k])`.
    taps: Vec<(usize, f32)>,
    /// Interpolator taps per output phase: `(input age, 2*h[k])`.
    phases: [Vec<(usize, f32)>; 2],
}

impl HalfBandKernel {
    fn design(center: usize) -> Self {
        let len = 2 * center + 1;
        let mut h = vec![0.0f64; len];
        h[center] = 0.5;

        let half_width = (center + 1) as f64;
        let mut odd_sum = 0.0;
        for j in (1..=center).step_by(2) {
            let x = std::f64::consts::PI * j as f64;
            let v = (x * 0.5).sin() / x * kaiser(j as f64, half_width, KAISER_BETA);
            h[center + j] = v;
            h[center - j] = v;
            odd_sum += 2.0 * v;
        }
        // Unity DC gain for each polyphase branch.
        if odd_sum.abs() > 1e-12 {
            let scale = 0.5 / odd_sum;
            for j in (1..=center).step_by(2) {
                h[center + j] *= scale;
                h[center - j] *= scale;
            }
        }

        let taps: Vec<(usize, f32)> = h
            .iter()
            .enumerate()
            .filter(|(_, v)| v.abs() > 0.0)
            .map(|(k, v)| (k, *v as f32))
            .collect();

        let mut phases: [Vec<(usize, f32)>; 2] = [Vec::new(), Vec::new()];
        for &(k, v) in &taps {
            let p = k % 2;
            phases[p].push(((k - p) / 2, 2.0 * v));
        }

        Self {
            center,
            taps,
            phases,
        }
    }

    /// Interpolator history length (input samples).
    fn up_history(&self) -> usize {
        self.center + 1
    }

    /// Decimator history length (high-rate samples).
    fn down_history(&self) -> usize {
        2 * self.center + 1
    }
}

// =============================================================================
// Stage state
// =============================================================================

#[derive(Default)]
struct History {
    buf: Vec<f32>,
    head: usize,
}

impl History {
    fn with_len(len: usize) -> Self {
        Self {
            buf: vec![0.0; len.max(1)],
            head: 0,
        }
    }

    #[inline]
    fn push(&mut self, x: f32) {
        self.head = (self.head + 1) % self.buf.len();
        self.buf[self.head] = x;
    }

    #[inline]
    fn at(&self, age: usize) -> f32 {
        let len = self.buf.len();
        self.buf[(self.head + len - age) % len]
    }

    fn clear(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
    }
}

struct Interpolator {
    hist: History,
}

impl Interpolator {
    fn process_block(&mut self, kernel: &HalfBandKernel, input: &[f32], output: &mut [f32]) {
        for (&x, out) in input.iter().zip(output.chunks_exact_mut(2)) {
            self.hist.push(x);
            for (phase, slot) in kernel.phases.iter().zip(out.iter_mut()) {
                *slot = phase
                    .iter()
                    .map(|&(age, c)| c * self.hist.at(age))
                    .sum();
            }
        }
    }
}

struct Decimator {
    hist: History,
}

impl Decimator {
    fn process_block(&mut self, kernel: &HalfBandKernel, input: &[f32], output: &mut [f32]) {
        for (pair, out) in input.chunks_exact(2).zip(output.iter_mut()) {
            self.hist.push(pair[0]);
            *out = kernel
                .taps
                .iter()
                .map(|&(k, c)| c * self.hist.at(k))
                .sum();
            self.hist.push(pair[1]);
        }
    }
}

/// One channel's filter state for one mode.
struct ChannelChain {
    up: Vec<Interpolator>,
    down: Vec<Decimator>,
}

impl ChannelChain {
    fn new(stages: usize) -> Self {
        let kernels = &*KERNELS;
        Self {
            up: kernels[..stages]
                .iter()
                .map(|k| Interpolator {
                    hist: History::with_len(k.up_history()),
                })
                .collect(),
            down: kernels[..stages]
                .iter()
                .map(|k| Decimator {
                    hist: History::with_len(k.down_history()),
                })
                .collect(),
        }
    }

    fn reset(&mut self) {
        self.up.iter_mut().for_each(|s| s.hist.clear());
        self.down.iter_mut().for_each(|s| s.hist.clear());
    }
}

/// Native-rate round-trip latency of the first `stages` cascade stages.
///
/// Works inside-out: each stage adds its centre at its own lower rate plus
/// half of whatever the inner stages add at the higher rate.
fn cascade_latency(stages: usize) -> usize {
    let mut inner = 0usize;
    for &center in STAGE_CENTERS[..stages].iter().rev() {
        debug_assert!(inner % 2 == 0, "inner cascade latency must be even");
        inner = center + inner / 2;
    }
    inner
}

// =============================================================================
// Manager
// =============================================================================

pub struct Oversampler {
    mode: OversamplingMode,
    max_block: usize,
    /// Per mode, per channel.
    chains: [Vec<ChannelChain>; 3],
    /// `stage_buffers[i]` holds the signal at `2^(i+1)` times the native rate.
    stage_buffers: Vec<Vec<f32>>,
    passthrough: Vec<f32>,
    latencies: [usize; 3],
}

impl Default for Oversampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Oversampler {
    pub fn new() -> Self {
        Self {
            mode: OversamplingMode::Off,
            max_block: 0,
            chains: [Vec::new(), Vec::new(), Vec::new()],
            stage_buffers: Vec::new(),
            passthrough: Vec::new(),
            latencies: OversamplingMode::ALL.map(|m| cascade_latency(m.stages())),
        }
    }

    /// Allocates every chain for `channels` channels and blocks of up to
    /// `max_block` native samples. The sample rate does not affect the
    /// half-band designs.
    pub fn prepare(&mut self, max_block: usize, channels: usize, initial: OversamplingMode) {
        Lazy::force(&KERNELS);
        self.max_block = max_block;
        for mode in OversamplingMode::ALL {
            self.chains[mode.index() as usize] =
                (0..channels).map(|_| ChannelChain::new(mode.stages())).collect();
        }
        self.stage_buffers = (1..=MAX_STAGES)
            .map(|s| vec![0.0; max_block << s])
            .collect();
        self.passthrough = vec![0.0; max_block];
        self.mode = initial;
    }

    pub fn mode(&self) -> OversamplingMode {
        self.mode
    }

    pub fn factor(&self) -> usize {
        self.mode.factor()
    }

    /// Selects the active chain. Clears the newly selected chain so stale
    /// history from an earlier activation is not replayed.
    pub fn set_mode(&mut self, mode: OversamplingMode) {
        if mode == self.mode {
            return;
        }
        for chain in self.chains[mode.index() as usize].iter_mut() {
            chain.reset();
        }
        self.mode = mode;
    }

    /// Latency of the active mode in native samples.
    pub fn latency_samples(&self) -> usize {
        self.latency_for(self.mode)
    }

    pub fn latency_for(&self, mode: OversamplingMode) -> usize {
        self.latencies[mode.index() as usize]
    }

    /// Largest latency over all modes.
    pub fn max_latency_samples(&self) -> usize {
        self.latencies.iter().copied().max().unwrap_or(0)
    }

    /// Upsamples one channel's block and returns the oversampled signal,
    /// `input.len() * factor` samples long, for in-place processing.
    pub fn upsample(&mut self, channel: usize, input: &[f32]) -> &mut [f32] {
        let n = input.len().min(self.max_block);
        let stages = self.mode.stages();
        if stages == 0 {
            self.passthrough[..n].copy_from_slice(&input[..n]);
            return &mut self.passthrough[..n];
        }

        let Some(chain) = self.chains[self.mode.index() as usize].get_mut(channel) else {
            debug_assert!(false, "channel {channel} was not prepared");
            return &mut self.passthrough[..0];
        };
        let kernels = &*KERNELS;

        chain.up[0].process_block(&kernels[0], &input[..n], &mut self.stage_buffers[0][..n << 1]);
        for s in 1..stages {
            let (lower, upper) = self.stage_buffers.split_at_mut(s);
            chain.up[s].process_block(
                &kernels[s],
                &lower[s - 1][..n << s],
                &mut upper[0][..n << (s + 1)],
            );
        }
        &mut self.stage_buffers[stages - 1][..n << stages]
    }

    /// Decimates the block produced by the last [`Oversampler::upsample`]
    /// call back into `output` (native rate).
    pub fn downsample(&mut self, channel: usize, output: &mut [f32]) {
        let n = output.len().min(self.max_block);
        let stages = self.mode.stages();
        if stages == 0 {
            output[..n].copy_from_slice(&self.passthrough[..n]);
            return;
        }

        let Some(chain) = self.chains[self.mode.index() as usize].get_mut(channel) else {
            debug_assert!(false, "channel {channel} was not prepared");
            return;
        };
        let kernels = &*KERNELS;

        for s in (1..stages).rev() {
            let (lower, upper) = self.stage_buffers.split_at_mut(s);
            chain.down[s].process_block(
                &kernels[s],
                &upper[0][..n << (s + 1)],
                &mut lower[s - 1][..n << s],
            );
        }
        chain.down[0].process_block(&kernels[0], &self.stage_buffers[0][..n << 1], &mut output[..n]);
    }

    /// Clears the filter state of every chain.
    pub fn reset(&mut self) {
        for chains in self.chains.iter_mut() {
            chains.iter_mut().for_each(ChannelChain::reset);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(os: &mut Oversampler, input: &[f32], block: usize) -> Vec<f32> {
        let mut out = vec![0.0; input.len()];
        for (src, dst) in input.chunks(block).zip(out.chunks_mut(block)) {
            os.upsample(0, src);
            os.downsample(0, dst);
        }
        out
    }

    #[test]
    fn test_mode_latencies_are_whole_samples() {
        let os = Oversampler::new();
        assert_eq!(os.latency_for(OversamplingMode::Off), 0);
        assert_eq!(os.latency_for(OversamplingMode::X8), 38);
        assert_eq!(os.latency_for(OversamplingMode::X16), 39);
        assert_eq!(os.max_latency_samples(), 39);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        assert_eq!(OversamplingMode::from_index(1), Some(OversamplingMode::X8));
        assert_eq!(OversamplingMode::from_index(3), None);
    }

    #[test]
    fn test_kernel_branches_have_unity_gain() {
        for kernel in KERNELS.iter() {
            for phase in &kernel.phases {
                let sum: f32 = phase.iter().map(|&(_, c)| c).sum();
                assert!((sum - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_off_is_exact_passthrough() {
        let mut os = Oversampler::new();
        os.prepare(64, 1, OversamplingMode::Off);
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.3).sin()).collect();
        assert_eq!(round_trip(&mut os, &input, 64), input);
    }

    #[test]
    fn test_impulse_round_trip_lands_on_reported_latency() {
        for mode in [OversamplingMode::X8, OversamplingMode::X16] {
            let mut os = Oversampler::new();
            os.prepare(32, 1, mode);
            let mut input = vec![0.0; 128];
            input[0] = 1.0;
            let out = round_trip(&mut os, &input, 32);
            let (peak_idx, peak) = out
                .iter()
                .enumerate()
                .fold((0, 0.0f32), |acc, (i, &v)| if v.abs() > acc.1 { (i, v.abs()) } else { acc });
            assert_eq!(peak_idx, os.latency_samples(), "{mode:?}");
            assert!(peak > 0.8);
        }
    }

    #[test]
    fn test_sine_round_trip_is_clean() {
        let sr = 48_000.0;
        for mode in [OversamplingMode::X8, OversamplingMode::X16] {
            let mut os = Oversampler::new();
            os.prepare(128, 1, mode);
            let input: Vec<f32> = (0..4096)
                .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / sr).sin())
                .collect();
            let out = round_trip(&mut os, &input, 128);
            let lat = os.latency_samples();
            let max_err = (1024..4096)
                .map(|i| (out[i] - input[i - lat]).abs())
                .fold(0.0f32, f32::max);
            assert!(max_err < 1e-3, "{mode:?}: {max_err}");
        }
    }

    #[test]
    fn test_upsampled_signal_interpolates_sine() {
        let sr = 48_000.0;
        let f = 1000.0;
        let mut os = Oversampler::new();
        os.prepare(512, 1, OversamplingMode::X8);
        let input: Vec<f32> = (0..512)
            .map(|i| (2.0 * std::f32::consts::PI * f * i as f32 / sr).sin())
            .collect();
        let up = os.upsample(0, &input).to_vec();
        assert_eq!(up.len(), 512 * 8);
        // upsampling alone delays by half the round trip: 31/2 + 10/4 + 8/8
        let delay = 19.0;
        for (m, &u) in up.iter().enumerate().skip(8 * 128) {
            let t = m as f32 / 8.0 - delay;
            let expected = (2.0 * std::f32::consts::PI * f * t / sr).sin();
            assert!((u - expected).abs() < 2e-3, "m = {m}");
        }
    }

    #[test]
    fn test_set_mode_switches_factor() {
        let mut os = Oversampler::new();
        os.prepare(16, 2, OversamplingMode::Off);
        assert_eq!(os.upsample(1, &[0.0; 16]).len(), 16);
        os.set_mode(OversamplingMode::X16);
        assert_eq!(os.factor(), 16);
        assert_eq!(os.upsample(1, &[0.0; 16]).len(), 256);
    }
}
