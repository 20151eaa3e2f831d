pub mod asymmetry;
pub mod biquad;
pub mod blend;
pub mod control_slew;
pub mod delay;
pub mod envelope;
pub mod fast_limit;
pub mod hard_clip;
pub mod oversampling;
pub mod protection;
pub mod slow_limit;
pub mod soft_clip;
pub mod transient;
pub mod true_peak;
pub mod utils;

pub use asymmetry::AsymmetryRestorer;
pub use blend::{BlendFrame, LayerSwitches, ProcessorKind};
pub use delay::DelayLine;
pub use fast_limit::FastLimit;
pub use hard_clip::HardClip;
pub use oversampling::{OversamplingMode, Oversampler};
pub use protection::{ProtectionLimiter, ProtectionModes};
pub use slow_limit::SlowLimit;
pub use soft_clip::SoftClip;
pub use transient::TransientShaper;
pub use true_peak::TruePeakDetector;

/// What every dynamics stage emits per sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessorOutput {
    pub sample: f32,
    /// Positive dB, 0 when the stage left the level alone.
    pub gain_reduction_db: f32,
}

/// All per-channel DSP state. Buffers are sized in [`ChannelState::allocate`];
/// [`ChannelState::configure`] switches processing rate without allocating.
pub struct ChannelState {
    pub asymmetry: AsymmetryRestorer,
    pub transient: TransientShaper,
    pub hard_clip: HardClip,
    pub soft_clip: SoftClip,
    pub slow_limit: SlowLimit,
    pub fast_limit: FastLimit,
    /// Unprocessed oversampled signal, delayed like the processors' lookahead.
    pub raw_lookahead: DelayLine,
    pub protection: ProtectionLimiter,
    /// Pads the active oversampling latency up to the maximum.
    pub compensation: DelayLine,
    pub dry_delay: DelayLine,
    pub output_true_peak: TruePeakDetector,
}

impl ChannelState {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            asymmetry: AsymmetryRestorer::new(sample_rate),
            transient: TransientShaper::new(sample_rate),
            hard_clip: HardClip::new(),
            soft_clip: SoftClip::new(),
            slow_limit: SlowLimit::new(sample_rate),
            fast_limit: FastLimit::new(sample_rate),
            raw_lookahead: DelayLine::default(),
            protection: ProtectionLimiter::new(sample_rate),
            compensation: DelayLine::default(),
            dry_delay: DelayLine::default(),
            output_true_peak: TruePeakDetector::new(),
        }
    }

    /// Sizes every buffer. `lookahead` and `protection_lookahead` are in
    /// native samples; `total_latency` is the dry-path delay.
    pub fn allocate(
        &mut self,
        sample_rate: f32,
        lookahead: usize,
        protection_lookahead: usize,
        max_compensation: usize,
        total_latency: usize,
    ) {
        let max_lookahead = lookahead.max(1) * oversampling::MAX_FACTOR;
        self.hard_clip.allocate(max_lookahead);
        self.soft_clip.allocate(max_lookahead);
        self.slow_limit.allocate(max_lookahead);
        self.fast_limit.allocate(max_lookahead);
        self.raw_lookahead.allocate(max_lookahead);
        self.protection
            .allocate(sample_rate, protection_lookahead, oversampling::MAX_FACTOR);
        self.compensation.allocate(max_compensation);
        self.dry_delay.allocate(total_latency);
        self.dry_delay.set_delay(total_latency);
        self.asymmetry.prepare(sample_rate);
        self.transient.prepare(sample_rate);
    }

    /// Adopts an oversampling factor and clears the rate-dependent state,
    /// compensation delay included. The dry delay keeps running.
    pub fn configure(&mut self, sample_rate: f32, factor: usize, lookahead: usize, compensation: usize) {
        let stage_rate = sample_rate * factor as f32;
        let stage_lookahead = lookahead.max(1) * factor;
        self.hard_clip.configure(stage_rate, stage_lookahead);
        self.soft_clip.configure(stage_lookahead);
        self.slow_limit.configure(stage_rate, stage_lookahead);
        self.fast_limit.configure(stage_rate, stage_lookahead);
        self.raw_lookahead.set_delay(stage_lookahead);
        self.raw_lookahead.clear();
        self.protection.configure(factor);
        self.compensation.set_delay(compensation);
        self.compensation.clear();
    }

    /// Clears everything, including native-rate state.
    pub fn reset(&mut self) {
        self.asymmetry.reset();
        self.transient.reset();
        self.hard_clip.reset();
        self.soft_clip.reset();
        self.slow_limit.reset();
        self.fast_limit.reset();
        self.raw_lookahead.clear();
        self.protection.reset();
        self.compensation.clear();
        self.dry_delay.clear();
        self.output_true_peak.reset();
    }
}
