//! Block processing engine.
//!
//! # Purpose
//! Runs the full chain once per host block:
//!
//! ```text
//! input gain -> asymmetry -> transient shaper -> upsample
//!   -> [hard clip | soft clip | slow limit | fast limit] -> pad blend
//!   -> protection -> downsample -> native ceiling -> compensation delay
//!   -> output gain -> dry/wet mix -> bypass -> meters + telemetry
//! ```
//!
//! # Latency
//! Reported latency is pinned at `prepare`: processor lookahead, protection
//! lookahead plus the true-peak detector delay, and the largest oversampling
//! latency over all modes. Modes with a shorter filter latency are padded by
//! a compensation delay after downsampling, so switching modes never changes
//! what the host compensates. The dry path is delayed by the same total.
//!
//! # Real-time contract
//! `process` does not allocate, lock or log. Contract violations are reported
//! through the event queue; in debug builds they also assert unless
//! [`Engine::set_contract_asserts`] turned that off.

use std::sync::Arc;

use anyhow::ensure;

use crate::config::EngineConfig;
use crate::controls::{Control, ControlCurves};
use crate::dsp::blend::BlendFrame;
use crate::dsp::oversampling::{OversamplingMode, Oversampler};
use crate::dsp::protection::ProtectionLimiter;
use crate::dsp::utils::{ms_to_samples, reduction_db};
use crate::dsp::{ChannelState, ProcessorKind};
use crate::events::{event_queue, ContractViolation, EngineEvent, EventDrain, EventQueue, DEFAULT_EVENT_CAPACITY};
use crate::meters::Meters;
use crate::params::EngineParams;
use crate::telemetry::{Telemetry, TelemetryReader, TelemetryRecord};

pub struct Engine {
    config: EngineConfig,
    params: Arc<EngineParams>,
    meters: Arc<Meters>,
    telemetry: Arc<Telemetry>,
    events: EventQueue,
    drain: Option<EventDrain>,

    curves: ControlCurves,
    oversampler: Oversampler,
    channels: Vec<ChannelState>,
    /// Native-rate working buffer for one channel.
    native: Vec<f32>,
    records: Vec<TelemetryRecord>,

    sample_rate: f32,
    max_block: usize,
    prepared: bool,
    lookahead: usize,
    protection_lookahead: usize,
    latency: usize,
    contract_asserts: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let config = config.validated()?;
        let (events, drain) = event_queue(DEFAULT_EVENT_CAPACITY);
        Ok(Self {
            params: Arc::new(EngineParams::new(config.initial_oversampling)),
            meters: Arc::new(Meters::new()),
            telemetry: Arc::new(Telemetry::new(config.telemetry_capacity)),
            events,
            drain: Some(drain),
            curves: ControlCurves::new(config.smoothing_ms),
            oversampler: Oversampler::new(),
            channels: Vec::new(),
            native: Vec::new(),
            records: Vec::new(),
            sample_rate: 0.0,
            max_block: 0,
            prepared: false,
            lookahead: 1,
            protection_lookahead: 1,
            latency: 0,
            contract_asserts: cfg!(debug_assertions),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn params(&self) -> Arc<EngineParams> {
        self.params.clone()
    }

    pub fn meters(&self) -> Arc<Meters> {
        self.meters.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Reader sized by the configured segment count.
    pub fn telemetry_reader(&self) -> TelemetryReader {
        TelemetryReader::new(self.telemetry.clone(), self.config.telemetry_segments)
    }

    /// Hands out the consumer side of the event queue (once).
    pub fn take_event_drain(&mut self) -> Option<EventDrain> {
        self.drain.take()
    }

    /// Total latency in native samples. Constant between `prepare` calls.
    pub fn latency_samples(&self) -> usize {
        self.latency
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Whether contract violations assert in debug builds (on by default).
    /// With asserts off the release fallbacks run in every build. Release
    /// builds never assert.
    pub fn set_contract_asserts(&mut self, enabled: bool) {
        self.contract_asserts = enabled;
    }

    /// Allocates everything for `channels` channels and blocks of up to
    /// `max_block` samples. Not real-time safe.
    pub fn prepare(&mut self, sample_rate: f32, max_block: usize, channels: usize) -> anyhow::Result<()> {
        ensure!(
            sample_rate.is_finite() && sample_rate > 0.0,
            "invalid sample rate {sample_rate}"
        );
        ensure!(max_block > 0, "max block size must be > 0");
        ensure!(channels > 0, "channel count must be > 0");

        self.sample_rate = sample_rate;
        self.max_block = max_block;
        self.lookahead = ms_to_samples(self.config.lookahead_ms, sample_rate).max(1);
        self.protection_lookahead =
            ms_to_samples(self.config.protection_lookahead_ms, sample_rate).max(1);

        let mode = self.params.oversampling_mode();
        self.oversampler.prepare(max_block, channels, mode);
        let max_os = self.oversampler.max_latency_samples();
        self.latency =
            self.lookahead + ProtectionLimiter::latency_for(self.protection_lookahead) + max_os;

        let compensation = max_os - self.oversampler.latency_samples();
        self.channels = (0..channels)
            .map(|_| {
                let mut state = ChannelState::new(sample_rate);
                state.allocate(
                    sample_rate,
                    self.lookahead,
                    self.protection_lookahead,
                    max_os,
                    self.latency,
                );
                state.configure(sample_rate, mode.factor(), self.lookahead, compensation);
                state
            })
            .collect();

        self.native = vec![0.0; max_block];
        self.records = vec![TelemetryRecord::default(); max_block];
        self.curves.allocate(max_block);
        self.curves.jump_to(&self.params.snapshot());
        self.telemetry.clear();

        self.meters.set_latency_samples(self.latency);
        self.meters.set_oversampling(mode);
        self.prepared = true;

        log::info!(
            "prepared: {sample_rate} Hz, block {max_block}, {channels} ch, mode {mode:?}, \
             latency {} (lookahead {}, protection {}, oversampling max {max_os})",
            self.latency,
            self.lookahead,
            self.protection_lookahead,
        );
        Ok(())
    }

    /// Clears all signal state (transport stop). Real-time safe.
    pub fn reset(&mut self) {
        let snapshot = self.params.snapshot();
        for state in self.channels.iter_mut() {
            state
                .transient
                .set_emphasis(snapshot.attack_db, snapshot.sustain_db);
            state.reset();
        }
        self.oversampler.reset();
        self.curves.jump_to(&snapshot);
        self.telemetry.clear();
        self.events.push(EngineEvent::Reset);
    }

    /// Processes channel buffers in place.
    pub fn process(&mut self, buffer: &mut [&mut [f32]]) {
        if !self.prepared {
            self.report_violation(ContractViolation::NotPrepared);
            return;
        }

        let prepared = self.channels.len();
        if buffer.len() > prepared {
            self.report_violation(ContractViolation::TooManyChannels {
                got: buffer.len(),
                prepared,
            });
        }
        let active = buffer.len().min(prepared);
        let buffer = &mut buffer[..active];
        let len = buffer.iter().map(|c| c.len()).min().unwrap_or(0);

        if len > self.max_block {
            self.report_violation(ContractViolation::OversizedBlock {
                got: len,
                prepared: self.max_block,
            });
        }

        let mut start = 0;
        while start < len {
            let end = (start + self.max_block).min(len);
            self.process_chunk(buffer, start, end);
            start = end;
        }
    }

    fn report_violation(&mut self, violation: ContractViolation) {
        self.events.push(EngineEvent::ContractViolation(violation));
        debug_assert!(!self.contract_asserts, "{violation}");
    }

    fn apply_oversampling(&mut self, mode: OversamplingMode) {
        let from = self.oversampler.mode();
        if mode == from {
            return;
        }
        self.oversampler.set_mode(mode);
        let compensation =
            self.oversampler.max_latency_samples() - self.oversampler.latency_samples();
        for state in self.channels.iter_mut() {
            state.configure(self.sample_rate, mode.factor(), self.lookahead, compensation);
        }
        self.meters.set_oversampling(mode);
        self.events
            .push(EngineEvent::OversamplingChanged { from, to: mode });
    }

    fn process_chunk(&mut self, buffer: &mut [&mut [f32]], start: usize, end: usize) {
        let n = end - start;
        let snapshot = self.params.snapshot();
        self.apply_oversampling(snapshot.oversampling);
        self.curves.render(self.sample_rate, &snapshot, n);

        let factor = self.oversampler.factor();
        let scale = 1.0 / buffer.len().max(1) as f32;
        let mut processor_gr = [0.0f32; 4];
        let mut protection_gr = 0.0f32;

        let Self {
            curves,
            oversampler,
            channels,
            native,
            records,
            meters,
            ..
        } = self;
        records[..n].fill(TelemetryRecord::default());

        for (ch, io) in buffer.iter_mut().enumerate() {
            let io = &mut io[start..end];
            let state = &mut channels[ch];
            let wet = &mut native[..n];

            // Native-rate front end
            let mut input_peak = 0.0f32;
            for (i, (w, &x)) in wet.iter_mut().zip(io.iter()).enumerate() {
                input_peak = input_peak.max(x.abs());
                *w = x * curves.get(Control::InputGain, i);
            }
            state.asymmetry.analyze_block(wet, snapshot.asymmetry);
            state
                .transient
                .set_emphasis(snapshot.attack_db, snapshot.sustain_db);
            for w in wet.iter_mut() {
                *w = state.transient.process(state.asymmetry.process(*w));
            }

            // Oversampled core
            let up = oversampler.upsample(ch, wet);
            let mut frame = BlendFrame::default();
            let mut threshold = 1.0;
            let mut knee = 0.5;
            let mut ceiling = 1.0;
            for (j, s) in up.iter_mut().enumerate() {
                let i = j / factor;
                let native_tick = j % factor == 0;
                if native_tick {
                    frame = curves.frame(i);
                    threshold = curves.get(Control::Threshold, i);
                    knee = curves.get(Control::Knee, i);
                    ceiling = curves.get(Control::Ceiling, i);
                }

                let x = *s;
                let outputs = [
                    state.hard_clip.process(x, threshold),
                    state.soft_clip.process(x, threshold, knee),
                    state.slow_limit.process(x, threshold),
                    state.fast_limit.process(x, threshold),
                ];
                let delayed = state.raw_lookahead.push(x);
                let samples = outputs.map(|o| o.sample);
                let reductions = outputs.map(|o| o.gain_reduction_db);
                let blended = frame.mix(&samples, delayed);
                let protected = state.protection.process(blended, ceiling, snapshot.protection);
                *s = protected.sample;

                for (max, gr) in processor_gr.iter_mut().zip(reductions) {
                    *max = max.max(gr);
                }
                protection_gr = protection_gr.max(protected.gain_reduction_db);

                if native_tick {
                    let record = TelemetryRecord {
                        input: delayed,
                        raw: samples,
                        output: 0.0,
                        gain_reduction_db: reductions,
                        bands: state.protection.band_levels(),
                    };
                    records[i].accumulate(&record, scale);
                }
            }
            oversampler.downsample(ch, wet);

            // Native-rate back end
            let mut output_peak = 0.0f32;
            let mut true_peak = 0.0f32;
            for (i, (y, &w)) in io.iter_mut().zip(wet.iter()).enumerate() {
                let dry = state.dry_delay.push(*y);
                let ceiling = curves.get(Control::Ceiling, i);
                let limited = state.protection.finish(w, ceiling, snapshot.protection);
                protection_gr = protection_gr.max(reduction_db(w, limited));
                let processed =
                    state.compensation.push(limited) * curves.get(Control::OutputGain, i);

                let mix = curves.get(Control::Mix, i);
                let mixed = if mix >= 1.0 {
                    processed
                } else if mix <= 0.0 {
                    dry
                } else {
                    dry + (processed - dry) * mix
                };

                let bypass = curves.get(Control::Bypass, i);
                let out = if bypass >= 1.0 {
                    dry
                } else if bypass <= 0.0 {
                    mixed
                } else {
                    mixed + (dry - mixed) * bypass
                };

                *y = out;
                output_peak = output_peak.max(out.abs());
                true_peak = true_peak.max(state.output_true_peak.process(out));
                records[i].output += out * scale;
            }

            meters.set_input_peak(ch, input_peak);
            meters.set_output_peak(ch, output_peak);
            meters.set_output_true_peak(ch, true_peak);
        }

        for kind in ProcessorKind::ALL {
            meters.set_gain_reduction(kind, processor_gr[kind.index()]);
        }
        meters.set_protection_gain_reduction(protection_gr);
        self.telemetry.write(&self.records[..n]);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn engine(mode: OversamplingMode) -> Engine {
        let mut e = Engine::new(EngineConfig::default()).unwrap();
        e.params().set_oversampling_mode(mode);
        e.prepare(SR, 256, 2).unwrap();
        e
    }

    #[test]
    fn test_latency_sums_all_stages() {
        let e = engine(OversamplingMode::Off);
        // 1 ms + (1.5 ms + detector) + 16x filters
        assert_eq!(e.latency_samples(), 48 + 72 + 6 + 39);
        assert_eq!(e.meters().get_latency_samples(), e.latency_samples());
    }

    #[test]
    fn test_prepare_rejects_bad_format() {
        let mut e = Engine::new(EngineConfig::default()).unwrap();
        assert!(e.prepare(0.0, 256, 2).is_err());
        assert!(e.prepare(SR, 0, 2).is_err());
        assert!(!e.is_prepared());
    }

    #[test]
    fn test_mode_switch_is_reported() {
        let mut e = engine(OversamplingMode::Off);
        let mut drain = e.take_event_drain().unwrap();
        assert!(e.take_event_drain().is_none());

        let mut l = vec![0.0f32; 256];
        let mut r = vec![0.0f32; 256];
        e.params().set_oversampling_index(2);
        e.process(&mut [l.as_mut_slice(), r.as_mut_slice()]);
        assert_eq!(
            drain.pop(),
            Some(EngineEvent::OversamplingChanged {
                from: OversamplingMode::Off,
                to: OversamplingMode::X16,
            })
        );
        assert_eq!(e.meters().get_oversampling(), OversamplingMode::X16);
    }

    #[test]
    fn test_silence_stays_silent() {
        for mode in OversamplingMode::ALL {
            let mut e = engine(mode);
            let mut l = vec![0.0f32; 256];
            let mut r = vec![0.0f32; 256];
            for _ in 0..8 {
                e.process(&mut [l.as_mut_slice(), r.as_mut_slice()]);
            }
            assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0), "{mode:?}");
        }
    }
}
