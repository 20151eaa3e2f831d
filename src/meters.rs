//! Thread-safe metering for real-time audio processing.
//!
//! Atomic float storage lets the audio thread publish levels and gain
//! reduction that a control or UI thread reads without locks. Levels are
//! linear peaks for the last processed block; reductions are positive dB.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::dsp::oversampling::OversamplingMode;
use crate::dsp::ProcessorKind;

/// Channels with their own level meters. Extra channels are processed but
/// not metered.
pub const MAX_METER_CHANNELS: usize = 8;

#[derive(Default)]
struct MeterValue(AtomicU32);

impl MeterValue {
    fn set(&self, val: f32) {
        self.0.store(val.to_bits(), Ordering::Relaxed);
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct Meters {
    input_peak: [MeterValue; MAX_METER_CHANNELS],
    output_peak: [MeterValue; MAX_METER_CHANNELS],
    output_true_peak: [MeterValue; MAX_METER_CHANNELS],
    processor_gain_reduction: [MeterValue; 4],
    protection_gain_reduction: MeterValue,
    latency_samples: AtomicU32,
    oversampling: AtomicU32,
}

impl Meters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_peak(&self, channel: usize, val: f32) {
        if let Some(m) = self.input_peak.get(channel) {
            m.set(val);
        }
    }

    pub fn set_output_peak(&self, channel: usize, val: f32) {
        if let Some(m) = self.output_peak.get(channel) {
            m.set(val);
        }
    }

    pub fn set_output_true_peak(&self, channel: usize, val: f32) {
        if let Some(m) = self.output_true_peak.get(channel) {
            m.set(val);
        }
    }

    pub fn set_gain_reduction(&self, kind: ProcessorKind, db: f32) {
        self.processor_gain_reduction[kind.index()].set(db);
    }

    pub fn set_protection_gain_reduction(&self, db: f32) {
        self.protection_gain_reduction.set(db);
    }

    pub fn set_latency_samples(&self, samples: usize) {
        self.latency_samples
            .store(samples.min(u32::MAX as usize) as u32, Ordering::Relaxed);
    }

    pub fn set_oversampling(&self, mode: OversamplingMode) {
        self.oversampling.store(mode.index(), Ordering::Relaxed);
    }

    pub fn get_input_peak(&self, channel: usize) -> f32 {
        self.input_peak.get(channel).map_or(0.0, MeterValue::get)
    }

    pub fn get_output_peak(&self, channel: usize) -> f32 {
        self.output_peak.get(channel).map_or(0.0, MeterValue::get)
    }

    /// Inter-sample peak of the output, linear.
    pub fn get_output_true_peak(&self, channel: usize) -> f32 {
        self.output_true_peak.get(channel).map_or(0.0, MeterValue::get)
    }

    pub fn get_gain_reduction(&self, kind: ProcessorKind) -> f32 {
        self.processor_gain_reduction[kind.index()].get()
    }

    pub fn get_protection_gain_reduction(&self) -> f32 {
        self.protection_gain_reduction.get()
    }

    /// Latency the host should compensate, in native samples.
    pub fn get_latency_samples(&self) -> usize {
        self.latency_samples.load(Ordering::Relaxed) as usize
    }

    pub fn get_oversampling(&self) -> OversamplingMode {
        OversamplingMode::from_index(self.oversampling.load(Ordering::Relaxed)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_channel_is_ignored() {
        let m = Meters::new();
        m.set_input_peak(MAX_METER_CHANNELS, 1.0);
        m.set_input_peak(1, 0.5);
        assert_eq!(m.get_input_peak(MAX_METER_CHANNELS), 0.0);
        assert_eq!(m.get_input_peak(1), 0.5);
    }

    #[test]
    fn test_mode_round_trips() {
        let m = Meters::new();
        m.set_oversampling(OversamplingMode::X16);
        assert_eq!(m.get_oversampling(), OversamplingMode::X16);
    }
}
