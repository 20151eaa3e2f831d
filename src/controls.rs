//! Per-sample control curves.
//!
//! Every continuous control runs through a linear [`Smoother`] so host
//! automation and mute/solo toggles fade instead of stepping. Once per block
//! the smoothers render their ramps into curves that every channel reads, so
//! all channels see identical control values.
//!
//! Gains, thresholds and the ceiling are smoothed in the linear domain. A
//! smoother that has arrived holds its target exactly, so unity gain stays
//! bit-transparent.

use nih_plug::prelude::{Smoother, SmoothingStyle};

use crate::dsp::blend::BlendFrame;
use crate::dsp::utils::db_to_lin;
use crate::params::ParamSnapshot;

/// Scalar controls, in curve order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    InputGain,
    OutputGain,
    Mix,
    Bypass,
    Threshold,
    Knee,
    PadX,
    PadY,
    Ceiling,
    Passthrough,
    SoloMix,
}

const SCALAR_COUNT: usize = 11;
const TRIM_BASE: usize = SCALAR_COUNT;
const GATE_BASE: usize = TRIM_BASE + 4;
const SHARE_BASE: usize = GATE_BASE + 4;
const CONTROL_COUNT: usize = SHARE_BASE + 4;

struct SmoothedValue {
    smoother: Smoother<f32>,
    target: f32,
}

impl SmoothedValue {
    fn new(ms: f32) -> Self {
        Self {
            smoother: Smoother::new(SmoothingStyle::Linear(ms)),
            target: 0.0,
        }
    }

    fn jump(&mut self, value: f32) {
        self.smoother.reset(value);
        self.target = value;
    }

    /// Restarts the ramp only when the target moves; re-targeting every block
    /// would stretch the ramp forever.
    fn retarget(&mut self, sample_rate: f32, value: f32) {
        if value != self.target {
            self.smoother.set_target(sample_rate, value);
            self.target = value;
        }
    }
}

fn targets(snapshot: &ParamSnapshot) -> [f32; CONTROL_COUNT] {
    let layers = snapshot.switches.targets();
    let mut t = [0.0; CONTROL_COUNT];
    t[Control::InputGain as usize] = db_to_lin(snapshot.input_gain_db);
    t[Control::OutputGain as usize] = db_to_lin(snapshot.output_gain_db);
    t[Control::Mix as usize] = snapshot.mix;
    t[Control::Bypass as usize] = if snapshot.bypass { 1.0 } else { 0.0 };
    t[Control::Threshold as usize] = db_to_lin(snapshot.threshold_db);
    t[Control::Knee as usize] = snapshot.knee;
    t[Control::PadX as usize] = snapshot.pad_x;
    t[Control::PadY as usize] = snapshot.pad_y;
    t[Control::Ceiling as usize] = db_to_lin(snapshot.ceiling_db);
    t[Control::Passthrough as usize] = layers.passthrough;
    t[Control::SoloMix as usize] = layers.solo_mix;
    for k in 0..4 {
        t[TRIM_BASE + k] = db_to_lin(snapshot.trims_db[k]);
        t[GATE_BASE + k] = layers.gates[k];
        t[SHARE_BASE + k] = layers.solo_shares[k];
    }
    t
}

pub struct ControlCurves {
    values: Vec<SmoothedValue>,
    curves: Vec<Vec<f32>>,
    len: usize,
}

impl ControlCurves {
    pub fn new(smoothing_ms: f32) -> Self {
        Self {
            values: (0..CONTROL_COUNT)
                .map(|_| SmoothedValue::new(smoothing_ms))
                .collect(),
            curves: vec![Vec::new(); CONTROL_COUNT],
            len: 0,
        }
    }

    pub fn allocate(&mut self, max_block: usize) {
        for curve in self.curves.iter_mut() {
            *curve = vec![0.0; max_block];
        }
        self.len = 0;
    }

    /// Snaps every control to `snapshot` with no ramp.
    pub fn jump_to(&mut self, snapshot: &ParamSnapshot) {
        for (value, target) in self.values.iter_mut().zip(targets(snapshot)) {
            value.jump(target);
        }
    }

    /// Retargets from `snapshot` and renders `len` samples of every curve.
    pub fn render(&mut self, sample_rate: f32, snapshot: &ParamSnapshot, len: usize) {
        let len = len.min(self.curves.first().map_or(0, Vec::len));
        for ((value, curve), target) in self
            .values
            .iter_mut()
            .zip(self.curves.iter_mut())
            .zip(targets(snapshot))
        {
            value.retarget(sample_rate, target);
            value.smoother.next_block(&mut curve[..len], len);
        }
        self.len = len;
    }

    /// Samples rendered by the last [`ControlCurves::render`].
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn curve(&self, control: Control) -> &[f32] {
        &self.curves[control as usize][..self.len]
    }

    #[inline]
    pub fn get(&self, control: Control, i: usize) -> f32 {
        self.curves[control as usize][i]
    }

    /// Blend controls at sample `i`.
    #[inline]
    pub fn frame(&self, i: usize) -> BlendFrame {
        let at = |base: usize| -> [f32; 4] { std::array::from_fn(|k| self.curves[base + k][i]) };
        BlendFrame {
            pad_x: self.get(Control::PadX, i),
            pad_y: self.get(Control::PadY, i),
            trims: at(TRIM_BASE),
            gates: at(GATE_BASE),
            solo_shares: at(SHARE_BASE),
            solo_mix: self.get(Control::SoloMix, i),
            passthrough: self.get(Control::Passthrough, i),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
