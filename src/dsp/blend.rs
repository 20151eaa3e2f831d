//! Blend / Mix Stage
//!
//! Bilinear cross-fade of the four processor outputs from a 2-D pad.
//!
//! ```text
//!   Y=1  Hard Clip ---------- Fast Limit
//!          |                      |
//!   Y=0  Soft Clip ---------- Slow Limit
//!        X=0                    X=1
//! ```
//!
//! Solo and mute act on top of the pad weights:
//! - one or more solos replace the pad weights, soloed layers share 1.0
//! - a muted layer contributes nothing (even when soloed); the others keep
//!   their weights, nothing is renormalised
//! - with every layer muted the stage passes the delayed input through
//!
//! Gates, solo shares and the passthrough amount arrive already smoothed, so
//! toggling any of them fades instead of clicking.

/// The four dynamics layers, in blend order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    HardClip,
    SoftClip,
    SlowLimit,
    FastLimit,
}

impl ProcessorKind {
    pub const ALL: [Self; 4] = [Self::HardClip, Self::SoftClip, Self::SlowLimit, Self::FastLimit];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HardClip => "hard clip",
            Self::SoftClip => "soft clip",
            Self::SlowLimit => "slow limit",
            Self::FastLimit => "fast limit",
        }
    }

    /// Short identifier used in `trim_<key>`-style control names.
    pub fn key(self) -> &'static str {
        match self {
            Self::HardClip => "hard",
            Self::SoftClip => "soft",
            Self::SlowLimit => "slow",
            Self::FastLimit => "fast",
        }
    }
}

/// Bilinear pad weights in [`ProcessorKind`] order. Always sums to 1.
#[inline]
pub fn pad_weights(x: f32, y: f32) -> [f32; 4] {
    let x = x.clamp(0.0, 1.0);
    let y = y.clamp(0.0, 1.0);
    [
        (1.0 - x) * y,
        (1.0 - x) * (1.0 - y),
        x * (1.0 - y),
        x * y,
    ]
}

/// Mute / solo flags for the four layers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSwitches {
    pub muted: [bool; 4],
    pub soloed: [bool; 4],
}

/// Smoothing targets derived from [`LayerSwitches`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerTargets {
    /// 0 for muted layers, 1 otherwise.
    pub gates: [f32; 4],
    /// Weight each layer takes while solo is active.
    pub solo_shares: [f32; 4],
    /// 1 when any unmuted layer is soloed.
    pub solo_mix: f32,
    /// 1 when every layer is muted.
    pub passthrough: f32,
}

impl LayerSwitches {
    pub fn targets(&self) -> LayerTargets {
        let gates = self.muted.map(|m| if m { 0.0 } else { 1.0 });
        let active_solos = (0..4)
            .filter(|&i| self.soloed[i] && !self.muted[i])
            .count();
        let mut solo_shares = [0.0; 4];
        if active_solos > 0 {
            let share = 1.0 / active_solos as f32;
            for (i, s) in solo_shares.iter_mut().enumerate() {
                if self.soloed[i] && !self.muted[i] {
                    *s = share;
                }
            }
        }
        LayerTargets {
            gates,
            solo_shares,
            solo_mix: if active_solos > 0 { 1.0 } else { 0.0 },
            passthrough: if self.muted.iter().all(|&m| m) { 1.0 } else { 0.0 },
        }
    }
}

/// Per-sample blend controls (smoothed).
#[derive(Debug, Clone, Copy)]
pub struct BlendFrame {
    pub pad_x: f32,
    pub pad_y: f32,
    /// Linear trim per layer.
    pub trims: [f32; 4],
    pub gates: [f32; 4],
    pub solo_shares: [f32; 4],
    pub solo_mix: f32,
    pub passthrough: f32,
}

impl Default for BlendFrame {
    fn default() -> Self {
        Self {
            pad_x: 0.5,
            pad_y: 0.5,
            trims: [1.0; 4],
            gates: [1.0; 4],
            solo_shares: [0.0; 4],
            solo_mix: 0.0,
            passthrough: 0.0,
        }
    }
}

impl BlendFrame {
    /// Final per-layer weights after solo and mute (trim excluded).
    #[inline]
    pub fn weights(&self) -> [f32; 4] {
        let pad = pad_weights(self.pad_x, self.pad_y);
        let solo_mix = self.solo_mix.clamp(0.0, 1.0);
        let mut w = [0.0; 4];
        for i in 0..4 {
            let base = pad[i] + (self.solo_shares[i] - pad[i]) * solo_mix;
            w[i] = base * self.gates[i].clamp(0.0, 1.0);
        }
        w
    }

    /// Blends the four layer outputs; `dry` is the lookahead-delayed input
    /// used when every layer is muted.
    #[inline]
    pub fn mix(&self, outputs: &[f32; 4], dry: f32) -> f32 {
        if self.passthrough >= 1.0 {
            return dry;
        }
        let w = self.weights();
        let wet: f32 = (0..4).map(|i| outputs[i] * self.trims[i] * w[i]).sum();
        if self.passthrough <= 0.0 {
            wet
        } else {
            wet + (dry - wet) * self.passthrough
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
