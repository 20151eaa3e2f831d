//! Control inputs shared between the control thread and the audio thread.
//!
//! Every value lives in an atomic so setters never block. Setters clamp to
//! the documented range and silently drop NaN; the audio thread reads one
//! [`ParamSnapshot`] per block.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::dsp::blend::LayerSwitches;
use crate::dsp::oversampling::OversamplingMode;
use crate::dsp::protection::ProtectionModes;
use crate::dsp::soft_clip::MIN_KNEE;
use crate::dsp::transient::MAX_EMPHASIS_DB;
use crate::dsp::ProcessorKind;

// =============================================================================
// Ranges
// =============================================================================

pub const GAIN_RANGE_DB: (f32, f32) = (-24.0, 24.0);
pub const THRESHOLD_RANGE_DB: (f32, f32) = (-24.0, 0.0);
pub const TRIM_RANGE_DB: (f32, f32) = (-24.0, 12.0);
pub const CEILING_RANGE_DB: (f32, f32) = (-12.0, 0.0);

const DEFAULT_THRESHOLD_DB: f32 = -3.0;
const DEFAULT_KNEE: f32 = 0.5;
const DEFAULT_CEILING_DB: f32 = -0.1;

#[derive(Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store_clamped(&self, v: f32, (lo, hi): (f32, f32)) {
        if v.is_nan() {
            return;
        }
        self.0.store(v.clamp(lo, hi).to_bits(), Ordering::Relaxed);
    }
}

/// One block's worth of control values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub input_gain_db: f32,
    pub output_gain_db: f32,
    pub mix: f32,
    pub threshold_db: f32,
    pub knee: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub trims_db: [f32; 4],
    pub switches: LayerSwitches,
    pub ceiling_db: f32,
    pub protection: ProtectionModes,
    pub oversampling: OversamplingMode,
    pub bypass: bool,
    pub attack_db: f32,
    pub sustain_db: f32,
    pub asymmetry: bool,
}

pub struct EngineParams {
    input_gain_db: AtomicF32,
    output_gain_db: AtomicF32,
    mix: AtomicF32,
    threshold_db: AtomicF32,
    knee: AtomicF32,
    pad_x: AtomicF32,
    pad_y: AtomicF32,
    trims_db: [AtomicF32; 4],
    muted: [AtomicBool; 4],
    soloed: [AtomicBool; 4],
    ceiling_db: AtomicF32,
    overshoot: AtomicBool,
    true_peak: AtomicBool,
    oversampling: AtomicU32,
    bypass: AtomicBool,
    attack_db: AtomicF32,
    sustain_db: AtomicF32,
    asymmetry: AtomicBool,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self::new(OversamplingMode::default())
    }
}

impl EngineParams {
    pub fn new(oversampling: OversamplingMode) -> Self {
        Self {
            input_gain_db: AtomicF32::new(0.0),
            output_gain_db: AtomicF32::new(0.0),
            mix: AtomicF32::new(1.0),
            threshold_db: AtomicF32::new(DEFAULT_THRESHOLD_DB),
            knee: AtomicF32::new(DEFAULT_KNEE),
            pad_x: AtomicF32::new(0.5),
            pad_y: AtomicF32::new(0.5),
            trims_db: Default::default(),
            muted: Default::default(),
            soloed: Default::default(),
            ceiling_db: AtomicF32::new(DEFAULT_CEILING_DB),
            overshoot: AtomicBool::new(true),
            true_peak: AtomicBool::new(false),
            oversampling: AtomicU32::new(oversampling.index()),
            bypass: AtomicBool::new(false),
            attack_db: AtomicF32::new(0.0),
            sustain_db: AtomicF32::new(0.0),
            asymmetry: AtomicBool::new(false),
        }
    }

    pub fn set_input_gain_db(&self, db: f32) {
        self.input_gain_db.store_clamped(db, GAIN_RANGE_DB);
    }

    pub fn set_output_gain_db(&self, db: f32) {
        self.output_gain_db.store_clamped(db, GAIN_RANGE_DB);
    }

    /// 0 = fully dry, 1 = fully processed.
    pub fn set_mix(&self, mix: f32) {
        self.mix.store_clamped(mix, (0.0, 1.0));
    }

    pub fn set_threshold_db(&self, db: f32) {
        self.threshold_db.store_clamped(db, THRESHOLD_RANGE_DB);
    }

    /// Soft-clip knee as a fraction of the threshold.
    pub fn set_knee(&self, knee: f32) {
        self.knee.store_clamped(knee, (MIN_KNEE, 1.0));
    }

    pub fn set_pad(&self, x: f32, y: f32) {
        self.pad_x.store_clamped(x, (0.0, 1.0));
        self.pad_y.store_clamped(y, (0.0, 1.0));
    }

    pub fn set_trim_db(&self, kind: ProcessorKind, db: f32) {
        self.trims_db[kind.index()].store_clamped(db, TRIM_RANGE_DB);
    }

    pub fn set_muted(&self, kind: ProcessorKind, muted: bool) {
        self.muted[kind.index()].store(muted, Ordering::Relaxed);
    }

    pub fn set_soloed(&self, kind: ProcessorKind, soloed: bool) {
        self.soloed[kind.index()].store(soloed, Ordering::Relaxed);
    }

    pub fn set_ceiling_db(&self, db: f32) {
        self.ceiling_db.store_clamped(db, CEILING_RANGE_DB);
    }

    pub fn set_overshoot(&self, enabled: bool) {
        self.overshoot.store(enabled, Ordering::Relaxed);
    }

    pub fn set_true_peak(&self, enabled: bool) {
        self.true_peak.store(enabled, Ordering::Relaxed);
    }

    pub fn set_oversampling_mode(&self, mode: OversamplingMode) {
        self.oversampling.store(mode.index(), Ordering::Relaxed);
    }

    /// Index form used by hosts (0 = off, 1 = 8×, 2 = 16×). Unknown indices
    /// are ignored.
    pub fn set_oversampling_index(&self, index: u32) {
        if let Some(mode) = OversamplingMode::from_index(index) {
            self.set_oversampling_mode(mode);
        }
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypass.store(bypass, Ordering::Relaxed);
    }

    /// Transient emphasis, clamped to ±12 dB.
    pub fn set_attack_db(&self, db: f32) {
        self.attack_db
            .store_clamped(db, (-MAX_EMPHASIS_DB, MAX_EMPHASIS_DB));
    }

    pub fn set_sustain_db(&self, db: f32) {
        self.sustain_db
            .store_clamped(db, (-MAX_EMPHASIS_DB, MAX_EMPHASIS_DB));
    }

    pub fn set_asymmetry_correction(&self, enabled: bool) {
        self.asymmetry.store(enabled, Ordering::Relaxed);
    }

    pub fn oversampling_mode(&self) -> OversamplingMode {
        OversamplingMode::from_index(self.oversampling.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn snapshot(&self) -> ParamSnapshot {
        let load_bools = |flags: &[AtomicBool; 4]| flags.each_ref().map(|f| f.load(Ordering::Relaxed));
        ParamSnapshot {
            input_gain_db: self.input_gain_db.load(),
            output_gain_db: self.output_gain_db.load(),
            mix: self.mix.load(),
            threshold_db: self.threshold_db.load(),
            knee: self.knee.load(),
            pad_x: self.pad_x.load(),
            pad_y: self.pad_y.load(),
            trims_db: self.trims_db.each_ref().map(AtomicF32::load),
            switches: LayerSwitches {
                muted: load_bools(&self.muted),
                soloed: load_bools(&self.soloed),
            },
            ceiling_db: self.ceiling_db.load(),
            protection: ProtectionModes {
                overshoot: self.overshoot.load(Ordering::Relaxed),
                true_peak: self.true_peak.load(Ordering::Relaxed),
            },
            oversampling: self.oversampling_mode(),
            bypass: self.bypass.load(Ordering::Relaxed),
            attack_db: self.attack_db.load(),
            sustain_db: self.sustain_db.load(),
            asymmetry: self.asymmetry.load(Ordering::Relaxed),
        }
    }

    /// Applies one `name=value` assignment, as used by the render tool.
    pub fn apply_assignment(&self, name: &str, value: &str) -> anyhow::Result<()> {
        let number = || -> anyhow::Result<f32> {
            value
                .trim()
                .parse::<f32>()
                .map_err(|e| anyhow::anyhow!("{name}: invalid number {value:?}: {e}"))
        };
        let flag = || -> anyhow::Result<bool> {
            match value.trim() {
                "1" | "true" | "on" => Ok(true),
                "0" | "false" | "off" => Ok(false),
                other => anyhow::bail!("{name}: expected on/off, got {other:?}"),
            }
        };
        let kind = |suffix: &str| -> anyhow::Result<ProcessorKind> {
            ProcessorKind::ALL
                .into_iter()
                .find(|k| k.key() == suffix)
                .ok_or_else(|| anyhow::anyhow!("unknown processor {suffix:?} in {name}"))
        };

        match name {
            "input_gain" => self.set_input_gain_db(number()?),
            "output_gain" => self.set_output_gain_db(number()?),
            "mix" => self.set_mix(number()?),
            "threshold" => self.set_threshold_db(number()?),
            "knee" => self.set_knee(number()?),
            "pad_x" => self.set_pad(number()?, self.pad_y.load()),
            "pad_y" => self.set_pad(self.pad_x.load(), number()?),
            "ceiling" => self.set_ceiling_db(number()?),
            "overshoot" => self.set_overshoot(flag()?),
            "true_peak" => self.set_true_peak(flag()?),
            "oversampling" => {
                let index = value
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| anyhow::anyhow!("oversampling: {e}"))?;
                anyhow::ensure!(
                    OversamplingMode::from_index(index).is_some(),
                    "oversampling index {index} out of range"
                );
                self.set_oversampling_index(index);
            }
            "bypass" => self.set_bypass(flag()?),
            "attack" => self.set_attack_db(number()?),
            "sustain" => self.set_sustain_db(number()?),
            "asymmetry" => self.set_asymmetry_correction(flag()?),
            _ => {
                if let Some(suffix) = name.strip_prefix("trim_") {
                    self.set_trim_db(kind(suffix)?, number()?);
                } else if let Some(suffix) = name.strip_prefix("mute_") {
                    self.set_muted(kind(suffix)?, flag()?);
                } else if let Some(suffix) = name.strip_prefix("solo_") {
                    self.set_soloed(kind(suffix)?, flag()?);
                } else {
                    anyhow::bail!("unknown control {name:?}");
                }
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_clamp() {
        let p = EngineParams::default();
        p.set_input_gain_db(100.0);
        p.set_threshold_db(6.0);
        p.set_attack_db(20.0);
        p.set_sustain_db(-20.0);
        p.set_knee(0.0);
        let s = p.snapshot();
        assert_eq!(s.input_gain_db, 24.0);
        assert_eq!(s.threshold_db, 0.0);
        assert_eq!(s.attack_db, 12.0);
        assert_eq!(s.sustain_db, -12.0);
        assert_eq!(s.knee, MIN_KNEE);
    }

    #[test]
    fn test_nan_is_ignored() {
        let p = EngineParams::default();
        p.set_mix(0.25);
        p.set_mix(f32::NAN);
        assert_eq!(p.snapshot().mix, 0.25);
    }

    #[test]
    fn test_bad_oversampling_index_ignored() {
        let p = EngineParams::new(OversamplingMode::X16);
        p.set_oversampling_index(7);
        assert_eq!(p.oversampling_mode(), OversamplingMode::X16);
        p.set_oversampling_index(0);
        assert_eq!(p.oversampling_mode(), OversamplingMode::Off);
    }

    #[test]
    fn test_assignments() {
        let p = EngineParams::default();
        p.apply_assignment("trim_soft", "-6").unwrap();
        p.apply_assignment("mute_hard", "on").unwrap();
        p.apply_assignment("pad_y", "1").unwrap();
        p.apply_assignment("oversampling", "2").unwrap();
        let s = p.snapshot();
        assert_eq!(s.trims_db[ProcessorKind::SoftClip.index()], -6.0);
        assert!(s.switches.muted[ProcessorKind::HardClip.index()]);
        assert_eq!(s.pad_y, 1.0);
        assert_eq!(s.oversampling, OversamplingMode::X16);

        assert!(p.apply_assignment("oversampling", "9").is_err());
        assert!(p.apply_assignment("volume", "1").is_err());
        assert!(p.apply_assignment("bypass", "maybe").is_err());
    }
}
