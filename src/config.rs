//! Engine configuration.
//!
//! Fixed for the life of an [`crate::Engine`]: lookahead times, smoothing
//! ramp, telemetry sizes and the start-up oversampling mode. Loaded from JSON;
//! missing keys take their defaults.

use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use crate::dsp::oversampling::OversamplingMode;

pub const PROTECTION_LOOKAHEAD_RANGE_MS: (f32, f32) = (1.0, 3.0);
pub const SMOOTHING_RANGE_MS: (f32, f32) = (1.0, 100.0);
/// Processor lookahead bounds (ms).
pub const LOOKAHEAD_RANGE_MS: (f32, f32) = (0.1, 5.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lookahead shared by the four processors.
    pub lookahead_ms: f32,
    pub protection_lookahead_ms: f32,
    /// Linear ramp applied to every continuous control.
    pub smoothing_ms: f32,
    /// Telemetry ring length in native samples.
    pub telemetry_capacity: usize,
    pub telemetry_segments: usize,
    pub initial_oversampling: OversamplingMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookahead_ms: 1.0,
            protection_lookahead_ms: 1.5,
            smoothing_ms: 20.0,
            telemetry_capacity: 8192,
            telemetry_segments: 256,
            initial_oversampling: OversamplingMode::X8,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing engine config")?;
        config.validated()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Clamps times to their ranges; rejects empty telemetry.
    pub fn validated(mut self) -> anyhow::Result<Self> {
        ensure!(self.telemetry_capacity > 0, "telemetry_capacity must be > 0");
        ensure!(self.telemetry_segments > 0, "telemetry_segments must be > 0");
        ensure!(
            self.lookahead_ms.is_finite()
                && self.protection_lookahead_ms.is_finite()
                && self.smoothing_ms.is_finite(),
            "config times must be finite"
        );
        self.lookahead_ms = self
            .lookahead_ms
            .clamp(LOOKAHEAD_RANGE_MS.0, LOOKAHEAD_RANGE_MS.1);
        self.protection_lookahead_ms = self
            .protection_lookahead_ms
            .clamp(PROTECTION_LOOKAHEAD_RANGE_MS.0, PROTECTION_LOOKAHEAD_RANGE_MS.1);
        self.smoothing_ms = self
            .smoothing_ms
            .clamp(SMOOTHING_RANGE_MS.0, SMOOTHING_RANGE_MS.1);
        self.telemetry_segments = self.telemetry_segments.min(self.telemetry_capacity);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_keys_take_defaults() {
        let c = EngineConfig::from_json_str(r#"{ "smoothing_ms": 5.0 }"#).unwrap();
        assert_eq!(c.smoothing_ms, 5.0);
        assert_eq!(c.lookahead_ms, 1.0);
        assert_eq!(c.initial_oversampling, OversamplingMode::X8);
    }

    #[test]
    fn test_ranges_are_clamped() {
        let c = EngineConfig::from_json_str(
            r#"{ "protection_lookahead_ms": 10.0, "smoothing_ms": 0.0, "initial_oversampling": "x16" }"#,
        )
        .unwrap();
        assert_eq!(c.protection_lookahead_ms, 3.0);
        assert_eq!(c.smoothing_ms, 1.0);
        assert_eq!(c.initial_oversampling, OversamplingMode::X16);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(EngineConfig::from_json_str(r#"{ "telemetry_capacity": 0 }"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{ "initial_oversampling": "x4" }"#).is_err());
        assert!(EngineConfig::from_json_str("not json").is_err());
        assert!(EngineConfig::load("/nonexistent/quadshaper.json").is_err());
    }
}
