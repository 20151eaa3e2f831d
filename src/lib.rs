//! quadshaper
//!
//! Real-time four-mode dynamics engine: hard clip, antialiased soft clip,
//! adaptive slow limiter and fast limiter, cross-faded from a 2-D pad and
//! finished by a ceiling-enforcing protection limiter. Runs in place on host
//! blocks with fixed, host-reported latency and no allocation after
//! [`Engine::prepare`].
//!
//! Threads talk to the engine only through shared handles:
//! - [`EngineParams`]: lock-free control inputs
//! - [`Meters`]: levels, gain reduction, latency
//! - [`Telemetry`] / [`TelemetryReader`]: recent waveform and reduction data
//! - [`EventDrain`]: events the audio thread could not log itself

pub mod config;
pub mod controls;
pub mod dsp;
pub mod engine;
pub mod events;
pub mod meters;
pub mod params;
pub mod telemetry;

pub use config::EngineConfig;
pub use dsp::blend::ProcessorKind;
pub use dsp::oversampling::OversamplingMode;
pub use engine::Engine;
pub use events::{ContractViolation, EngineEvent, EventDrain};
pub use meters::Meters;
pub use params::{EngineParams, ParamSnapshot};
pub use telemetry::{Metric, SegmentSummary, Telemetry, TelemetryReader, TelemetryRecord};
