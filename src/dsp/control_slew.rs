//! Control Slew Limiter
//!
//! Caps how fast a block-rate control value may move. Used for correction
//! factors that are recomputed once per block, where block size is chosen by
//! the host: the allowed step is expressed per second and scaled by the block
//! duration, so behaviour does not depend on buffer size.
//!
//! This is a rate limiter for control values, NOT a filter for audio.

/// Slew-limits a single control value.
///
/// One-sided: it only engages when the target moves faster than allowed.
#[derive(Clone, Copy, Debug)]
pub struct ControlSlewLimiter {
    current: f32,
    /// Maximum change per second of audio.
    rate_per_sec: f32,
}

impl ControlSlewLimiter {
    pub fn new(initial: f32, rate_per_sec: f32) -> Self {
        Self {
            current: initial,
            rate_per_sec: rate_per_sec.max(0.0),
        }
    }

    /// Moves toward `target`, covering at most `rate * block_len / sample_rate`.
    #[inline]
    pub fn process(&mut self, target: f32, block_len: usize, sample_rate: f32) -> f32 {
        let max_step = self.rate_per_sec * block_len as f32 / sample_rate.max(1.0);
        let delta = target - self.current;
        self.current += delta.clamp(-max_step, max_step);
        self.current
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn reset(&mut self, value: f32) {
        self.current = value;
    }
}

// =============================================================================
// Tests
// =============================================================================
