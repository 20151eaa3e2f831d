//! Small numeric helpers shared by the DSP modules.

/// Floor used wherever a level is converted to dB or used as a denominator.
pub const DB_EPS: f32 = 1e-9;

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let denom = (edge1 - edge0).max(1e-12);
    let t = ((x - edge0) / denom).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    20.0 * lin.max(DB_EPS).log10()
}

/// One-pole smoothing coefficient for a time constant in milliseconds.
///
/// Returns 0.0 (no smoothing) for non-positive times.
#[inline]
pub fn time_constant_coeff(ms: f32, sample_rate: f32) -> f32 {
    let samples = ms * 0.001 * sample_rate;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

/// Rounds a duration to whole samples at `sample_rate`.
pub fn ms_to_samples(ms: f32, sample_rate: f32) -> usize {
    (ms.max(0.0) * 0.001 * sample_rate).round() as usize
}

/// Gain reduction in dB between a level before and after processing.
/// Positive means the level went down; never negative.
#[inline]
pub fn reduction_db(before: f32, after: f32) -> f32 {
    let before = before.abs();
    let after = after.abs();
    if before <= after + DB_EPS {
        0.0
    } else {
        lin_to_db(before) - lin_to_db(after)
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
pub fn bessel_i0(x: f64) -> f64 {
    let half = x * 0.5;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        let r = half / k as f64;
        term *= r * r;
        sum += term;
        if term < sum * 1e-17 {
            break;
        }
    }
    sum
}

/// Kaiser window value at offset `n` from the centre of a window spanning
/// `-half_width..=half_width`.
pub fn kaiser(n: f64, half_width: f64, beta: f64) -> f64 {
    if half_width <= 0.0 {
        return 1.0;
    }
    let r = (n / half_width).clamp(-1.0, 1.0);
    bessel_i0(beta * (1.0 - r * r).sqrt()) / bessel_i0(beta)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_round_trip_points() {
        assert_eq!(db_to_lin(0.0), 1.0);
        assert!((db_to_lin(-6.0) - 0.501_187).abs() < 1e-5);
        assert!((lin_to_db(0.5) + 6.0206).abs() < 1e-3);
        assert!(lin_to_db(0.0).is_finite());
    }

    #[test]
    fn test_time_constant_coeff_range() {
        let c = time_constant_coeff(10.0, 48_000.0);
        assert!(c > 0.99 && c < 1.0);
        assert_eq!(time_constant_coeff(0.0, 48_000.0), 0.0);
    }

    #[test]
    fn test_reduction_db_never_negative() {
        assert_eq!(reduction_db(0.5, 0.8), 0.0);
        assert!((reduction_db(1.0, 0.5) - 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_kaiser_shape() {
        assert!((kaiser(0.0, 10.0, 9.0) - 1.0).abs() < 1e-12);
        let edge = kaiser(10.0, 10.0, 9.0);
        assert!(edge > 0.0 && edge < 0.01);
        assert!((kaiser(3.0, 10.0, 9.0) - kaiser(-3.0, 10.0, 9.0)).abs() < 1e-12);
    }

    #[test]
    fn test_smoothstep_edges() {
        assert_eq!(smoothstep(0.9, 1.0, 0.5), 0.0);
        assert_eq!(smoothstep(0.9, 1.0, 1.5), 1.0);
        assert!((smoothstep(0.9, 1.0, 0.95) - 0.5).abs() < 1e-5);
    }
}
