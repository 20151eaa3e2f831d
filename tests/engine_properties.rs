use ebur128::{EbuR128, Mode};
use quadshaper::{Engine, EngineConfig, EngineEvent, EngineParams, Metric, OversamplingMode, ProcessorKind};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

const SR: f32 = 48_000.0;
const BLOCK: usize = 256;

fn engine(mode: OversamplingMode, setup: impl FnOnce(&EngineParams)) -> Engine {
    engine_with_config(EngineConfig::default(), mode, setup)
}

fn engine_with_config(config: EngineConfig, mode: OversamplingMode, setup: impl FnOnce(&EngineParams)) -> Engine {
    let mut e = Engine::new(config).unwrap();
    let params = e.params();
    params.set_oversampling_mode(mode);
    setup(&params);
    e.prepare(SR, BLOCK, 1).unwrap();
    e
}

fn render(e: &mut Engine, input: &[f32]) -> Vec<f32> {
    let mut out = input.to_vec();
    for block in out.chunks_mut(BLOCK) {
        e.process(&mut [block]);
    }
    out
}

fn sine(freq: f32, amp: f32, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SR).sin())
        .collect()
}

fn noise(len: usize) -> Vec<f32> {
    let mut state = 0x1234_5678u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as f32 / u32::MAX as f32) * 2.0 - 1.0
        })
        .collect()
}

fn mute_all(p: &EngineParams) {
    for kind in ProcessorKind::ALL {
        p.set_muted(kind, true);
    }
    p.set_overshoot(false);
    p.set_true_peak(false);
}

fn db(x: f32) -> f32 {
    20.0 * x.max(1e-12).log10()
}

#[test]
fn bypass_is_bit_identical_to_delayed_input() {
    for mode in OversamplingMode::ALL {
        let mut e = engine(mode, |p| {
            p.set_bypass(true);
            p.set_input_gain_db(12.0);
            p.set_threshold_db(-18.0);
        });
        let latency = e.latency_samples();
        let input = noise(BLOCK * 20);
        let out = render(&mut e, &input);
        assert!(out[..latency].iter().all(|&s| s == 0.0));
        for i in latency..input.len() {
            assert_eq!(out[i], input[i - latency], "{mode:?} sample {i}");
        }
    }
}

#[test]
fn null_at_native_rate_is_exact() {
    let mut e = engine(OversamplingMode::Off, mute_all);
    let latency = e.latency_samples();
    let input = noise(BLOCK * 20);
    let out = render(&mut e, &input);
    for i in latency..input.len() {
        assert_eq!(out[i], input[i - latency]);
    }
}

#[test]
fn null_when_oversampled_is_within_filter_ripple() {
    for mode in [OversamplingMode::X8, OversamplingMode::X16] {
        let mut e = engine(mode, mute_all);
        let latency = e.latency_samples();
        let input = sine(1000.0, 0.5, BLOCK * 40);
        let out = render(&mut e, &input);
        let max_err = (2048..input.len())
            .map(|i| (out[i] - input[i - latency]).abs())
            .fold(0.0f32, f32::max);
        assert!(db(max_err) < db(0.5) - 50.0, "{mode:?}: {max_err}");
    }
}

#[test]
fn fully_dry_mix_matches_delayed_input() {
    let mut e = engine(OversamplingMode::X8, |p| {
        p.set_mix(0.0);
        p.set_threshold_db(-20.0);
        p.set_true_peak(true);
    });
    let latency = e.latency_samples();
    let input = noise(BLOCK * 20);
    let out = render(&mut e, &input);
    for i in latency..input.len() {
        let err = (out[i] - input[i - latency]).abs();
        assert!(err <= input[i - latency].abs() * 1e-6, "sample {i}");
    }
}

#[test]
fn latency_is_pinned_across_mode_switches() {
    let mut e = engine(OversamplingMode::X8, mute_all);
    let params = e.params();
    let latency = e.latency_samples();

    for mode in [
        OversamplingMode::Off,
        OversamplingMode::X16,
        OversamplingMode::X8,
        OversamplingMode::Off,
    ] {
        params.set_oversampling_mode(mode);
        let mut silence = vec![0.0f32; BLOCK];
        for _ in 0..4 {
            e.process(&mut [silence.as_mut_slice()]);
        }
        assert_eq!(e.latency_samples(), latency);
        assert_eq!(e.meters().get_latency_samples(), latency);

        let mut input = vec![0.0f32; BLOCK * 2];
        input[10] = 1.0;
        let out = render(&mut e, &input);
        let peak_at = out
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |a, (i, &v)| if v.abs() > a.1 { (i, v.abs()) } else { a })
            .0;
        assert_eq!(peak_at, 10 + latency, "{mode:?}");
    }
}

#[test]
fn quiet_sine_through_hard_clip_stays_under_threshold() {
    let mut e = engine(OversamplingMode::X8, |p| {
        p.set_pad(0.0, 1.0);
        p.set_threshold_db(-3.0);
        p.set_overshoot(false);
    });
    let input = sine(1000.0, 0.5, BLOCK * 40);
    let out = render(&mut e, &input);
    let peak = out[4096..].iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    assert!(db(peak) <= -3.0 + 0.5, "peak = {} dB", db(peak));
    assert!(db(peak) > -6.5);
}

#[test]
fn driven_sine_through_hard_clip_is_held_at_threshold() {
    let mut e = engine(OversamplingMode::X8, |p| {
        p.set_pad(0.0, 1.0);
        p.set_threshold_db(-3.0);
        p.set_input_gain_db(6.0);
        p.set_overshoot(false);
    });
    let input = sine(1000.0, 0.5, BLOCK * 40);
    let out = render(&mut e, &input);
    let peak = out[4096..].iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    assert!(db(peak) <= -3.0 + 1.0, "peak = {} dB", db(peak));
    assert!(e.meters().get_gain_reduction(ProcessorKind::HardClip) > 2.0);
}

#[test]
fn full_scale_sine_through_fast_limit() {
    let mut e = engine(OversamplingMode::X8, |p| {
        p.set_pad(1.0, 1.0);
        p.set_threshold_db(-3.0);
        p.set_overshoot(false);
    });
    let input = sine(1000.0, 1.0, BLOCK * 60);
    let out = render(&mut e, &input);
    let peak = out[8192..].iter().fold(0.0f32, |m, &s| m.max(s.abs()));
    assert!(db(peak) <= -3.0 + 1.0, "peak = {} dB", db(peak));
}

#[test]
fn true_peak_mode_respects_ceiling() {
    let mut e = engine(OversamplingMode::X8, |p| {
        p.set_pad(1.0, 0.0);
        p.set_input_gain_db(12.0);
        p.set_threshold_db(0.0);
        p.set_ceiling_db(-1.0);
        p.set_overshoot(false);
        p.set_true_peak(true);
    });
    let input = noise(SR as usize);
    let out = render(&mut e, &input);

    let mut meter = EbuR128::new(1, SR as u32, Mode::TRUE_PEAK).unwrap();
    meter.add_frames_f32(&out[4800..]).unwrap();
    let true_peak = meter.true_peak(0).unwrap() as f32;
    assert!(db(true_peak) <= -1.0 + 1.0, "true peak = {} dBTP", db(true_peak));
    assert!(e.meters().get_protection_gain_reduction() > 0.0);
}

/// Energy outside the bins of in-band harmonics of a bin-exact tone.
fn alias_energy(signal: &[f32], bin: usize) -> f32 {
    let n = signal.len();
    let mut buf: Vec<Complex<f32>> = signal.iter().map(|&s| Complex::new(s, 0.0)).collect();
    FftPlanner::<f32>::new().plan_fft_forward(n).process(&mut buf);
    let harmonic = |k: usize| (1..).map(|h| h * bin).take_while(|&b| b < n / 2).any(|b| b.abs_diff(k) <= 1);
    (2..n / 2)
        .filter(|&k| !harmonic(k))
        .map(|k| buf[k].norm_sqr())
        .sum()
}

#[test]
fn oversampling_reduces_hard_clip_aliasing() {
    let n = 8192;
    let bin = 853;
    let freq = bin as f32 * SR / n as f32;
    let mut energies = Vec::new();
    for mode in [OversamplingMode::Off, OversamplingMode::X8] {
        let mut e = engine(mode, |p| {
            p.set_pad(0.0, 1.0);
            p.set_threshold_db(-12.0);
            p.set_overshoot(false);
        });
        let input = sine(freq, 1.0, n * 3);
        let out = render(&mut e, &input);
        energies.push(alias_energy(&out[2 * n..], bin));
    }
    assert!(energies[1] < energies[0] * 0.1, "{energies:?}");
}

#[test]
fn telemetry_becomes_ready_after_one_pass() {
    let config = EngineConfig {
        telemetry_capacity: 1024,
        telemetry_segments: 16,
        ..EngineConfig::default()
    };
    let mut e = engine_with_config(config, OversamplingMode::Off, |_| {});
    let telemetry = e.telemetry();
    let mut reader = e.telemetry_reader();

    render(&mut e, &sine(1000.0, 0.5, 768));
    assert!(!telemetry.is_ready());
    assert!(!reader.refresh());

    render(&mut e, &sine(1000.0, 0.5, 768));
    assert!(telemetry.is_ready());
    assert!(reader.refresh());
    assert_eq!(reader.segments().len(), 16);
    let last = reader.segments()[15];
    assert!(last.max(Metric::Output) > 0.3);
    assert!(last.min(Metric::Output) < -0.3);
}

#[test]
fn events_are_drained_in_order() {
    let mut e = engine(OversamplingMode::X8, |_| {});
    let mut drain = e.take_event_drain().unwrap();
    e.params().set_oversampling_mode(OversamplingMode::Off);
    render(&mut e, &[0.0; BLOCK]);
    e.reset();

    assert_eq!(
        drain.pop(),
        Some(EngineEvent::OversamplingChanged {
            from: OversamplingMode::X8,
            to: OversamplingMode::Off,
        })
    );
    assert_eq!(drain.pop(), Some(EngineEvent::Reset));
    assert_eq!(drain.drain_to_log(), 0);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "before prepare")]
fn process_before_prepare_asserts_in_debug() {
    let mut e = Engine::new(EngineConfig::default()).unwrap();
    let mut block = [0.0f32; 16];
    e.process(&mut [&mut block[..]]);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "block of 1024, prepared for 256")]
fn oversized_block_asserts_in_debug() {
    let mut e = engine(OversamplingMode::Off, |_| {});
    let mut block = vec![0.0f32; BLOCK * 4];
    e.process(&mut [block.as_mut_slice()]);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "2 channels, prepared for 1")]
fn extra_channels_assert_in_debug() {
    let mut e = engine(OversamplingMode::Off, |_| {});
    let mut l = vec![0.0f32; BLOCK];
    let mut r = vec![0.0f32; BLOCK];
    e.process(&mut [l.as_mut_slice(), r.as_mut_slice()]);
}

#[test]
fn oversized_blocks_are_chunked() {
    use quadshaper::ContractViolation;

    let input = noise(BLOCK * 8);
    let mut reference = engine(OversamplingMode::X8, |_| {});
    let expected = render(&mut reference, &input);

    let mut e = engine(OversamplingMode::X8, |_| {});
    e.set_contract_asserts(false);
    let mut drain = e.take_event_drain().unwrap();
    let mut out = input.clone();
    for block in out.chunks_mut(BLOCK * 4) {
        e.process(&mut [block]);
    }
    assert_eq!(out, expected);
    assert_eq!(
        drain.pop(),
        Some(EngineEvent::ContractViolation(ContractViolation::OversizedBlock {
            got: BLOCK * 4,
            prepared: BLOCK,
        }))
    );
}

#[test]
fn extra_channels_are_left_untouched() {
    use quadshaper::ContractViolation;

    let input = noise(BLOCK * 4);
    let mut reference = engine(OversamplingMode::X8, |_| {});
    let expected = render(&mut reference, &input);

    let mut e = engine(OversamplingMode::X8, |_| {});
    e.set_contract_asserts(false);
    let mut drain = e.take_event_drain().unwrap();
    let mut first = input.clone();
    let mut extra = input.clone();
    for (a, b) in first.chunks_mut(BLOCK).zip(extra.chunks_mut(BLOCK)) {
        e.process(&mut [a, b]);
    }
    assert_eq!(first, expected);
    assert_eq!(extra, input);
    assert_eq!(
        drain.pop(),
        Some(EngineEvent::ContractViolation(ContractViolation::TooManyChannels {
            got: 2,
            prepared: 1,
        }))
    );
}

#[test]
fn overshoot_holds_output_when_oversampled() {
    // ceiling -1 dB plus the 0.5 dB overshoot allowance
    let allowance = 10f32.powf((-1.0 + 0.5) / 20.0) * (1.0 + 1e-5);
    for mode in OversamplingMode::ALL {
        for (x, y) in [(0.0, 0.0), (0.0, 1.0)] {
            let mut e = engine(mode, |p| {
                p.set_pad(x, y);
                p.set_input_gain_db(12.0);
                p.set_threshold_db(0.0);
                p.set_ceiling_db(-1.0);
                p.set_overshoot(true);
                p.set_true_peak(false);
            });
            let out = render(&mut e, &noise(SR as usize / 2));
            let peak = out.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
            assert!(peak <= allowance, "{mode:?} pad ({x}, {y}): {} dB", db(peak));
        }
    }
}

#[test]
fn dry_path_is_continuous_across_mode_switches() {
    let mut e = engine(OversamplingMode::X8, |p| p.set_bypass(true));
    let params = e.params();
    let latency = e.latency_samples();
    let input = noise(BLOCK * 16);
    let mut out = input.clone();
    let modes = [OversamplingMode::Off, OversamplingMode::X16, OversamplingMode::X8];
    for (n, block) in out.chunks_mut(BLOCK).enumerate() {
        params.set_oversampling_mode(modes[n % modes.len()]);
        e.process(&mut [block]);
    }
    for i in latency..input.len() {
        assert_eq!(out[i], input[i - latency], "sample {i}");
    }
}
