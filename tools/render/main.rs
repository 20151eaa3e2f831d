//! Offline renderer: runs a WAV file through the engine in host-sized blocks.
//!
//! ```text
//! quadshaper-render <input.wav> <output.wav> [--config engine.json] [--block N] [name=value ...]
//! ```
//!
//! Controls use the engine's assignment names (`threshold=-6`, `pad_x=1`,
//! `mute_hard=on`, `oversampling=2`, ...). The reported latency is trimmed so
//! the output lines up with the input.

use anyhow::{bail, Context, Result};
use ebur128::{EbuR128, Mode};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use quadshaper::{Engine, EngineConfig};
use std::path::{Path, PathBuf};

const DEFAULT_BLOCK: usize = 512;

struct Args {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    block: usize,
    assignments: Vec<(String, String)>,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut config = None;
    let mut block = DEFAULT_BLOCK;
    let mut assignments = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config = Some(PathBuf::from(args.next().context("--config needs a path")?));
        } else if arg == "--block" {
            let value = args.next().context("--block needs a size")?;
            block = value
                .parse()
                .with_context(|| format!("invalid block size '{value}'"))?;
        } else if let Some((name, value)) = arg.split_once('=') {
            assignments.push((name.to_string(), value.to_string()));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }

    if positional.len() != 2 {
        bail!("usage: quadshaper-render <input.wav> <output.wav> [--config file] [--block N] [name=value ...]");
    }
    if block == 0 {
        bail!("block size must be > 0");
    }
    let output = positional.pop().context("missing output path")?;
    let input = positional.pop().context("missing input path")?;
    Ok(Args {
        input,
        output,
        config,
        block,
        assignments,
    })
}

/// Reads a WAV into one buffer per channel.
fn read_wav(path: &Path) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader =
        WavReader::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("reading float samples")?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .context("reading integer samples")?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mut planar = vec![Vec::with_capacity(interleaved.len() / channels); channels];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
    Ok((spec, planar))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let (spec, mut planar) = read_wav(&args.input)?;
    let channels = planar.len();
    let frames = planar.first().map_or(0, Vec::len);

    let mut engine = Engine::new(config)?;
    let params = engine.params();
    for (name, value) in &args.assignments {
        params
            .apply_assignment(name, value)
            .with_context(|| format!("applying {name}={value}"))?;
    }
    engine.prepare(spec.sample_rate as f32, args.block, channels)?;
    let mut drain = engine.take_event_drain();
    let latency = engine.latency_samples();

    // pad the tail so the trimmed output keeps the full length
    for ch in planar.iter_mut() {
        ch.resize(frames + latency, 0.0);
    }
    let total = frames + latency;
    let mut start = 0;
    while start < total {
        let end = (start + args.block).min(total);
        let mut block: Vec<&mut [f32]> = planar.iter_mut().map(|c| &mut c[start..end]).collect();
        engine.process(&mut block);
        if let Some(drain) = drain.as_mut() {
            drain.drain_to_log();
        }
        start = end;
    }

    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&args.output, out_spec)
        .with_context(|| format!("failed to create '{}'", args.output.display()))?;
    let mut meter = EbuR128::new(channels as u32, spec.sample_rate, Mode::I | Mode::TRUE_PEAK)
        .map_err(|e| anyhow::anyhow!("loudness meter: {e:?}"))?;
    let mut interleaved = Vec::with_capacity(channels);
    for i in latency..total {
        interleaved.clear();
        interleaved.extend(planar.iter().map(|c| c[i]));
        for &s in &interleaved {
            writer.write_sample(s)?;
        }
        meter
            .add_frames_f32(&interleaved)
            .map_err(|e| anyhow::anyhow!("loudness meter: {e:?}"))?;
    }
    writer.finalize().context("finalizing output WAV")?;

    let lufs = meter.loudness_global().unwrap_or(f64::NEG_INFINITY);
    let true_peak = (0..channels as u32)
        .filter_map(|ch| meter.true_peak(ch).ok())
        .fold(0.0f64, f64::max);
    println!("Rendered '{}' -> '{}'", args.input.display(), args.output.display());
    println!("  frames           : {frames}");
    println!("  latency trimmed  : {latency}");
    println!("  integrated       : {lufs:.2} LUFS");
    println!("  true peak        : {:.2} dBTP", 20.0 * true_peak.max(1e-12).log10());
    Ok(())
}
