//! extract: raw Neuropixels window → LFP, CSD and wavelet coefficients in one
//! safetensors file.
//!
//! Output keys:
//!   lfp         [4, T, 96]     f32
//!   csd         [T, 192]       f32
//!   wav.re      [F, T, 192]    f32
//!   wav.im      [F, T, 192]    f32
//!   freqs_hz    [F]            f32
use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hippo_ephys::{
    io::StWriter, run_pipeline, PipelineConfig, ProbeGeometry, RawRecording, Wavelet,
};

#[derive(Parser, Debug)]
#[command(name = "extract", about = "Neuropixels LFP / CSD / theta extraction")]
struct Args {
    /// SpikeGLX .bin (its .meta must sit next to it), or a headerless .dat
    /// when --flat-channels is given.
    #[arg(long)]
    input: PathBuf,

    /// Output safetensors path.
    #[arg(long)]
    output: PathBuf,

    /// Column count of a headerless recording.
    #[arg(long)]
    flat_channels: Option<usize>,

    /// First sample of the window.
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// One past the last sample (default: end of recording).
    #[arg(long)]
    stop: Option<usize>,

    /// First channel (multiple of 4).
    #[arg(long, default_value_t = 0)]
    chan_start: usize,

    /// One past the last channel (multiple of 4, at most 384).
    #[arg(long, default_value_t = 384)]
    chan_stop: usize,

    /// Wavelet target frequencies in Hz, comma-separated.
    #[arg(long, default_value = "7")]
    freqs: String,

    /// Mother wavelet, e.g. `cmor1.5-1.0` or `morl`.
    #[arg(long, default_value = "cmor1.5-1.0")]
    wavelet: Wavelet,

    /// Gaussian width across LFP sites (µm, multiple of 40).
    #[arg(long)]
    lfp_smooth_um: Option<u32>,

    /// Gaussian width across merged CSD sites (µm, multiple of 20; 0 disables).
    #[arg(long, default_value_t = 40)]
    csd_smooth_um: u32,

    /// Logging verbosity: trace, debug, info, warn, error.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut cfg = PipelineConfig::default();
    cfg.lfp.smooth_um = args.lfp_smooth_um;
    cfg.csd.smooth_um = (args.csd_smooth_um > 0).then_some(args.csd_smooth_um);
    cfg.wavelet.wavelet = args.wavelet;
    cfg.wavelet.freqs_hz = parse_freqs(&args.freqs)?;

    let rec = open(&args.input, args.flat_channels, &cfg.geometry)?;
    let stop = args.stop.unwrap_or(rec.n_samples());
    let raw = rec.window(args.start..stop, args.chan_start..args.chan_stop)?;
    info!(samples = raw.nrows(), channels = raw.ncols(), "window loaded");

    let out = run_pipeline(&raw, &cfg)?;

    let mut w = StWriter::new();
    w.set_metadata("source", args.input.display().to_string());
    w.set_metadata("samples", format!("{}..{stop}", args.start));
    w.set_metadata("channels", format!("{}..{}", args.chan_start, args.chan_stop));
    w.set_metadata("wavelet", cfg.wavelet.wavelet.to_string());
    w.add_f32_array("lfp", &out.lfp);
    w.add_f32_array("csd", &out.csd);
    w.add_complex_array("wav", &out.wav);
    let freqs: Vec<f32> = cfg.wavelet.freqs_hz.iter().map(|&f| f as f32).collect();
    w.add_f32("freqs_hz", &freqs, &[freqs.len()]);
    w.write(&args.output)?;

    info!(output = %args.output.display(), "done");
    Ok(())
}

fn open(path: &Path, flat_channels: Option<usize>, geometry: &ProbeGeometry) -> Result<RawRecording> {
    match flat_channels {
        Some(n) => RawRecording::open_flat(path, n, geometry),
        None => RawRecording::open(path, geometry),
    }
}

fn parse_freqs(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|f| f.trim().parse::<f64>().map_err(|e| anyhow::anyhow!("bad frequency {f:?}: {e}")))
        .collect()
}

fn init_logging(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
