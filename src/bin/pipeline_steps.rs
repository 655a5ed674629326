/// pipeline_steps: load a raw window, run each stage of the LFP/CSD chain,
/// and write every intermediate array to a safetensors file for comparison
/// against the SciPy/PyWavelets products.
///
/// Output keys (s = shank 0..4):
///   raw              [T, C]          i32  raw window (channel 191 repaired)
///   deref_s          [T, C/4]        f32  after per-shank dereference
///   hp_s             [T, C/4]        f32  after 1 Hz high-pass
///   lp_s             [T, C/4]        f32  after 300 Hz low-pass
///   lfp              [4, T, C/4]     f32  LFP stack (optional smoothing applied)
///   csd_s            [T, C/4]        f32  per-shank CSD before z-scoring
///   csd              [T, C/2]        f32  merged CSD
///   wav.re / wav.im  [F, T, C/2]     f32  wavelet coefficients of the CSD
///   csd_mean / csd_std [4]           f32  per-shank z-score statistics
use anyhow::Result;
use clap::Parser;
use ndarray::{s, Axis};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hippo_ephys::{
    csd_transform, deinterleave_shanks, dereference, extract_csd, extract_lfp, extract_wav,
    highpass_filter, io::StWriter, load_neuropixels, lowpass_filter, zscore_global, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "pipeline_steps")]
struct Args {
    /// SpikeGLX .bin with its .meta alongside.
    #[arg(long)]
    input: PathBuf,

    /// Output safetensors path.
    #[arg(long)]
    output: PathBuf,

    #[arg(long, default_value_t = 0)]
    start: usize,

    #[arg(long, default_value_t = 25_000)]
    stop: usize,

    #[arg(long, default_value_t = 0)]
    chan_start: usize,

    #[arg(long, default_value_t = 384)]
    chan_stop: usize,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = args.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(level).with_writer(std::io::stderr).finish(),
    )?;

    let cfg = PipelineConfig::default();
    let (g, lc) = (&cfg.geometry, &cfg.lfp);
    let mut w = StWriter::new();

    // ── 1. Raw window ──────────────────────────────────────────────────────
    let t = Instant::now();
    let raw = load_neuropixels(&args.input, args.start..args.stop, args.chan_start..args.chan_stop, g)?;
    let ms_raw = t.elapsed().as_secs_f64() * 1000.0;
    w.add_i16_array("raw", &raw);

    // ── 2. Per-shank filter chain ──────────────────────────────────────────
    let t = Instant::now();
    let shanks = deinterleave_shanks(&raw, g.n_shanks)?;
    for (i, shank) in shanks.axis_iter(Axis(0)).enumerate() {
        let deref = dereference(&shank, Axis(1));
        let hp = highpass_filter(&deref, lc.sample_rate_hz, lc.highpass_hz, lc.order, Axis(0))?;
        let lp = lowpass_filter(&hp, lc.sample_rate_hz, lc.lowpass_hz, lc.order, Axis(0))?;
        w.add_f32_array(&format!("deref_{i}"), &deref);
        w.add_f32_array(&format!("hp_{i}"), &hp);
        w.add_f32_array(&format!("lp_{i}"), &lp);
    }
    let lfp = extract_lfp(&raw, g, lc)?;
    let ms_lfp = t.elapsed().as_secs_f64() * 1000.0;
    w.add_f32_array("lfp", &lfp);

    // ── 3. CSD ─────────────────────────────────────────────────────────────
    let t = Instant::now();
    let (mut means, mut stds) = (Vec::new(), Vec::new());
    for i in 0..g.n_shanks {
        let csd = csd_transform(&lfp.slice(s![i, .., ..]), g.shank_step_um, cfg.csd.conductivity)?;
        let (_, mean, std) = zscore_global(&csd);
        means.push(mean as f32);
        stds.push(std as f32);
        w.add_f32_array(&format!("csd_{i}"), &csd);
    }
    let csd = extract_csd(&lfp, g, &cfg.csd)?;
    let ms_csd = t.elapsed().as_secs_f64() * 1000.0;
    w.add_f32_array("csd", &csd);
    w.add_f32("csd_mean", &means, &[means.len()]);
    w.add_f32("csd_std", &stds, &[stds.len()]);

    // ── 4. Wavelet ─────────────────────────────────────────────────────────
    let t = Instant::now();
    let wav = extract_wav(&csd, &cfg.wavelet)?;
    let ms_wav = t.elapsed().as_secs_f64() * 1000.0;
    w.add_complex_array("wav", &wav);

    info!(ms_raw, ms_lfp, ms_csd, ms_wav, "stage timings");
    w.write(&args.output)?;
    Ok(())
}
