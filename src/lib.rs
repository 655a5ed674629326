//! # hippo_ephys: hippocampal Neuropixels LFP / CSD / theta pipeline
//!
//! Turns raw 4-shank Neuropixels 2.0 recordings into local field potentials,
//! a merged current-source-density series, and theta-band wavelet
//! coefficients.  Filter and wavelet conventions follow SciPy and PyWavelets
//! so products remain comparable with existing derived files.
//!
//! ## Pipeline overview
//!
//! ```text
//! recording.bin + recording.meta  (int16, 385 columns)
//!   │
//!   ├─ neuropixels::load_neuropixels   memory-mapped window, channel 191 repaired
//!   ├─ lfp::extract_lfp                deinterleave 4 shanks → dereference
//!   │                                  → HP 1 Hz → LP 300 Hz (Butterworth, zero-phase)
//!   ├─ csd::extract_csd                per-shank CSD → z-score → D-V merge
//!   │                                  → interleave (20 µm) → Gaussian 40 µm
//!   └─ wavelet::extract_wav            complex Morlet CWT at 7 Hz on the CSD
//!        │
//!        └─→ PipelineOutput { lfp [4, T, 96], csd [T, 192], wav [F, T, 192] }
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use hippo_ephys::{load_neuropixels, run_pipeline, PipelineConfig};
//!
//! let cfg = PipelineConfig::default();
//! let raw = load_neuropixels("session/continuous.bin", 0..25_000, 0..384, &cfg.geometry).unwrap();
//! let out = run_pipeline(&raw, &cfg).unwrap();
//! println!("csd {:?}, wav {:?}", out.csd.dim(), out.wav.dim());
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use hippo_ephys::{dereference, highpass_filter, lowpass_filter, csd_transform, zscore_global};
//! use ndarray::{Array2, Axis};
//!
//! let shank: Array2<f64> = Array2::zeros((25_000, 96)); // [T, C]
//! let x = dereference(&shank, Axis(1));
//! let x = highpass_filter(&x, 2500.0, 1.0, 4, Axis(0)).unwrap();
//! let x = lowpass_filter(&x, 2500.0, 300.0, 4, Axis(0)).unwrap();
//! let csd = csd_transform(&x, 40, 0.3).unwrap();
//! let (z, _mean, _std) = zscore_global(&csd);
//! ```

pub mod config;
pub mod convolve;
pub mod csd;
pub mod error;
pub mod filter;
pub mod io;
pub mod lfp;
pub mod neuropixels;
pub mod normalize;
pub mod reference;
pub mod session;
pub mod smooth;
pub mod wavelet;

use anyhow::Result;
use ndarray::{Array2, Array3, ArrayBase, Data, Ix2};
use rustfft::num_complex::Complex;
use tracing::{debug, info_span};

// ── Crate-root re-exports ─────────────────────────────────────────────────

// config
pub use config::{CsdConfig, LfpConfig, PipelineConfig, ProbeGeometry, ShankOffset, WaveletConfig};

// errors
pub use error::PipelineError;

// stages
pub use csd::{csd_transform, extract_csd, extract_csd_with, CsdEstimator, StandardCsd};
pub use lfp::{deinterleave_shanks, extract_lfp};
pub use neuropixels::{load_neuropixels, RawRecording, SpikeGlxMeta};
pub use wavelet::{central_frequency, cwt_single_scale, extract_wav, frequency_to_scale, wavelet_transform, Wavelet};

// primitives
pub use filter::{butter_sos, highpass_filter, lowpass_filter, sosfiltfilt, BandType, Sos};
pub use normalize::zscore_global;
pub use reference::dereference;
pub use smooth::gaussian_filter;

// io + reference data
pub use io::{DerivedArrays, StWriter};
pub use session::{
    BladeCoverage, ClusterTable, DentateSpikes, LfpProbe, Marker, MarkerChannels, ProbeArrays, SessionBundle,
    SessionCatalog, SessionMetadata, SpikeTrain,
};

/// Everything [`run_pipeline`] derives from one raw window.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// `[shanks, samples, channels per shank]`.
    pub lfp: Array3<f64>,
    /// `[samples, 2 · channels per shank]`, 20 µm step.
    pub csd: Array2<f64>,
    /// `[frequencies, samples, csd channels]`.
    pub wav: Array3<Complex<f64>>,
}

/// Run LFP extraction, CSD merging, and the wavelet transform on a raw
/// `[samples, channels]` window.
///
/// # Errors
///
/// Any `PreconditionViolation` raised by the individual stages (channel
/// count not divisible by the shank count, cutoff outside `(0, Nyquist)`,
/// smoothing width not a multiple of the site step, wavelet scale too small).
///
/// # Examples
///
/// ```
/// use hippo_ephys::{run_pipeline, PipelineConfig};
/// use ndarray::Array2;
///
/// let raw = Array2::<i16>::zeros((500, 384));
/// let out = run_pipeline(&raw, &PipelineConfig::default()).unwrap();
/// assert_eq!(out.lfp.dim(), (4, 500, 96));
/// assert_eq!(out.csd.dim(), (500, 192));
/// assert_eq!(out.wav.dim(), (1, 500, 192));
/// ```
pub fn run_pipeline<A, S>(raw: &ArrayBase<S, Ix2>, cfg: &PipelineConfig) -> Result<PipelineOutput>
where
    A: Copy + Into<f64>,
    S: Data<Elem = A>,
{
    let lfp = {
        let _span = info_span!("lfp").entered();
        extract_lfp(raw, &cfg.geometry, &cfg.lfp)?
    };
    let csd = {
        let _span = info_span!("csd").entered();
        extract_csd(&lfp, &cfg.geometry, &cfg.csd)?
    };
    let wav = {
        let _span = info_span!("wavelet").entered();
        extract_wav(&csd, &cfg.wavelet)?
    };
    debug!(lfp = ?lfp.dim(), csd = ?csd.dim(), wav = ?wav.dim(), "pipeline finished");
    Ok(PipelineOutput { lfp, csd, wav })
}
