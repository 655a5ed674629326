//! LFP extraction: raw probe columns → per-shank filtered depth profiles.
//!
//! ```text
//! raw [T, 384]
//!   │
//!   ├─ deinterleave_shanks   columns s, s+4, s+8, …  → [4, T, 96]
//!   │     shank 0:   0 µm D-V,  +0 µm M-L
//!   │     shank 1:   0 µm D-V, +32 µm M-L
//!   │     shank 2: +20 µm D-V, +16 µm M-L
//!   │     shank 3: +20 µm D-V, +48 µm M-L
//!   ├─ dereference           per sample, mean over the shank's sites
//!   ├─ highpass_filter       1 Hz, order 4, zero-phase along time
//!   ├─ lowpass_filter        300 Hz, order 4, zero-phase along time
//!   └─ gaussian_filter       optional, across sites at 40 µm
//!        │
//!        └─→ LFP [4, T, 96]
//! ```
use anyhow::Result;
use ndarray::{s, Array3, ArrayBase, Axis, Data, Ix2};
use tracing::debug;

use crate::config::{LfpConfig, ProbeGeometry};
use crate::error::ensure_pre;
use crate::filter::{highpass_filter, lowpass_filter};
use crate::reference::dereference;
use crate::smooth::gaussian_filter;

/// Split `[samples, channels]` into `[n_shanks, samples, channels / n_shanks]`
/// by stride-`n_shanks` column slicing.
///
/// # Errors
///
/// `PreconditionViolation` if the channel count is not divisible by the
/// shank count.
pub fn deinterleave_shanks<A, S>(raw: &ArrayBase<S, Ix2>, n_shanks: usize) -> Result<Array3<f64>>
where
    A: Copy + Into<f64>,
    S: Data<Elem = A>,
{
    let (n_t, n_raw) = raw.dim();
    ensure_pre!(n_shanks > 0, "shank count must be positive");
    ensure_pre!(
        n_raw % n_shanks == 0,
        "channel count {n_raw} is not divisible by {n_shanks} shanks"
    );
    let n_ch = n_raw / n_shanks;
    let mut out = Array3::<f64>::zeros((n_shanks, n_t, n_ch));
    for shank in 0..n_shanks {
        let cols = raw.slice(s![.., shank..;n_shanks]);
        out.slice_mut(s![shank, .., ..]).zip_mut_with(&cols, |o, &v| *o = v.into());
    }
    Ok(out)
}

/// Run the per-shank LFP chain on a raw `[samples, channels]` recording.
///
/// # Errors
///
/// `PreconditionViolation` if the channel count is not divisible by the shank
/// count, a filter cutoff is outside `(0, Nyquist)`, or the smoothing width
/// does not divide the site step.
pub fn extract_lfp<A, S>(raw: &ArrayBase<S, Ix2>, geometry: &ProbeGeometry, cfg: &LfpConfig) -> Result<Array3<f64>>
where
    A: Copy + Into<f64>,
    S: Data<Elem = A>,
{
    let shanks = deinterleave_shanks(raw, geometry.n_shanks)?;
    let mut lfp = Array3::<f64>::zeros(shanks.raw_dim());

    for (i, shank) in shanks.axis_iter(Axis(0)).enumerate() {
        let sig = dereference(&shank, Axis(1));
        let sig = highpass_filter(&sig, cfg.sample_rate_hz, cfg.highpass_hz, cfg.order, Axis(0))?;
        let sig = lowpass_filter(&sig, cfg.sample_rate_hz, cfg.lowpass_hz, cfg.order, Axis(0))?;
        lfp.slice_mut(s![i, .., ..]).assign(&sig);
    }

    let lfp = match cfg.smooth_um {
        Some(std_um) => gaussian_filter(&lfp, geometry.shank_step_um, std_um, None, Axis(2))?,
        None => lfp,
    };
    debug!(shape = ?lfp.dim(), "LFP stack");
    Ok(lfp)
}
