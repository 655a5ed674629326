//! CSD pipeline: per-shank CSD → per-shank z-score → D-V merge → interleave.
//!
//! ```text
//! LFP [4, T, 96]  (40 µm step per shank)
//!   │
//!   ├─ csd_transform        per shank, 40 µm
//!   ├─ zscore_global        per shank (removes inter-shank gain differences)
//!   ├─ sum by D-V offset    A = 0 + 1   (0 µm D-V),  B = 2 + 3  (+20 µm D-V)
//!   ├─ interleave           [A0, B0, A1, B1, …]  → 20 µm step
//!   └─ gaussian_filter      optional, 20 µm step
//!        │
//!        └─→ CSD [T, 192]
//! ```
//!
//! Summing shanks at the same D-V depth assumes CSD varies along D-V far
//! more than along M-L; interleaving the two groups assumes approximate
//! radial symmetry about the D-V axis.

pub mod estimator;

pub use estimator::{csd_transform, csd_transform_with, CsdEstimator, StandardCsd};

use anyhow::Result;
use ndarray::{s, Array2, ArrayBase, Axis, Data, Ix3};
use tracing::debug;

use crate::config::{CsdConfig, ProbeGeometry};
use crate::error::ensure_pre;
use crate::normalize::zscore_global;
use crate::smooth::gaussian_filter;

/// Merge an LFP stack `[shanks, samples, channels]` into one
/// `[samples, groups · channels]` CSD series.
///
/// # Errors
///
/// `PreconditionViolation` if the stack does not have exactly
/// `geometry.n_shanks` shanks, or the smoothing width does not divide the
/// merged step.
pub fn extract_csd<S>(lfp: &ArrayBase<S, Ix3>, geometry: &ProbeGeometry, cfg: &CsdConfig) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    extract_csd_with(&StandardCsd, lfp, geometry, cfg)
}

/// [`extract_csd`] with a caller-chosen CSD estimator.
pub fn extract_csd_with<E, S>(
    estimator: &E,
    lfp: &ArrayBase<S, Ix3>,
    geometry: &ProbeGeometry,
    cfg: &CsdConfig,
) -> Result<Array2<f64>>
where
    E: CsdEstimator + ?Sized,
    S: Data<Elem = f64>,
{
    let (n_shank, n_t, n_ch) = lfp.dim();
    ensure_pre!(
        n_shank == geometry.n_shanks && geometry.shank_offsets.len() == n_shank,
        "expected {} shanks, got {n_shank}",
        geometry.n_shanks
    );

    let mut per_shank = Vec::with_capacity(n_shank);
    for (i, shank) in lfp.axis_iter(Axis(0)).enumerate() {
        let csd = csd_transform_with(estimator, &shank, geometry.shank_step_um, cfg.conductivity)?;
        let (z, mean, std) = zscore_global(&csd);
        debug!(shank = i, mean, std, "per-shank CSD normalised");
        per_shank.push(z);
    }

    let groups = geometry.dv_groups();
    let n_groups = groups.len();
    let mut out = Array2::<f64>::zeros((n_t, n_ch * n_groups));
    for (g, members) in groups.iter().enumerate() {
        let mut merged = Array2::<f64>::zeros((n_t, n_ch));
        for &i in members {
            merged += &per_shank[i];
        }
        out.slice_mut(s![.., g..;n_groups]).assign(&merged);
    }

    let out = match cfg.smooth_um {
        Some(std_um) => gaussian_filter(&out, geometry.merged_step_um(), std_um, None, Axis(1))?,
        None => out,
    };
    debug!(shape = ?out.dim(), step_um = geometry.merged_step_um(), "CSD series");
    Ok(out)
}
