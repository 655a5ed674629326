//! One-dimensional current-source-density estimation.
//!
//! The standard CSD method (Nicholson & Freeman 1975) with the Vaknin
//! boundary condition (Vaknin et al. 1988): potentials at the two end
//! contacts are duplicated one step beyond the array, so every contact gets
//! an estimate and the output keeps the input shape.
//!
//! ```text
//! C[j] = -σ · (φ[j-1] - 2·φ[j] + φ[j+1]) / h²       φ[-1] = φ[0], φ[N] = φ[N-1]
//! ```
//!
//! With φ in volts, h in metres and σ in S/m the result is in A/m³.
use anyhow::Result;
use ndarray::{Array2, ArrayBase, ArrayView2, Axis, Data, Ix2, Zip};
use tracing::trace;

use crate::error::ensure_pre;

/// Estimator turning depth-resolved potentials into current source density.
pub trait CsdEstimator {
    /// `lfp`: `[channels, samples]`; `electrode_positions_m`: one depth per
    /// channel.  Returns `[channels, samples]`.
    fn estimate(
        &self,
        lfp: ArrayView2<'_, f64>,
        electrode_positions_m: &[f64],
        conductivity: f64,
    ) -> Result<Array2<f64>>;
}

/// Second-spatial-difference estimator with Vaknin end contacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StandardCsd;

impl CsdEstimator for StandardCsd {
    fn estimate(
        &self,
        lfp: ArrayView2<'_, f64>,
        electrode_positions_m: &[f64],
        conductivity: f64,
    ) -> Result<Array2<f64>> {
        let (n_ch, n_t) = lfp.dim();
        ensure_pre!(
            electrode_positions_m.len() == n_ch,
            "{} electrode positions for {n_ch} channels",
            electrode_positions_m.len()
        );
        ensure_pre!(n_ch >= 2, "CSD needs at least two contacts, got {n_ch}");
        let h = uniform_spacing(electrode_positions_m)?;

        let scale = -conductivity / (h * h);
        let mut csd = Array2::<f64>::zeros((n_ch, n_t));
        for (j, mut row) in csd.axis_iter_mut(Axis(0)).enumerate() {
            let prev = lfp.row(j.saturating_sub(1));
            let cur = lfp.row(j);
            let next = lfp.row((j + 1).min(n_ch - 1));
            Zip::from(&mut row)
                .and(&prev)
                .and(&cur)
                .and(&next)
                .for_each(|o, &p, &c, &n| *o = scale * (p - 2.0 * c + n));
        }
        trace!(n_ch, n_t, h, "standard CSD");
        Ok(csd)
    }
}

/// Contact pitch, requiring strictly increasing, evenly spaced positions.
fn uniform_spacing(positions: &[f64]) -> Result<f64> {
    let h = positions[1] - positions[0];
    ensure_pre!(h > 0.0, "electrode positions must be strictly increasing");
    let uniform = positions
        .windows(2)
        .all(|w| ((w[1] - w[0]) - h).abs() <= 1e-9 * h);
    ensure_pre!(uniform, "standard CSD requires evenly spaced electrodes");
    Ok(h)
}

/// CSD of one shank sampled every `step_um`.
///
/// `signal` is `[samples, channels]`; contacts are placed at
/// `0, step, 2·step, …` (converted to metres).  Output has the input shape.
pub fn csd_transform<S>(signal: &ArrayBase<S, Ix2>, step_um: u32, conductivity: f64) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    csd_transform_with(&StandardCsd, signal, step_um, conductivity)
}

/// [`csd_transform`] with a caller-chosen estimator.
pub fn csd_transform_with<E, S>(
    estimator: &E,
    signal: &ArrayBase<S, Ix2>,
    step_um: u32,
    conductivity: f64,
) -> Result<Array2<f64>>
where
    E: CsdEstimator + ?Sized,
    S: Data<Elem = f64>,
{
    let n_ch = signal.ncols();
    let positions: Vec<f64> = (0..n_ch).map(|i| step_um as f64 * 1e-6 * i as f64).collect();
    let csd = estimator.estimate(signal.t(), &positions, conductivity)?;
    Ok(csd.reversed_axes().as_standard_layout().into_owned())
}
