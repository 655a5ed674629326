//! Global z-score normalisation.
//!
//! `zscore_global`: μ = mean(all elements), σ = std (ddof = 0),
//! `out = (x - μ) / σ`.  Used per shank after CSD estimation to remove gain
//! differences between shanks.
use ndarray::{Array, ArrayBase, Data, Dimension};

/// Z-score over every element of `data`.
///
/// Returns `(normalised, mean, std)`.  When `std == 0` the data is only
/// centred, so a flat (e.g. all-zero) window stays flat instead of turning
/// into NaN.  An empty array is returned unchanged with `(NaN, NaN)`.
pub fn zscore_global<S, D>(data: &ArrayBase<S, D>) -> (Array<f64, D>, f64, f64)
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let n = data.len() as f64;
    if data.is_empty() {
        return (data.to_owned(), f64::NAN, f64::NAN);
    }
    let mean = data.sum() / n;
    let var = data.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();

    let out = if std > 0.0 {
        data.mapv(|v| (v - mean) / std)
    } else {
        data.mapv(|v| v - mean)
    };
    (out, mean, std)
}
