//! Common-average reference: subtract the mean across one axis.
//!
//! For a shank `[T, C]` dereferenced over `Axis(1)`:
//! `out[t, c] = x[t, c] - mean(x[t, :])`
use ndarray::{Array, ArrayBase, Axis, Data, Dimension};

/// Subtract the mean over `axis` from every element, keeping dimensionality.
///
/// Returns a new array; NaN in a lane propagates to the whole lane.
/// A zero-length `axis` yields an empty copy.
pub fn dereference<S, D>(signal: &ArrayBase<S, D>, axis: Axis) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let mut out = signal.to_owned();
    for mut lane in out.lanes_mut(axis) {
        if let Some(mean) = lane.mean() {
            lane -= mean;
        }
    }
    out
}
