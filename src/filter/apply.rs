//! Zero-phase forward-backward filtering with second-order sections.
//!
//! Matches `scipy.signal.sosfiltfilt(sos, x, padtype='odd')`:
//!   1. Odd-extend the signal by `3 · (2·n_sections + 1)` samples per side
//!      (clamped to `len - 1` so short windows still filter).
//!   2. Run the cascade forward with steady-state initial conditions scaled
//!      by the first sample.
//!   3. Reverse, run again seeded by the last output, reverse back.
//!   4. Strip the extension.
//!
//! The magnitude response is squared and the phase cancels, so no group
//! delay is introduced.
use anyhow::Result;
use ndarray::{Array, ArrayBase, ArrayView1, Axis, Data, Dimension};

use super::design::{butter_sos, BandType, Sos};

/// Zero-phase Butterworth low-pass along `axis`.
///
/// # Errors
///
/// `PreconditionViolation` if `cutoff_hz` is not strictly inside `(0, Nyquist)`.
pub fn lowpass_filter<S, D>(
    signal: &ArrayBase<S, D>,
    sample_rate_hz: f64,
    cutoff_hz: f64,
    order: usize,
    axis: Axis,
) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let sos = butter_sos(order, cutoff_hz, sample_rate_hz, BandType::Lowpass)?;
    Ok(sosfiltfilt(signal, &sos, axis))
}

/// Zero-phase Butterworth high-pass along `axis`.
///
/// # Errors
///
/// `PreconditionViolation` if `cutoff_hz` is not strictly inside `(0, Nyquist)`.
pub fn highpass_filter<S, D>(
    signal: &ArrayBase<S, D>,
    sample_rate_hz: f64,
    cutoff_hz: f64,
    order: usize,
    axis: Axis,
) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let sos = butter_sos(order, cutoff_hz, sample_rate_hz, BandType::Highpass)?;
    Ok(sosfiltfilt(signal, &sos, axis))
}

/// Apply `sos` forward and backward to every lane along `axis`.
pub fn sosfiltfilt<S, D>(signal: &ArrayBase<S, D>, sos: &[Sos], axis: Axis) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let mut out = signal.to_owned();
    for mut lane in out.lanes_mut(axis) {
        let x: Vec<f64> = lane.to_vec();
        let y = sosfiltfilt_1d(sos, &x);
        lane.assign(&ArrayView1::from(&y));
    }
    out
}

/// Forward-backward filter a single 1-D signal.  Output has the input length.
pub fn sosfiltfilt_1d(sos: &[Sos], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 0 || sos.is_empty() {
        return x.to_vec();
    }

    let trailing_zeros = sos.iter().filter(|s| s[2] == 0.0).count()
        .min(sos.iter().filter(|s| s[5] == 0.0).count());
    let n_taps = 2 * sos.len() + 1 - trailing_zeros;
    let pad = (3 * n_taps).min(n - 1);

    let ext = odd_ext(x, pad);
    let zi = sosfilt_zi(sos);

    let mut y = sosfilt(sos, &ext, &zi, ext[0]);
    y.reverse();
    let y0 = y[0];
    let mut y = sosfilt(sos, &y, &zi, y0);
    y.reverse();

    y[pad..pad + n].to_vec()
}

/// Run the cascade once (transposed direct form II), with initial state
/// `zi · x0` per section.
fn sosfilt(sos: &[Sos], x: &[f64], zi: &[[f64; 2]], x0: f64) -> Vec<f64> {
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
    let mut y = x.to_vec();
    for (s, z) in sos.iter().zip(state.iter_mut()) {
        let [b0, b1, b2, _a0, a1, a2] = *s;
        for v in y.iter_mut() {
            let xin = *v;
            let out = b0 * xin + z[0];
            z[0] = b1 * xin - a1 * out + z[1];
            z[1] = b2 * xin - a2 * out;
            *v = out;
        }
    }
    y
}

/// Steady-state initial conditions for a unit step through the cascade
/// (`scipy.signal.sosfilt_zi`).
pub fn sosfilt_zi(sos: &[Sos]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sos.iter()
        .map(|s| {
            let [b0, b1, b2, _a0, a1, a2] = *s;
            // Solve (I - Aᵀ)·zi = B for the 2-state companion form.
            let rhs0 = b1 - a1 * b0;
            let rhs1 = b2 - a2 * b0;
            let det = 1.0 + a1 + a2;
            let zi0 = (rhs0 + rhs1) / det;
            let zi1 = ((1.0 + a1) * rhs1 - a2 * rhs0) / det;
            let z = [scale * zi0, scale * zi1];
            scale *= (b0 + b1 + b2) / (1.0 + a1 + a2);
            z
        })
        .collect()
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Odd extension (matches SciPy's `odd_ext`).
///
/// Left:  `pad[i] = 2*x[0] - x[n_pad-i]`  for i in 0..n_pad
/// Right: `pad[i] = 2*x[-1] - x[-(i+2)]`  for i in 0..n_pad
fn odd_ext(x: &[f64], n_pad: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n + 2 * n_pad);

    for i in (1..=n_pad).rev() {
        out.push(2.0 * x[0] - x[i]);
    }
    out.extend_from_slice(x);
    let last = x[n - 1];
    for i in 1..=n_pad {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out
}
