//! Gaussian spatial smoothing across recording sites.
//!
//! Matches `scipy.ndimage.gaussian_filter1d(x, sigma, radius=radius, mode='reflect')`
//! with `sigma = std_um / step_um` and `radius = radius_um / step_um`
//! (default `3 · sigma`).  Physical lengths are integer micrometres and must
//! be whole multiples of the site step.
use anyhow::Result;
use ndarray::{Array, ArrayBase, Axis, Data, Dimension};

use crate::error::ensure_pre;

/// Smooth `signal` along `axis` with a Gaussian of `std_um` micrometres.
///
/// # Errors
///
/// `PreconditionViolation` if `step_um` or `std_um` is zero, or if `std_um`
/// (or `radius_um`, when given) is not evenly divisible by `step_um`.
pub fn gaussian_filter<S, D>(
    signal: &ArrayBase<S, D>,
    step_um: u32,
    std_um: u32,
    radius_um: Option<u32>,
    axis: Axis,
) -> Result<Array<f64, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    ensure_pre!(step_um > 0, "site step must be positive");
    ensure_pre!(std_um > 0, "smoothing std must be positive");
    ensure_pre!(
        std_um % step_um == 0,
        "smoothing std {std_um} µm must divide evenly by step size {step_um} µm"
    );
    let sigma = (std_um / step_um) as usize;
    let radius = match radius_um {
        Some(r) => {
            ensure_pre!(
                r % step_um == 0,
                "kernel radius {r} µm must divide evenly by step size {step_um} µm"
            );
            (r / step_um) as usize
        }
        None => 3 * sigma,
    };

    let kernel = gaussian_kernel(sigma as f64, radius);
    let mut out = signal.to_owned();
    for (mut dst, src) in out.lanes_mut(axis).into_iter().zip(signal.lanes(axis)) {
        let n = src.len();
        for i in 0..n {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let j = reflect_index(i as isize + k as isize - radius as isize, n);
                acc += w * src[j];
            }
            dst[i] = acc;
        }
    }
    Ok(out)
}

/// Normalised Gaussian weights for offsets `-radius..=radius`.
pub fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f64> {
    let r = radius as isize;
    let w: Vec<f64> = (-r..=r)
        .map(|x| (-0.5 * (x * x) as f64 / (sigma * sigma)).exp())
        .collect();
    let s: f64 = w.iter().sum();
    w.into_iter().map(|v| v / s).collect()
}

/// Half-sample symmetric reflection: `d c b a | a b c d | d c b a`.
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period);
    if m < n as isize { m as usize } else { (period - 1 - m) as usize }
}
