//! Butterworth IIR design as second-order sections.
//!
//! Matches `scipy.signal.butter(N, Wn, btype, output='sos')` up to rounding:
//!   • analog prototype poles `-exp(iπm / 2N)`, m = -N+1, -N+3, …, N-1
//!   • frequency pre-warping `ω = 4·tan(π·Wn / 2)` (digital fs = 2)
//!   • low-pass / high-pass transform of the prototype
//!   • bilinear transform to the z-plane
//!   • conjugate pole pairs → biquads, farthest-from-unit-circle first,
//!     overall gain folded into the first section
use anyhow::Result;
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

use crate::error::ensure_pre;

/// One second-order section `[b0, b1, b2, a0, a1, a2]` with `a0 = 1`.
pub type Sos = [f64; 6];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandType {
    Lowpass,
    Highpass,
}

/// Design a digital Butterworth filter of `order` at `cutoff_hz`.
///
/// The cutoff is normalised to Nyquist: `Wn = cutoff_hz / (sample_rate_hz / 2)`.
///
/// # Errors
///
/// `PreconditionViolation` if `order == 0` or `Wn` is outside `(0, 1)`.
pub fn butter_sos(order: usize, cutoff_hz: f64, sample_rate_hz: f64, band: BandType) -> Result<Vec<Sos>> {
    ensure_pre!(order > 0, "filter order must be positive");
    ensure_pre!(sample_rate_hz > 0.0, "sample rate must be positive, got {sample_rate_hz}");
    let nyq = sample_rate_hz / 2.0;
    let wn = cutoff_hz / nyq;
    ensure_pre!(
        wn > 0.0 && wn < 1.0,
        "cutoff {cutoff_hz} Hz must lie strictly between 0 and Nyquist ({nyq} Hz)"
    );

    let n = order as i64;
    let proto: Vec<Complex<f64>> = (0..n)
        .map(|i| {
            let m = (-n + 1 + 2 * i) as f64;
            -Complex::from_polar(1.0, PI * m / (2.0 * n as f64))
        })
        .collect();

    let warped = 4.0 * (PI * wn / 2.0).tan();

    // Analog transform of the unit-cutoff prototype (no finite zeros, k = 1).
    let (zeros, poles, k): (Vec<Complex<f64>>, Vec<Complex<f64>>, f64) = match band {
        BandType::Lowpass => {
            let p = proto.iter().map(|&p| p * warped).collect();
            (vec![], p, warped.powi(order as i32))
        }
        BandType::Highpass => {
            let p = proto.iter().map(|&p| warped / p).collect();
            let prod_neg_p = proto.iter().fold(Complex::new(1.0, 0.0), |acc, &p| acc * -p);
            (vec![Complex::new(0.0, 0.0); order], p, (Complex::new(1.0, 0.0) / prod_neg_p).re)
        }
    };

    // Bilinear transform, fs2 = 2 · fs = 4.
    let fs2 = 4.0;
    let mut zd: Vec<Complex<f64>> = zeros.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    let pd: Vec<Complex<f64>> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
    zd.resize(pd.len(), Complex::new(-1.0, 0.0));
    let num = zeros.iter().fold(Complex::new(1.0, 0.0), |acc, &z| acc * (fs2 - z));
    let den = poles.iter().fold(Complex::new(1.0, 0.0), |acc, &p| acc * (fs2 - p));
    let kd = k * (num / den).re;

    Ok(pair_sections(&zd, &pd, kd))
}

/// Group z-plane zeros/poles into second-order sections.
///
/// All Butterworth zeros sit at the same point (±1), so any zero pairing is
/// equivalent; poles are paired with their conjugates.
fn pair_sections(zeros: &[Complex<f64>], poles: &[Complex<f64>], k: f64) -> Vec<Sos> {
    let mut pairs: Vec<Complex<f64>> = poles.iter().copied().filter(|p| p.im > 1e-14).collect();
    let reals: Vec<f64> = poles.iter().filter(|p| p.im.abs() <= 1e-14).map(|p| p.re).collect();
    pairs.sort_by(|a, b| a.norm().total_cmp(&b.norm()));

    let mut zeros = zeros.iter().map(|z| z.re);
    let mut sos: Vec<Sos> = Vec::with_capacity(pairs.len() + reals.len());

    for r in reals {
        let z = zeros.next().unwrap_or(-1.0);
        sos.push([1.0, -z, 0.0, 1.0, -r, 0.0]);
    }
    for p in pairs {
        let z1 = zeros.next().unwrap_or(-1.0);
        let z2 = zeros.next().unwrap_or(-1.0);
        sos.push([1.0, -(z1 + z2), z1 * z2, 1.0, -2.0 * p.re, p.norm_sqr()]);
    }

    if let Some(first) = sos.first_mut() {
        for b in first.iter_mut().take(3) {
            *b *= k;
        }
    }
    sos
}

/// Magnitude response `|H(e^{iω})|` of a cascade at `freq_hz`.
pub fn sos_gain(sos: &[Sos], freq_hz: f64, sample_rate_hz: f64) -> f64 {
    let w = 2.0 * PI * freq_hz / sample_rate_hz;
    let z1 = Complex::from_polar(1.0, -w);
    let z2 = z1 * z1;
    sos.iter()
        .map(|s| {
            let num = s[0] + z1 * s[1] + z2 * s[2];
            let den = s[3] + z1 * s[4] + z2 * s[5];
            (num / den).norm()
        })
        .product()
}
