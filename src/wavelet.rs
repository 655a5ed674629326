//! Continuous wavelet transform at single target frequencies.
//!
//! Follows PyWavelets' conventions so derived products stay comparable with
//! `pywt.cwt(x, scales, 'cmor1.5-1.0')`:
//!
//! 1. Target frequency → cycles per sample: `f / fs`.
//! 2. Scale = `central_frequency(wavelet) / (f / fs)`.
//! 3. The wavelet's running integral (2¹⁰ points on `[-8, 8]`, conjugated
//!    for complex wavelets) is resampled to the scale, convolved with the
//!    signal, differentiated, and multiplied by `-√scale`.
//! 4. The result is centre-cropped to the input length.
//!
//! For the default complex Morlet the central frequency is exactly `C`, so
//! theta (7 Hz) at 2500 Hz uses scale ≈ 357.1.
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use ndarray::{s, Array, Array3, ArrayBase, ArrayView1, Axis, Data, Dimension, Ix2};
use rustfft::{num_complex::Complex, FftPlanner};
use std::f64::consts::PI;
use tracing::debug;

use crate::config::WaveletConfig;
use crate::convolve::convolve_full;
use crate::error::ensure_pre;

/// Lower/upper bound of the sampled wavelet support.
const SUPPORT: (f64, f64) = (-8.0, 8.0);

/// Sampling precision (2^n points) used to estimate the central frequency.
const CENTRAL_FREQ_PRECISION: u32 = 8;

/// Sampling precision (2^n points) of the integrated wavelet.
const INTEGRATION_PRECISION: u32 = 12;

/// Mother wavelet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wavelet {
    /// `ψ(t) = exp(-t²/B) · exp(2πiCt) / √(πB)`, named `cmorB-C`.
    ComplexMorlet { bandwidth: f64, center_frequency: f64 },
    /// Real Morlet `ψ(t) = exp(-t²/2) · cos(5t)`, named `morl`.
    Morlet,
}

impl Default for Wavelet {
    /// `cmor1.5-1.0`.
    fn default() -> Self {
        Wavelet::ComplexMorlet { bandwidth: 1.5, center_frequency: 1.0 }
    }
}

impl Wavelet {
    pub fn is_complex(&self) -> bool {
        matches!(self, Wavelet::ComplexMorlet { .. })
    }

    /// Wavelet value at `t`.
    pub fn psi(&self, t: f64) -> Complex<f64> {
        match *self {
            Wavelet::ComplexMorlet { bandwidth, center_frequency } => {
                let env = (-t * t / bandwidth).exp() / (PI * bandwidth).sqrt();
                Complex::from_polar(env, 2.0 * PI * center_frequency * t)
            }
            Wavelet::Morlet => Complex::new((-t * t / 2.0).exp() * (5.0 * t).cos(), 0.0),
        }
    }

    /// `2^precision` samples of ψ on the support, with their abscissae.
    pub fn wavefun(&self, precision: u32) -> (Vec<Complex<f64>>, Vec<f64>) {
        let n = 1_usize << precision;
        let (lo, hi) = SUPPORT;
        let x: Vec<f64> = (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect();
        let psi = x.iter().map(|&t| self.psi(t)).collect();
        (psi, x)
    }
}

impl fmt::Display for Wavelet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wavelet::ComplexMorlet { bandwidth, center_frequency } => {
                write!(f, "cmor{bandwidth:?}-{center_frequency:?}")
            }
            Wavelet::Morlet => write!(f, "morl"),
        }
    }
}

impl FromStr for Wavelet {
    type Err = anyhow::Error;

    /// Parse `"morl"` or `"cmorB-C"` (e.g. `"cmor1.5-1.0"`).
    fn from_str(s: &str) -> Result<Self> {
        if s == "morl" {
            return Ok(Wavelet::Morlet);
        }
        let Some(params) = s.strip_prefix("cmor") else {
            bail!("unsupported wavelet {s:?} (expected \"morl\" or \"cmorB-C\")");
        };
        let (b, c) = params
            .split_once('-')
            .with_context(|| format!("complex Morlet {s:?} needs bandwidth and centre frequency"))?;
        let bandwidth: f64 = b.parse().with_context(|| format!("bad bandwidth in {s:?}"))?;
        let center_frequency: f64 = c.parse().with_context(|| format!("bad centre frequency in {s:?}"))?;
        if bandwidth <= 0.0 || center_frequency <= 0.0 {
            bail!("wavelet parameters must be positive in {s:?}");
        }
        Ok(Wavelet::ComplexMorlet { bandwidth, center_frequency })
    }
}

/// Dominant frequency of the wavelet in cycles per unit of its support,
/// estimated from the FFT peak of its `2^8`-point sampling.
pub fn central_frequency(wavelet: &Wavelet) -> f64 {
    let (mut psi, x) = wavelet.wavefun(CENTRAL_FREQ_PRECISION);
    let n = psi.len();
    let domain = x[n - 1] - x[0];

    FftPlanner::<f64>::new().plan_fft_forward(n).process(&mut psi);

    // First maximum over bins 1.. (DC excluded).
    let mut best = 1;
    for k in 2..n {
        if psi[k].norm() > psi[best].norm() {
            best = k;
        }
    }
    let mut index = best + 1;
    if index > n / 2 {
        index = n - index + 2;
    }
    1.0 / (domain / (index - 1) as f64)
}

/// Scale at which `wavelet` responds to `cycles_per_sample`.
pub fn frequency_to_scale(wavelet: &Wavelet, cycles_per_sample: f64) -> f64 {
    central_frequency(wavelet) / cycles_per_sample
}

/// Running integral of ψ (conjugated for complex wavelets).
fn integrate_wavelet(wavelet: &Wavelet) -> (Vec<Complex<f64>>, f64, f64) {
    let (psi, x) = wavelet.wavefun(INTEGRATION_PRECISION);
    let step = x[1] - x[0];
    let range = x[x.len() - 1] - x[0];
    let mut acc = Complex::new(0.0, 0.0);
    let int_psi = psi
        .iter()
        .map(|&p| {
            acc += p;
            let v = acc * step;
            if wavelet.is_complex() { v.conj() } else { v }
        })
        .collect();
    (int_psi, step, range)
}

/// Integrated wavelet resampled to `scale`, reversed for convolution.
fn scaled_kernel(wavelet: &Wavelet, scale: f64) -> Result<Vec<Complex<f64>>> {
    ensure_pre!(scale.is_finite() && scale > 0.0, "wavelet scale must be positive, got {scale}");
    let (int_psi, step, range) = integrate_wavelet(wavelet);

    let n_j = (scale * range + 1.0).ceil() as usize;
    let mut kernel: Vec<Complex<f64>> = (0..n_j)
        .map(|k| (k as f64 / (scale * step)) as usize)
        .filter(|&j| j < int_psi.len())
        .map(|j| int_psi[j])
        .collect();
    kernel.reverse();

    ensure_pre!(kernel.len() >= 2, "selected scale of {scale} too small");
    Ok(kernel)
}

/// Coefficients of a 1-D signal with a kernel from [`scaled_kernel`].
fn cwt_with_kernel(signal: &[f64], kernel: &[Complex<f64>], scale: f64) -> Vec<Complex<f64>> {
    let n = signal.len();
    if n == 0 {
        return vec![];
    }
    let conv = convolve_full(signal, kernel);
    let gain = -scale.sqrt();
    let coef: Vec<Complex<f64>> = conv.windows(2).map(|w| (w[1] - w[0]) * gain).collect();

    let d = (coef.len() - n) as f64 / 2.0;
    let start = d.floor() as usize;
    coef[start..start + n].to_vec()
}

/// Continuous wavelet transform of `signal` at one `scale`.
///
/// Output has the input length.
///
/// # Errors
///
/// `PreconditionViolation` if the scale is non-positive or too small for the
/// sampled wavelet.
pub fn cwt_single_scale(signal: &[f64], scale: f64, wavelet: &Wavelet) -> Result<Vec<Complex<f64>>> {
    let kernel = scaled_kernel(wavelet, scale)?;
    Ok(cwt_with_kernel(signal, &kernel, scale))
}

/// Complex coefficients of `signal` at `target_freq_hz` along `axis`.
///
/// # Errors
///
/// `PreconditionViolation` for non-positive rates/frequencies or a scale too
/// small for the wavelet.
pub fn wavelet_transform<S, D>(
    signal: &ArrayBase<S, D>,
    sample_rate_hz: f64,
    target_freq_hz: f64,
    wavelet: &Wavelet,
    axis: Axis,
) -> Result<Array<Complex<f64>, D>>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    ensure_pre!(sample_rate_hz > 0.0, "sample rate must be positive, got {sample_rate_hz}");
    ensure_pre!(target_freq_hz > 0.0, "target frequency must be positive, got {target_freq_hz}");

    let scale = frequency_to_scale(wavelet, target_freq_hz / sample_rate_hz);
    let kernel = scaled_kernel(wavelet, scale)?;
    debug!(target_freq_hz, scale, taps = kernel.len(), %wavelet, "wavelet kernel");

    let mut out = Array::from_elem(signal.raw_dim(), Complex::new(0.0, 0.0));
    for (mut dst, src) in out.lanes_mut(axis).into_iter().zip(signal.lanes(axis)) {
        let x: Vec<f64> = src.to_vec();
        let coef = cwt_with_kernel(&x, &kernel, scale);
        dst.assign(&ArrayView1::from(&coef));
    }
    Ok(out)
}

/// Batch [`wavelet_transform`] over `cfg.freqs_hz` for a `[samples, channels]`
/// signal.  Returns `[frequencies, samples, channels]`.
pub fn extract_wav<S>(signal: &ArrayBase<S, Ix2>, cfg: &WaveletConfig) -> Result<Array3<Complex<f64>>>
where
    S: Data<Elem = f64>,
{
    let (n_t, n_ch) = signal.dim();
    let mut out = Array3::from_elem((cfg.freqs_hz.len(), n_t, n_ch), Complex::new(0.0, 0.0));
    for (i, &f) in cfg.freqs_hz.iter().enumerate() {
        let coef = wavelet_transform(signal, cfg.sample_rate_hz, f, &cfg.wavelet, Axis(0))?;
        out.slice_mut(s![i, .., ..]).assign(&coef);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn parse_and_display() {
        let w: Wavelet = "cmor1.5-1.0".parse().unwrap();
        assert_eq!(w, Wavelet::default());
        assert_eq!(w.to_string(), "cmor1.5-1.0");
        assert_eq!("morl".parse::<Wavelet>().unwrap(), Wavelet::Morlet);
        assert!("db4".parse::<Wavelet>().is_err());
        assert!("cmor1.5".parse::<Wavelet>().is_err());
    }

    #[test]
    fn central_frequencies() {
        approx::assert_abs_diff_eq!(central_frequency(&Wavelet::default()), 1.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(central_frequency(&Wavelet::Morlet), 0.8125, epsilon = 1e-12);
    }

    #[test]
    fn theta_scale_at_lfp_rate() {
        let s = frequency_to_scale(&Wavelet::default(), 7.0 / 2500.0);
        approx::assert_abs_diff_eq!(s, 2500.0 / 7.0, epsilon = 1e-9);
    }

    #[test]
    fn output_length_matches_input() {
        let x: Vec<f64> = (0..300).map(|i| (i as f64 * 0.1).sin()).collect();
        for scale in [0.5, 2.0, 10.0, 50.0] {
            let c = cwt_single_scale(&x, scale, &Wavelet::default()).unwrap();
            assert_eq!(c.len(), x.len());
        }
    }

    #[test]
    fn non_positive_scale_rejected() {
        assert!(cwt_single_scale(&[1.0, 2.0], 0.0, &Wavelet::default()).is_err());
        assert!(cwt_single_scale(&[1.0, 2.0], -3.0, &Wavelet::default()).is_err());
    }

    #[test]
    fn transform_keeps_shape() {
        let x = Array2::from_shape_fn((400, 3), |(t, c)| (t as f64 * 0.05 * (c + 1) as f64).sin());
        let w = wavelet_transform(&x, 2500.0, 40.0, &Wavelet::default(), Axis(0)).unwrap();
        assert_eq!(w.dim(), (400, 3));
    }
}
