//! Overlap-add FFT convolution of a real signal with a complex kernel.
//!
//! Produces the **full** linear convolution (`len(x) + len(h) - 1` samples,
//! same as `numpy.convolve(x, h, mode='full')`).  Long wavelet kernels
//! (thousands of taps at theta frequencies) make direct convolution
//! impractical on hour-long recordings.
use rustfft::{num_complex::Complex, FftPlanner};

/// Full linear convolution `x * h`.
pub fn convolve_full(x: &[f64], h: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let n_x = x.len();
    let n_h = h.len();
    if n_x == 0 || n_h == 0 {
        return vec![];
    }
    let n_out = n_x + n_h - 1;

    let n_fft = choose_fft_len(n_h, n_x);
    let n_seg = n_fft - n_h + 1;

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fft_fwd = planner.plan_fft_forward(n_fft);
    let fft_inv = planner.plan_fft_inverse(n_fft);
    let inv_scale = 1.0 / n_fft as f64;

    let mut h_fft: Vec<Complex<f64>> = h
        .iter()
        .copied()
        .chain(std::iter::repeat(Complex::default()))
        .take(n_fft)
        .collect();
    fft_fwd.process(&mut h_fft);

    let mut out = vec![Complex::<f64>::default(); n_out];
    let mut buf = vec![Complex::<f64>::default(); n_fft];

    for start in (0..n_x).step_by(n_seg) {
        let stop = (start + n_seg).min(n_x);

        buf.iter_mut().for_each(|b| *b = Complex::default());
        for (b, &v) in buf.iter_mut().zip(&x[start..stop]) {
            b.re = v;
        }

        fft_fwd.process(&mut buf);
        for (b, &hf) in buf.iter_mut().zip(h_fft.iter()) {
            *b *= hf;
        }
        fft_inv.process(&mut buf);

        let n_valid = (stop - start) + n_h - 1;
        for (o, b) in out[start..].iter_mut().zip(buf.iter()).take(n_valid) {
            *o += *b * inv_scale;
        }
    }
    out
}

/// Choose the FFT block size (power of 2 minimising operation count).
///
/// Cost model: `ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;

    let max_pow = ((n_x + n_h) as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow.max(min_pow);
    let mut best_cost = f64::INFINITY;

    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft { continue; }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(x: &[f64], h: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let mut out = vec![Complex::default(); x.len() + h.len() - 1];
        for (i, &xv) in x.iter().enumerate() {
            for (j, &hv) in h.iter().enumerate() {
                out[i + j] += hv * xv;
            }
        }
        out
    }

    #[test]
    fn matches_direct_convolution() {
        let x: Vec<f64> = (0..777).map(|i| ((i * 13 % 17) as f64 - 8.0) / 3.0).collect();
        let h: Vec<Complex<f64>> = (0..45)
            .map(|i| Complex::new((i as f64 * 0.3).cos(), (i as f64 * 0.7).sin()))
            .collect();
        let got = convolve_full(&x, &h);
        let exp = direct(&x, &h);
        assert_eq!(got.len(), exp.len());
        for (g, e) in got.iter().zip(exp.iter()) {
            approx::assert_abs_diff_eq!(g.re, e.re, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(g.im, e.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn kernel_longer_than_signal() {
        let x = [1.0, 2.0];
        let h: Vec<Complex<f64>> = (0..10).map(|i| Complex::new(i as f64, 1.0)).collect();
        let got = convolve_full(&x, &h);
        let exp = direct(&x, &h);
        for (g, e) in got.iter().zip(exp.iter()) {
            approx::assert_abs_diff_eq!(g.re, e.re, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(g.im, e.im, epsilon = 1e-9);
        }
    }

    #[test]
    fn empty_inputs() {
        assert!(convolve_full(&[], &[Complex::new(1.0, 0.0)]).is_empty());
        assert!(convolve_full(&[1.0], &[]).is_empty());
    }
}
