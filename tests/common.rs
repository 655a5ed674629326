/// Shared helpers: synthetic signals and on-disk SpikeGLX fixtures.
use ndarray::{Array1, Array2};
use std::f64::consts::PI;
use std::io::Write;
use std::path::{Path, PathBuf};

#[allow(unused)]
/// `amp · sin(2π f t)` sampled at `fs`.
pub fn sine(n: usize, freq_hz: f64, fs: f64, amp: f64) -> Array1<f64> {
    Array1::from_shape_fn(n, |i| amp * (2.0 * PI * freq_hz * i as f64 / fs).sin())
}

#[allow(unused)]
/// Deterministic value for sample `t`, column `c` of a synthetic recording.
pub fn raw_value(t: usize, c: usize) -> i16 {
    (((t * 31 + c * 7) % 2001) as i32 - 1000) as i16
}

#[allow(unused)]
/// Write `recording.bin` + `recording.meta` with `n_cols` saved channels and
/// samples from [`raw_value`].  `meta_chans` overrides `nSavedChans`.
pub fn write_spikeglx(dir: &Path, n_samples: usize, n_cols: usize, meta_chans: usize) -> PathBuf {
    let bin = dir.join("recording.bin");
    let mut bytes = Vec::with_capacity(n_samples * n_cols * 2);
    for t in 0..n_samples {
        for c in 0..n_cols {
            bytes.extend_from_slice(&raw_value(t, c).to_le_bytes());
        }
    }
    std::fs::write(&bin, &bytes).unwrap();

    let mut meta = std::fs::File::create(dir.join("recording.meta")).unwrap();
    writeln!(meta, "imSampRate=2500").unwrap();
    writeln!(meta, "nSavedChans={meta_chans}").unwrap();
    writeln!(meta, "fileSizeBytes={}", bytes.len()).unwrap();
    writeln!(meta, "~snsChanMap=(384,0,1)").unwrap();
    bin
}

#[allow(unused)]
/// Interior slice bounds that skip `edge` samples at each end.
pub fn interior(n: usize, edge: usize) -> std::ops::Range<usize> {
    edge..n - edge
}

#[allow(unused)]
/// Root-mean-square of `x`.
pub fn rms(x: &[f64]) -> f64 {
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

#[allow(unused)]
/// Max absolute difference between two equally-shaped arrays.
pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0_f64, f64::max)
}
