mod common;
use common::raw_value;
use hippo_ephys::{
    csd_transform, extract_csd, extract_csd_with, extract_lfp, CsdConfig, CsdEstimator, LfpConfig, PipelineError,
    ProbeGeometry,
};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};

#[test]
fn merged_series_has_twice_the_sites() {
    let raw = Array2::from_shape_fn((800, 384), |(t, c)| raw_value(t, c));
    let g = ProbeGeometry::default();
    let lfp = extract_lfp(&raw, &g, &LfpConfig::default()).unwrap();
    let csd = extract_csd(&lfp, &g, &CsdConfig::default()).unwrap();
    assert_eq!(csd.dim(), (800, 192));
    assert!(csd.iter().all(|v| v.is_finite()));
}

#[test]
fn groups_are_zscored_sums() {
    // Without smoothing, column 2k is z(shank0) + z(shank1) at site k and
    // column 2k+1 is z(shank2) + z(shank3).
    let g = ProbeGeometry::default();
    let lfp = Array3::from_shape_fn((4, 30, 12), |(sh, t, c)| {
        ((sh * 13 + t * 7 + c * c * 5) % 29) as f64 - 14.0
    });
    let cfg = CsdConfig { smooth_um: None, ..CsdConfig::default() };
    let merged = extract_csd(&lfp, &g, &cfg).unwrap();

    let z: Vec<Array2<f64>> = (0..4)
        .map(|sh| {
            let c = csd_transform(&lfp.slice(s![sh, .., ..]), 40, 0.3).unwrap();
            hippo_ephys::zscore_global(&c).0
        })
        .collect();
    for t in 0..30 {
        for k in 0..12 {
            approx::assert_abs_diff_eq!(merged[[t, 2 * k]], z[0][[t, k]] + z[1][[t, k]], epsilon = 1e-9);
            approx::assert_abs_diff_eq!(merged[[t, 2 * k + 1]], z[2][[t, k]] + z[3][[t, k]], epsilon = 1e-9);
        }
    }
}

#[test]
fn wrong_shank_count_is_rejected() {
    let g = ProbeGeometry::default();
    for n in [1, 3, 5] {
        let lfp = Array3::<f64>::zeros((n, 10, 8));
        let err = extract_csd(&lfp, &g, &CsdConfig::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::PreconditionViolation(_))
        ));
    }
}

#[test]
fn smoothing_width_must_match_merged_step() {
    let lfp = Array3::<f64>::zeros((4, 10, 8));
    let cfg = CsdConfig { smooth_um: Some(30), ..CsdConfig::default() };
    assert!(extract_csd(&lfp, &ProbeGeometry::default(), &cfg).is_err());
    let cfg = CsdConfig { smooth_um: Some(100), ..CsdConfig::default() };
    assert!(extract_csd(&lfp, &ProbeGeometry::default(), &cfg).is_ok());
}

/// Estimator that returns the potentials unchanged.
struct Identity;

impl CsdEstimator for Identity {
    fn estimate(&self, lfp: ArrayView2<'_, f64>, _: &[f64], _: f64) -> anyhow::Result<Array2<f64>> {
        Ok(lfp.to_owned())
    }
}

#[test]
fn estimator_is_pluggable() {
    let g = ProbeGeometry::default();
    let lfp = Array3::from_shape_fn((4, 6, 5), |(sh, t, c)| (sh + t * c) as f64);
    let cfg = CsdConfig { smooth_um: None, ..CsdConfig::default() };
    let merged = extract_csd_with(&Identity, &lfp, &g, &cfg).unwrap();
    assert_eq!(merged.dim(), (6, 10));
    // Each group sums two z-scored shanks, so the even columns average to zero.
    let even_mean = merged.slice(s![.., 0..;2]).mean().unwrap();
    approx::assert_abs_diff_eq!(even_mean, 0.0, epsilon = 1e-12);
    assert!(merged.axis_iter(Axis(1)).any(|col| col.iter().any(|&v| v != 0.0)));
}
