mod common;
use common::{raw_value, write_spikeglx};
use hippo_ephys::{
    extract_csd, extract_lfp, extract_wav, load_neuropixels, run_pipeline, CsdConfig, PipelineConfig, PipelineError,
    ProbeGeometry, WaveletConfig,
};
use ndarray::Array2;

#[test]
fn all_zero_recording_stays_zero() {
    let raw = Array2::<i16>::zeros((2500, 384));
    let out = run_pipeline(&raw, &PipelineConfig::default()).unwrap();
    assert_eq!(out.lfp.dim(), (4, 2500, 96));
    assert_eq!(out.csd.dim(), (2500, 192));
    assert_eq!(out.wav.dim(), (1, 2500, 192));
    assert!(out.lfp.iter().all(|&v| v == 0.0));
    assert!(out.csd.iter().all(|&v| v == 0.0));
    assert!(out.wav.iter().all(|c| c.norm() == 0.0));
}

#[test]
fn pipeline_matches_stage_by_stage() {
    let raw = Array2::from_shape_fn((1200, 384), |(t, c)| raw_value(t, c));
    let cfg = PipelineConfig::default();
    let out = run_pipeline(&raw, &cfg).unwrap();

    let lfp = extract_lfp(&raw, &cfg.geometry, &cfg.lfp).unwrap();
    let csd = extract_csd(&lfp, &cfg.geometry, &cfg.csd).unwrap();
    let wav = extract_wav(&csd, &cfg.wavelet).unwrap();
    assert_eq!(out.lfp, lfp);
    assert_eq!(out.csd, csd);
    assert_eq!(out.wav, wav);
}

#[test]
fn several_frequencies_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_spikeglx(dir.path(), 1500, 385, 385);
    let cfg = PipelineConfig {
        csd: CsdConfig { smooth_um: Some(100), ..CsdConfig::default() },
        wavelet: WaveletConfig { freqs_hz: vec![4.0, 7.0, 10.0], ..WaveletConfig::default() },
        ..PipelineConfig::default()
    };
    let raw = load_neuropixels(&bin, 0..1500, 0..384, &cfg.geometry).unwrap();
    let out = run_pipeline(&raw, &cfg).unwrap();
    assert_eq!(out.wav.dim(), (3, 1500, 192));
    assert!(out.wav.iter().all(|c| c.re.is_finite() && c.im.is_finite()));
}

#[test]
fn odd_channel_window_fails_up_front() {
    let raw = Array2::<i16>::zeros((100, 383));
    let err = run_pipeline(&raw, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::PreconditionViolation(_))
    ));
}

#[test]
fn custom_geometry_flows_through() {
    // Two shanks at different depths: merged series interleaves them 1:1.
    let geometry = ProbeGeometry {
        n_channels: 64,
        n_shanks: 2,
        shank_offsets: vec![
            hippo_ephys::ShankOffset { dv_um: 0, ml_um: 0 },
            hippo_ephys::ShankOffset { dv_um: 20, ml_um: 0 },
        ],
        dead_channel: None,
        ..ProbeGeometry::default()
    };
    let cfg = PipelineConfig { geometry, ..PipelineConfig::default() };
    let raw = Array2::from_shape_fn((600, 64), |(t, c)| raw_value(t, c));
    let out = run_pipeline(&raw, &cfg).unwrap();
    assert_eq!(out.lfp.dim(), (2, 600, 32));
    assert_eq!(out.csd.dim(), (600, 64));
}
