mod common;
use common::{raw_value, write_spikeglx};
use hippo_ephys::{load_neuropixels, PipelineError, ProbeGeometry, RawRecording};

fn is_precondition(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::PreconditionViolation(_)))
}

#[test]
fn window_returns_exact_samples() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_spikeglx(dir.path(), 200, 385, 385);
    let geometry = ProbeGeometry::default();

    let rec = RawRecording::open(&bin, &geometry).unwrap();
    assert_eq!(rec.n_samples(), 200);
    assert_eq!(rec.n_channels(), 385);
    assert_eq!(rec.meta.as_ref().and_then(|m| m.sample_rate_hz()), Some(2500.0));

    let w = rec.window(10..50, 8..96).unwrap();
    assert_eq!(w.dim(), (40, 88));
    for ((t, c), &v) in w.indexed_iter() {
        assert_eq!(v, raw_value(10 + t, 8 + c));
    }
}

#[test]
fn dead_channel_is_replaced_by_neighbour_mean() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_spikeglx(dir.path(), 100, 385, 385);
    let geometry = ProbeGeometry::default();

    let full = load_neuropixels(&bin, 0..100, 0..384, &geometry).unwrap();
    // Window touching only the dead channel's block: neighbours lie outside it.
    let narrow = load_neuropixels(&bin, 0..100, 188..192, &geometry).unwrap();
    for t in 0..100 {
        let expected = (raw_value(t, 187) as i32 + raw_value(t, 195) as i32).div_euclid(2) as i16;
        assert_eq!(full[[t, 191]], expected);
        assert_eq!(narrow[[t, 3]], expected);
        assert_eq!(full[[t, 190]], raw_value(t, 190));
    }
}

#[test]
fn windows_without_dead_channel_are_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_spikeglx(dir.path(), 20, 385, 385);
    let w = load_neuropixels(&bin, 0..20, 192..384, &ProbeGeometry::default()).unwrap();
    for ((t, c), &v) in w.indexed_iter() {
        assert_eq!(v, raw_value(t, 192 + c));
    }
}

#[test]
fn channel_count_mismatch_fails_consistency_check() {
    let dir = tempfile::tempdir().unwrap();
    // 1000 rows of 385 columns but metadata claims 384 saved channels.
    let bin = write_spikeglx(dir.path(), 1000, 385, 384);
    let err = RawRecording::open(&bin, &ProbeGeometry::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::ConsistencyCheckFailure(_))
    ));
}

#[test]
fn window_bounds_are_checked() {
    let dir = tempfile::tempdir().unwrap();
    let bin = write_spikeglx(dir.path(), 50, 385, 385);
    let rec = RawRecording::open(&bin, &ProbeGeometry::default()).unwrap();

    assert!(is_precondition(&rec.window(0..10, 1..5).unwrap_err()));
    assert!(is_precondition(&rec.window(0..10, 0..6).unwrap_err()));
    assert!(is_precondition(&rec.window(0..10, 0..388).unwrap_err()));
    assert!(is_precondition(&rec.window(0..51, 0..4).unwrap_err()));
    assert!(is_precondition(&rec.window(10..5, 0..4).unwrap_err()));

    let empty = rec.window(5..5, 0..4).unwrap();
    assert_eq!(empty.dim(), (0, 4));
}

#[test]
fn missing_meta_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("lonely.bin");
    std::fs::write(&bin, vec![0u8; 770]).unwrap();
    assert!(RawRecording::open(&bin, &ProbeGeometry::default()).is_err());
}

#[test]
fn headerless_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("continuous.dat");
    let mut bytes = Vec::new();
    for t in 0..30 {
        for c in 0..384 {
            bytes.extend_from_slice(&raw_value(t, c).to_le_bytes());
        }
    }
    std::fs::write(&path, &bytes).unwrap();

    let rec = RawRecording::open_flat(&path, 384, &ProbeGeometry::default()).unwrap();
    assert_eq!(rec.n_samples(), 30);
    assert!(rec.meta.is_none());
    let w = rec.window(0..30, 184..196).unwrap();
    assert_eq!(w[[4, 3]], raw_value(4, 187));
    assert_eq!(w[[4, 7]], ((raw_value(4, 187) as i32 + raw_value(4, 195) as i32).div_euclid(2)) as i16);

    assert!(RawRecording::open_flat(&path, 385, &ProbeGeometry::default()).is_err());
}
