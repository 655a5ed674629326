//! Raw Neuropixels recordings.
//!
//! # Layout
//! ```text
//! recording.bin   int16 little-endian, row-major [n_samples, nSavedChans]
//! recording.meta  key=value lines (SpikeGLX), '~' prefix on some keys
//! ```
//!
//! `n_samples = fileSizeBytes / 2 / nSavedChans`, which must agree with the
//! same computation using the hardware channel count (384 signal + 1 sync).
//! The payload is memory-mapped read-only; only the requested window is
//! decoded into memory.
//!
//! # Channel repair
//! Channel 191 records no usable signal.  When it falls inside the requested
//! window it is replaced by the floor-average of its same-shank depth
//! neighbours (187 and 195).
use std::collections::BTreeMap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use ndarray::Array2;
use tracing::{debug, info};

use crate::config::ProbeGeometry;
use crate::error::{ensure_pre, PipelineError};

const BYTES_PER_SAMPLE: usize = 2;

// ── Metadata ────────────────────────────────────────────────────────────────

/// Parsed SpikeGLX `.meta` sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeGlxMeta {
    /// Columns per sample row in the binary (`nSavedChans`).
    pub n_saved_chans: usize,
    /// Declared payload size (`fileSizeBytes`).
    pub file_size_bytes: u64,
    /// Every key/value pair, `~` prefixes stripped.
    pub entries: BTreeMap<String, String>,
}

impl SpikeGlxMeta {
    /// Parse `key=value` lines.  Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` if a line has no `=`, or if `nSavedChans` /
    /// `fileSizeBytes` are missing or not integers.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let line = line.trim_matches('~');
            let (k, v) = line.split_once('=').ok_or_else(|| {
                PipelineError::PreconditionViolation(format!("metadata line without '=': {line:?}"))
            })?;
            entries.insert(k.trim().to_string(), v.trim().to_string());
        }

        let n_saved_chans = required(&entries, "nSavedChans")?;
        let file_size_bytes = required(&entries, "fileSizeBytes")?;
        ensure_pre!(n_saved_chans > 0, "nSavedChans must be positive");
        Ok(Self { n_saved_chans: n_saved_chans as usize, file_size_bytes, entries })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading metadata {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing metadata {}", path.display()))
    }

    /// Samples implied by the declared size and channel count.
    pub fn n_samples(&self) -> usize {
        (self.file_size_bytes as usize / BYTES_PER_SAMPLE) / self.n_saved_chans
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// `imSampRate`, when present.
    pub fn sample_rate_hz(&self) -> Option<f64> {
        self.get("imSampRate")?.parse().ok()
    }
}

fn required(entries: &BTreeMap<String, String>, key: &str) -> Result<u64> {
    let raw = entries.get(key).ok_or_else(|| {
        PipelineError::PreconditionViolation(format!("metadata is missing {key}"))
    })?;
    raw.parse().map_err(|_| {
        PipelineError::PreconditionViolation(format!("metadata {key}={raw:?} is not an integer")).into()
    })
}

// ── RawRecording ────────────────────────────────────────────────────────────

/// A memory-mapped int16 recording, `[n_samples, n_channels]` row-major.
#[derive(Debug)]
pub struct RawRecording {
    /// File the samples are mapped from.
    pub path: PathBuf,
    /// Sidecar metadata (absent for headerless recordings).
    pub meta: Option<SpikeGlxMeta>,
    pub geometry: ProbeGeometry,
    n_samples: usize,
    n_channels: usize,
    mmap: Mmap,
}

impl RawRecording {
    /// Open a SpikeGLX `.bin` whose `.meta` sits next to it.
    ///
    /// # Errors
    ///
    /// * `ConsistencyCheckFailure` if the sample count implied by
    ///   `nSavedChans` differs from the one implied by
    ///   `geometry.hardware_channel_count`.
    /// * `PreconditionViolation` if the binary is shorter than declared.
    pub fn open(bin_path: impl AsRef<Path>, geometry: &ProbeGeometry) -> Result<Self> {
        let bin_path = bin_path.as_ref();
        let meta = SpikeGlxMeta::from_path(&bin_path.with_extension("meta"))?;

        let n_samples = meta.n_samples();
        let n_reference = (meta.file_size_bytes as usize / BYTES_PER_SAMPLE) / geometry.hardware_channel_count;
        if n_samples != n_reference {
            return Err(PipelineError::ConsistencyCheckFailure(format!(
                "{}: {} saved channels imply {n_samples} samples, hardware layout of {} channels implies {n_reference}",
                bin_path.display(),
                meta.n_saved_chans,
                geometry.hardware_channel_count,
            ))
            .into());
        }

        let n_channels = meta.n_saved_chans;
        let rec = Self::map(bin_path, n_samples, n_channels, Some(meta), geometry)?;
        info!(path = %bin_path.display(), n_samples, n_channels, "opened SpikeGLX recording");
        Ok(rec)
    }

    /// Open a headerless recording with `n_channels` columns; the sample
    /// count follows from the file length.
    pub fn open_flat(path: impl AsRef<Path>, n_channels: usize, geometry: &ProbeGeometry) -> Result<Self> {
        let path = path.as_ref();
        ensure_pre!(n_channels > 0, "channel count must be positive");
        let len = std::fs::metadata(path)
            .with_context(|| format!("stat {}", path.display()))?
            .len() as usize;
        let row = n_channels * BYTES_PER_SAMPLE;
        ensure_pre!(
            len % row == 0,
            "{}: {len} bytes is not a whole number of {n_channels}-channel rows",
            path.display()
        );
        let rec = Self::map(path, len / row, n_channels, None, geometry)?;
        info!(path = %path.display(), n_samples = rec.n_samples, n_channels, "opened flat recording");
        Ok(rec)
    }

    fn map(
        path: &Path,
        n_samples: usize,
        n_channels: usize,
        meta: Option<SpikeGlxMeta>,
        geometry: &ProbeGeometry,
    ) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // SAFETY: the mapping is read-only and recordings are never modified
        // while an analysis holds them open.
        let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;

        let needed = n_samples * n_channels * BYTES_PER_SAMPLE;
        ensure_pre!(
            mmap.len() >= needed,
            "{}: {} bytes on disk, {needed} declared",
            path.display(),
            mmap.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            geometry: geometry.clone(),
            n_samples,
            n_channels,
            mmap,
        })
    }

    #[inline]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Columns per row in the file (including any sync channel).
    #[inline]
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// One sample.  Panics if out of bounds.
    #[inline]
    pub fn sample(&self, t: usize, c: usize) -> i16 {
        let off = (t * self.n_channels + c) * BYTES_PER_SAMPLE;
        LittleEndian::read_i16(&self.mmap[off..off + BYTES_PER_SAMPLE])
    }

    /// Decode `[samples, channels]`, repairing the dead channel.
    ///
    /// # Errors
    ///
    /// `PreconditionViolation` if a channel bound is not a multiple of the
    /// shank count, `channels.end` exceeds the signal channels, or
    /// `samples.end` exceeds the recording.
    pub fn window(&self, samples: Range<usize>, channels: Range<usize>) -> Result<Array2<i16>> {
        let g = &self.geometry;
        ensure_pre!(
            channels.start % g.n_shanks == 0 && channels.end % g.n_shanks == 0,
            "channel window {channels:?} must align to {} shanks",
            g.n_shanks
        );
        ensure_pre!(channels.start <= channels.end, "inverted channel window {channels:?}");
        ensure_pre!(
            channels.end <= g.n_channels.min(self.n_channels),
            "channel window {channels:?} exceeds {} signal channels",
            g.n_channels.min(self.n_channels)
        );
        ensure_pre!(samples.start <= samples.end, "inverted sample window {samples:?}");
        ensure_pre!(
            samples.end <= self.n_samples,
            "sample window {samples:?} exceeds {} recorded samples",
            self.n_samples
        );

        let (t0, c0) = (samples.start, channels.start);
        let mut out = Array2::from_shape_fn((samples.len(), channels.len()), |(t, c)| {
            self.sample(t0 + t, c0 + c)
        });

        if let Some(dead) = g.dead_channel.filter(|d| channels.contains(d)) {
            if let Some((lo, hi)) = g.depth_neighbours(dead).filter(|&(_, hi)| hi < self.n_channels) {
                for (t, v) in out.column_mut(dead - c0).iter_mut().enumerate() {
                    let sum = self.sample(t0 + t, lo) as i32 + self.sample(t0 + t, hi) as i32;
                    *v = sum.div_euclid(2) as i16;
                }
                debug!(dead, lo, hi, "replaced dead channel with neighbour average");
            }
        }
        Ok(out)
    }
}

/// Open `file` (SpikeGLX) and decode one window.
pub fn load_neuropixels(
    file: impl AsRef<Path>,
    samples: Range<usize>,
    channels: Range<usize>,
    geometry: &ProbeGeometry,
) -> Result<Array2<i16>> {
    RawRecording::open(file, geometry)?.window(samples, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_meta_strips_tilde() {
        let m = SpikeGlxMeta::parse("nSavedChans=385\n~imroTbl=(0,384)\nfileSizeBytes=7700\nimSampRate=2500\n").unwrap();
        assert_eq!(m.n_saved_chans, 385);
        assert_eq!(m.file_size_bytes, 7700);
        assert_eq!(m.get("imroTbl"), Some("(0,384)"));
        assert_eq!(m.n_samples(), 10);
        assert_eq!(m.sample_rate_hz(), Some(2500.0));
    }

    #[test]
    fn parse_meta_missing_key() {
        let err = SpikeGlxMeta::parse("nSavedChans=385\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::PreconditionViolation(_))
        ));
        assert!(SpikeGlxMeta::parse("nSavedChans=abc\nfileSizeBytes=10\n").is_err());
        assert!(SpikeGlxMeta::parse("garbage\n").is_err());
    }
}
