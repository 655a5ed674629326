//! Probe geometry and pipeline configuration.
//!
//! [`ProbeGeometry`] collects every physical constant of the recording
//! hardware (channel counts, shank interleave, electrode pitch, the known-dead
//! channel) so another probe layout can be substituted without touching the
//! transforms.  The stage configs hold tunable processing parameters.  All
//! fields have defaults matching the hippocampal Neuropixels recordings.
use crate::wavelet::Wavelet;

/// Position of one shank relative to shank 0, in micrometres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShankOffset {
    /// Dorsal-ventral displacement.
    pub dv_um: u32,
    /// Medial-lateral displacement.
    pub ml_um: u32,
}

/// Physical layout of a multi-shank probe.
///
/// Raw column `c` belongs to shank `c % n_shanks` at depth index
/// `c / n_shanks`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeGeometry {
    /// Signal channels on the probe.
    ///
    /// Default: `384`.
    pub n_channels: usize,

    /// Channels written per sample by the acquisition hardware
    /// (signal channels plus one sync channel).
    ///
    /// Default: `385`.
    pub hardware_channel_count: usize,

    /// Number of interleaved shanks.  Channel windows must be aligned to it.
    ///
    /// Default: `4`.
    pub n_shanks: usize,

    /// Vertical distance between neighbouring sites of one shank.
    ///
    /// Default: `40` µm.
    pub shank_step_um: u32,

    /// Offset of each shank, indexed by shank number.
    pub shank_offsets: Vec<ShankOffset>,

    /// Channel that records no usable signal and is rebuilt from its
    /// same-shank depth neighbours.
    ///
    /// Default: `Some(191)`.
    pub dead_channel: Option<usize>,

    /// Sampling rate of the LFP band.
    ///
    /// Default: `2500.0` Hz.
    pub lfp_sample_rate_hz: f64,

    /// Sampling rate of the full (action-potential) band.
    ///
    /// Default: `30000.0` Hz.
    pub ap_sample_rate_hz: f64,
}

impl ProbeGeometry {
    /// Four-shank Neuropixels layout used for the hippocampal recordings.
    pub fn neuropixels_2_4shank() -> Self {
        Self {
            n_channels: 384,
            hardware_channel_count: 385,
            n_shanks: 4,
            shank_step_um: 40,
            shank_offsets: vec![
                ShankOffset { dv_um: 0, ml_um: 0 },
                ShankOffset { dv_um: 0, ml_um: 32 },
                ShankOffset { dv_um: 20, ml_um: 16 },
                ShankOffset { dv_um: 20, ml_um: 48 },
            ],
            dead_channel: Some(191),
            lfp_sample_rate_hz: 2500.0,
            ap_sample_rate_hz: 30000.0,
        }
    }

    /// Number of depth sites on each shank.
    pub fn channels_per_shank(&self) -> usize {
        self.n_channels / self.n_shanks
    }

    /// Shanks grouped by shared D-V offset, groups in ascending D-V order.
    ///
    /// For the default layout this is `[[0, 1], [2, 3]]`.
    pub fn dv_groups(&self) -> Vec<Vec<usize>> {
        let mut dvs: Vec<u32> = self.shank_offsets.iter().map(|o| o.dv_um).collect();
        dvs.sort_unstable();
        dvs.dedup();
        dvs.iter()
            .map(|&dv| {
                self.shank_offsets
                    .iter()
                    .enumerate()
                    .filter(|(_, o)| o.dv_um == dv)
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect()
    }

    /// Vertical step of the merged CSD series (shank step / number of D-V groups).
    ///
    /// `20` µm for the default layout.
    pub fn merged_step_um(&self) -> u32 {
        self.shank_step_um / self.dv_groups().len().max(1) as u32
    }

    /// Integer ratio between AP-band and LFP-band sample indices (`12`).
    pub fn ap_per_lfp_sample(&self) -> u64 {
        (self.ap_sample_rate_hz / self.lfp_sample_rate_hz).round() as u64
    }

    /// The two same-shank depth neighbours of `channel`.
    pub fn depth_neighbours(&self, channel: usize) -> Option<(usize, usize)> {
        let lo = channel.checked_sub(self.n_shanks)?;
        let hi = channel + self.n_shanks;
        (hi < self.n_channels).then_some((lo, hi))
    }
}

impl Default for ProbeGeometry {
    fn default() -> Self {
        Self::neuropixels_2_4shank()
    }
}

/// Parameters of the per-shank LFP filter chain.
///
/// ```
/// use hippo_ephys::LfpConfig;
///
/// let cfg = LfpConfig {
///     smooth_um: Some(40),
///     ..LfpConfig::default()
/// };
/// assert_eq!(cfg.highpass_hz, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LfpConfig {
    /// Sampling rate of the raw LFP-band input.
    ///
    /// Default: `2500.0` Hz.
    pub sample_rate_hz: f64,

    /// High-pass cutoff removing slow drift.
    ///
    /// Default: `1.0` Hz.
    pub highpass_hz: f64,

    /// Low-pass cutoff removing fast noise.
    ///
    /// Default: `300.0` Hz.
    pub lowpass_hz: f64,

    /// Butterworth order of both filters.
    ///
    /// Default: `4`.
    pub order: usize,

    /// Standard deviation of the optional spatial smoothing across sites.
    /// Must be a multiple of [`ProbeGeometry::shank_step_um`].
    ///
    /// Default: `None` (no smoothing).
    pub smooth_um: Option<u32>,
}

impl Default for LfpConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 2500.0,
            highpass_hz: 1.0,
            lowpass_hz: 300.0,
            order: 4,
            smooth_um: None,
        }
    }
}

/// Parameters of the CSD pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CsdConfig {
    /// Extracellular conductivity.
    ///
    /// Default: `0.3` S/m.
    pub conductivity: f64,

    /// Standard deviation of the smoothing applied to the merged series.
    /// Must be a multiple of [`ProbeGeometry::merged_step_um`].
    ///
    /// `40` µm suits hippocampus, `100` µm neocortex.
    ///
    /// Default: `Some(40)`.
    pub smooth_um: Option<u32>,
}

impl Default for CsdConfig {
    fn default() -> Self {
        Self { conductivity: 0.3, smooth_um: Some(40) }
    }
}

/// Parameters of the wavelet extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveletConfig {
    /// Target frequencies in Hz, one output plane each.
    ///
    /// Default: `[7.0]` (theta).
    pub freqs_hz: Vec<f64>,

    /// Sampling rate of the signal being transformed.
    ///
    /// Default: `2500.0` Hz.
    pub sample_rate_hz: f64,

    /// Mother wavelet.
    ///
    /// Default: complex Morlet, bandwidth 1.5, centre frequency 1.0.
    pub wavelet: Wavelet,
}

impl Default for WaveletConfig {
    fn default() -> Self {
        Self {
            freqs_hz: vec![7.0],
            sample_rate_hz: 2500.0,
            wavelet: Wavelet::default(),
        }
    }
}

/// Configuration for [`crate::run_pipeline`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineConfig {
    pub geometry: ProbeGeometry,
    pub lfp: LfpConfig,
    pub csd: CsdConfig,
    pub wavelet: WaveletConfig,
}
