//! Butterworth filter design and zero-phase application.
//!
//! - [`design`]: digital Butterworth low/high-pass as second-order sections,
//!   matching `scipy.signal.butter(..., output='sos')`.
//! - [`apply`]: forward-backward filtering, matching
//!   `scipy.signal.sosfiltfilt(padtype='odd')`.

pub mod apply;
pub mod design;

pub use design::{butter_sos, sos_gain, BandType, Sos};
pub use apply::{highpass_filter, lowpass_filter, sosfilt_zi, sosfiltfilt, sosfiltfilt_1d};
