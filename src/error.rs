//! Error taxonomy for the transform chain.
//!
//! Library functions return [`anyhow::Result`]; contract violations are raised
//! as a [`PipelineError`] so callers can tell them apart from I/O failures:
//!
//! ```
//! use hippo_ephys::{extract_csd, CsdConfig, PipelineError, ProbeGeometry};
//! use ndarray::Array3;
//!
//! let lfp = Array3::<f64>::zeros((3, 10, 8));
//! let err = extract_csd(&lfp, &ProbeGeometry::default(), &CsdConfig::default()).unwrap_err();
//! assert!(matches!(
//!     err.downcast_ref::<PipelineError>(),
//!     Some(PipelineError::PreconditionViolation(_))
//! ));
//! ```
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Shape, divisibility, or range requirement not met by the caller.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// Recording metadata disagrees with the known hardware layout.
    #[error("consistency check failed: {0}")]
    ConsistencyCheckFailure(String),
}

/// Return early with [`PipelineError::PreconditionViolation`] unless `cond` holds.
macro_rules! ensure_pre {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(::anyhow::Error::new(
                $crate::error::PipelineError::PreconditionViolation(format!($($arg)+)),
            ));
        }
    };
}
pub(crate) use ensure_pre;
