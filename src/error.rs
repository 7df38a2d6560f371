//! Error taxonomy shared by every fallible operation in this crate.

use thiserror::Error;

/// The error kinds a `cw_core` operation can fail with.
///
/// Variants map onto the errno discipline of the original C library this
/// crate's design is descended from: one variant per distinguishable failure
/// mode a caller might want to branch on, not one variant per call site.
#[derive(Error, Debug)]
pub enum CwError {
    #[error("invalid argument: {field} = {value}")]
    InvalidArgument { field: &'static str, value: i64 },

    #[error("operation not permitted: {0}")]
    NotPermitted(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("resource temporarily unavailable: {0}")]
    Again(&'static str),

    #[error("busy: {0}")]
    Busy(&'static str),

    #[error("value out of range: {field} = {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("out of memory: {0}")]
    OutOfMemory(&'static str),

    #[error("deadlock avoided: {0}")]
    Deadlock(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CwResult<T> = std::result::Result<T, CwError>;
