use thiserror::Error;

/// Errors surfaced by the completion core.
///
/// Partition-count mismatches inside the windowing code are internal-invariant
/// violations and abort via `assert_eq!` instead of appearing here. Iterator
/// exhaustion is an expected termination signal and is modeled as `None`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SoftImputeError {
    /// The solver was handed a sparse layout it does not accept.
    #[error("InvalidInputFormat: {0}")]
    InvalidInputFormat(String),

    /// The soft-thresholded SVD could not be computed.
    #[error("SvdSoft error: {0}")]
    SvdSoftError(String),

    /// Rating records or partition flags violate the data model.
    #[error("Rating data error: {0}")]
    RatingDataError(String),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}
