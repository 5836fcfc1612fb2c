use thiserror::Error;

/// Errors reported by the frame I/O and configuration layers.
///
/// The landmark and warp paths never surface these; they degrade instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no frames to write")]
    EmptyFrames,

    #[error("frame {index} is {width}x{height}, expected {expected_width}x{expected_height}")]
    FrameSizeMismatch {
        index: usize,
        width: i32,
        height: i32,
        expected_width: i32,
        expected_height: i32,
    },

    #[error("could not write {0}")]
    Unwritable(String),

    #[error("landmark model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Why landmarks or a frame were not produced the preferred way.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Degraded {
    #[error("no landmark model loaded")]
    NoModel,

    #[error("landmark inference failed: {0}")]
    InferenceFailed(String),

    #[error("only {0} lip points available, at least 3 are needed")]
    InsufficientGeometry(usize),

    #[error("source image is empty")]
    EmptyImage,

    #[error("transform is singular or not finite")]
    SingularTransform,

    #[error("warp failed: {0}")]
    WarpFailed(String),
}
