//! Error types for vp8webm

use thiserror::Error;

/// Result type alias for vp8webm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for vp8webm operations
#[derive(Error, Debug)]
pub enum Error {
    /// Neither `frame_duration_ms` nor `frame_rate` was set on `MuxerConfig`
    #[error("exactly one of frame_duration_ms or frame_rate must be set")]
    MissingFrameTiming,

    /// Track number fell outside the valid EBML range `[1, 126]`
    #[error("track number {0} is outside the valid range [1, 126]")]
    BadTrackNumber(u32),

    /// The WebP container could not be parsed, or no VP8 keyframe chunk was found
    #[error("could not locate a VP8 keyframe in the supplied WebP bytes")]
    BadWebP,

    /// A sink write would overwrite bytes spanning more than one existing chunk
    #[error("write at offset {offset} with length {len} crosses existing blob chunk boundaries")]
    OverwriteCrossesBlobBoundaries {
        /// Offset the write attempted to start at
        offset: u64,
        /// Length of the attempted write
        len: u64,
    },

    /// A seek targeted an offset past the sink's current length
    #[error("seek to {offset} is beyond the sink length {length}")]
    SeekBeyondEnd {
        /// Offset requested
        offset: u64,
        /// Current sink length
        length: u64,
    },

    /// A seek was given a negative offset
    #[error("seek offset {0} is negative")]
    NegativeOffset(i64),

    /// A seek was given a NaN offset
    #[error("seek offset is NaN")]
    NaNOffset,

    /// A value could not be measured because its length is indeterminate
    #[error("cannot measure a data item of indeterminate length")]
    MeasureUnknownLength,

    /// The EBML tree contained an unsupported payload shape
    #[error("unsupported EBML element payload shape")]
    BadEbmlDatatype,

    /// A frame had a duration of zero, which would prevent cluster duration from ever advancing
    #[error("frame duration must be greater than zero")]
    BadFrameDuration,

    /// A call was made on a muxer that had already completed
    #[error("muxer has already completed; no further calls are allowed")]
    AlreadyCompleted,

    /// I/O error from the underlying file-mode sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
