//! vp8webm - Streaming WebM (Matroska) muxer for VP8 keyframes
//!
//! Assembles a sequence of VP8 keyframe images, optionally with a separate
//! alpha channel, into a playable WebM container. Output can be buffered
//! in memory or streamed to a file, without holding the whole encoded
//! video in memory at once.

pub mod blob_sink;
pub mod bytestream;
pub mod ebml;
pub mod error;
pub mod muxer;
pub mod webp;

pub use error::{Error, Result};
pub use muxer::{Muxer, MuxerConfig};

/// A single frame's pixel source. Implementors turn themselves into a
/// WebP byte string at the given encode quality; this is the muxer's only
/// dependency on however the host renders frames.
///
/// Raw WebP bytes are already in the right format and pass through
/// unchanged, mirroring the common case of a byte string whose MIME
/// prefix is already `image/webp`.
pub trait FrameSource {
    /// Render `self` to WebP bytes at `quality` (already clamped by the caller)
    fn to_webp(&self, quality: f64) -> Result<Vec<u8>>;
}

impl FrameSource for Vec<u8> {
    fn to_webp(&self, _quality: f64) -> Result<Vec<u8>> {
        Ok(self.clone())
    }
}

impl FrameSource for [u8] {
    fn to_webp(&self, _quality: f64) -> Result<Vec<u8>> {
        Ok(self.to_vec())
    }
}
