//! WebM container muxer

pub mod webm;

pub use webm::{Muxer, MuxerConfig};
