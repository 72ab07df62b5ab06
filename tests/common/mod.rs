//! Common test utilities

#![allow(dead_code)]

use std::path::Path;

/// Build a minimal RIFF/WebP container wrapping a synthetic VP8 keyframe of
/// the given dimensions. The frame bytes beyond the keyframe header are
/// arbitrary — real bitstream decoding is out of scope for this crate.
pub fn synthetic_webp(width: u16, height: u16) -> Vec<u8> {
    let mut frame = vec![0x30, 0x01, 0x02, 0x9d, 0x01, 0x2a];
    frame.extend_from_slice(&width.to_le_bytes());
    frame.extend_from_slice(&height.to_le_bytes());
    frame.extend_from_slice(&[0xAB, 0xCD, 0xEF]); // filler payload bytes

    riff_container(&[riff_chunk(b"VP8 ", &frame)])
}

/// Same, but with an ALPH chunk ahead of the VP8 chunk
pub fn synthetic_webp_with_alpha(width: u16, height: u16) -> Vec<u8> {
    let mut frame = vec![0x30, 0x01, 0x02, 0x9d, 0x01, 0x2a];
    frame.extend_from_slice(&width.to_le_bytes());
    frame.extend_from_slice(&height.to_le_bytes());
    frame.extend_from_slice(&[0x11, 0x22, 0x33]);

    let alpha = vec![0x01, 0x02, 0x03, 0x04];
    riff_container(&[riff_chunk(b"ALPH", &alpha), riff_chunk(b"VP8 ", &frame)])
}

fn riff_chunk(fourcc: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn riff_container(chunks: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = chunks.iter().flatten().copied().collect();
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((4 + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    out.extend_from_slice(&body);
    out
}

/// Verify that a file exists and has non-zero size
pub fn verify_file_exists_with_size<P: AsRef<Path>>(path: P) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Check a file's first 4 bytes against the EBML magic number
pub fn verify_webm_header<P: AsRef<Path>>(path: P) -> bool {
    use std::io::Read;

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut header = [0u8; 4];
    if file.read_exact(&mut header).is_err() {
        return false;
    }

    header == [0x1A, 0x45, 0xDF, 0xA3]
}

/// Get file size in bytes
pub fn get_file_size<P: AsRef<Path>>(path: P) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_webp_round_trips_through_extract_vp8() {
        let webp = synthetic_webp(32, 24);
        let kf = vp8webm::webp::extract_vp8(&webp).unwrap();
        assert!(!kf.has_alpha);
        let (w, h) = vp8webm::webp::keyframe_dimensions(&kf.frame).unwrap();
        assert_eq!((w, h), (32, 24));
    }

    #[test]
    fn synthetic_webp_with_alpha_is_detected() {
        let webp = synthetic_webp_with_alpha(32, 24);
        let kf = vp8webm::webp::extract_vp8(&webp).unwrap();
        assert!(kf.has_alpha);
    }
}
