//! WebP → VP8 keyframe extractor
//!
//! Scans a RIFF/WebP container for the `VP8 ` bitstream chunk and notes
//! whether an `ALPH` (alpha) chunk was present. VP8L (lossless) containers
//! have no `VP8 ` chunk and are rejected as [`Error::BadWebP`].

use crate::{Error, Result};

/// A VP8 keyframe extracted from a WebP container
pub struct WebPKeyframe {
    /// Raw VP8 bitstream bytes
    pub frame: Vec<u8>,
    /// Whether the container also carried an `ALPH` chunk
    pub has_alpha: bool,
}

/// Locate the `VP8 ` chunk in `bytes`, a RIFF/WebP byte string
pub fn extract_vp8(bytes: &[u8]) -> Result<WebPKeyframe> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return Err(Error::BadWebP);
    }

    let mut cursor = 12usize;
    let mut has_alpha = false;

    while cursor + 8 <= bytes.len() {
        let fourcc = &bytes[cursor..cursor + 4];
        let len = u32::from_le_bytes(bytes[cursor + 4..cursor + 8].try_into().unwrap()) as usize;
        let data_start = cursor + 8;

        if data_start + len > bytes.len() {
            break;
        }

        if fourcc == b"VP8 " {
            return Ok(WebPKeyframe {
                frame: bytes[data_start..data_start + len].to_vec(),
                has_alpha,
            });
        }
        if fourcc == b"ALPH" {
            has_alpha = true;
        }

        cursor = data_start + len + (len % 2);
    }

    Err(Error::BadWebP)
}

/// Read the pixel dimensions out of a VP8 keyframe's own header, so the
/// muxer need not be told width/height separately. Bytes 3..6 hold the
/// keyframe start code `9d 01 2a`; bytes 6..10 hold width/height as
/// little-endian `u16`s with the top 2 bits reserved for a scale factor.
pub fn keyframe_dimensions(frame: &[u8]) -> Result<(u32, u32)> {
    if frame.len() < 10 || frame[3..6] != [0x9d, 0x01, 0x2a] {
        return Err(Error::BadWebP);
    }
    let width = u16::from_le_bytes([frame[6], frame[7]]) & 0x3FFF;
    let height = u16::from_le_bytes([frame[8], frame[9]]) & 0x3FFF;
    Ok((width as u32, height as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn webp_container(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.iter().flatten().copied().collect();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&((4 + body.len()) as u32).to_le_bytes());
        out.extend_from_slice(b"WEBP");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn extracts_plain_vp8_chunk() {
        let vp8_data = vec![0x30, 0x01, 0x02, 0x9d, 0x01, 0x2a];
        let container = webp_container(&[riff_chunk(b"VP8 ", &vp8_data)]);
        let kf = extract_vp8(&container).unwrap();
        assert_eq!(kf.frame, vp8_data);
        assert!(!kf.has_alpha);
    }

    #[test]
    fn detects_alpha_chunk_before_vp8() {
        let alpha_data = vec![1, 2, 3];
        let vp8_data = vec![9, 9, 9, 9];
        let container = webp_container(&[
            riff_chunk(b"ALPH", &alpha_data),
            riff_chunk(b"VP8 ", &vp8_data),
        ]);
        let kf = extract_vp8(&container).unwrap();
        assert_eq!(kf.frame, vp8_data);
        assert!(kf.has_alpha);
    }

    #[test]
    fn skips_unrelated_chunks() {
        let vp8_data = vec![5, 6, 7];
        let container = webp_container(&[
            riff_chunk(b"VP8X", &[0u8; 10]),
            riff_chunk(b"VP8 ", &vp8_data),
        ]);
        let kf = extract_vp8(&container).unwrap();
        assert_eq!(kf.frame, vp8_data);
    }

    #[test]
    fn missing_vp8_chunk_is_bad_webp() {
        let container = webp_container(&[riff_chunk(b"VP8L", &[1, 2, 3])]);
        assert!(matches!(extract_vp8(&container), Err(Error::BadWebP)));
    }

    #[test]
    fn not_riff_is_bad_webp() {
        assert!(matches!(extract_vp8(b"not a webp file"), Err(Error::BadWebP)));
    }

    #[test]
    fn reads_keyframe_dimensions() {
        // frame tag (3 bytes, arbitrary) + start code + 640x480 (14-bit LE)
        let mut frame = vec![0x30, 0x01, 0x02, 0x9d, 0x01, 0x2a];
        frame.extend_from_slice(&640u16.to_le_bytes());
        frame.extend_from_slice(&480u16.to_le_bytes());
        let (w, h) = keyframe_dimensions(&frame).unwrap();
        assert_eq!((w, h), (640, 480));
    }

    #[test]
    fn short_frame_is_bad_webp() {
        assert!(matches!(keyframe_dimensions(&[0u8; 5]), Err(Error::BadWebP)));
    }
}
