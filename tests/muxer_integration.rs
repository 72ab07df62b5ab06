//! End-to-end tests against the public `Muxer` API

mod common;

use tempfile::TempDir;
use vp8webm::{Error, MuxerConfig};

#[test]
fn zero_frame_video_to_memory_is_valid_webm() {
    // S5
    let mut muxer = vp8webm::Muxer::new(MuxerConfig::new().frame_rate(30.0)).unwrap();
    let blob = muxer.complete().unwrap().unwrap();
    assert!(blob.data.len() >= 12);
    assert_eq!(&blob.data[0..4], &[0x1A, 0x45, 0xDF, 0xA3]);
    assert_eq!(blob.mime_type.as_deref(), Some("video/webm"));
}

#[test]
fn streams_to_a_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.webm");
    let file = std::fs::File::create(&path).unwrap();

    let mut muxer = vp8webm::Muxer::new(
        MuxerConfig::new().frame_duration_ms(33).file(file),
    )
    .unwrap();

    let webp = common::synthetic_webp(64, 48);
    muxer.add_frame(&webp, None, None).unwrap();
    let blob = muxer.complete().unwrap();

    // File mode resolves to no in-memory blob; the bytes are on disk.
    assert!(blob.is_none());
    assert!(common::verify_webm_header(&path));
    assert!(common::verify_file_exists_with_size(&path));
}

#[test]
fn multiple_frames_advance_duration() {
    let mut muxer = vp8webm::Muxer::new(MuxerConfig::new().frame_duration_ms(40)).unwrap();
    for _ in 0..5 {
        let webp = common::synthetic_webp(32, 32);
        muxer.add_frame(&webp, None, None).unwrap();
    }
    let blob = muxer.complete().unwrap().unwrap();
    assert!(blob.data.len() > 12);
}

#[test]
fn transparent_frame_uses_block_group_and_block_additions() {
    let mut muxer = vp8webm::Muxer::new(
        MuxerConfig::new().frame_duration_ms(33).transparent(true),
    )
    .unwrap();

    let image = common::synthetic_webp(16, 16);
    let alpha = common::synthetic_webp(16, 16);
    muxer.add_frame(&image, Some(&alpha), None).unwrap();
    let blob = muxer.complete().unwrap().unwrap();

    // BlockGroup id
    assert!(blob
        .data
        .windows(1)
        .any(|w| w == [0xA0]));
    // BlockAdditions id (2 bytes, unambiguous)
    assert!(blob
        .data
        .windows(2)
        .any(|w| w == [0x75, 0xA1]));
}

#[test]
fn bad_webp_bytes_are_rejected() {
    let mut muxer = vp8webm::Muxer::new(MuxerConfig::new().frame_duration_ms(33)).unwrap();
    let err = muxer.add_frame(&b"not a webp".to_vec(), None, None).unwrap_err();
    assert!(matches!(err, Error::BadWebP));
}
