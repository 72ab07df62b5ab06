//! WebM (Matroska) muxer state machine
//!
//! Buffers VP8 keyframes into time-bounded clusters, flushing each to the
//! sink as soon as it fills, and defers SeekHead/Duration/Segment-size
//! until `complete()` because their final values aren't known until every
//! cluster has landed.

use std::fs::File;
use std::rc::Rc;

use crate::blob_sink::{Blob, BlobSink};
use crate::bytestream::ByteStream;
use crate::ebml::{write_ebml, EbmlElement, EbmlSize, Node};
use crate::webp::{extract_vp8, keyframe_dimensions};
use crate::{Error, FrameSource, Result};

const TRACK_NUMBER: u32 = 1;
const TIMECODE_SCALE_NS: u64 = 1_000_000;
const MAX_CLUSTER_DURATION_MSEC: u64 = 5000;
const WRITING_APP: &str = "vp8webm";

mod ids {
    pub const EBML: u32 = 0x1A45DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

    pub const SEGMENT: u32 = 0x18538067;
    pub const SEEK_HEAD: u32 = 0x114D9B74;
    pub const SEEK: u32 = 0x4DBB;
    pub const SEEK_ID: u32 = 0x53AB;
    pub const SEEK_POSITION: u32 = 0x53AC;

    pub const INFO: u32 = 0x1549A966;
    pub const TIMECODE_SCALE: u32 = 0x2AD7B1;
    pub const DURATION: u32 = 0x4489;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;

    pub const TRACKS: u32 = 0x1654AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const FLAG_LACING: u32 = 0x9C;
    pub const LANGUAGE: u32 = 0x22B59C;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_NAME: u32 = 0x258688;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const ALPHA_MODE: u32 = 0x53C0;

    pub const CLUSTER: u32 = 0x1F43B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
    pub const BLOCK_GROUP: u32 = 0xA0;
    pub const BLOCK: u32 = 0xA1;
    pub const BLOCK_ADDITIONS: u32 = 0x75A1;
    pub const BLOCK_MORE: u32 = 0xA6;
    pub const BLOCK_ADD_ID: u32 = 0xEE;
    pub const BLOCK_ADDITIONAL: u32 = 0xA5;

    pub const CUES: u32 = 0x1C53BB6B;
    pub const CUE_POINT: u32 = 0xBB;
    pub const CUE_TIME: u32 = 0xB3;
    pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
    pub const CUE_TRACK: u32 = 0xF7;
    pub const CUE_CLUSTER_POSITION: u32 = 0xF1;
}

/// Configuration for a [`Muxer`]
#[derive(Debug, Default)]
pub struct MuxerConfig {
    quality: Option<f64>,
    transparent: bool,
    alpha_quality: Option<f64>,
    frame_duration_ms: Option<u64>,
    frame_rate: Option<f64>,
    file: Option<File>,
}

impl MuxerConfig {
    /// Start from the defaults: quality 0.95, opaque, in-memory output
    pub fn new() -> Self {
        Self::default()
    }

    /// WebP encode quality, clamped to `[0, 0.99999]`
    pub fn quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality.clamp(0.0, 0.99999));
        self
    }

    /// Emit `AlphaMode` and encode a second VP8 bitstream per frame
    pub fn transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// WebP encode quality for the alpha channel; defaults to `quality`
    pub fn alpha_quality(mut self, quality: f64) -> Self {
        self.alpha_quality = Some(quality.clamp(0.0, 0.99999));
        self
    }

    /// Milliseconds per frame. Mutually exclusive with `frame_rate`.
    pub fn frame_duration_ms(mut self, ms: u64) -> Self {
        self.frame_duration_ms = Some(ms);
        self
    }

    /// Frames per second; converted to `frame_duration_ms = round(1000 / fps)`
    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.frame_rate = Some(fps);
        self
    }

    /// Stream to a file instead of buffering in memory
    pub fn file(mut self, file: File) -> Self {
        self.file = Some(file);
        self
    }

    fn resolve_frame_duration_ms(&self) -> Result<u64> {
        match (self.frame_duration_ms, self.frame_rate) {
            (Some(ms), None) => Ok(ms),
            (None, Some(fps)) => Ok((1000.0 / fps).round() as u64),
            _ => Err(Error::MissingFrameTiming),
        }
    }

    fn resolved_quality(&self) -> f64 {
        self.quality.unwrap_or(0.95)
    }

    fn resolved_alpha_quality(&self) -> f64 {
        self.alpha_quality.unwrap_or_else(|| self.resolved_quality())
    }
}

struct PendingFrame {
    vp8: Vec<u8>,
    alpha: Option<Vec<u8>>,
    relative_timecode_ms: u64,
}

struct CuePoint {
    cue_time_ms: u64,
    cluster_position_rel: u64,
}

/// Bookkeeping that only exists once the header has been written
struct WritingState {
    segment_offset: u64,
    segment_data_offset: u64,
    seek_head_data_offset: u64,
    segment_info_rel: u64,
    tracks_rel: u64,
    duration_data_offset: u64,
    cluster_frames: Vec<PendingFrame>,
    cluster_start_ms: u64,
    cluster_duration_ms: u64,
    cues: Vec<CuePoint>,
}

enum State {
    Initial,
    Writing(WritingState),
    Completed,
}

/// Incrementally assembles a WebM file from VP8 keyframes
pub struct Muxer {
    quality: f64,
    transparent: bool,
    alpha_quality: f64,
    frame_duration_ms: u64,
    sink: BlobSink,
    state: State,
}

impl Muxer {
    /// Create a muxer. Fails if `config` sets neither or both of
    /// `frame_duration_ms`/`frame_rate`.
    pub fn new(config: MuxerConfig) -> Result<Self> {
        let frame_duration_ms = config.resolve_frame_duration_ms()?;
        let alpha_quality = config.resolved_alpha_quality();
        let quality = config.resolved_quality();
        let transparent = config.transparent;
        let sink = match config.file {
            Some(file) => BlobSink::file(file),
            None => BlobSink::memory(),
        };

        log::info!(
            "creating WebM muxer: frame_duration_ms={frame_duration_ms} transparent={transparent}"
        );

        Ok(Self {
            quality,
            transparent,
            alpha_quality,
            frame_duration_ms,
            sink,
            state: State::Initial,
        })
    }

    /// Total bytes ever addressed by the sink
    pub fn written_size(&self) -> u64 {
        self.sink.length()
    }

    /// Add one frame. `image` is rendered at `quality`; if `transparent`
    /// was set and `alpha` is supplied, it is rendered at `alpha_quality`
    /// and attached as a `BlockAdditional`. `override_duration_ms`
    /// overrides the muxer's configured frame duration for this frame only.
    pub fn add_frame(
        &mut self,
        image: &dyn FrameSource,
        alpha: Option<&dyn FrameSource>,
        override_duration_ms: Option<u64>,
    ) -> Result<()> {
        if matches!(self.state, State::Completed) {
            return Err(Error::AlreadyCompleted);
        }

        let duration_ms = override_duration_ms.unwrap_or(self.frame_duration_ms);
        if duration_ms == 0 {
            return Err(Error::BadFrameDuration);
        }

        let webp = image.to_webp(self.quality)?;
        let keyframe = extract_vp8(&webp)?;

        let alpha_vp8 = if self.transparent {
            match alpha {
                Some(source) => {
                    let alpha_webp = source.to_webp(self.alpha_quality)?;
                    Some(extract_vp8(&alpha_webp)?.frame)
                }
                None => None,
            }
        } else {
            None
        };

        if matches!(self.state, State::Initial) {
            let (width, height) = keyframe_dimensions(&keyframe.frame)?;
            let writing_state = self.emit_header(width, height)?;
            self.state = State::Writing(writing_state);
        }

        let writing = match &mut self.state {
            State::Writing(w) => w,
            _ => unreachable!("header emission always transitions to Writing"),
        };

        let relative_timecode_ms = writing.cluster_duration_ms;
        writing.cluster_frames.push(PendingFrame {
            vp8: keyframe.frame,
            alpha: alpha_vp8,
            relative_timecode_ms,
        });
        writing.cluster_duration_ms += duration_ms;

        if writing.cluster_duration_ms >= MAX_CLUSTER_DURATION_MSEC {
            self.flush_cluster()?;
        }

        Ok(())
    }

    /// Flush any partial cluster, emit Cues, back-patch SeekHead/Duration/
    /// Segment size, and materialize the sink. Any further call on this
    /// muxer fails with [`Error::AlreadyCompleted`].
    pub fn complete(&mut self) -> Result<Option<Blob>> {
        if matches!(self.state, State::Completed) {
            return Err(Error::AlreadyCompleted);
        }

        if matches!(self.state, State::Initial) {
            // No frames were ever added; still produce a valid empty file.
            let writing_state = self.emit_header(0, 0)?;
            self.state = State::Writing(writing_state);
        }

        self.flush_cluster()?;

        let writing = match std::mem::replace(&mut self.state, State::Completed) {
            State::Writing(w) => w,
            _ => unreachable!("header emission always transitions to Writing"),
        };

        self.emit_cues_and_backpatch(&writing)?;

        let sink = std::mem::replace(&mut self.sink, BlobSink::memory());
        sink.complete(Some("video/webm"))
    }

    fn emit_header(&mut self, width: u32, height: u32) -> Result<WritingState> {
        let ebml_header = Node::elem(EbmlElement::parent(
            ids::EBML,
            vec![
                Node::elem(EbmlElement::uint(ids::EBML_VERSION, 1)),
                Node::elem(EbmlElement::uint(ids::EBML_READ_VERSION, 1)),
                Node::elem(EbmlElement::uint(ids::EBML_MAX_ID_LENGTH, 4)),
                Node::elem(EbmlElement::uint(ids::EBML_MAX_SIZE_LENGTH, 8)),
                Node::elem(EbmlElement::string(ids::DOC_TYPE, "webm")),
                Node::elem(EbmlElement::uint(ids::DOC_TYPE_VERSION, 2)),
                Node::elem(EbmlElement::uint(ids::DOC_TYPE_READ_VERSION, 2)),
            ],
        ));

        let seek_head = Rc::new(EbmlElement::parent(
            ids::SEEK_HEAD,
            vec![
                seek_entry(ids::CUES, 0),
                seek_entry(ids::INFO, 0),
                seek_entry(ids::TRACKS, 0),
            ],
        ));

        let duration_elem = Rc::new(EbmlElement::float64(ids::DURATION, 0.0));

        let segment_info = Rc::new(EbmlElement::parent(
            ids::INFO,
            vec![
                Node::elem(EbmlElement::uint(ids::TIMECODE_SCALE, TIMECODE_SCALE_NS)),
                Node::elem(EbmlElement::string(ids::MUXING_APP, WRITING_APP)),
                Node::elem(EbmlElement::string(ids::WRITING_APP, WRITING_APP)),
                Node::shared(duration_elem.clone()),
            ],
        ));

        let tracks = Rc::new(EbmlElement::parent(
            ids::TRACKS,
            vec![Node::elem(EbmlElement::parent(
                ids::TRACK_ENTRY,
                track_entry_children(width, height, self.transparent),
            ))],
        ));

        let segment = Rc::new(EbmlElement::parent_sized(
            ids::SEGMENT,
            EbmlSize::Unknown5Bytes,
            vec![
                Node::shared(seek_head.clone()),
                Node::shared(segment_info.clone()),
                Node::shared(tracks.clone()),
            ],
        ));

        let tree = Node::List(vec![ebml_header, Node::shared(segment.clone())]);

        let base = self.sink.pos();
        let mut stream = ByteStream::with_capacity(512);
        write_ebml(&mut stream, base, &tree)?;
        self.sink.write(stream.as_bytes())?;

        let segment_data_offset = segment.data_offset.get();
        let segment_info_rel = segment_info.data_offset.get() - segment_data_offset;
        let tracks_rel = tracks.data_offset.get() - segment_data_offset;

        log::debug!(
            "wrote WebM header: segment_offset={} dims={width}x{height}",
            segment.offset.get()
        );

        Ok(WritingState {
            segment_offset: segment.offset.get(),
            segment_data_offset,
            seek_head_data_offset: seek_head.data_offset.get(),
            segment_info_rel,
            tracks_rel,
            duration_data_offset: duration_elem.data_offset.get(),
            cluster_frames: Vec::new(),
            cluster_start_ms: 0,
            cluster_duration_ms: 0,
            cues: Vec::new(),
        })
    }

    fn flush_cluster(&mut self) -> Result<()> {
        let (frames, cluster_start_ms, cluster_duration_ms, segment_data_offset) = {
            let writing = match &mut self.state {
                State::Writing(w) => w,
                _ => return Ok(()),
            };
            if writing.cluster_frames.is_empty() {
                return Ok(());
            }
            (
                std::mem::take(&mut writing.cluster_frames),
                writing.cluster_start_ms,
                writing.cluster_duration_ms,
                writing.segment_data_offset,
            )
        };

        let capacity = frames
            .iter()
            .map(|f| f.vp8.len() + f.alpha.as_ref().map_or(0, |a| a.len()) + 64)
            .sum();

        let mut children = vec![Node::elem(EbmlElement::uint(ids::TIMECODE, cluster_start_ms))];
        for frame in &frames {
            children.push(block_node(frame)?);
        }
        let cluster = Rc::new(EbmlElement::parent(ids::CLUSTER, children));

        let base = self.sink.pos();
        let mut stream = ByteStream::with_capacity(capacity);
        write_ebml(&mut stream, base, &Node::shared(cluster.clone()))?;
        self.sink.write(stream.as_bytes())?;

        let cluster_position_rel = cluster.offset.get() - segment_data_offset;

        log::debug!(
            "flushed cluster at {cluster_start_ms}ms with {} frame(s)",
            frames.len()
        );

        if let State::Writing(writing) = &mut self.state {
            writing.cues.push(CuePoint {
                cue_time_ms: cluster_start_ms,
                cluster_position_rel,
            });
            writing.cluster_start_ms += cluster_duration_ms;
            writing.cluster_duration_ms = 0;
        }

        Ok(())
    }

    fn emit_cues_and_backpatch(&mut self, writing: &WritingState) -> Result<()> {
        let mut children = Vec::with_capacity(writing.cues.len());
        for cue in &writing.cues {
            children.push(Node::elem(EbmlElement::parent(
                ids::CUE_POINT,
                vec![
                    Node::elem(EbmlElement::uint(ids::CUE_TIME, cue.cue_time_ms)),
                    Node::elem(EbmlElement::parent(
                        ids::CUE_TRACK_POSITIONS,
                        vec![
                            Node::elem(EbmlElement::uint(ids::CUE_TRACK, TRACK_NUMBER as u64)),
                            Node::elem(EbmlElement::uint(
                                ids::CUE_CLUSTER_POSITION,
                                cue.cluster_position_rel,
                            )),
                        ],
                    )),
                ],
            )));
        }
        let cues_elem = Rc::new(EbmlElement::parent(ids::CUES, children));

        let base = self.sink.pos();
        let mut stream = ByteStream::with_capacity(64 + writing.cues.len() * 32);
        write_ebml(&mut stream, base, &Node::shared(cues_elem.clone()))?;
        self.sink.write(stream.as_bytes())?;

        let cues_rel = cues_elem.offset.get() - writing.segment_data_offset;

        self.rewrite_seek_head(writing, cues_rel)?;
        self.patch_duration(writing)?;
        self.patch_segment_size(writing)?;

        Ok(())
    }

    fn rewrite_seek_head(&mut self, writing: &WritingState, cues_rel: u64) -> Result<()> {
        let children = vec![
            seek_entry(ids::CUES, cues_rel),
            seek_entry(ids::INFO, writing.segment_info_rel),
            seek_entry(ids::TRACKS, writing.tracks_rel),
        ];

        let mut stream = ByteStream::with_capacity(64);
        write_ebml(&mut stream, writing.seek_head_data_offset, &Node::List(children))?;

        let resume = self.sink.pos();
        self.sink.seek(writing.seek_head_data_offset)?;
        self.sink.write(stream.as_bytes())?;
        self.sink.seek(resume)?;

        log::debug!("patched SeekHead: cues_rel={cues_rel}");
        Ok(())
    }

    fn patch_duration(&mut self, writing: &WritingState) -> Result<()> {
        let mut scratch = ByteStream::with_capacity(8);
        scratch.write_double_be(writing.cluster_start_ms as f64);

        let resume = self.sink.pos();
        self.sink.seek(writing.duration_data_offset)?;
        self.sink.write(scratch.as_bytes())?;
        self.sink.seek(resume)?;

        log::debug!("patched Duration to {}ms", writing.cluster_start_ms);
        Ok(())
    }

    fn patch_segment_size(&mut self, writing: &WritingState) -> Result<()> {
        let id_width = ByteStream::measure_unsigned_int(ids::SEGMENT as u64);
        let size_pos = writing.segment_offset + id_width as u64;
        let final_size = self.sink.length() - writing.segment_data_offset;

        let mut scratch = ByteStream::with_capacity(5);
        scratch.write_ebml_var_int_width(final_size, 5)?;

        let resume = self.sink.pos();
        self.sink.seek(size_pos)?;
        self.sink.write(scratch.as_bytes())?;
        self.sink.seek(resume)?;

        log::debug!("patched Segment size to {final_size} bytes");
        Ok(())
    }
}

fn track_entry_children(width: u32, height: u32, transparent: bool) -> Vec<Node> {
    let mut children = vec![
        Node::elem(EbmlElement::uint_width(ids::TRACK_NUMBER, TRACK_NUMBER as u64, 1)),
        Node::elem(EbmlElement::uint(ids::TRACK_UID, 1)),
        Node::elem(EbmlElement::uint(ids::FLAG_LACING, 0)),
        Node::elem(EbmlElement::string(ids::LANGUAGE, "und")),
        Node::elem(EbmlElement::string(ids::CODEC_ID, "V_VP8")),
        Node::elem(EbmlElement::string(ids::CODEC_NAME, "VP8")),
        Node::elem(EbmlElement::uint(ids::TRACK_TYPE, 1)),
    ];

    let mut video_children = vec![
        Node::elem(EbmlElement::uint(ids::PIXEL_WIDTH, width as u64)),
        Node::elem(EbmlElement::uint(ids::PIXEL_HEIGHT, height as u64)),
    ];
    if transparent {
        video_children.push(Node::elem(EbmlElement::uint(ids::ALPHA_MODE, 1)));
    }
    children.push(Node::elem(EbmlElement::parent(ids::VIDEO, video_children)));

    children
}

fn seek_entry(target_id: u32, position: u64) -> Node {
    Node::elem(EbmlElement::parent(
        ids::SEEK,
        vec![
            Node::elem(EbmlElement::bytes(ids::SEEK_ID, id_bytes(target_id))),
            Node::elem(EbmlElement::uint_width(ids::SEEK_POSITION, position, 5)),
        ],
    ))
}

fn id_bytes(id: u32) -> Vec<u8> {
    let width = ByteStream::measure_unsigned_int(id as u64);
    (id as u64).to_be_bytes()[8 - width..].to_vec()
}

fn encode_track_number(n: u32) -> Result<Vec<u8>> {
    if n == 0 || n > 126 {
        return Err(Error::BadTrackNumber(n));
    }
    let mut stream = ByteStream::with_capacity(1);
    stream.write_ebml_var_int_width(n as u64, 1)?;
    Ok(stream.as_bytes().to_vec())
}

fn block_node(frame: &PendingFrame) -> Result<Node> {
    let track_bytes = encode_track_number(TRACK_NUMBER)?;
    let mut prefix = track_bytes;
    prefix.extend_from_slice(&(frame.relative_timecode_ms as i16).to_be_bytes());

    if let Some(alpha) = &frame.alpha {
        let mut block_payload = prefix;
        block_payload.push(0x00);
        block_payload.extend_from_slice(&frame.vp8);

        Ok(Node::elem(EbmlElement::parent(
            ids::BLOCK_GROUP,
            vec![
                Node::elem(EbmlElement::bytes(ids::BLOCK, block_payload)),
                Node::elem(EbmlElement::parent(
                    ids::BLOCK_ADDITIONS,
                    vec![Node::elem(EbmlElement::parent(
                        ids::BLOCK_MORE,
                        vec![
                            Node::elem(EbmlElement::uint(ids::BLOCK_ADD_ID, 1)),
                            Node::elem(EbmlElement::bytes(ids::BLOCK_ADDITIONAL, alpha.clone())),
                        ],
                    ))],
                )),
            ],
        )))
    } else {
        let mut block_payload = prefix;
        block_payload.push(0x80);
        block_payload.extend_from_slice(&frame.vp8);
        Ok(Node::elem(EbmlElement::bytes(ids::SIMPLE_BLOCK, block_payload)))
    }
}
