//! EBML tree serializer
//!
//! Walks a declarative tree of [`Node`]s, emitting id/size/payload bytes
//! through a [`ByteStream`] and recording the absolute file offset of each
//! element and of its payload. Those recorded offsets are what let the
//! muxer seek back into an already-written [`crate::blob_sink::BlobSink`]
//! region and patch a reserved size or duration field once its final
//! value is known.

use std::cell::Cell;
use std::rc::Rc;

use crate::bytestream::ByteStream;
use crate::{Error, Result};

/// Size policy for an [`EbmlElement`] whose data is a list of children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbmlSize {
    /// Size is computed by the writer once children have been written,
    /// and patched into a reserved 4-byte field.
    Auto,
    /// Emit a single `0xFF` byte — the streaming "unknown size" marker.
    /// Never patched.
    Unknown,
    /// Emit a 5-byte all-ones varint reserving space for a later,
    /// out-of-band patch (the muxer patches this itself, not the writer).
    Unknown5Bytes,
}

/// The payload carried by an [`EbmlElement`]
pub enum ElementData {
    /// A nested list of child nodes
    Children(Vec<Node>),
    /// UTF-8 string, framed with a natural-width size prefix
    String(String),
    /// Unsigned integer; `Some(width)` forces the big-endian byte width,
    /// `None` uses the minimal width for the value.
    UnsignedInt(u64, Option<usize>),
    /// IEEE-754 double-precision float (8-byte payload)
    Float64(f64),
    /// IEEE-754 single-precision float (4-byte payload)
    Float32(f32),
    /// Raw byte array, framed with a natural-width size prefix
    Bytes(Vec<u8>),
}

/// A tagged EBML element: an id, a size policy, and a payload
pub struct EbmlElement {
    /// EBML element ID, written at its minimal big-endian width
    pub id: u32,
    /// How to size the payload (only consulted when `data` is `Children`)
    pub size: EbmlSize,
    /// The element's payload
    pub data: ElementData,
    /// Absolute file offset of this element's id byte, set while writing
    pub offset: Cell<u64>,
    /// Absolute file offset of this element's first payload byte, set
    /// while writing
    pub data_offset: Cell<u64>,
}

impl EbmlElement {
    /// A leaf-free convenience constructor for a `Children` element with
    /// an automatically patched size
    pub fn parent(id: u32, children: Vec<Node>) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::Children(children),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// A `Children` element using the given size policy
    pub fn parent_sized(id: u32, size: EbmlSize, children: Vec<Node>) -> Self {
        Self {
            id,
            size,
            data: ElementData::Children(children),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// A string leaf element
    pub fn string(id: u32, value: impl Into<String>) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::String(value.into()),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// An unsigned integer leaf element, using the minimal byte width
    pub fn uint(id: u32, value: u64) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::UnsignedInt(value, None),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// An unsigned integer leaf element at a fixed byte width
    pub fn uint_width(id: u32, value: u64, width: usize) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::UnsignedInt(value, Some(width)),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// A double-precision float leaf element
    pub fn float64(id: u32, value: f64) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::Float64(value),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }

    /// A raw byte array leaf element
    pub fn bytes(id: u32, value: Vec<u8>) -> Self {
        Self {
            id,
            size: EbmlSize::Auto,
            data: ElementData::Bytes(value),
            offset: Cell::new(0),
            data_offset: Cell::new(0),
        }
    }
}

/// One node in a tree handed to [`write_ebml`]
pub enum Node {
    /// Several siblings written in order
    List(Vec<Node>),
    /// Raw UTF-8 bytes with no size prefix — used to splice a pre-framed
    /// payload directly into the stream
    RawString(String),
    /// Raw bytes with no size prefix
    RawBytes(Vec<u8>),
    /// A tagged element, shared so the caller can retain a handle to read
    /// back `offset`/`data_offset` after the tree has been written
    Elem(Rc<EbmlElement>),
}

impl Node {
    /// Wrap an [`EbmlElement`] as a `Node`
    pub fn elem(element: EbmlElement) -> Node {
        Node::Elem(Rc::new(element))
    }

    /// Wrap an already-shared [`EbmlElement`], retaining the same handle
    pub fn shared(element: Rc<EbmlElement>) -> Node {
        Node::Elem(element)
    }
}

/// Write `node` into `stream`, where `stream_file_offset` is the absolute
/// file position corresponding to `stream`'s byte 0.
pub fn write_ebml(stream: &mut ByteStream, stream_file_offset: u64, node: &Node) -> Result<()> {
    match node {
        Node::List(children) => {
            for child in children {
                write_ebml(stream, stream_file_offset, child)?;
            }
            Ok(())
        }
        Node::RawString(s) => {
            stream.write_string(s);
            Ok(())
        }
        Node::RawBytes(b) => {
            stream.write_bytes(b);
            Ok(())
        }
        Node::Elem(elem) => write_element(stream, stream_file_offset, elem),
    }
}

fn write_element(stream: &mut ByteStream, base: u64, elem: &EbmlElement) -> Result<()> {
    elem.offset.set(stream.pos() as u64 + base);

    let id_width = ByteStream::measure_unsigned_int(elem.id as u64);
    stream.write_unsigned_int_be(elem.id as u64, Some(id_width))?;

    match &elem.data {
        ElementData::Children(children) => write_children(stream, base, elem, children),
        ElementData::String(s) => {
            let bytes = s.as_bytes();
            stream.write_ebml_var_int(bytes.len() as u64)?;
            elem.data_offset.set(stream.pos() as u64 + base);
            stream.write_bytes(bytes);
            Ok(())
        }
        ElementData::UnsignedInt(n, width) => {
            let width = width.unwrap_or_else(|| ByteStream::measure_unsigned_int(*n));
            stream.write_ebml_var_int(width as u64)?;
            elem.data_offset.set(stream.pos() as u64 + base);
            stream.write_unsigned_int_be(*n, Some(width))?;
            Ok(())
        }
        ElementData::Float64(n) => {
            stream.write_ebml_var_int(8)?;
            elem.data_offset.set(stream.pos() as u64 + base);
            stream.write_double_be(*n);
            Ok(())
        }
        ElementData::Float32(n) => {
            stream.write_ebml_var_int(4)?;
            elem.data_offset.set(stream.pos() as u64 + base);
            stream.write_float_be(*n);
            Ok(())
        }
        ElementData::Bytes(b) => {
            stream.write_ebml_var_int(b.len() as u64)?;
            elem.data_offset.set(stream.pos() as u64 + base);
            stream.write_bytes(b);
            Ok(())
        }
    }
}

fn write_children(
    stream: &mut ByteStream,
    base: u64,
    elem: &EbmlElement,
    children: &[Node],
) -> Result<()> {
    match elem.size {
        EbmlSize::Unknown => {
            stream.write_byte(0xFF);
            elem.data_offset.set(stream.pos() as u64 + base);
            for child in children {
                write_ebml(stream, base, child)?;
            }
            Ok(())
        }
        EbmlSize::Unknown5Bytes => {
            stream.write_bytes(&[0x0F, 0xFF, 0xFF, 0xFF, 0xFF]);
            elem.data_offset.set(stream.pos() as u64 + base);
            for child in children {
                write_ebml(stream, base, child)?;
            }
            Ok(())
        }
        EbmlSize::Auto => {
            let size_pos = stream.pos();
            stream.write_bytes(&[0x00, 0x00, 0x00, 0x00]);
            let data_begin = stream.pos();
            elem.data_offset.set(data_begin as u64 + base);
            for child in children {
                write_ebml(stream, base, child)?;
            }
            let end_pos = stream.pos();
            let size = (end_pos - data_begin) as u64;
            stream.seek(size_pos)?;
            stream.write_ebml_var_int_width(size, 4).map_err(|_| {
                // A payload over ~256MB cannot be expressed in the reserved
                // 4-byte field; the caller should have used Unknown5Bytes.
                Error::MeasureUnknownLength
            })?;
            stream.seek(end_pos)?;
            Ok(())
        }
    }
}
