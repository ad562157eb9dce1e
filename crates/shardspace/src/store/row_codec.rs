//! Binary layout of a table's record log.
//!
//! ```text
//! header : magic "SSRW" | version u16 | reserved u16 | dimensions u32
//! record : op u8 | key u64 | [f32; dimensions]   (no vector for Delete)
//! ```
//! All integers and floats are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

pub(crate) const MAGIC: [u8; 4] = *b"SSRW";
pub(crate) const VERSION: u16 = 1;
pub(crate) const HEADER_LEN: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowOp {
    Put,
    Update,
    Delete,
}

impl RowOp {
    fn to_byte(self) -> u8 {
        match self {
            Self::Put => 1,
            Self::Update => 2,
            Self::Delete => 3,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Update),
            3 => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RowRecord {
    pub op: RowOp,
    pub key: u64,
    pub vector: Vec<f32>,
}

pub(crate) fn write_header(buf: &mut Vec<u8>, dimensions: usize) -> io::Result<()> {
    buf.extend_from_slice(&MAGIC);
    buf.write_u16::<LittleEndian>(VERSION)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(dimensions as u32)?;
    Ok(())
}

/// Validate the header and return the stored dimension count.
pub(crate) fn read_header(cursor: &mut Cursor<&[u8]>) -> io::Result<usize> {
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("invalid magic: {magic:?}")));
    }
    let version = cursor.read_u16::<LittleEndian>()?;
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported row log version {version}, expected {VERSION}"),
        ));
    }
    let _reserved = cursor.read_u16::<LittleEndian>()?;
    Ok(cursor.read_u32::<LittleEndian>()? as usize)
}

pub(crate) fn write_record(buf: &mut Vec<u8>, record: &RowRecord) -> io::Result<()> {
    buf.write_u8(record.op.to_byte())?;
    buf.write_u64::<LittleEndian>(record.key)?;
    if record.op != RowOp::Delete {
        for &v in &record.vector {
            buf.write_f32::<LittleEndian>(v)?;
        }
    }
    Ok(())
}

/// Read one record. `Ok(None)` means a clean end of log; a record cut short
/// surfaces as `UnexpectedEof`.
pub(crate) fn read_record(cursor: &mut Cursor<&[u8]>, dimensions: usize) -> io::Result<Option<RowRecord>> {
    if cursor.position() as usize >= cursor.get_ref().len() {
        return Ok(None);
    }
    let op_byte = cursor.read_u8()?;
    let op = RowOp::from_byte(op_byte).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, format!("unknown row op {op_byte}"))
    })?;
    let key = cursor.read_u64::<LittleEndian>()?;
    let mut vector = Vec::new();
    if op != RowOp::Delete {
        vector.reserve_exact(dimensions);
        for _ in 0..dimensions {
            vector.push(cursor.read_f32::<LittleEndian>()?);
        }
    }
    Ok(Some(RowRecord { op, key, vector }))
}
