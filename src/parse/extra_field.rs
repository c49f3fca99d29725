use byteorder::{WriteBytesExt, LE};
use std::io;
use winnow::{
    binary::{le_u16, le_u32, le_u64, le_u8, length_take},
    combinator::opt,
    error::{ErrMode, ErrorKind, ParserError},
    seq,
    token::take,
    PResult, Parser, Partial,
};

use crate::parse::NtfsTimestamp;

/// An extensible field, as found in the extras region of a local header,
/// central entry, or zip64 end record: an `(id, size, body)` triplet.
///
/// Known ids decode to a typed variant; everything else is carried as
/// [RawExtraField], bytes untouched. A known id whose body does not parse
/// cleanly (or parses with bytes left over) also falls back to
/// [RawExtraField], so that re-encoding a decoded record always
/// reproduces the input exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField {
    /// Zip64 extended information extra field
    Zip64(Zip64ExtraField),
    /// Extended (Unix) timestamp
    Timestamp(TimestampExtraField),
    /// NTFS (Win9x/WinNT FileTimes)
    Ntfs(NtfsExtraField),
    /// Any extra field this crate has no specific decoding for
    Unknown(RawExtraField),
}

impl ExtraField {
    /// The field's two-byte identifier.
    pub fn tag(&self) -> u16 {
        match self {
            ExtraField::Zip64(_) => Zip64ExtraField::TAG,
            ExtraField::Timestamp(_) => TimestampExtraField::TAG,
            ExtraField::Ntfs(_) => NtfsExtraField::TAG,
            ExtraField::Unknown(raw) => raw.tag,
        }
    }

    /// The dsize that will be written for this field: the body length,
    /// excluding the four header bytes.
    pub fn data_size(&self) -> u16 {
        match self {
            ExtraField::Zip64(f) => f.data_size(),
            ExtraField::Timestamp(f) => f.data_size(),
            ExtraField::Ntfs(_) => NtfsExtraField::DATA_SIZE,
            ExtraField::Unknown(raw) => raw.payload.len() as u16,
        }
    }

    /// Serialized length, header bytes included.
    pub fn wire_size(&self) -> u64 {
        4 + self.data_size() as u64
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.tag())?;
        w.write_u16::<LE>(self.data_size())?;
        match self {
            ExtraField::Zip64(f) => f.write_body(w),
            ExtraField::Timestamp(f) => f.write_body(w),
            ExtraField::Ntfs(f) => f.write_body(w),
            ExtraField::Unknown(raw) => w.write_all(&raw.payload),
        }
    }
}

/// 4.5.3 Zip64 extended information extra field (0x0001)
///
/// The fields appear on the wire in this fixed order, each present only
/// when the parent record needs it. Following the original transformer,
/// presence is decided by how many bytes the declared dsize leaves room
/// for, not by inspecting the parent's sentinels; the two agree on any
/// well-formed archive and the former keeps this type self-contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtraField {
    /// 64-bit uncompressed size
    pub uncompressed_size: Option<u64>,

    /// 64-bit compressed size
    pub compressed_size: Option<u64>,

    /// 64-bit offset of the entry's local header
    pub header_offset: Option<u64>,

    /// 32-bit disk start number
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Identifier of the zip64 extended information field
    pub const TAG: u16 = 0x0001;

    fn parser(i: &mut &[u8]) -> PResult<Self> {
        seq! {Self {
            uncompressed_size: opt(le_u64),
            compressed_size: opt(le_u64),
            header_offset: opt(le_u64),
            disk_start: opt(le_u32),
        }}
        .parse_next(i)
    }

    fn data_size(&self) -> u16 {
        let u64s = [
            self.uncompressed_size,
            self.compressed_size,
            self.header_offset,
        ]
        .iter()
        .flatten()
        .count() as u16;
        u64s * 8 + if self.disk_start.is_some() { 4 } else { 0 }
    }

    fn write_body<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.header_offset,
        ]
        .iter()
        .flatten()
        {
            w.write_u64::<LE>(*value)?;
        }
        if let Some(disk_start) = self.disk_start {
            w.write_u32::<LE>(disk_start)?;
        }
        Ok(())
    }
}

/// Extended timestamp extra field (0x5455), Unix seconds.
///
/// The flags byte says which of the three times the *local* copy of the
/// field carries; central directory copies conventionally keep the flags
/// but store only the modification time, so each time is parsed only
/// while the declared dsize leaves room for it. The flags byte is kept
/// verbatim for the trip back out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampExtraField {
    /// bit 0: mtime present, bit 1: atime, bit 2: ctime
    pub flags: u8,

    /// seconds since epoch, last modification
    pub mtime: Option<u32>,

    /// seconds since epoch, last access
    pub atime: Option<u32>,

    /// seconds since epoch, creation
    pub ctime: Option<u32>,
}

impl TimestampExtraField {
    /// Identifier of the extended timestamp field
    pub const TAG: u16 = 0x5455;

    /// A field carrying only a modification time, the common case.
    pub fn from_mtime(mtime: u32) -> Self {
        Self {
            flags: 0b1,
            mtime: Some(mtime),
            ..Default::default()
        }
    }

    fn parser(i: &mut &[u8]) -> PResult<Self> {
        let flags = le_u8.parse_next(i)?;
        let mut time_if_flagged = |bit: u8| {
            if flags & bit != 0 {
                opt(le_u32).parse_next(i)
            } else {
                Ok(None)
            }
        };
        let mtime = time_if_flagged(0b001)?;
        let atime = time_if_flagged(0b010)?;
        let ctime = time_if_flagged(0b100)?;
        Ok(Self {
            flags,
            mtime,
            atime,
            ctime,
        })
    }

    fn data_size(&self) -> u16 {
        1 + [self.mtime, self.atime, self.ctime]
            .iter()
            .flatten()
            .count() as u16
            * 4
    }

    fn write_body<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.flags)?;
        for time in [self.mtime, self.atime, self.ctime].iter().flatten() {
            w.write_u32::<LE>(*time)?;
        }
        Ok(())
    }
}

/// 4.5.5 NTFS extra field (0x000a), attribute 1: three Windows file
/// times in 100ns ticks.
///
/// Only the canonical single-attribute shape is decoded; anything else
/// (extra attributes, nonzero reserved bytes) stays raw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtfsExtraField {
    /// modified time
    pub mtime: NtfsTimestamp,

    /// accessed time
    pub atime: NtfsTimestamp,

    /// created time
    pub ctime: NtfsTimestamp,
}

impl NtfsExtraField {
    /// Identifier of the NTFS times field
    pub const TAG: u16 = 0x000a;

    /// reserved u32 + attribute tag + attribute size + three u64 times
    const DATA_SIZE: u16 = 4 + 2 + 2 + 24;

    fn parser(i: &mut &[u8]) -> PResult<Self> {
        let _reserved = le_u32.verify(|&r| r == 0).parse_next(i)?;
        let _attr_tag = le_u16.verify(|&t| t == 0x0001).parse_next(i)?;
        let _attr_size = le_u16.verify(|&s| s == 24).parse_next(i)?;
        seq! {Self {
            mtime: le_u64.map(|timestamp| NtfsTimestamp { timestamp }),
            atime: le_u64.map(|timestamp| NtfsTimestamp { timestamp }),
            ctime: le_u64.map(|timestamp| NtfsTimestamp { timestamp }),
        }}
        .parse_next(i)
    }

    fn write_body<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(0)?;
        w.write_u16::<LE>(0x0001)?;
        w.write_u16::<LE>(24)?;
        self.mtime.write(w)?;
        self.atime.write(w)?;
        self.ctime.write(w)
    }
}

/// An extra field carried as raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraField {
    /// identifier of the field
    pub tag: u16,

    /// the field's body, exactly as found on the wire
    pub payload: Vec<u8>,
}

/// Raised when an extras blob cannot be split into `(id, size, body)`
/// triplets: a dsize overruns the blob, or trailing bytes are too short
/// to form a header.
pub(crate) struct InvalidExtras;

/// Split an extras blob into fields. Known-id bodies that parse cleanly
/// and completely become typed variants; everything else stays raw.
pub(crate) fn parse_extra_fields(blob: &[u8]) -> Result<Vec<ExtraField>, InvalidExtras> {
    let mut rest = blob;
    let mut fields = Vec::new();
    while !rest.is_empty() {
        let (tag, payload) = parse_field_header(&mut rest).map_err(|_| InvalidExtras)?;
        fields.push(decode_field(tag, payload));
    }
    Ok(fields)
}

fn parse_field_header<'a>(i: &mut &'a [u8]) -> PResult<(u16, &'a [u8])> {
    let tag = le_u16.parse_next(i)?;
    let payload = length_take(le_u16).parse_next(i)?;
    Ok((tag, payload))
}

fn decode_field(tag: u16, payload: &[u8]) -> ExtraField {
    use ExtraField as EF;
    let typed = match tag {
        Zip64ExtraField::TAG => fully(Zip64ExtraField::parser, payload).map(EF::Zip64),
        TimestampExtraField::TAG => fully(TimestampExtraField::parser, payload).map(EF::Timestamp),
        NtfsExtraField::TAG => fully(NtfsExtraField::parser, payload).map(EF::Ntfs),
        _ => None,
    };
    typed.unwrap_or_else(|| {
        EF::Unknown(RawExtraField {
            tag,
            payload: payload.to_vec(),
        })
    })
}

/// Run a body parser, accepting the result only if it consumed every
/// byte of the payload.
fn fully<T>(mut parser: fn(&mut &[u8]) -> PResult<T>, payload: &[u8]) -> Option<T> {
    match parser.parse_peek(payload) {
        Ok((rest, value)) if rest.is_empty() => Some(value),
        _ => None,
    }
}

/// Parser for a record's whole extras region, given its declared length.
///
/// A malformed blob escapes as `ErrMode::Cut`, which record parsers let
/// through untouched: the decoder turns a cut into
/// [FormatError::InvalidExtraField](crate::error::FormatError::InvalidExtraField).
pub(crate) fn extra_fields_parser(
    len: u16,
) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Vec<ExtraField>> {
    move |i| {
        let blob = take(len).parse_next(i)?;
        parse_extra_fields(blob)
            .map_err(|InvalidExtras| ErrMode::from_error_kind(i, ErrorKind::Verify).cut())
    }
}

pub(crate) fn extra_fields_wire_size(fields: &[ExtraField]) -> u64 {
    fields.iter().map(ExtraField::wire_size).sum()
}

pub(crate) fn write_extra_fields<W: io::Write>(
    fields: &[ExtraField],
    w: &mut W,
) -> io::Result<()> {
    for field in fields {
        field.write(w)?;
    }
    Ok(())
}

/// Find the zip64 field in an extras list, if there is one.
pub(crate) fn find_zip64(fields: &[ExtraField]) -> Option<&Zip64ExtraField> {
    fields.iter().find_map(|f| match f {
        ExtraField::Zip64(z) => Some(z),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(blob: &[u8]) -> Vec<ExtraField> {
        let fields = parse_extra_fields(blob).unwrap_or_else(|_| panic!("blob should parse"));
        let mut out = Vec::new();
        write_extra_fields(&fields, &mut out).unwrap();
        assert_eq!(out, blob, "re-encoding should reproduce the blob");
        assert_eq!(extra_fields_wire_size(&fields), blob.len() as u64);
        fields
    }

    #[test]
    fn zip64_presence_follows_dsize() {
        // size + csize only
        let mut blob = vec![0x01, 0x00, 0x10, 0x00];
        blob.extend_from_slice(&0x1_0000_0001u64.to_le_bytes());
        blob.extend_from_slice(&0x1_0000_0002u64.to_le_bytes());

        let fields = roundtrip(&blob);
        assert_eq!(fields.len(), 1);
        match &fields[0] {
            ExtraField::Zip64(z) => {
                assert_eq!(z.uncompressed_size, Some(0x1_0000_0001));
                assert_eq!(z.compressed_size, Some(0x1_0000_0002));
                assert_eq!(z.header_offset, None);
                assert_eq!(z.disk_start, None);
            }
            other => panic!("expected zip64, got {:?}", other),
        }
    }

    #[test]
    fn zip64_with_leftover_bytes_stays_raw() {
        // dsize 12: one u64 plus 4 bytes that are not a disk start slot
        // after a missing csize, so the typed parse cannot cover it all
        let mut blob = vec![0x01, 0x00, 0x0c, 0x00];
        blob.extend_from_slice(&7u64.to_le_bytes());
        blob.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]);

        // the typed parse reads u64 + u32 and covers all 12 bytes, so
        // this particular shape decodes as size + disk_start
        let fields = roundtrip(&blob);
        match &fields[0] {
            ExtraField::Zip64(z) => {
                assert_eq!(z.uncompressed_size, Some(7));
                assert_eq!(z.disk_start, Some(0xddccbbaa));
            }
            other => panic!("expected zip64, got {:?}", other),
        }

        // dsize 6 leaves a 6-byte body no field layout can cover
        let blob = vec![0x01, 0x00, 0x06, 0x00, 1, 2, 3, 4, 5, 6];
        let fields = roundtrip(&blob);
        assert!(matches!(&fields[0], ExtraField::Unknown(raw) if raw.payload.len() == 6));
    }

    #[test]
    fn timestamp_central_truncation() {
        // flags claim mtime+atime but only mtime is stored
        let mut blob = vec![0x55, 0x54, 0x05, 0x00, 0b11];
        blob.extend_from_slice(&1_600_000_000u32.to_le_bytes());

        let fields = roundtrip(&blob);
        match &fields[0] {
            ExtraField::Timestamp(ts) => {
                assert_eq!(ts.flags, 0b11);
                assert_eq!(ts.mtime, Some(1_600_000_000));
                assert_eq!(ts.atime, None);
            }
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn ntfs_canonical_shape_only() {
        let mut blob = vec![0x0a, 0x00, 32, 0x00];
        blob.extend_from_slice(&[0; 4]);
        blob.extend_from_slice(&1u16.to_le_bytes());
        blob.extend_from_slice(&24u16.to_le_bytes());
        for ticks in [10u64, 20, 30] {
            blob.extend_from_slice(&ticks.to_le_bytes());
        }
        let fields = roundtrip(&blob);
        assert!(matches!(&fields[0], ExtraField::Ntfs(f) if f.atime.timestamp == 20));

        // nonzero reserved bytes: kept raw
        let mut odd = blob.clone();
        odd[4] = 0xff;
        let fields = roundtrip(&odd);
        assert!(matches!(&fields[0], ExtraField::Unknown(_)));
    }

    #[test]
    fn unknown_tags_kept_verbatim() {
        let blob = vec![0x99, 0x99, 0x03, 0x00, 0xca, 0xfe, 0x42];
        let fields = roundtrip(&blob);
        assert!(matches!(&fields[0], ExtraField::Unknown(raw) if raw.tag == 0x9999));
    }

    #[test]
    fn dsize_overrun_is_an_error() {
        let blob = vec![0x01, 0x00, 0x08, 0x00, 1, 2, 3];
        assert!(parse_extra_fields(&blob).is_err());
        // and so is a dangling header
        assert!(parse_extra_fields(&[0x01]).is_err());
    }
}
