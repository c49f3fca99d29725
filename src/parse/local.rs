use byteorder::{WriteBytesExt, LE};
use std::{fmt, io};
use winnow::{
    binary::{le_u16, le_u32, le_u64},
    combinator::opt,
    token::tag,
    PResult, Parser, Partial,
};

use crate::{
    parse::{
        extra_field::{
            extra_fields_parser, extra_fields_wire_size, find_zip64, write_extra_fields,
        },
        ExtraField, Method, MsdosTimestamp, Version, Zip64ExtraField, ZipString, U32_SENTINEL,
    },
    source::ByteSource,
};

/// 4.3.7 Local file header
#[derive(Debug, Clone, PartialEq)]
pub struct LocalHeader {
    /// version needed to extract
    pub reader_version: Version,

    /// general purpose bit flag
    pub flags: u16,

    /// compression method
    pub method: Method,

    /// last mod file datetime
    pub modified: MsdosTimestamp,

    /// crc-32
    pub crc32: u32,

    /// compressed size
    pub compressed_size: u32,

    /// uncompressed size
    pub uncompressed_size: u32,

    /// file name
    pub name: ZipString,

    /// extra fields
    pub extra_fields: Vec<ExtraField>,
}

impl LocalHeader {
    /// The signature for a local file header
    pub const SIGNATURE: u32 = 0x04034b50;

    pub(crate) const MAGIC: &'static str = "PK\x03\x04";

    /// Fixed-field portion of the wire size
    const FIXED_SIZE: u64 = 30;

    /// A header with the given name and method and unremarkable
    /// defaults everywhere else: version 2.0, no flags, zero sizes.
    pub fn new(name: impl Into<ZipString>, method: Method) -> Self {
        Self {
            reader_version: Version {
                version: 20,
                host_system: crate::parse::HostSystem::MsDos,
            },
            flags: 0,
            method,
            modified: MsdosTimestamp::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            name: name.into(),
            extra_fields: vec![],
        }
    }

    /// Parser for the local file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::MAGIC).parse_next(i)?;

        let reader_version = Version::parser.parse_next(i)?;
        let flags = le_u16.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;

        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra_fields = extra_fields_parser(extra_len).parse_next(i)?;

        Ok(Self {
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            name,
            extra_fields,
        })
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(Self::SIGNATURE)?;
        self.reader_version.write(w)?;
        w.write_u16::<LE>(self.flags)?;
        w.write_u16::<LE>(u16::from(self.method))?;
        self.modified.write(w)?;
        w.write_u32::<LE>(self.crc32)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.uncompressed_size)?;
        w.write_u16::<LE>(self.name.len() as u16)?;
        w.write_u16::<LE>(extra_fields_wire_size(&self.extra_fields) as u16)?;
        w.write_all(&self.name.0)?;
        write_extra_fields(&self.extra_fields, w)
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        Self::FIXED_SIZE + self.name.len() as u64 + extra_fields_wire_size(&self.extra_fields)
    }

    /// Check for the presence of the bit flag that indicates a data
    /// descriptor is present after the file data.
    pub fn has_data_descriptor(&self) -> bool {
        // 4.3.9.1 This descriptor MUST exist if bit 3 of the general
        // purpose bit flag is set (see below).
        self.flags & 0b1000 != 0
    }

    /// The zip64 extra field, if the header carries one.
    pub fn zip64_extra(&self) -> Option<&Zip64ExtraField> {
        find_zip64(&self.extra_fields)
    }

    /// True if the header carries a zip64 extra field. Among other
    /// things this decides whether a following data descriptor uses
    /// 8-byte size fields.
    pub fn is_zip64(&self) -> bool {
        self.zip64_extra().is_some()
    }

    /// The compressed size the decoder should trust, or `None` when the
    /// payload length can only be discovered by inflating it: the
    /// data-descriptor form, where sizes were unknown when the header
    /// was written.
    pub fn known_compressed_size(&self) -> Option<u64> {
        if self.compressed_size == U32_SENTINEL {
            self.zip64_extra().and_then(|z| z.compressed_size)
        } else if self.has_data_descriptor()
            && self.compressed_size == 0
            && self.method == Method::Deflate
        {
            None
        } else {
            Some(u64::from(self.compressed_size))
        }
    }

    /// Upgrade to the zip64 form: extract version 4.5, both size
    /// fields at the sentinel, and a fresh zip64 extra field carrying
    /// the real values (replacing any previous one).
    pub fn to_zip64(mut self) -> Self {
        let uncompressed_size = logical_size(self.uncompressed_size, || {
            self.zip64_extra().and_then(|z| z.uncompressed_size)
        });
        let compressed_size = logical_size(self.compressed_size, || {
            self.zip64_extra().and_then(|z| z.compressed_size)
        });
        self.reader_version = self.reader_version.with_version(45);
        self.uncompressed_size = U32_SENTINEL;
        self.compressed_size = U32_SENTINEL;
        self.extra_fields
            .retain(|f| !matches!(f, ExtraField::Zip64(_)));
        self.extra_fields.insert(
            0,
            ExtraField::Zip64(Zip64ExtraField {
                uncompressed_size: Some(uncompressed_size),
                compressed_size: Some(compressed_size),
                ..Default::default()
            }),
        );
        self
    }

    /// Same header, different extract version.
    pub fn with_reader_version(self, reader_version: Version) -> Self {
        Self {
            reader_version,
            ..self
        }
    }

    /// Same header, different flags.
    pub fn with_flags(self, flags: u16) -> Self {
        Self { flags, ..self }
    }

    /// Same header, different method.
    pub fn with_method(self, method: Method) -> Self {
        Self { method, ..self }
    }

    /// Same header, different modification timestamp.
    pub fn with_modified(self, modified: MsdosTimestamp) -> Self {
        Self { modified, ..self }
    }

    /// Same header, different checksum.
    pub fn with_crc32(self, crc32: u32) -> Self {
        Self { crc32, ..self }
    }

    /// Same header, different compressed size.
    pub fn with_compressed_size(self, compressed_size: u32) -> Self {
        Self {
            compressed_size,
            ..self
        }
    }

    /// Same header, different uncompressed size.
    pub fn with_uncompressed_size(self, uncompressed_size: u32) -> Self {
        Self {
            uncompressed_size,
            ..self
        }
    }

    /// Same header, different name.
    pub fn with_name(self, name: impl Into<ZipString>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Same header, different extras.
    pub fn with_extra_fields(self, extra_fields: Vec<ExtraField>) -> Self {
        Self {
            extra_fields,
            ..self
        }
    }
}

/// Resolve a u32 size field against its optional zip64 counterpart.
pub(crate) fn logical_size(field: u32, zip64: impl FnOnce() -> Option<u64>) -> u64 {
    if field == U32_SENTINEL {
        zip64().unwrap_or(u64::from(field))
    } else {
        u64::from(field)
    }
}

/// The bytes between a local header and whatever follows them: a lazy
/// handle to the entry's (compressed) payload.
///
/// The decoder never materializes payloads; it records where they live
/// in the input. Caller-built records can hold an owned buffer instead.
#[derive(Clone)]
pub struct FileData {
    /// where the payload bytes come from
    pub contents: Contents,
}

/// Backing storage for a [FileData].
#[derive(Clone)]
pub enum Contents {
    /// A range of the decoded input, read back at encoding time.
    Range(SourceRange),

    /// An in-memory buffer.
    Buffer(Vec<u8>),
}

/// A `(source, offset, length)` triple into a [ByteSource].
#[derive(Debug, Clone)]
pub struct SourceRange {
    /// handle to the bytes the decoder went through
    pub source: ByteSource,

    /// absolute offset of the payload's first byte
    pub offset: u64,

    /// compressed length of the payload
    pub len: u64,
}

impl FileData {
    /// Payload backed by an owned buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            contents: Contents::Buffer(data),
        }
    }

    /// Payload borrowed from a byte source.
    pub fn from_range(source: ByteSource, offset: u64, len: u64) -> Self {
        Self {
            contents: Contents::Range(SourceRange {
                source,
                offset,
                len,
            }),
        }
    }

    /// Compressed length of the payload; also its wire size.
    pub fn len(&self) -> u64 {
        match &self.contents {
            Contents::Range(range) => range.len,
            Contents::Buffer(data) => data.len() as u64,
        }
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the payload. Borrowed ranges read from their source,
    /// which does I/O for file-backed sources.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.contents {
            Contents::Range(range) => range.source.read_range(range.offset, range.len),
            Contents::Buffer(data) => Ok(data.clone()),
        }
    }
}

impl From<Vec<u8>> for FileData {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for FileData {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl fmt::Debug for FileData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.contents {
            Contents::Range(range) => {
                write!(f, "FileData({} bytes at offset {})", range.len, range.offset)
            }
            Contents::Buffer(data) => write!(f, "FileData({} bytes, owned)", data.len()),
        }
    }
}

impl PartialEq for FileData {
    /// Payloads compare by content, wherever they live. A payload that
    /// cannot be read compares unequal to everything.
    fn eq(&self, other: &Self) -> bool {
        match (self.bytes(), other.bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// 4.3.9 Data descriptor
///
/// `signed` records whether the optional `PK\x07\x08` signature was (or
/// will be) on the wire; `zip64` whether the size fields take 8 bytes
/// each. Neither is a wire field of its own, but both change the byte
/// layout, so they are part of the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// whether the descriptor carries the optional signature
    pub signed: bool,

    /// whether sizes serialize as u64
    pub zip64: bool,

    /// CRC32 checksum
    pub crc32: u32,

    /// Compressed size
    pub compressed_size: u64,

    /// Uncompressed size
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// The (optional, commonly adopted) signature for a data descriptor
    pub const SIGNATURE: u32 = 0x08074b50;

    pub(crate) const MAGIC: &'static str = "PK\x07\x08";

    /// A signed, non-zip64 descriptor.
    pub fn new(crc32: u32, compressed_size: u64, uncompressed_size: u64) -> Self {
        Self {
            signed: true,
            zip64: false,
            crc32,
            compressed_size,
            uncompressed_size,
        }
    }

    /// Create a parser for the data descriptor record.
    pub fn mk_parser(is_zip64: bool) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self> {
        move |i| {
            // From appnote.txt:
            //
            // 4.3.9.3 Although not originally assigned a signature, the value
            // 0x08074b50 has commonly been adopted as a signature value for the
            // data descriptor record.  Implementers SHOULD be aware that ZIP files
            // MAY be encountered with or without this signature marking data
            // descriptors and SHOULD account for either case when reading ZIP files
            // to ensure compatibility.
            let signed = opt(tag(Self::MAGIC)).parse_next(i)?.is_some();

            let crc32 = le_u32.parse_next(i)?;
            let (compressed_size, uncompressed_size) = if is_zip64 {
                (le_u64.parse_next(i)?, le_u64.parse_next(i)?)
            } else {
                (
                    le_u32.parse_next(i).map(u64::from)?,
                    le_u32.parse_next(i).map(u64::from)?,
                )
            };

            Ok(Self {
                signed,
                zip64: is_zip64,
                crc32,
                compressed_size,
                uncompressed_size,
            })
        }
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        if self.signed {
            w.write_u32::<LE>(Self::SIGNATURE)?;
        }
        w.write_u32::<LE>(self.crc32)?;
        if self.zip64 {
            w.write_u64::<LE>(self.compressed_size)?;
            w.write_u64::<LE>(self.uncompressed_size)
        } else {
            w.write_u32::<LE>(self.compressed_size as u32)?;
            w.write_u32::<LE>(self.uncompressed_size as u32)
        }
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        let sizes = if self.zip64 { 16 } else { 8 };
        if self.signed {
            8 + sizes
        } else {
            4 + sizes
        }
    }

    /// Upgrade to 8-byte size fields.
    pub fn to_zip64(self) -> Self {
        Self {
            zip64: true,
            ..self
        }
    }

    /// Same descriptor, different checksum.
    pub fn with_crc32(self, crc32: u32) -> Self {
        Self { crc32, ..self }
    }

    /// Same descriptor, different compressed size.
    pub fn with_compressed_size(self, compressed_size: u64) -> Self {
        Self {
            compressed_size,
            ..self
        }
    }

    /// Same descriptor, different uncompressed size.
    pub fn with_uncompressed_size(self, uncompressed_size: u64) -> Self {
        Self {
            uncompressed_size,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winnow::error::ErrMode;

    fn parse_header(bytes: &[u8]) -> LocalHeader {
        let mut input = Partial::new(bytes);
        LocalHeader::parser(&mut input).unwrap()
    }

    #[test]
    fn local_header_roundtrip() {
        let header = LocalHeader::new("hello.txt", Method::Deflate)
            .with_flags(0x0800)
            .with_crc32(0xdeadbeef)
            .with_compressed_size(7)
            .with_uncompressed_size(5)
            .with_extra_fields(vec![ExtraField::Timestamp(
                crate::parse::TimestampExtraField::from_mtime(1_600_000_000),
            )]);

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, header.wire_size());

        let parsed = parse_header(&bytes);
        assert_eq!(parsed, header);
    }

    #[test]
    fn truncated_header_is_incomplete() {
        let header = LocalHeader::new("x", Method::Store);
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();

        let mut input = Partial::new(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            LocalHeader::parser(&mut input),
            Err(ErrMode::Incomplete(_))
        ));
    }

    #[test]
    fn zip64_upgrade_moves_sizes_into_the_extra() {
        let header = LocalHeader::new("big", Method::Store)
            .with_compressed_size(1234)
            .with_uncompressed_size(1234)
            .to_zip64();

        assert_eq!(header.reader_version.version, 45);
        assert_eq!(header.compressed_size, U32_SENTINEL);
        assert_eq!(header.uncompressed_size, U32_SENTINEL);
        let z = header.zip64_extra().unwrap();
        assert_eq!(z.uncompressed_size, Some(1234));
        assert_eq!(z.compressed_size, Some(1234));
        assert_eq!(z.header_offset, None);
        assert_eq!(header.known_compressed_size(), Some(1234));

        // upgrading twice is idempotent
        let again = header.clone().to_zip64();
        assert_eq!(again, header);
    }

    #[test]
    fn descriptor_forms() {
        for (signed, zip64, expected_len) in
            [(true, false, 16), (false, false, 12), (true, true, 24)]
        {
            let desc = DataDescriptor {
                signed,
                zip64,
                crc32: 0xcafe,
                compressed_size: 10,
                uncompressed_size: 20,
            };
            let mut bytes = Vec::new();
            desc.write(&mut bytes).unwrap();
            assert_eq!(bytes.len() as u64, desc.wire_size());
            assert_eq!(bytes.len(), expected_len);

            let mut input = Partial::new(&bytes[..]);
            let parsed = DataDescriptor::mk_parser(zip64)(&mut input).unwrap();
            assert_eq!(parsed, desc);
        }
    }

    #[test]
    fn unknown_compressed_size_only_for_descriptor_deflate() {
        let plain = LocalHeader::new("a", Method::Deflate).with_compressed_size(9);
        assert_eq!(plain.known_compressed_size(), Some(9));

        let descriptor_form = LocalHeader::new("a", Method::Deflate).with_flags(0b1000);
        assert_eq!(descriptor_form.known_compressed_size(), None);

        let stored = LocalHeader::new("a", Method::Store).with_flags(0b1000);
        assert_eq!(stored.known_compressed_size(), Some(0));
    }
}
