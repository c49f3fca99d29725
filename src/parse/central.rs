use byteorder::{WriteBytesExt, LE};
use std::io;
use winnow::{
    binary::{le_u16, le_u32},
    token::tag,
    PResult, Parser, Partial,
};

use crate::parse::{
    extra_field::{extra_fields_parser, extra_fields_wire_size, find_zip64, write_extra_fields},
    local::logical_size,
    ExtraField, HostSystem, Method, MsdosTimestamp, Version, Zip64ExtraField, ZipString,
    U16_SENTINEL, U32_SENTINEL,
};

/// 4.3.12 Central directory structure: file header
///
/// One per entry, in the central directory near the end of the archive.
/// Repeats most of the local header's fields and adds the position of
/// that local header, which is what the re-derivation pass keeps honest.
#[derive(Debug, Clone, PartialEq)]
pub struct CentralEntry {
    /// version made by
    pub creator_version: Version,

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

    /// disk number start
    pub disk_nbr_start: u16,

    /// internal file attributes
    pub internal_attrs: u16,

    /// external file attributes
    pub external_attrs: u32,

    /// relative offset of the entry's local header
    pub header_offset: u32,

    /// file name
    pub name: ZipString,

    /// extra fields
    pub extra_fields: Vec<ExtraField>,

    /// entry comment
    pub comment: ZipString,
}

impl CentralEntry {
    /// The signature for a central directory file header
    pub const SIGNATURE: u32 = 0x02014b50;

    pub(crate) const MAGIC: &'static str = "PK\x01\x02";

    const FIXED_SIZE: u64 = 46;

    /// An entry with the given name and method and unremarkable
    /// defaults everywhere else.
    pub fn new(name: impl Into<ZipString>, method: Method) -> Self {
        Self {
            creator_version: Version {
                version: 20,
                host_system: HostSystem::Unix,
            },
            reader_version: Version {
                version: 20,
                host_system: HostSystem::MsDos,
            },
            flags: 0,
            method,
            modified: MsdosTimestamp::default(),
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            disk_nbr_start: 0,
            internal_attrs: 0,
            external_attrs: 0,
            header_offset: 0,
            name: name.into(),
            extra_fields: vec![],
            comment: ZipString(vec![]),
        }
    }

    /// Parser for a central directory file header
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::MAGIC).parse_next(i)?;

        let creator_version = Version::parser.parse_next(i)?;
        let reader_version = Version::parser.parse_next(i)?;
        let flags = le_u16.parse_next(i)?;
        let method = le_u16.parse_next(i).map(Method::from)?;
        let modified = MsdosTimestamp::parser.parse_next(i)?;
        let crc32 = le_u32.parse_next(i)?;
        let compressed_size = le_u32.parse_next(i)?;
        let uncompressed_size = le_u32.parse_next(i)?;
        let name_len = le_u16.parse_next(i)?;
        let extra_len = le_u16.parse_next(i)?;
        let comment_len = le_u16.parse_next(i)?;
        let disk_nbr_start = le_u16.parse_next(i)?;
        let internal_attrs = le_u16.parse_next(i)?;
        let external_attrs = le_u32.parse_next(i)?;
        let header_offset = le_u32.parse_next(i)?;

        let name = ZipString::parser(name_len).parse_next(i)?;
        let extra_fields = extra_fields_parser(extra_len).parse_next(i)?;
        let comment = ZipString::parser(comment_len).parse_next(i)?;

        Ok(Self {
            creator_version,
            reader_version,
            flags,
            method,
            modified,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_nbr_start,
            internal_attrs,
            external_attrs,
            header_offset,
            name,
            extra_fields,
            comment,
        })
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(Self::SIGNATURE)?;
        self.creator_version.write(w)?;
        self.reader_version.write(w)?;
        w.write_u16::<LE>(self.flags)?;
        w.write_u16::<LE>(u16::from(self.method))?;
        self.modified.write(w)?;
        w.write_u32::<LE>(self.crc32)?;
        w.write_u32::<LE>(self.compressed_size)?;
        w.write_u32::<LE>(self.uncompressed_size)?;
        w.write_u16::<LE>(self.name.len() as u16)?;
        w.write_u16::<LE>(extra_fields_wire_size(&self.extra_fields) as u16)?;
        w.write_u16::<LE>(self.comment.len() as u16)?;
        w.write_u16::<LE>(self.disk_nbr_start)?;
        w.write_u16::<LE>(self.internal_attrs)?;
        w.write_u32::<LE>(self.external_attrs)?;
        w.write_u32::<LE>(self.header_offset)?;
        w.write_all(&self.name.0)?;
        write_extra_fields(&self.extra_fields, w)?;
        w.write_all(&self.comment.0)
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        Self::FIXED_SIZE
            + self.name.len() as u64
            + extra_fields_wire_size(&self.extra_fields)
            + self.comment.len() as u64
    }

    /// The zip64 extra field, if the entry carries one.
    pub fn zip64_extra(&self) -> Option<&Zip64ExtraField> {
        find_zip64(&self.extra_fields)
    }

    /// True if the entry carries a zip64 extra field.
    pub fn is_zip64(&self) -> bool {
        self.zip64_extra().is_some()
    }

    /// The local header offset, resolving the zip64 indirection.
    pub fn logical_header_offset(&self) -> u64 {
        if self.header_offset == U32_SENTINEL {
            self.zip64_extra()
                .and_then(|z| z.header_offset)
                .unwrap_or(u64::from(self.header_offset))
        } else {
            u64::from(self.header_offset)
        }
    }

    /// Upgrade to the zip64 form: extract version 4.5; sizes, header
    /// offset and disk start at their sentinels; a fresh four-field
    /// zip64 extra carrying the real values (replacing any previous
    /// one).
    pub fn to_zip64(mut self) -> Self {
        let uncompressed_size = logical_size(self.uncompressed_size, || {
            self.zip64_extra().and_then(|z| z.uncompressed_size)
        });
        let compressed_size = logical_size(self.compressed_size, || {
            self.zip64_extra().and_then(|z| z.compressed_size)
        });
        let header_offset = self.logical_header_offset();
        let disk_start = if self.disk_nbr_start == U16_SENTINEL {
            self.zip64_extra().and_then(|z| z.disk_start).unwrap_or(0)
        } else {
            u32::from(self.disk_nbr_start)
        };

        self.reader_version = self.reader_version.with_version(45);
        self.uncompressed_size = U32_SENTINEL;
        self.compressed_size = U32_SENTINEL;
        self.header_offset = U32_SENTINEL;
        self.disk_nbr_start = U16_SENTINEL;
        self.extra_fields
            .retain(|f| !matches!(f, ExtraField::Zip64(_)));
        self.extra_fields.insert(
            0,
            ExtraField::Zip64(Zip64ExtraField {
                uncompressed_size: Some(uncompressed_size),
                compressed_size: Some(compressed_size),
                header_offset: Some(header_offset),
                disk_start: Some(disk_start),
            }),
        );
        self
    }

    /// Point this entry at a local header position, writing through to
    /// whichever site currently holds the value: the u32 field, or the
    /// zip64 extra when the field is at its sentinel. A sentinel-bearing
    /// entry that somehow lost its zip64 extra gets one.
    pub fn with_header_offset(mut self, offset: u64) -> Self {
        if self.header_offset == U32_SENTINEL {
            let mut rewritten = false;
            for field in &mut self.extra_fields {
                if let ExtraField::Zip64(z) = field {
                    z.header_offset = Some(offset);
                    rewritten = true;
                    break;
                }
            }
            if !rewritten {
                self.extra_fields.insert(
                    0,
                    ExtraField::Zip64(Zip64ExtraField {
                        header_offset: Some(offset),
                        ..Default::default()
                    }),
                );
            }
        } else {
            self.header_offset = offset.min(u64::from(U32_SENTINEL)) as u32;
        }
        self
    }

    /// Same entry, different made-by version.
    pub fn with_creator_version(self, creator_version: Version) -> Self {
        Self {
            creator_version,
            ..self
        }
    }

    /// Same entry, different extract version.
    pub fn with_reader_version(self, reader_version: Version) -> Self {
        Self {
            reader_version,
            ..self
        }
    }

    /// Same entry, different flags.
    pub fn with_flags(self, flags: u16) -> Self {
        Self { flags, ..self }
    }

    /// Same entry, different method.
    pub fn with_method(self, method: Method) -> Self {
        Self { method, ..self }
    }

    /// Same entry, different modification timestamp.
    pub fn with_modified(self, modified: MsdosTimestamp) -> Self {
        Self { modified, ..self }
    }

    /// Same entry, different checksum.
    pub fn with_crc32(self, crc32: u32) -> Self {
        Self { crc32, ..self }
    }

    /// Same entry, different compressed size.
    pub fn with_compressed_size(self, compressed_size: u32) -> Self {
        Self {
            compressed_size,
            ..self
        }
    }

    /// Same entry, different uncompressed size.
    pub fn with_uncompressed_size(self, uncompressed_size: u32) -> Self {
        Self {
            uncompressed_size,
            ..self
        }
    }

    /// Same entry, different disk start number.
    pub fn with_disk_nbr_start(self, disk_nbr_start: u16) -> Self {
        Self {
            disk_nbr_start,
            ..self
        }
    }

    /// Same entry, different internal attributes.
    pub fn with_internal_attrs(self, internal_attrs: u16) -> Self {
        Self {
            internal_attrs,
            ..self
        }
    }

    /// Same entry, different external attributes.
    pub fn with_external_attrs(self, external_attrs: u32) -> Self {
        Self {
            external_attrs,
            ..self
        }
    }

    /// Same entry, different name.
    pub fn with_name(self, name: impl Into<ZipString>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Same entry, different extras.
    pub fn with_extra_fields(self, extra_fields: Vec<ExtraField>) -> Self {
        Self {
            extra_fields,
            ..self
        }
    }

    /// Same entry, different comment.
    pub fn with_comment(self, comment: impl Into<ZipString>) -> Self {
        Self {
            comment: comment.into(),
            ..self
        }
    }
}
