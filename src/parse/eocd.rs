use byteorder::{WriteBytesExt, LE};
use std::io;
use winnow::{
    binary::{le_u16, le_u32, le_u64},
    seq,
    token::tag,
    PResult, Parser, Partial,
};

use crate::parse::{
    extra_field::{extra_fields_parser, extra_fields_wire_size, write_extra_fields},
    ExtraField, HostSystem, Version, ZipString, U16_SENTINEL, U32_SENTINEL,
};

/// 4.3.16 End of central directory record
#[derive(Debug, Clone, PartialEq)]
pub struct EndRecord {
    /// number of this disk
    pub disk_nbr: u16,

    /// number of the disk with the start of the central directory
    pub dir_disk_nbr: u16,

    /// number of central directory entries on this disk
    pub dir_records_this_disk: u16,

    /// total number of central directory entries
    pub directory_records: u16,

    /// size of the central directory
    pub directory_size: u32,

    /// offset of the start of the central directory
    pub directory_offset: u32,

    /// .ZIP file comment
    pub comment: ZipString,
}

impl Default for EndRecord {
    fn default() -> Self {
        Self {
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 0,
            directory_records: 0,
            directory_size: 0,
            directory_offset: 0,
            comment: ZipString(vec![]),
        }
    }
}

impl EndRecord {
    /// The signature for the end of central directory record
    pub const SIGNATURE: u32 = 0x06054b50;

    pub(crate) const MAGIC: &'static str = "PK\x05\x06";

    const FIXED_SIZE: u64 = 22;

    /// Parser for the end of central directory record
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::MAGIC).parse_next(i)?;
        seq! {Self {
            disk_nbr: le_u16,
            dir_disk_nbr: le_u16,
            dir_records_this_disk: le_u16,
            directory_records: le_u16,
            directory_size: le_u32,
            directory_offset: le_u32,
            comment: winnow::binary::length_take(le_u16).map(ZipString::from),
        }}
        .parse_next(i)
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(Self::SIGNATURE)?;
        w.write_u16::<LE>(self.disk_nbr)?;
        w.write_u16::<LE>(self.dir_disk_nbr)?;
        w.write_u16::<LE>(self.dir_records_this_disk)?;
        w.write_u16::<LE>(self.directory_records)?;
        w.write_u32::<LE>(self.directory_size)?;
        w.write_u32::<LE>(self.directory_offset)?;
        w.write_u16::<LE>(self.comment.len() as u16)?;
        w.write_all(&self.comment.0)
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        Self::FIXED_SIZE + self.comment.len() as u64
    }

    /// True when all four count/size/offset fields are at their
    /// sentinels, i.e. the real values live in a preceding zip64 end
    /// record. The re-derivation pass leaves such a record alone.
    pub fn is_zip64(&self) -> bool {
        self.dir_records_this_disk == U16_SENTINEL
            && self.directory_records == U16_SENTINEL
            && self.directory_size == U32_SENTINEL
            && self.directory_offset == U32_SENTINEL
    }

    /// Push the four count/size/offset fields to their sentinels. The
    /// caller is responsible for also putting a zip64 end record and
    /// locator in front of this record.
    pub fn to_zip64(self) -> Self {
        Self {
            dir_records_this_disk: U16_SENTINEL,
            directory_records: U16_SENTINEL,
            directory_size: U32_SENTINEL,
            directory_offset: U32_SENTINEL,
            ..self
        }
    }

    /// Same record, different this-disk number.
    pub fn with_disk_nbr(self, disk_nbr: u16) -> Self {
        Self { disk_nbr, ..self }
    }

    /// Same record, different directory-start disk number.
    pub fn with_dir_disk_nbr(self, dir_disk_nbr: u16) -> Self {
        Self {
            dir_disk_nbr,
            ..self
        }
    }

    /// Same record, different this-disk entry count.
    pub fn with_dir_records_this_disk(self, dir_records_this_disk: u16) -> Self {
        Self {
            dir_records_this_disk,
            ..self
        }
    }

    /// Same record, different total entry count.
    pub fn with_directory_records(self, directory_records: u16) -> Self {
        Self {
            directory_records,
            ..self
        }
    }

    /// Same record, different central directory size.
    pub fn with_directory_size(self, directory_size: u32) -> Self {
        Self {
            directory_size,
            ..self
        }
    }

    /// Same record, different central directory offset.
    pub fn with_directory_offset(self, directory_offset: u32) -> Self {
        Self {
            directory_offset,
            ..self
        }
    }

    /// Same record, different archive comment.
    pub fn with_comment(self, comment: impl Into<ZipString>) -> Self {
        Self {
            comment: comment.into(),
            ..self
        }
    }
}

/// 4.3.14 Zip64 end of central directory record
#[derive(Debug, Clone, PartialEq)]
pub struct Zip64EndRecord {
    /// size of the record, not counting the signature and this field.
    /// Kept verbatim from the wire; 44 plus the extras length for
    /// records this crate builds.
    pub record_size: u64,

    /// version made by
    pub creator_version: Version,

    /// version needed to extract
    pub reader_version: Version,

    /// number of this disk
    pub disk_nbr: u32,

    /// number of the disk with the start of the central directory
    pub dir_disk_nbr: u32,

    /// number of central directory entries on this disk
    pub dir_records_this_disk: u64,

    /// total number of central directory entries
    pub directory_records: u64,

    /// size of the central directory
    pub directory_size: u64,

    /// offset of the start of the central directory
    pub directory_offset: u64,

    /// zip64 extensible data sector
    pub extra_fields: Vec<ExtraField>,
}

impl Default for Zip64EndRecord {
    fn default() -> Self {
        Self {
            record_size: Self::FIXED_TAIL,
            creator_version: Version {
                version: 45,
                host_system: HostSystem::Unix,
            },
            reader_version: Version {
                version: 45,
                host_system: HostSystem::MsDos,
            },
            disk_nbr: 0,
            dir_disk_nbr: 0,
            dir_records_this_disk: 0,
            directory_records: 0,
            directory_size: 0,
            directory_offset: 0,
            extra_fields: vec![],
        }
    }
}

impl Zip64EndRecord {
    /// The signature for the zip64 end of central directory record
    pub const SIGNATURE: u32 = 0x06064b50;

    pub(crate) const MAGIC: &'static str = "PK\x06\x06";

    /// Bytes covered by `record_size` before any extensible data
    const FIXED_TAIL: u64 = 44;

    /// Parser for the zip64 end of central directory record
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::MAGIC).parse_next(i)?;
        let record_size = le_u64.parse_next(i)?;
        let creator_version = Version::parser.parse_next(i)?;
        let reader_version = Version::parser.parse_next(i)?;
        let disk_nbr = le_u32.parse_next(i)?;
        let dir_disk_nbr = le_u32.parse_next(i)?;
        let dir_records_this_disk = le_u64.parse_next(i)?;
        let directory_records = le_u64.parse_next(i)?;
        let directory_size = le_u64.parse_next(i)?;
        let directory_offset = le_u64.parse_next(i)?;

        // whatever record_size declares beyond the fixed fields is the
        // zip64 extensible data sector
        let extra_len = record_size.saturating_sub(Self::FIXED_TAIL);
        let extra_fields = extra_fields_parser(extra_len.min(u16::MAX as u64) as u16).parse_next(i)?;

        Ok(Self {
            record_size,
            creator_version,
            reader_version,
            disk_nbr,
            dir_disk_nbr,
            dir_records_this_disk,
            directory_records,
            directory_size,
            directory_offset,
            extra_fields,
        })
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(Self::SIGNATURE)?;
        w.write_u64::<LE>(self.record_size)?;
        self.creator_version.write(w)?;
        self.reader_version.write(w)?;
        w.write_u32::<LE>(self.disk_nbr)?;
        w.write_u32::<LE>(self.dir_disk_nbr)?;
        w.write_u64::<LE>(self.dir_records_this_disk)?;
        w.write_u64::<LE>(self.directory_records)?;
        w.write_u64::<LE>(self.directory_size)?;
        w.write_u64::<LE>(self.directory_offset)?;
        write_extra_fields(&self.extra_fields, w)
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        4 + 8 + Self::FIXED_TAIL + extra_fields_wire_size(&self.extra_fields)
    }

    /// Same record, different counts.
    pub fn with_directory_records(self, directory_records: u64) -> Self {
        Self {
            dir_records_this_disk: directory_records,
            directory_records,
            ..self
        }
    }

    /// Same record, different central directory size.
    pub fn with_directory_size(self, directory_size: u64) -> Self {
        Self {
            directory_size,
            ..self
        }
    }

    /// Same record, different central directory offset.
    pub fn with_directory_offset(self, directory_offset: u64) -> Self {
        Self {
            directory_offset,
            ..self
        }
    }
}

/// 4.3.15 Zip64 end of central directory locator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zip64EndLocator {
    /// number of the disk with the start of the zip64 end of central directory
    pub dir_disk_nbr: u32,

    /// absolute offset of the zip64 end of central directory record
    pub directory_offset: u64,

    /// total number of disks
    pub total_disks: u32,
}

impl Default for Zip64EndLocator {
    fn default() -> Self {
        Self {
            dir_disk_nbr: 0,
            directory_offset: 0,
            total_disks: 1,
        }
    }
}

impl Zip64EndLocator {
    /// The signature for the zip64 end of central directory locator
    pub const SIGNATURE: u32 = 0x07064b50;

    pub(crate) const MAGIC: &'static str = "PK\x06\x07";

    /// Length of the locator
    pub const LENGTH: u64 = 20;

    /// Parser for the zip64 end of central directory locator
    pub fn parser(i: &mut Partial<&'_ [u8]>) -> PResult<Self> {
        let _ = tag(Self::MAGIC).parse_next(i)?;
        seq! {Self {
            dir_disk_nbr: le_u32,
            directory_offset: le_u64,
            total_disks: le_u32,
        }}
        .parse_next(i)
    }

    pub(crate) fn write<W: io::Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(Self::SIGNATURE)?;
        w.write_u32::<LE>(self.dir_disk_nbr)?;
        w.write_u64::<LE>(self.directory_offset)?;
        w.write_u32::<LE>(self.total_disks)
    }

    /// Exact serialized length of this record in bytes.
    pub fn wire_size(&self) -> u64 {
        Self::LENGTH
    }

    /// Same locator, different zip64 end record offset.
    pub fn with_directory_offset(self, directory_offset: u64) -> Self {
        Self {
            directory_offset,
            ..self
        }
    }
}
