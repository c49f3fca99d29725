//! The trace tap: a passthrough that writes a human-readable
//! disassembly of every record flowing past, with absolute offsets,
//! raw values and decoded interpretations. Meant for eyeballs, not for
//! parsing; the exact layout is allowed to evolve.

use std::io;

use chrono::{offset::TimeZone, Utc};

use crate::{
    error::Error,
    parse::{
        CentralEntry, Contents, DataDescriptor, EndRecord, ExtraField, FileData, LocalHeader,
        Method, MsdosTimestamp, Record, Version, Zip64EndLocator, Zip64EndRecord, ZipString,
        NtfsExtraField, TimestampExtraField, Zip64ExtraField, U16_SENTINEL, U32_SENTINEL,
    },
};

/// Iterator adapter that disassembles records into a text sink as they
/// flow past. Built by
/// [RecordTransform::trace](crate::transform::RecordTransform::trace).
pub struct Trace<I, W: io::Write> {
    inner: I,
    sink: Option<W>,
    offset: u64,
}

impl<I, W: io::Write> Trace<I, W> {
    pub(crate) fn new(inner: I, sink: Option<W>) -> Self {
        Self {
            inner,
            sink,
            offset: 0,
        }
    }
}

impl<I, W> Iterator for Trace<I, W>
where
    I: Iterator<Item = Result<Record, Error>>,
    W: io::Write,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.inner.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = write_record_trace(sink, self.offset, &record) {
                return Some(Err(e.into()));
            }
        }
        self.offset += record.wire_size();
        Some(Ok(record))
    }
}

/// Disassemble one record to `w`, assuming it starts at absolute
/// `offset`.
pub fn write_record_trace<W: io::Write>(
    w: &mut W,
    offset: u64,
    record: &Record,
) -> io::Result<()> {
    writeln!(w, "------ {} ------", record.kind_name())?;
    let mut f = FieldWriter { w, offset };
    match record {
        Record::Local(r) => local_header(&mut f, r),
        Record::Data(r) => file_data(&mut f, r),
        Record::Descriptor(r) => descriptor(&mut f, r),
        Record::Central(r) => central_entry(&mut f, r),
        Record::Zip64End(r) => zip64_end(&mut f, r),
        Record::Zip64Locator(r) => zip64_locator(&mut f, r),
        Record::End(r) => end_record(&mut f, r),
        Record::Hole(n) => f.note(*n, "hole", format!("{} zero bytes", n)),
    }
}

struct FieldWriter<'a, W: io::Write> {
    w: &'a mut W,
    offset: u64,
}

impl<W: io::Write> FieldWriter<'_, W> {
    fn line(&mut self, width: u64, name: &str, value: String, interp: &str) -> io::Result<()> {
        if interp.is_empty() {
            writeln!(self.w, "{:06} {:<22} {}", self.offset, name, value)?;
        } else {
            writeln!(self.w, "{:06} {:<22} {} [{}]", self.offset, name, value, interp)?;
        }
        self.offset += width;
        Ok(())
    }

    fn note(&mut self, width: u64, name: &str, value: String) -> io::Result<()> {
        self.line(width, name, value, "")
    }

    fn u16(&mut self, name: &str, v: u16, interp: &str) -> io::Result<()> {
        let interp = if v == U16_SENTINEL && interp.is_empty() {
            "zip64 sentinel"
        } else {
            interp
        };
        self.line(2, name, format!("0x{:04x} ({})", v, v), interp)
    }

    fn u32(&mut self, name: &str, v: u32, interp: &str) -> io::Result<()> {
        let interp = if v == U32_SENTINEL && interp.is_empty() {
            "zip64 sentinel"
        } else {
            interp
        };
        self.line(4, name, format!("0x{:08x} ({})", v, v), interp)
    }

    fn u64(&mut self, name: &str, v: u64, interp: &str) -> io::Result<()> {
        self.line(8, name, format!("0x{:016x} ({})", v, v), interp)
    }

    fn signature(&mut self, v: u32) -> io::Result<()> {
        self.line(4, "signature", format!("0x{:08x}", v), "")
    }

    fn version(&mut self, name: &str, v: Version) -> io::Result<()> {
        let interp = format!(
            "zip {}.{}, {:?}",
            v.version / 10,
            v.version % 10,
            v.host_system
        );
        self.line(
            2,
            name,
            format!("0x{:02x}{:02x}", u8::from(v.host_system), v.version),
            &interp,
        )
    }

    fn method(&mut self, v: Method) -> io::Result<()> {
        let raw = u16::from(v);
        self.line(2, "method", format!("0x{:04x} ({})", raw, raw), &method_name(v))
    }

    fn timestamp(&mut self, ts: MsdosTimestamp) -> io::Result<()> {
        self.u16("dos-time", ts.time, "")?;
        let interp = match ts.to_datetime() {
            Some(dt) => dt.to_string(),
            None => "not a valid date".to_owned(),
        };
        self.line(
            2,
            "dos-date",
            format!("0x{:04x} ({})", ts.date, ts.date),
            &interp,
        )
    }

    fn string(&mut self, name: &str, s: &ZipString) -> io::Result<()> {
        if !s.is_empty() {
            self.line(s.len() as u64, name, format!("{:?}", s), "")?;
        }
        Ok(())
    }

    fn extra_fields(&mut self, fields: &[ExtraField]) -> io::Result<()> {
        for field in fields {
            let value = format!("id 0x{:04x} size {}", field.tag(), field.data_size());
            let interp = extra_field_interp(field);
            self.line(field.wire_size(), "extra-field", value, &interp)?;
        }
        Ok(())
    }
}

fn method_name(method: Method) -> String {
    match method {
        Method::Store => "store".to_owned(),
        Method::Deflate => "deflate".to_owned(),
        Method::Deflate64 => "deflate64".to_owned(),
        Method::Bzip2 => "bzip2".to_owned(),
        Method::Lzma => "lzma".to_owned(),
        Method::Zstd => "zstd".to_owned(),
        Method::Unrecognized(raw) => format!("method {}", raw),
    }
}

fn unix_time(secs: Option<u32>) -> String {
    match secs.and_then(|s| Utc.timestamp_opt(i64::from(s), 0).single()) {
        Some(dt) => dt.to_string(),
        None => "-".to_owned(),
    }
}

fn extra_field_interp(field: &ExtraField) -> String {
    match field {
        ExtraField::Zip64(Zip64ExtraField {
            uncompressed_size,
            compressed_size,
            header_offset,
            disk_start,
        }) => {
            let mut parts = Vec::new();
            if let Some(n) = uncompressed_size {
                parts.push(format!("size {}", n));
            }
            if let Some(n) = compressed_size {
                parts.push(format!("csize {}", n));
            }
            if let Some(n) = header_offset {
                parts.push(format!("header offset {}", n));
            }
            if let Some(n) = disk_start {
                parts.push(format!("disk start {}", n));
            }
            format!("zip64 extended information: {}", parts.join(", "))
        }
        ExtraField::Timestamp(TimestampExtraField { mtime, .. }) => {
            format!("extended timestamp: mtime {}", unix_time(*mtime))
        }
        ExtraField::Ntfs(NtfsExtraField { mtime, .. }) => match mtime.to_datetime() {
            Some(dt) => format!("NTFS times: mtime {}", dt),
            None => "NTFS times".to_owned(),
        },
        ExtraField::Unknown(_) => "unknown".to_owned(),
    }
}

fn local_header<W: io::Write>(f: &mut FieldWriter<W>, r: &LocalHeader) -> io::Result<()> {
    f.signature(LocalHeader::SIGNATURE)?;
    f.version("extract-version", r.reader_version)?;
    f.u16("flags", r.flags, "")?;
    f.method(r.method)?;
    f.timestamp(r.modified)?;
    f.u32("crc32", r.crc32, "")?;
    f.u32("compressed-size", r.compressed_size, "")?;
    f.u32("uncompressed-size", r.uncompressed_size, "")?;
    f.u16("name-length", r.name.len() as u16, "")?;
    f.u16(
        "extra-length",
        (r.wire_size() - 30 - r.name.len() as u64) as u16,
        "",
    )?;
    f.string("name", &r.name)?;
    f.extra_fields(&r.extra_fields)
}

fn file_data<W: io::Write>(f: &mut FieldWriter<W>, r: &FileData) -> io::Result<()> {
    let provenance = match &r.contents {
        Contents::Range(_) => "borrowed from input",
        Contents::Buffer(_) => "owned buffer",
    };
    f.line(
        r.len(),
        "payload",
        format!("{} bytes", r.len()),
        provenance,
    )
}

fn descriptor<W: io::Write>(f: &mut FieldWriter<W>, r: &DataDescriptor) -> io::Result<()> {
    if r.signed {
        f.signature(DataDescriptor::SIGNATURE)?;
    }
    f.u32("crc32", r.crc32, "")?;
    if r.zip64 {
        f.u64("compressed-size", r.compressed_size, "")?;
        f.u64("uncompressed-size", r.uncompressed_size, "")?;
    } else {
        f.u32("compressed-size", r.compressed_size as u32, "")?;
        f.u32("uncompressed-size", r.uncompressed_size as u32, "")?;
    }
    Ok(())
}

fn central_entry<W: io::Write>(f: &mut FieldWriter<W>, r: &CentralEntry) -> io::Result<()> {
    f.signature(CentralEntry::SIGNATURE)?;
    f.version("made-by-version", r.creator_version)?;
    f.version("extract-version", r.reader_version)?;
    f.u16("flags", r.flags, "")?;
    f.method(r.method)?;
    f.timestamp(r.modified)?;
    f.u32("crc32", r.crc32, "")?;
    f.u32("compressed-size", r.compressed_size, "")?;
    f.u32("uncompressed-size", r.uncompressed_size, "")?;
    f.u16("name-length", r.name.len() as u16, "")?;
    f.u16(
        "extra-length",
        r.extra_fields.iter().map(|e| e.wire_size() as u16).sum(),
        "",
    )?;
    f.u16("comment-length", r.comment.len() as u16, "")?;
    f.u16("disk-start", r.disk_nbr_start, "")?;
    f.u16("internal-attrs", r.internal_attrs, "")?;
    f.u32("external-attrs", r.external_attrs, "")?;
    f.u32("local-header-offset", r.header_offset, "")?;
    f.string("name", &r.name)?;
    f.extra_fields(&r.extra_fields)?;
    f.string("comment", &r.comment)
}

fn zip64_end<W: io::Write>(f: &mut FieldWriter<W>, r: &Zip64EndRecord) -> io::Result<()> {
    f.signature(Zip64EndRecord::SIGNATURE)?;
    f.u64("record-size", r.record_size, "")?;
    f.version("made-by-version", r.creator_version)?;
    f.version("extract-version", r.reader_version)?;
    f.u32("this-disk", r.disk_nbr, "")?;
    f.u32("cen-start-disk", r.dir_disk_nbr, "")?;
    f.u64("entries-this-disk", r.dir_records_this_disk, "")?;
    f.u64("entries-total", r.directory_records, "")?;
    f.u64("cen-size", r.directory_size, "")?;
    f.u64("cen-offset", r.directory_offset, "")?;
    f.extra_fields(&r.extra_fields)
}

fn zip64_locator<W: io::Write>(f: &mut FieldWriter<W>, r: &Zip64EndLocator) -> io::Result<()> {
    f.signature(Zip64EndLocator::SIGNATURE)?;
    f.u32("end-record-disk", r.dir_disk_nbr, "")?;
    f.u64("end-record-offset", r.directory_offset, "")?;
    f.u32("total-disks", r.total_disks, "")
}

fn end_record<W: io::Write>(f: &mut FieldWriter<W>, r: &EndRecord) -> io::Result<()> {
    f.signature(EndRecord::SIGNATURE)?;
    f.u16("this-disk", r.disk_nbr, "")?;
    f.u16("cen-start-disk", r.dir_disk_nbr, "")?;
    f.u16("entries-this-disk", r.dir_records_this_disk, "")?;
    f.u16("entries-total", r.directory_records, "")?;
    f.u32("cen-size", r.directory_size, "")?;
    f.u32("cen-offset", r.directory_offset, "")?;
    f.u16("comment-length", r.comment.len() as u16, "")?;
    f.string("comment", &r.comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Method;

    #[test]
    fn sections_and_offsets() {
        let records = vec![
            Record::Local(
                LocalHeader::new("a", Method::Store)
                    .with_compressed_size(3)
                    .with_uncompressed_size(3),
            ),
            Record::Data(b"abc".as_slice().into()),
            Record::End(EndRecord::default()),
        ];

        let mut out = Vec::new();
        let traced: Vec<Record> = Trace::new(records.into_iter().map(Ok), Some(&mut out))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(traced.len(), 3);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("------ LocalHeader ------"));
        assert!(text.contains("------ FileData ------"));
        assert!(text.contains("------ EndRecord ------"));
        // the payload starts right after the 31-byte local header
        assert!(text.contains("000031 payload"));
        // the end record follows the 3-byte payload
        assert!(text.contains("000034 signature"));
        assert!(text.contains("[store]"));
    }
}
