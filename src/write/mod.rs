//! The encoder: consumes records in order and writes their wire bytes
//! to a sink, tracking the running absolute offset.
//!
//! The encoder is deliberately dumb. It writes exactly what the records
//! say, never seeks backwards, and never rewrites a byte it already
//! emitted; making the archive *consistent* is the re-derivation pass's
//! job, and making it inconsistent is sometimes the caller's. The one
//! check it does perform: on sinks that know their position, the sink
//! must agree with the running offset after every record.

use std::{
    fs::File,
    io::{self, Seek, SeekFrom, Write},
    path::Path,
};

use tracing::trace;

use crate::{
    error::{EncodeError, Error},
    parse::{Contents, FileData, Record},
    transform::{Rederive, Trace},
};

/// Buffer size for streaming borrowed payload ranges through.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Something records can be written to.
///
/// Beyond plain byte output, a sink can (optionally) report its
/// position, which lets the encoder verify its running offset, and can
/// specialize hole emission: a [File] seeks past the hole to produce a
/// genuinely sparse region instead of writing a gigabyte of zeroes.
pub trait RecordSink: io::Write {
    /// Emit `n` zero bytes.
    fn emit_sparse(&mut self, n: u64) -> io::Result<()> {
        write_zeroes(self, n)
    }

    /// The sink's current position, if it has a meaningful one.
    fn position(&mut self) -> Option<io::Result<u64>> {
        None
    }
}

fn write_zeroes<W: io::Write + ?Sized>(w: &mut W, mut n: u64) -> io::Result<()> {
    let zeroes = [0u8; 4096];
    while n > 0 {
        let chunk = n.min(zeroes.len() as u64) as usize;
        w.write_all(&zeroes[..chunk])?;
        n -= chunk as u64;
    }
    Ok(())
}

impl RecordSink for Vec<u8> {
    fn emit_sparse(&mut self, n: u64) -> io::Result<()> {
        let len = self.len() + n as usize;
        self.resize(len, 0);
        Ok(())
    }

    fn position(&mut self) -> Option<io::Result<u64>> {
        Some(Ok(self.len() as u64))
    }
}

impl RecordSink for File {
    /// Seek past the hole instead of writing zeroes; on filesystems
    /// with sparse file support the region takes no space at all.
    fn emit_sparse(&mut self, mut n: u64) -> io::Result<()> {
        while n > 0 {
            let step = n.min(i64::MAX as u64);
            self.seek(SeekFrom::Current(step as i64))?;
            n -= step;
        }
        Ok(())
    }

    fn position(&mut self) -> Option<io::Result<u64>> {
        Some(self.stream_position())
    }
}

/// Adapter turning any [io::Write] into a [RecordSink] with zero-filled
/// holes and no position checking.
pub struct StreamSink<W: io::Write>(pub W);

impl<W: io::Write> io::Write for StreamSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: io::Write> RecordSink for StreamSink<W> {}

/// Writes records to a sink, one [write_record](Self::write_record) at
/// a time.
pub struct Encoder<S: RecordSink> {
    sink: S,
    offset: u64,
    base: u64,
    check_position: bool,
}

impl<S: RecordSink> Encoder<S> {
    /// Wrap a sink. If the sink knows its position, the encoder
    /// remembers it as the archive's base and verifies every record
    /// lands where the running offset says it should.
    pub fn new(mut sink: S) -> Result<Self, Error> {
        let (base, check_position) = match sink.position() {
            Some(pos) => (pos?, true),
            None => (0, false),
        };
        Ok(Self {
            sink,
            offset: 0,
            base,
            check_position,
        })
    }

    /// The running offset: how many bytes of archive have been emitted.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Write one record's wire bytes.
    pub fn write_record(&mut self, record: &Record) -> Result<(), Error> {
        trace!(offset = self.offset, kind = record.kind_name(), "writing");
        match record {
            Record::Local(r) => r.write(&mut self.sink)?,
            Record::Data(data) => self.write_file_data(data)?,
            Record::Descriptor(r) => r.write(&mut self.sink)?,
            Record::Central(r) => r.write(&mut self.sink)?,
            Record::Zip64End(r) => r.write(&mut self.sink)?,
            Record::Zip64Locator(r) => r.write(&mut self.sink)?,
            Record::End(r) => r.write(&mut self.sink)?,
            Record::Hole(n) => self.sink.emit_sparse(*n)?,
        }
        self.offset += record.wire_size();

        if self.check_position {
            if let Some(pos) = self.sink.position() {
                let actual = pos?;
                let expected = self.base + self.offset;
                if actual != expected {
                    return Err(EncodeError::SinkPositionMismatch { expected, actual }.into());
                }
            }
        }
        Ok(())
    }

    fn write_file_data(&mut self, data: &FileData) -> Result<(), Error> {
        match &data.contents {
            Contents::Buffer(bytes) => self.sink.write_all(bytes)?,
            Contents::Range(range) => {
                // stream the borrowed range through a fixed-size buffer
                let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(range.len as usize).max(1)];
                let mut pos = range.offset;
                let mut remaining = range.len;
                while remaining > 0 {
                    let want = buf.len().min(remaining as usize);
                    let n = range.source.read_at(pos, &mut buf[..want])?;
                    if n == 0 {
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                    }
                    self.sink.write_all(&buf[..n])?;
                    pos += n as u64;
                    remaining -= n as u64;
                }
            }
        }
        Ok(())
    }

    /// Flush and hand the sink back.
    pub fn finish(mut self) -> Result<S, Error> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

/// Anything [EncodeOptions] accepts as a record: a bare [Record] or a
/// `Result` coming out of a decoder/transform chain.
pub trait IntoRecordResult {
    /// Convert into the pipeline's item type.
    fn into_record_result(self) -> Result<Record, Error>;
}

impl IntoRecordResult for Record {
    fn into_record_result(self) -> Result<Record, Error> {
        Ok(self)
    }
}

impl IntoRecordResult for Result<Record, Error> {
    fn into_record_result(self) -> Result<Record, Error> {
        self
    }
}

/// How a record sequence becomes an archive.
///
/// By default the offset/size re-derivation pass runs between the
/// caller's records and the encoder, so that whatever the transforms
/// did, the emitted archive's cross-references are consistent. Disable
/// it to emit deliberately broken archives verbatim. A trace sink, if
/// set, sees the records as they go to the encoder, i.e. after
/// re-derivation.
///
/// ```no_run
/// # fn main() -> Result<(), rezip::error::Error> {
/// use rezip::{read::records, write::EncodeOptions};
///
/// let input = std::fs::read("in.zip")?;
/// let out = EncodeOptions::new().write_to_vec(records(input))?;
/// # Ok(())
/// # }
/// ```
pub struct EncodeOptions {
    disable_offset_fixing: bool,
    trace_sink: Option<Box<dyn io::Write>>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            disable_offset_fixing: false,
            trace_sink: None,
        }
    }
}

impl EncodeOptions {
    /// Options with the defaults: offsets fixed, no trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit records exactly as given, without re-deriving offsets,
    /// sizes and counts.
    pub fn disable_offset_fixing(mut self, disable: bool) -> Self {
        self.disable_offset_fixing = disable;
        self
    }

    /// Write a human-readable disassembly of every emitted record to
    /// `sink`.
    pub fn trace_to(mut self, sink: impl io::Write + 'static) -> Self {
        self.trace_sink = Some(Box::new(sink));
        self
    }

    /// Encode `records` into `sink` and hand the sink back.
    pub fn write<S, I, R>(mut self, records: I, sink: S) -> Result<S, Error>
    where
        S: RecordSink,
        I: IntoIterator<Item = R>,
        R: IntoRecordResult,
    {
        let stream = records.into_iter().map(IntoRecordResult::into_record_result);
        let stream = Rederive::new(stream, !self.disable_offset_fixing);
        let stream = Trace::new(stream, self.trace_sink.take());

        let mut encoder = Encoder::new(sink)?;
        for record in stream {
            encoder.write_record(&record?)?;
        }
        encoder.finish()
    }

    /// Encode `records` into a fresh byte buffer.
    pub fn write_to_vec<I, R>(self, records: I) -> Result<Vec<u8>, Error>
    where
        I: IntoIterator<Item = R>,
        R: IntoRecordResult,
    {
        self.write(records, Vec::new())
    }

    /// Encode `records` into a file, created or truncated.
    pub fn write_to_path<I, R, P>(self, records: I, path: P) -> Result<(), Error>
    where
        I: IntoIterator<Item = R>,
        R: IntoRecordResult,
        P: AsRef<Path>,
    {
        self.write(records, File::create(path)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{DataDescriptor, EndRecord, LocalHeader, Method};

    #[test]
    fn running_offset_matches_wire_sizes() {
        let records = vec![
            Record::Local(
                LocalHeader::new("a", Method::Store)
                    .with_compressed_size(3)
                    .with_uncompressed_size(3),
            ),
            Record::Data(b"abc".as_slice().into()),
            Record::Descriptor(DataDescriptor::new(0, 3, 3)),
            Record::End(EndRecord::default()),
        ];
        let expected: u64 = records.iter().map(Record::wire_size).sum();

        let mut encoder = Encoder::new(Vec::new()).unwrap();
        for r in &records {
            encoder.write_record(r).unwrap();
        }
        assert_eq!(encoder.offset(), expected);
        let bytes = encoder.finish().unwrap();
        assert_eq!(bytes.len() as u64, expected);
    }

    #[test]
    fn holes_are_zero_filled_in_buffers() {
        let mut encoder = Encoder::new(Vec::new()).unwrap();
        encoder.write_record(&Record::Hole(10)).unwrap();
        encoder
            .write_record(&Record::Data(b"x".as_slice().into()))
            .unwrap();
        let bytes = encoder.finish().unwrap();
        assert_eq!(bytes, [&[0u8; 10][..], b"x"].concat());
    }

    #[test]
    fn stream_sinks_skip_the_position_check() {
        let mut out = Vec::new();
        {
            let mut encoder = Encoder::new(StreamSink(&mut out)).unwrap();
            encoder.write_record(&Record::Hole(4)).unwrap();
            encoder.finish().unwrap();
        }
        assert_eq!(out, vec![0; 4]);
    }
}
