//! The decoder: a forward cursor over a byte source that yields
//! [Record]s one at a time.
//!
//! Unlike a zip *reader*, which starts from the end of central
//! directory and only trusts the central directory, this decoder walks
//! the file front to back and reports every structural element it
//! passes, in file order. It keeps a small state machine per entry
//! (header, then payload, then optional descriptor) and dispatches
//! everything else on the four signature bytes.
//!
//! Entry payloads are never materialized: the yielded [FileData] keeps
//! a range into the source. The one exception to "never look at
//! payload bytes" is an entry written in the data-descriptor style,
//! whose compressed length must be discovered by inflating it.

use oval::Buffer;
use tracing::trace;
use winnow::{
    error::ErrMode,
    stream::{AsBytes, Offset},
    PResult, Partial,
};

use crate::{
    error::{Error, FormatError},
    parse::{
        CentralEntry, DataDescriptor, EndRecord, FileData, LocalHeader, Method, Record,
        Zip64EndLocator, Zip64EndRecord,
    },
    source::ByteSource,
};

mod inflate;
use inflate::InflateLengthFinder;

/// Decode a byte source into a lazy record sequence.
///
/// This is the front door of the crate:
///
/// ```no_run
/// # fn main() -> Result<(), rezip::error::Error> {
/// for record in rezip::read::records(std::fs::read("fixture.zip")?) {
///     println!("{:?}", record?);
/// }
/// # Ok(())
/// # }
/// ```
pub fn records(source: impl Into<ByteSource>) -> RecordReader {
    RecordReader::new(source)
}

/// An iterator over the records of a zip archive, decoded on demand.
///
/// After every yielded record, the reader's [offset](Self::offset)
/// equals the sum of `wire_size()` over everything yielded so far.
/// Dropping the reader drops its handle on the source; a file source
/// closes once no decoded [FileData] borrows from it either.
pub struct RecordReader {
    source: ByteSource,
    buffer: Buffer,
    /// absolute offset of the first undecoded byte; also the running
    /// total of yielded wire sizes
    offset: u64,
    /// absolute offset of the next byte to fetch from the source
    read_pos: u64,
    state: State,
    done: bool,
}

/// Decoding position within an entry.
enum State {
    /// At a record boundary, about to dispatch on a signature.
    ExpectSignature,

    /// A local header was yielded; its payload comes next.
    ExpectPayload {
        /// compressed size when the header (or its zip64 extra) knows
        /// it; `None` means it must be discovered by inflating
        csize: Option<u64>,
        method: Method,
        /// whether a data descriptor follows the payload
        descriptor: bool,
        /// whether that descriptor uses 8-byte sizes
        zip64: bool,
    },

    /// A payload was yielded and the entry's flags promise a
    /// descriptor.
    ExpectDescriptor { zip64: bool },
}

impl RecordReader {
    const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

    /// Decode from an in-memory buffer (or anything else already turned
    /// into a [ByteSource]).
    pub fn new(source: impl Into<ByteSource>) -> Self {
        Self {
            source: source.into(),
            buffer: Buffer::with_capacity(Self::DEFAULT_BUFFER_SIZE),
            offset: 0,
            read_pos: 0,
            state: State::ExpectSignature,
            done: false,
        }
    }

    /// Decode from a file, reading it incrementally.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, Error> {
        Ok(Self::new(ByteSource::open(path)?))
    }

    /// The absolute offset of the next record, i.e. the sum of the
    /// wire sizes of every record yielded so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Refill the buffer from the source. Returns the number of bytes
    /// read; zero means the source is exhausted.
    fn fill(&mut self) -> Result<usize, Error> {
        if self.buffer.available_space() == 0 {
            self.buffer.shift();
            if self.buffer.available_space() == 0 {
                let capacity = self.buffer.capacity();
                self.buffer.grow(capacity * 2);
            }
        }
        let n = self.source.read_at(self.read_pos, self.buffer.space())?;
        self.buffer.fill(n);
        self.read_pos += n as u64;
        Ok(n)
    }

    /// Run a record parser over the buffer, refilling on incomplete
    /// input, and advance past what it consumed.
    fn parse_record<T>(
        &mut self,
        signature: u32,
        mut parser: impl FnMut(&mut Partial<&[u8]>) -> PResult<T>,
    ) -> Result<T, Error> {
        loop {
            let mut input = Partial::new(self.buffer.data());
            match parser(&mut input) {
                Ok(value) => {
                    let consumed = input.as_bytes().offset_from(&self.buffer.data());
                    self.buffer.consume(consumed);
                    self.offset += consumed as u64;
                    return Ok(value);
                }
                Err(ErrMode::Incomplete(_)) => {
                    if self.fill()? == 0 {
                        return Err(FormatError::UnexpectedEof {
                            offset: self.offset,
                        }
                        .into());
                    }
                }
                // the only cut in the record parsers is a malformed
                // extras blob
                Err(ErrMode::Cut(_)) => {
                    return Err(FormatError::InvalidExtraField {
                        offset: self.offset,
                    }
                    .into())
                }
                Err(ErrMode::Backtrack(_)) => {
                    return Err(FormatError::InvalidRecord {
                        offset: self.offset,
                        signature,
                    }
                    .into())
                }
            }
        }
    }

    /// Advance past `len` payload bytes without reading them.
    fn skip_payload(&mut self, len: u64) -> Result<(), Error> {
        if self.offset + len > self.source.len() {
            return Err(FormatError::UnexpectedEof {
                offset: self.source.len(),
            }
            .into());
        }
        let buffered = self.buffer.available_data() as u64;
        if len <= buffered {
            self.buffer.consume(len as usize);
        } else {
            self.buffer.reset();
            self.read_pos = self.offset + len;
        }
        self.offset += len;
        Ok(())
    }

    /// Inflate a payload of unknown compressed length, discarding the
    /// output, until the deflate stream ends. Returns the compressed
    /// length.
    fn discover_compressed_len(&mut self, payload_start: u64) -> Result<u64, Error> {
        let mut finder = InflateLengthFinder::new();
        loop {
            if self.buffer.available_data() == 0 && self.fill()? == 0 {
                return Err(FormatError::UnexpectedEof {
                    offset: self.offset,
                }
                .into());
            }
            let (consumed, done) =
                finder
                    .feed(self.buffer.data())
                    .map_err(|msg| FormatError::Deflate {
                        offset: payload_start,
                        msg,
                    })?;
            self.buffer.consume(consumed);
            self.offset += consumed as u64;
            if done {
                let len = self.offset - payload_start;
                trace!(payload_start, len, "discovered compressed length");
                return Ok(len);
            }
            if consumed == 0 && self.fill()? == 0 {
                return Err(FormatError::UnexpectedEof {
                    offset: self.offset,
                }
                .into());
            }
        }
    }

    fn advance(&mut self) -> Result<Option<Record>, Error> {
        match std::mem::replace(&mut self.state, State::ExpectSignature) {
            State::ExpectSignature => {
                while self.buffer.available_data() < 4 {
                    if self.fill()? == 0 {
                        if self.buffer.available_data() == 0 {
                            // clean end of input at a record boundary
                            return Ok(None);
                        }
                        return Err(FormatError::UnexpectedEof {
                            offset: self.offset,
                        }
                        .into());
                    }
                }
                let data = self.buffer.data();
                let signature = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                trace!(offset = self.offset, signature, "dispatching");

                match signature {
                    LocalHeader::SIGNATURE => {
                        let header = self.parse_record(signature, LocalHeader::parser)?;
                        self.state = State::ExpectPayload {
                            csize: header.known_compressed_size(),
                            method: header.method,
                            descriptor: header.has_data_descriptor(),
                            zip64: header.is_zip64(),
                        };
                        Ok(Some(Record::Local(header)))
                    }
                    CentralEntry::SIGNATURE => Ok(Some(Record::Central(
                        self.parse_record(signature, CentralEntry::parser)?,
                    ))),
                    Zip64EndRecord::SIGNATURE => Ok(Some(Record::Zip64End(
                        self.parse_record(signature, Zip64EndRecord::parser)?,
                    ))),
                    Zip64EndLocator::SIGNATURE => Ok(Some(Record::Zip64Locator(
                        self.parse_record(signature, Zip64EndLocator::parser)?,
                    ))),
                    EndRecord::SIGNATURE => Ok(Some(Record::End(
                        self.parse_record(signature, EndRecord::parser)?,
                    ))),
                    _ => Err(FormatError::UnknownSignature {
                        offset: self.offset,
                        signature,
                    }
                    .into()),
                }
            }

            State::ExpectPayload {
                csize,
                method,
                descriptor,
                zip64,
            } => {
                let payload_start = self.offset;
                let len = match csize {
                    Some(len) => {
                        self.skip_payload(len)?;
                        len
                    }
                    None => {
                        debug_assert_eq!(method, Method::Deflate);
                        self.discover_compressed_len(payload_start)?
                    }
                };
                self.state = if descriptor {
                    State::ExpectDescriptor { zip64 }
                } else {
                    State::ExpectSignature
                };
                Ok(Some(Record::Data(FileData::from_range(
                    self.source.clone(),
                    payload_start,
                    len,
                ))))
            }

            State::ExpectDescriptor { zip64 } => {
                let descriptor = self
                    .parse_record(DataDescriptor::SIGNATURE, DataDescriptor::mk_parser(zip64))?;
                Ok(Some(Record::Descriptor(descriptor)))
            }
        }
    }
}

impl Iterator for RecordReader {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::U32_SENTINEL;

    #[test]
    fn empty_input_yields_nothing() {
        let mut reader = records(Vec::new());
        assert!(reader.next().is_none());
    }

    #[test]
    fn garbage_is_an_unknown_signature() {
        let mut reader = records(b"GIF89a notazip".to_vec());
        match reader.next() {
            Some(Err(Error::Format(FormatError::UnknownSignature { offset: 0, .. }))) => {}
            other => panic!("expected unknown signature, got {:?}", other),
        }
        // the iterator is fused after an error
        assert!(reader.next().is_none());
    }

    #[test]
    fn truncated_record_is_fatal() {
        let header = LocalHeader::new("half", Method::Store);
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 2);

        let mut reader = records(bytes);
        match reader.next() {
            Some(Err(Error::Format(FormatError::UnexpectedEof { .. }))) => {}
            other => panic!("expected eof error, got {:?}", other),
        }
    }

    #[test]
    fn payload_skipping_follows_the_stored_size() {
        let header = LocalHeader::new("a", Method::Store)
            .with_compressed_size(5)
            .with_uncompressed_size(5);
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        bytes.extend_from_slice(b"hello");

        let mut reader = records(bytes);
        assert!(matches!(reader.next(), Some(Ok(Record::Local(_)))));
        match reader.next() {
            Some(Ok(Record::Data(data))) => {
                assert_eq!(data.len(), 5);
                assert_eq!(data.bytes().unwrap(), b"hello");
            }
            other => panic!("expected file data, got {:?}", other),
        }
        assert_eq!(reader.offset(), 36);
        assert!(reader.next().is_none());
    }

    #[test]
    fn zip64_local_header_drives_descriptor_width() {
        let header = LocalHeader::new("a", Method::Store)
            .with_compressed_size(3)
            .with_uncompressed_size(3)
            .to_zip64()
            .with_flags(0b1000);
        // to_zip64 moved the real sizes into the extra
        assert_eq!(header.compressed_size, U32_SENTINEL);

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        bytes.extend_from_slice(b"abc");
        let descriptor = DataDescriptor::new(0, 3, 3).to_zip64();
        descriptor.write(&mut bytes).unwrap();

        let records: Vec<_> = records(bytes).collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);
        match &records[2] {
            Record::Descriptor(d) => {
                assert!(d.zip64);
                assert_eq!(d.compressed_size, 3);
            }
            other => panic!("expected descriptor, got {:?}", other),
        }
    }
}
