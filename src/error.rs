//! All error types used in this crate

/// Any error produced while decoding, rewriting or encoding an archive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input byte stream is not a zip archive this crate can take apart.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// An invariant was violated while writing records out.
    #[error("encode: {0}")]
    Encode(#[from] EncodeError),

    /// I/O-related error
    #[error("io: {0}")]
    IO(#[from] std::io::Error),
}

/// Structural problems in the input stream. Every variant carries the
/// absolute offset at which decoding gave up.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// Four bytes were read where a record should start, and they are not
    /// any signature this crate knows about.
    #[error("unknown signature 0x{signature:08x} at offset {offset}")]
    UnknownSignature {
        /// Absolute offset of the four signature bytes
        offset: u64,
        /// The value that was actually read, little-endian
        signature: u32,
    },

    /// The input ended in the middle of a record.
    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof {
        /// Absolute offset of the record being decoded
        offset: u64,
    },

    /// A record's fixed fields could not be decoded even though its
    /// signature matched.
    #[error("invalid record with signature 0x{signature:08x} at offset {offset}")]
    InvalidRecord {
        /// Absolute offset of the record being decoded
        offset: u64,
        /// The record's signature
        signature: u32,
    },

    /// An extensible field declares a data size that overruns the extras
    /// region of its parent record.
    #[error("invalid extra field in record at offset {offset}")]
    InvalidExtraField {
        /// Absolute offset of the record whose extras are malformed
        offset: u64,
    },

    /// Inflate failed while the decoder was discovering the compressed
    /// length of a deflated entry.
    #[error("deflate error at offset {offset}: {msg}")]
    Deflate {
        /// Absolute offset of the entry's file data
        offset: u64,
        /// Message reported by the inflater
        msg: String,
    },
}

/// Consistency failures while encoding a record sequence.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// A seekable sink reported a position that disagrees with the
    /// encoder's running offset. Something wrote to the sink behind the
    /// encoder's back, or a record lied about its wire size.
    #[error("sink is at position {actual}, expected {expected}")]
    SinkPositionMismatch {
        /// Where the encoder thinks the sink should be
        expected: u64,
        /// Where the sink actually is
        actual: u64,
    },
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IO(e) => e,
            e => std::io::Error::other(e),
        }
    }
}
