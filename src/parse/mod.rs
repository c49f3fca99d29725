//! The record model: types for every structural element of a zip file,
//! winnow parsers that turn byte buffers into them, and writers that
//! turn them back into bytes.
//!
//! All parsers here are based off of the PKWARE appnote. Parsing and
//! writing are exact inverses: re-encoding a decoded record reproduces
//! its input bytes, which is what makes identity transforms bit-exact.

mod central;
pub use central::*;

mod date_time;
pub use date_time::*;

mod eocd;
pub use eocd::*;

mod extra_field;
pub use extra_field::{
    ExtraField, NtfsExtraField, RawExtraField, TimestampExtraField, Zip64ExtraField,
};

mod local;
pub use local::{Contents, DataDescriptor, FileData, LocalHeader, SourceRange};

mod method;
pub use method::*;

mod raw;
pub use raw::*;

mod record;
pub use record::*;

mod version;
pub use version::*;

/// The u16 value that means "the real value is in a zip64 extra field".
pub const U16_SENTINEL: u16 = 0xFFFF;

/// The u32 value that means "the real value is in a zip64 extra field".
pub const U32_SENTINEL: u32 = 0xFFFF_FFFF;
