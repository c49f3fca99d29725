#![warn(missing_docs)]

//! rezip takes zip archives apart into a sequence of typed records —
//! local headers, file data, central directory entries, end records,
//! zip64 trimmings — lets you rewrite that sequence with plain
//! functions, and puts it back together into bytes.
//!
//! It is a tool for *making* zip files with precisely controlled
//! shapes, not for reading their contents: the intended audience is
//! test suites that need archives which are unusual, huge, zip64,
//! subtly inconsistent, or flat-out broken, without hand-writing
//! offset arithmetic and little-endian packing. Decoding an archive
//! and encoding it straight back reproduces the input bit for bit;
//! anything you change in between is either made self-consistent again
//! by the offset re-derivation pass, or — if you disable it — written
//! out exactly as badly as you asked.
//!
//! The pieces, in pipeline order:
//!
//!   * [read] — a forward decoder yielding [parse::Record]s lazily
//!   * [transform] — combinators over record streams (filter, rename,
//!     zip64 upgrade, concatenation, tracing, re-derivation)
//!   * [write] — the encoder and its options
//!
//! ```no_run
//! # fn main() -> Result<(), rezip::error::Error> {
//! use rezip::{read::records, transform::RecordTransform, write::EncodeOptions};
//!
//! let input = std::fs::read("in.zip")?;
//! let out = EncodeOptions::new().write_to_vec(
//!     records(input).filter_entries(|header| header.name.as_bytes() != b"secret.txt"),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod parse;
pub mod read;
pub mod source;
pub mod transform;
pub mod write;
