//! Compressed-length discovery.
//!
//! When an entry was written in the data-descriptor style, its local
//! header carries zero sizes and the only way to find where the payload
//! ends is to inflate it. The decompressed bytes are thrown away; all
//! we want is `total_in` at the moment the stream ends. This is the one
//! place the crate touches a decompressor.

use flate2::{Decompress, FlushDecompress, Status};

pub(crate) struct InflateLengthFinder {
    inflater: Decompress,
    scratch: Vec<u8>,
}

impl InflateLengthFinder {
    const SCRATCH_SIZE: usize = 64 * 1024;

    pub(crate) fn new() -> Self {
        Self {
            // raw deflate, no zlib wrapper
            inflater: Decompress::new(false),
            scratch: vec![0u8; Self::SCRATCH_SIZE],
        }
    }

    /// Feed compressed bytes, discarding whatever inflates out of them.
    /// Returns how many input bytes were consumed and whether the
    /// deflate stream ended within them.
    pub(crate) fn feed(&mut self, input: &[u8]) -> Result<(usize, bool), String> {
        let before = self.inflater.total_in();
        let status = self
            .inflater
            .decompress(input, &mut self.scratch, FlushDecompress::None)
            .map_err(|e| e.to_string())?;
        let consumed = (self.inflater.total_in() - before) as usize;
        Ok((consumed, matches!(status, Status::StreamEnd)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn finds_the_end_of_a_deflate_stream() {
        let mut bytes = deflate(b"the payload under measurement");
        let compressed_len = bytes.len();
        // trailing bytes that are not part of the stream
        bytes.extend_from_slice(b"PK\x07\x08rest");

        let mut finder = InflateLengthFinder::new();
        let (consumed, done) = finder.feed(&bytes).unwrap();
        assert!(done);
        assert_eq!(consumed, compressed_len);
    }

    #[test]
    fn one_byte_at_a_time() {
        let bytes = deflate(b"drip-fed");
        let mut finder = InflateLengthFinder::new();
        let mut total = 0;
        let mut ended = false;
        for b in &bytes {
            let (consumed, done) = finder.feed(std::slice::from_ref(b)).unwrap();
            total += consumed;
            if done {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert_eq!(total, bytes.len());
    }

    #[test]
    fn garbage_is_an_error() {
        let mut finder = InflateLengthFinder::new();
        assert!(finder.feed(&[0xff; 32]).is_err());
    }
}
