//! Byte sources records can borrow file data from.
//!
//! Decoding never materializes entry payloads: a decoded
//! [FileData](crate::parse::FileData) keeps a `(source, offset, length)`
//! range into the input, and the encoder streams those bytes out later.
//! [ByteSource] is the shared handle that makes this workable without
//! lifetime gymnastics: cloning it clones an [Arc], and the backing file
//! is closed when the last clone goes away.

use std::{fmt, fs::File, io, path::Path, sync::Arc};

use positioned_io::ReadAt;

/// A cheaply-cloneable handle to an in-memory buffer or an opened file,
/// readable at arbitrary offsets.
#[derive(Clone)]
pub struct ByteSource {
    inner: Arc<Inner>,
}

enum Inner {
    Memory(Vec<u8>),
    File { file: File, len: u64 },
}

impl ByteSource {
    /// Wrap an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Inner::Memory(data)),
        }
    }

    /// Open a file for positioned reads.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Inner::File { file, len }),
        })
    }

    /// Total length of the source in bytes.
    pub fn len(&self) -> u64 {
        match self.inner.as_ref() {
            Inner::Memory(data) => data.len() as u64,
            Inner::File { len, .. } => *len,
        }
    }

    /// True if the source holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the number of
    /// bytes read; zero means end of source.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_ref() {
            Inner::Memory(data) => {
                let data = &data[data.len().min(offset as usize)..];
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Inner::File { file, .. } => file.read_at(offset, buf),
        }
    }

    /// Read an exact range, erroring on a short read.
    pub fn read_range(&self, offset: u64, len: u64) -> io::Result<Vec<u8>> {
        let mut out = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < out.len() {
            let n = self.read_at(offset + filled as u64, &mut out[filled..])?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            filled += n;
        }
        Ok(out)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for ByteSource {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.as_ref() {
            Inner::Memory(data) => write!(f, "ByteSource::Memory({} bytes)", data.len()),
            Inner::File { len, .. } => write!(f, "ByteSource::File({} bytes)", len),
        }
    }
}
