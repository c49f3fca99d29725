/// Compression method used for a file entry.
///
/// This crate never compresses or decompresses entry contents; it needs
/// the method only to know how to find the end of a payload (and to put a
/// readable name on it in trace output). Anything it does not recognize
/// is carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// No compression is applied
    Store,

    /// [DEFLATE (RFC 1951)](https://www.ietf.org/rfc/rfc1951.txt)
    Deflate,

    /// [DEFLATE64](https://deflate64.com/)
    Deflate64,

    /// [BZIP-2](https://github.com/dsnet/compress/blob/master/doc/bzip2-format.pdf)
    Bzip2,

    /// [LZMA](https://github.com/jljusten/LZMA-SDK/blob/master/DOC/lzma-specification.txt)
    Lzma,

    /// [zstd](https://datatracker.ietf.org/doc/html/rfc8878)
    Zstd,

    /// A compression method that isn't recognized by this crate.
    Unrecognized(u16),
}

impl Method {
    const STORE: u16 = 0;
    const DEFLATE: u16 = 8;
    const DEFLATE64: u16 = 9;
    const BZIP2: u16 = 12;
    const LZMA: u16 = 14;
    const ZSTD: u16 = 93;
}

impl From<u16> for Method {
    fn from(u: u16) -> Self {
        match u {
            Self::STORE => Self::Store,
            Self::DEFLATE => Self::Deflate,
            Self::DEFLATE64 => Self::Deflate64,
            Self::BZIP2 => Self::Bzip2,
            Self::LZMA => Self::Lzma,
            Self::ZSTD => Self::Zstd,
            u => Self::Unrecognized(u),
        }
    }
}

impl From<Method> for u16 {
    fn from(method: Method) -> Self {
        match method {
            Method::Store => Method::STORE,
            Method::Deflate => Method::DEFLATE,
            Method::Deflate64 => Method::DEFLATE64,
            Method::Bzip2 => Method::BZIP2,
            Method::Lzma => Method::LZMA,
            Method::Zstd => Method::ZSTD,
            Method::Unrecognized(u) => u,
        }
    }
}
