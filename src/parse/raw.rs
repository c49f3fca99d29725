use pretty_hex::PrettyHex;
use std::fmt;
use winnow::{stream::ToUsize, token::take, PResult, Parser, Partial};

/// A raw zip string, with no specific encoding.
///
/// Names and comments are carried as the bytes that were on the wire;
/// interpreting them is the business of whatever reads the archive this
/// crate produces.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ZipString(pub Vec<u8>);

impl ZipString {
    pub(crate) fn parser<C>(count: C) -> impl FnMut(&mut Partial<&'_ [u8]>) -> PResult<Self>
    where
        C: ToUsize,
    {
        let count = count.to_usize();
        move |i| (take(count).map(|slice: &[u8]| Self(slice.into()))).parse_next(i)
    }

    /// Length of the string in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl<'a> From<&'a [u8]> for ZipString {
    fn from(slice: &'a [u8]) -> Self {
        Self(slice.into())
    }
}

impl From<Vec<u8>> for ZipString {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for ZipString {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().into())
    }
}

impl fmt::Debug for ZipString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "[non-utf8 string: {}]", self.0.hex_dump()),
        }
    }
}

