use crate::parse::{
    CentralEntry, DataDescriptor, EndRecord, FileData, LocalHeader, Zip64EndLocator,
    Zip64EndRecord, ZipString,
};

/// One structural element of a zip archive.
///
/// A decoded archive is an ordered sequence of these; an archive is
/// encoded by writing them back out in order. The set is closed:
/// everything downstream (re-derivation, tracing, encoding) matches
/// exhaustively, so a new variant has to be taught everywhere before
/// the crate compiles again.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A local file header
    Local(LocalHeader),

    /// An entry's (compressed) payload, following its local header
    Data(FileData),

    /// A data descriptor, following the payload when local header flags
    /// bit 3 is set
    Descriptor(DataDescriptor),

    /// A central directory file header
    Central(CentralEntry),

    /// The zip64 end of central directory record
    Zip64End(Zip64EndRecord),

    /// The zip64 end of central directory locator
    Zip64Locator(Zip64EndLocator),

    /// The end of central directory record
    End(EndRecord),

    /// That many zero bytes. Never produced by the decoder; inserted
    /// by callers who want sparse padding in the output.
    Hole(u64),
}

impl Record {
    /// Exact serialized length of the record in bytes.
    pub fn wire_size(&self) -> u64 {
        match self {
            Record::Local(r) => r.wire_size(),
            Record::Data(r) => r.len(),
            Record::Descriptor(r) => r.wire_size(),
            Record::Central(r) => r.wire_size(),
            Record::Zip64End(r) => r.wire_size(),
            Record::Zip64Locator(r) => r.wire_size(),
            Record::End(r) => r.wire_size(),
            Record::Hole(n) => *n,
        }
    }

    /// The entry name carried by this record, for the two record kinds
    /// that have one.
    pub fn name(&self) -> Option<&ZipString> {
        match self {
            Record::Local(r) => Some(&r.name),
            Record::Central(r) => Some(&r.name),
            _ => None,
        }
    }

    /// A short human-readable name for the record kind, as used in
    /// trace output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Record::Local(_) => "LocalHeader",
            Record::Data(_) => "FileData",
            Record::Descriptor(_) => "DataDescriptor",
            Record::Central(_) => "CentralEntry",
            Record::Zip64End(_) => "Zip64EndRecord",
            Record::Zip64Locator(_) => "Zip64EndLocator",
            Record::End(_) => "EndRecord",
            Record::Hole(_) => "Hole",
        }
    }
}

impl From<LocalHeader> for Record {
    fn from(r: LocalHeader) -> Self {
        Record::Local(r)
    }
}

impl From<FileData> for Record {
    fn from(r: FileData) -> Self {
        Record::Data(r)
    }
}

impl From<DataDescriptor> for Record {
    fn from(r: DataDescriptor) -> Self {
        Record::Descriptor(r)
    }
}

impl From<CentralEntry> for Record {
    fn from(r: CentralEntry) -> Self {
        Record::Central(r)
    }
}

impl From<Zip64EndRecord> for Record {
    fn from(r: Zip64EndRecord) -> Self {
        Record::Zip64End(r)
    }
}

impl From<Zip64EndLocator> for Record {
    fn from(r: Zip64EndLocator) -> Self {
        Record::Zip64Locator(r)
    }
}

impl From<EndRecord> for Record {
    fn from(r: EndRecord) -> Self {
        Record::End(r)
    }
}
