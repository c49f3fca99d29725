//! Combinators over record streams.
//!
//! Transforms are plain iterator adapters over
//! `Result<Record, Error>` items: errors from upstream (usually the
//! decoder) flow through untouched, records get rewritten. All
//! combinators are pure with respect to the record stream; anything
//! position-dependent they break is repaired afterwards by
//! [rederive](RecordTransform::rederive), which the encoder applies by
//! default.

use std::{collections::VecDeque, io};

use crate::{
    error::Error,
    parse::{EndRecord, LocalHeader, Record, Zip64EndLocator, Zip64EndRecord},
    write::IntoRecordResult,
};

mod rederive;
pub use rederive::Rederive;

mod trace;
pub use trace::{write_record_trace, Trace};

/// The combinator surface, available on any iterator of decoded (or
/// hand-built) records.
pub trait RecordTransform: Iterator<Item = Result<Record, Error>> + Sized {
    /// Keep only records for which `pred` holds. The predicate sees
    /// every record kind; for dropping whole entries use
    /// [filter_entries](Self::filter_entries).
    fn filter_records<P>(self, pred: P) -> FilterRecords<Self, P>
    where
        P: FnMut(&Record) -> bool,
    {
        FilterRecords { inner: self, pred }
    }

    /// Rewrite each record.
    fn map_records<F>(self, f: F) -> MapRecords<Self, F>
    where
        F: FnMut(Record) -> Record,
    {
        MapRecords { inner: self, f }
    }

    /// Rewrite each record into zero or more records.
    fn flat_map_records<F>(self, f: F) -> FlatMapRecords<Self, F>
    where
        F: FnMut(Record) -> Vec<Record>,
    {
        FlatMapRecords {
            inner: self,
            f,
            pending: VecDeque::new(),
        }
    }

    /// Drop whole entries: when `pred` rejects a local header, the
    /// header, its file data, its optional data descriptor *and* the
    /// central entry with the matching name (first match in order) all
    /// go away together.
    fn filter_entries<P>(self, pred: P) -> FilterEntries<Self, P>
    where
        P: FnMut(&LocalHeader) -> bool,
    {
        FilterEntries {
            inner: self,
            pred,
            dropping: false,
            dropped_names: Vec::new(),
        }
    }

    /// Rewrite entry names. The same function is applied to local
    /// headers and central entries, so pairs renamed by name equality
    /// stay pairs.
    fn rename<F>(self, f: F) -> Rename<Self, F>
    where
        F: FnMut(&[u8]) -> Vec<u8>,
    {
        Rename { inner: self, f }
    }

    /// Upgrade the stream to zip64: local headers, data descriptors
    /// and central entries are upgraded in place, and each end record
    /// grows a zip64 end record and locator in front of it (unless the
    /// stream already carried its own).
    fn to_zip64(self) -> ToZip64<Self> {
        ToZip64 {
            inner: self,
            pending: VecDeque::new(),
            saw_zip64_end: false,
        }
    }

    /// Recompute every cross-record offset, size and count in emission
    /// order. See [Rederive].
    fn rederive(self) -> Rederive<Self> {
        Rederive::new(self, true)
    }

    /// Write a disassembly of each record to `sink` as it flows past.
    fn trace<W: io::Write>(self, sink: W) -> Trace<Self, W> {
        Trace::new(self, Some(sink))
    }
}

impl<I> RecordTransform for I where I: Iterator<Item = Result<Record, Error>> + Sized {}

/// See [RecordTransform::filter_records].
pub struct FilterRecords<I, P> {
    inner: I,
    pred: P,
}

impl<I, P> Iterator for FilterRecords<I, P>
where
    I: Iterator<Item = Result<Record, Error>>,
    P: FnMut(&Record) -> bool,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Err(e) => return Some(Err(e)),
                Ok(record) => {
                    if (self.pred)(&record) {
                        return Some(Ok(record));
                    }
                }
            }
        }
    }
}

/// See [RecordTransform::map_records].
pub struct MapRecords<I, F> {
    inner: I,
    f: F,
}

impl<I, F> Iterator for MapRecords<I, F>
where
    I: Iterator<Item = Result<Record, Error>>,
    F: FnMut(Record) -> Record,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.inner.next()?.map(&mut self.f))
    }
}

/// See [RecordTransform::flat_map_records].
pub struct FlatMapRecords<I, F> {
    inner: I,
    f: F,
    pending: VecDeque<Record>,
}

impl<I, F> Iterator for FlatMapRecords<I, F>
where
    I: Iterator<Item = Result<Record, Error>>,
    F: FnMut(Record) -> Vec<Record>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            match self.inner.next()? {
                Err(e) => return Some(Err(e)),
                Ok(record) => self.pending.extend((self.f)(record)),
            }
        }
    }
}

/// See [RecordTransform::filter_entries].
pub struct FilterEntries<I, P> {
    inner: I,
    pred: P,
    /// inside an entry whose local header was rejected
    dropping: bool,
    /// names of dropped locals whose central entry hasn't come past yet
    dropped_names: Vec<Vec<u8>>,
}

impl<I, P> Iterator for FilterEntries<I, P>
where
    I: Iterator<Item = Result<Record, Error>>,
    P: FnMut(&LocalHeader) -> bool,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Err(e) => return Some(Err(e)),
                Ok(Record::Local(header)) => {
                    if (self.pred)(&header) {
                        self.dropping = false;
                        return Some(Ok(Record::Local(header)));
                    }
                    self.dropping = true;
                    self.dropped_names.push(header.name.0);
                }
                Ok(Record::Data(_) | Record::Descriptor(_)) if self.dropping => continue,
                Ok(Record::Central(entry)) => {
                    self.dropping = false;
                    match self
                        .dropped_names
                        .iter()
                        .position(|name| name == &entry.name.0)
                    {
                        Some(i) => {
                            self.dropped_names.remove(i);
                        }
                        None => return Some(Ok(Record::Central(entry))),
                    }
                }
                Ok(record) => return Some(Ok(record)),
            }
        }
    }
}

/// See [RecordTransform::rename].
pub struct Rename<I, F> {
    inner: I,
    f: F,
}

impl<I, F> Iterator for Rename<I, F>
where
    I: Iterator<Item = Result<Record, Error>>,
    F: FnMut(&[u8]) -> Vec<u8>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.inner.next()?.map(|record| match record {
            Record::Local(header) => {
                let name = (self.f)(header.name.as_bytes());
                Record::Local(header.with_name(name))
            }
            Record::Central(entry) => {
                let name = (self.f)(entry.name.as_bytes());
                Record::Central(entry.with_name(name))
            }
            record => record,
        }))
    }
}

/// See [RecordTransform::to_zip64].
pub struct ToZip64<I> {
    inner: I,
    pending: VecDeque<Record>,
    saw_zip64_end: bool,
}

impl<I> Iterator for ToZip64<I>
where
    I: Iterator<Item = Result<Record, Error>>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.pending.pop_front() {
            return Some(Ok(record));
        }
        Some(self.inner.next()?.map(|record| match record {
            Record::Local(header) => Record::Local(header.to_zip64()),
            Record::Descriptor(descriptor) => Record::Descriptor(descriptor.to_zip64()),
            Record::Central(entry) => Record::Central(entry.to_zip64()),
            Record::Zip64End(z64) => {
                self.saw_zip64_end = true;
                Record::Zip64End(z64)
            }
            Record::End(end) => {
                if self.saw_zip64_end {
                    // the stream brought its own zip64 end records
                    return Record::End(end.to_zip64());
                }
                self.pending
                    .push_back(Record::Zip64Locator(Zip64EndLocator::default()));
                self.pending.push_back(Record::End(end.to_zip64()));
                Record::Zip64End(Zip64EndRecord::default())
            }
            record => record,
        }))
    }
}

/// Merge two archives' record streams into one: `a`'s entries, then
/// `b`'s, then `a`'s central entries, then `b`'s, then a single end
/// record summing both inputs' counts and sizes.
///
/// Zip64 end records and locators from either input are dropped; if the
/// merged archive needs zip64, apply
/// [to_zip64](RecordTransform::to_zip64) to the result. Everything
/// position-dependent in the merged stream is stale by construction and
/// wants a [rederive](RecordTransform::rederive) pass (the encoder's
/// default) before hitting bytes.
pub fn concat<A, B, RA, RB>(a: A, b: B) -> Result<Vec<Record>, Error>
where
    A: IntoIterator<Item = RA>,
    B: IntoIterator<Item = RB>,
    RA: IntoRecordResult,
    RB: IntoRecordResult,
{
    let a = Sections::split(a)?;
    let b = Sections::split(b)?;

    let mut out = a.entries;
    out.extend(b.entries);
    out.extend(a.centrals);
    out.extend(b.centrals);

    let end = match (a.end, b.end) {
        (Some(ea), Some(eb)) => EndRecord {
            dir_records_this_disk: ea
                .dir_records_this_disk
                .saturating_add(eb.dir_records_this_disk),
            directory_records: ea.directory_records.saturating_add(eb.directory_records),
            directory_size: ea.directory_size.saturating_add(eb.directory_size),
            ..ea
        },
        (Some(end), None) | (None, Some(end)) => end,
        (None, None) => EndRecord::default(),
    };
    out.push(Record::End(end));
    Ok(out)
}

/// An archive's records, split into the entry section, the central
/// directory section, and the end record.
struct Sections {
    entries: Vec<Record>,
    centrals: Vec<Record>,
    end: Option<EndRecord>,
}

impl Sections {
    fn split<I, R>(records: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = R>,
        R: IntoRecordResult,
    {
        let mut entries = Vec::new();
        let mut centrals = Vec::new();
        let mut end = None;
        let mut in_central = false;
        for record in records {
            match record.into_record_result()? {
                // both inputs' zip64 end records are dropped; the
                // caller re-upgrades if the result needs them
                Record::Zip64End(_) | Record::Zip64Locator(_) => {}
                Record::End(e) => end = Some(e),
                Record::Central(c) => {
                    in_central = true;
                    centrals.push(Record::Central(c));
                }
                record if in_central => centrals.push(record),
                record => entries.push(record),
            }
        }
        Ok(Self {
            entries,
            centrals,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{CentralEntry, DataDescriptor, Method};

    fn ok_stream(records: Vec<Record>) -> impl Iterator<Item = Result<Record, Error>> {
        records.into_iter().map(Ok)
    }

    fn sample() -> Vec<Record> {
        vec![
            Record::Local(LocalHeader::new("a", Method::Store).with_flags(0b1000)),
            Record::Data(b"".as_slice().into()),
            Record::Descriptor(DataDescriptor::new(0, 0, 0)),
            Record::Local(LocalHeader::new("b", Method::Store)),
            Record::Data(b"bb".as_slice().into()),
            Record::Central(CentralEntry::new("a", Method::Store)),
            Record::Central(CentralEntry::new("b", Method::Store)),
            Record::End(EndRecord::default()),
        ]
    }

    #[test]
    fn filter_entries_drops_the_whole_unit() {
        let out: Vec<Record> = ok_stream(sample())
            .filter_entries(|h| h.name.as_bytes() != b"a")
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(out[0].name().unwrap().as_bytes(), b"b");
        assert!(matches!(out[1], Record::Data(_)));
        assert_eq!(out[2].name().unwrap().as_bytes(), b"b");
        assert!(matches!(out[3], Record::End(_)));
    }

    #[test]
    fn rename_keeps_pairs_paired() {
        let out: Vec<Record> = ok_stream(sample())
            .rename(|name| {
                let mut name = name.to_vec();
                name.extend_from_slice(b".txt");
                name
            })
            .collect::<Result<_, _>>()
            .unwrap();

        let names: Vec<&[u8]> = out.iter().filter_map(|r| r.name()).map(|n| n.as_bytes()).collect();
        assert_eq!(names, vec![b"a.txt" as &[u8], b"b.txt", b"a.txt", b"b.txt"]);
    }

    #[test]
    fn to_zip64_expands_the_end_record() {
        let out: Vec<Record> = ok_stream(sample())
            .to_zip64()
            .collect::<Result<_, _>>()
            .unwrap();

        let kinds: Vec<&str> = out.iter().map(Record::kind_name).collect();
        assert_eq!(
            &kinds[5..],
            &[
                "CentralEntry",
                "CentralEntry",
                "Zip64EndRecord",
                "Zip64EndLocator",
                "EndRecord"
            ]
        );
        assert!(matches!(&out[2], Record::Descriptor(d) if d.zip64));
        match out.last().unwrap() {
            Record::End(end) => assert!(end.is_zip64()),
            other => panic!("expected end record, got {:?}", other),
        }
    }

    #[test]
    fn to_zip64_respects_existing_end_records() {
        let records = vec![
            Record::Zip64End(Zip64EndRecord::default()),
            Record::Zip64Locator(Zip64EndLocator::default()),
            Record::End(EndRecord::default().to_zip64()),
        ];
        let out: Vec<Record> = ok_stream(records)
            .to_zip64()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn concat_interleaves_sections() {
        let a = sample();
        let b: Vec<Record> = ok_stream(sample())
            .rename(|name| {
                let mut name = name.to_vec();
                name.insert(0, b'2');
                name
            })
            .collect::<Result<_, _>>()
            .unwrap();

        let merged = concat(a, b).unwrap();
        let names: Vec<&[u8]> = merged
            .iter()
            .filter_map(|r| r.name())
            .map(|n| n.as_bytes())
            .collect();
        assert_eq!(
            names,
            vec![b"a" as &[u8], b"b", b"2a", b"2b", b"a", b"b", b"2a", b"2b"]
        );
        match merged.last().unwrap() {
            Record::End(end) => assert_eq!(end.directory_records, 0),
            other => panic!("expected end record, got {:?}", other),
        }
    }
}
