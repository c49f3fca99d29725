//! The offset/size re-derivation pass.
//!
//! After arbitrary record-stream edits, every position- and
//! count-dependent field in the archive is potentially a lie: central
//! entries point at local headers that moved, the end record counts
//! entries that were dropped. This pass walks the final emission order
//! once and rewrites those fields from what it actually sees, so the
//! encoder can stay a dumb byte emitter.
//!
//! Pairing is by ordinal: the i-th central entry is matched with the
//! i-th local header. Transforms that reorder locals without reordering
//! centrals to match get the archive they asked for.

use tracing::trace;

use crate::{
    error::Error,
    parse::{Record, U16_SENTINEL, U32_SENTINEL},
};

/// Iterator adapter that rewrites cross-record references in a record
/// stream. Built by
/// [RecordTransform::rederive](crate::transform::RecordTransform::rederive);
/// [EncodeOptions](crate::write::EncodeOptions) inserts one unless told
/// not to.
pub struct Rederive<I> {
    inner: I,
    enabled: bool,

    /// running absolute offset of the next record
    offset: u64,

    /// absolute offset of every local header seen, in order
    local_offsets: Vec<u64>,

    /// central entries seen so far
    centrals_seen: u64,

    /// where the central entry block began
    cen_offset: Option<u64>,

    /// where the central entry block ended: set when the first
    /// non-central record after it comes past
    cen_end: Option<u64>,

    /// where the zip64 end record went, for the locator
    zip64_end_offset: Option<u64>,
}

impl<I> Rederive<I> {
    pub(crate) fn new(inner: I, enabled: bool) -> Self {
        Self {
            inner,
            enabled,
            offset: 0,
            local_offsets: Vec::new(),
            centrals_seen: 0,
            cen_offset: None,
            cen_end: None,
            zip64_end_offset: None,
        }
    }

    fn rewrite(&mut self, record: Record) -> Record {
        // the central block is contiguous; the first record after it
        // that is not a central entry closes it
        if self.cen_offset.is_some()
            && self.cen_end.is_none()
            && !matches!(record, Record::Central(_))
        {
            self.cen_end = Some(self.offset);
        }

        match record {
            Record::Local(header) => {
                self.local_offsets.push(self.offset);
                Record::Local(header)
            }

            record @ (Record::Data(_) | Record::Descriptor(_) | Record::Hole(_)) => record,

            Record::Central(entry) => {
                if self.cen_offset.is_none() {
                    self.cen_offset = Some(self.offset);
                }
                let ordinal = self.centrals_seen as usize;
                self.centrals_seen += 1;
                match self.local_offsets.get(ordinal) {
                    Some(&local_offset) => {
                        trace!(ordinal, local_offset, "pairing central entry");
                        Record::Central(entry.with_header_offset(local_offset))
                    }
                    // more centrals than locals: the caller broke the
                    // pairing invariant on purpose, leave it be
                    None => Record::Central(entry),
                }
            }

            Record::Zip64End(z64) => {
                self.zip64_end_offset = Some(self.offset);
                let cen_end = self.cen_end.unwrap_or(self.offset);
                let cen_offset = self.cen_offset.unwrap_or(cen_end);
                Record::Zip64End(
                    z64.with_directory_records(self.centrals_seen)
                        .with_directory_size(cen_end - cen_offset)
                        .with_directory_offset(cen_offset),
                )
            }

            Record::Zip64Locator(locator) => match self.zip64_end_offset {
                Some(offset) => Record::Zip64Locator(locator.with_directory_offset(offset)),
                None => Record::Zip64Locator(locator),
            },

            Record::End(end) => {
                if end.is_zip64() {
                    // the real values live in the zip64 end record;
                    // the sentinels stay
                    return Record::End(end);
                }
                let cen_end = self.cen_end.unwrap_or(self.offset);
                let cen_offset = self.cen_offset.unwrap_or(cen_end);
                Record::End(
                    end.with_dir_records_this_disk(clamp_u16(self.centrals_seen))
                        .with_directory_records(clamp_u16(self.centrals_seen))
                        .with_directory_size(clamp_u32(cen_end - cen_offset))
                        .with_directory_offset(clamp_u32(cen_offset)),
                )
            }
        }
    }
}

/// Values that no longer fit their legacy field are clamped to the
/// zip64 sentinel rather than wrapped; a reader at least sees "too
/// big" instead of a small nonsense value.
fn clamp_u32(value: u64) -> u32 {
    value.min(u64::from(U32_SENTINEL)) as u32
}

fn clamp_u16(value: u64) -> u16 {
    value.min(u64::from(U16_SENTINEL)) as u16
}

impl<I> Iterator for Rederive<I>
where
    I: Iterator<Item = Result<Record, Error>>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.inner.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e)),
        };
        if !self.enabled {
            return Some(Ok(record));
        }
        let record = self.rewrite(record);
        self.offset += record.wire_size();
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{CentralEntry, EndRecord, LocalHeader, Method};
    use crate::transform::RecordTransform;

    fn entry_records(name: &str, payload: &[u8]) -> Vec<Record> {
        let len = payload.len() as u32;
        vec![
            Record::Local(
                LocalHeader::new(name, Method::Store)
                    .with_compressed_size(len)
                    .with_uncompressed_size(len),
            ),
            Record::Data(payload.into()),
        ]
    }

    fn rederive_all(records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .map(Ok)
            .rederive()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn central_entries_point_at_their_locals() {
        let mut records = entry_records("a", b"aaaa");
        records.extend(entry_records("b", b"bb"));
        records.push(Record::Central(CentralEntry::new("a", Method::Store)));
        records.push(Record::Central(CentralEntry::new("b", Method::Store)));
        records.push(Record::End(EndRecord::default()));

        let fixed = rederive_all(records);
        let offsets: Vec<u64> = fixed
            .iter()
            .filter_map(|r| match r {
                Record::Central(c) => Some(c.logical_header_offset()),
                _ => None,
            })
            .collect();
        // local "a" at 0, spans 31 + 4 payload; "b" follows at 35
        assert_eq!(offsets, vec![0, 35]);

        match fixed.last().unwrap() {
            Record::End(end) => {
                assert_eq!(end.directory_records, 2);
                assert_eq!(end.dir_records_this_disk, 2);
                let cen_offset = u64::from(end.directory_offset);
                let cen_size = u64::from(end.directory_size);
                // the central block starts right after b's payload
                assert_eq!(cen_offset, 35 + 31 + 2);
                let central_bytes: u64 = fixed
                    .iter()
                    .filter(|r| matches!(r, Record::Central(_)))
                    .map(Record::wire_size)
                    .sum();
                assert_eq!(cen_size, central_bytes);
            }
            other => panic!("expected end record, got {:?}", other),
        }
    }

    #[test]
    fn a_hole_after_the_central_block_stays_out_of_cen_size() {
        let mut records = entry_records("a", b"x");
        records.push(Record::Central(CentralEntry::new("a", Method::Store)));
        records.push(Record::Hole(1024));
        records.push(Record::End(EndRecord::default()));

        let fixed = rederive_all(records);
        match fixed.last().unwrap() {
            Record::End(end) => {
                let central = fixed
                    .iter()
                    .find_map(|r| match r {
                        Record::Central(c) => Some(c.wire_size()),
                        _ => None,
                    })
                    .unwrap();
                assert_eq!(u64::from(end.directory_size), central);
            }
            other => panic!("expected end record, got {:?}", other),
        }
    }

    #[test]
    fn sentinel_bearing_end_record_is_left_alone() {
        let mut records = entry_records("a", b"x");
        records.push(Record::Central(CentralEntry::new("a", Method::Store)));
        records.push(Record::End(EndRecord::default().to_zip64()));

        let fixed = rederive_all(records);
        match fixed.last().unwrap() {
            Record::End(end) => assert!(end.is_zip64()),
            other => panic!("expected end record, got {:?}", other),
        }
    }

    #[test]
    fn disabled_pass_is_a_passthrough() {
        let records = vec![Record::End(
            EndRecord::default().with_directory_offset(0xdead),
        )];
        let out: Vec<Record> = Rederive::new(records.into_iter().map(Ok), false)
            .collect::<Result<_, _>>()
            .unwrap();
        match &out[0] {
            Record::End(end) => assert_eq!(end.directory_offset, 0xdead),
            other => panic!("expected end record, got {:?}", other),
        }
    }

    #[test]
    fn oversized_counts_clamp_to_the_sentinel() {
        assert_eq!(clamp_u16(0x12345), U16_SENTINEL);
        assert_eq!(clamp_u32(0x1_0000_0000), U32_SENTINEL);
        assert_eq!(clamp_u16(41), 41);
        assert_eq!(clamp_u32(41), 41);
    }
}
