//! The re-derivation pass promises that whatever a transform did to
//! the record stream, every position- and count-dependent field in the
//! encoded archive describes the archive that actually got written.
//! These tests pin that promise down on its own, away from the broader
//! scenario tests.

use rezip::{
    parse::{CentralEntry, EndRecord, FileData, LocalHeader, Method, Record},
    read::records,
    transform::RecordTransform,
    write::EncodeOptions,
};

fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut recs = Vec::new();
    let mut centrals = Vec::new();
    for (name, data) in entries {
        let crc32 = crc32fast::hash(data);
        recs.push(Record::Local(
            LocalHeader::new(*name, Method::Store)
                .with_crc32(crc32)
                .with_compressed_size(data.len() as u32)
                .with_uncompressed_size(data.len() as u32),
        ));
        recs.push(Record::Data(FileData::from_vec(data.to_vec())));
        centrals.push(Record::Central(
            CentralEntry::new(*name, Method::Store)
                .with_crc32(crc32)
                .with_compressed_size(data.len() as u32)
                .with_uncompressed_size(data.len() as u32),
        ));
    }
    recs.extend(centrals);
    recs.push(Record::End(EndRecord::default()));
    EncodeOptions::new().write_to_vec(recs).unwrap()
}

fn decode(bytes: Vec<u8>) -> Vec<Record> {
    records(bytes).collect::<Result<_, _>>().unwrap()
}

fn offsets(records: &[Record]) -> Vec<u64> {
    records
        .iter()
        .scan(0u64, |offset, record| {
            let this = *offset;
            *offset += record.wire_size();
            Some(this)
        })
        .collect()
}

/// Every central entry points at the local header with the same
/// ordinal, and the end record describes the central block exactly.
fn assert_consistent(decoded: &[Record]) {
    let record_offsets = offsets(decoded);

    let local_offsets: Vec<u64> = decoded
        .iter()
        .zip(&record_offsets)
        .filter_map(|(r, &o)| matches!(r, Record::Local(_)).then_some(o))
        .collect();
    let central_targets: Vec<u64> = decoded
        .iter()
        .filter_map(|r| match r {
            Record::Central(c) => Some(c.logical_header_offset()),
            _ => None,
        })
        .collect();
    assert_eq!(local_offsets, central_targets);

    let central_offsets: Vec<u64> = decoded
        .iter()
        .zip(&record_offsets)
        .filter_map(|(r, &o)| matches!(r, Record::Central(_)).then_some(o))
        .collect();
    let central_bytes: u64 = decoded
        .iter()
        .filter(|r| matches!(r, Record::Central(_)))
        .map(Record::wire_size)
        .sum();

    match decoded.last().unwrap() {
        Record::End(end) => {
            assert_eq!(end.directory_records as usize, central_targets.len());
            assert_eq!(end.dir_records_this_disk, end.directory_records);
            match central_offsets.first() {
                Some(&first) => {
                    assert_eq!(u64::from(end.directory_offset), first);
                    assert_eq!(u64::from(end.directory_size), central_bytes);
                }
                None => assert_eq!(end.directory_size, 0),
            }
        }
        other => panic!("expected end record, got {:?}", other),
    }
}

#[test_log::test]
fn dropping_a_middle_entry_rewrites_everything() {
    let input = archive(&[
        ("first", b"some bytes"),
        ("second", b"more bytes than the first one has"),
        ("third", b"x"),
    ]);

    let output = EncodeOptions::new()
        .write_to_vec(records(input).filter_entries(|h| h.name.as_bytes() != b"second"))
        .unwrap();
    let decoded = decode(output);

    let names: Vec<&[u8]> = decoded
        .iter()
        .filter_map(|r| r.name())
        .map(|n| n.as_bytes())
        .collect();
    assert_eq!(names, vec![b"first" as &[u8], b"third", b"first", b"third"]);
    assert_consistent(&decoded);
}

#[test_log::test]
fn reordered_entries_pair_by_ordinal() {
    let input = archive(&[("x", b"a short payload"), ("y", b"yy")]);
    let decoded = decode(input);

    // swap the two entries, locals and centrals alike, keeping the
    // ordinal pairing intact
    let mut reordered = Vec::with_capacity(decoded.len());
    reordered.push(decoded[2].clone()); // local y
    reordered.push(decoded[3].clone()); // data y
    reordered.push(decoded[0].clone()); // local x
    reordered.push(decoded[1].clone()); // data x
    reordered.push(decoded[5].clone()); // central y
    reordered.push(decoded[4].clone()); // central x
    reordered.push(decoded[6].clone()); // end

    let output = EncodeOptions::new().write_to_vec(reordered).unwrap();
    let decoded = decode(output);

    let names: Vec<&[u8]> = decoded
        .iter()
        .filter_map(|r| r.name())
        .map(|n| n.as_bytes())
        .collect();
    assert_eq!(names, vec![b"y" as &[u8], b"x", b"y", b"x"]);
    assert_consistent(&decoded);
}

#[test_log::test]
fn an_archive_with_no_entries_is_fine() {
    let bytes = EncodeOptions::new()
        .write_to_vec(vec![Record::End(EndRecord::default())])
        .unwrap();
    assert_eq!(bytes.len(), 22);

    let decoded = decode(bytes);
    assert_eq!(decoded.len(), 1);
    match &decoded[0] {
        Record::End(end) => {
            assert_eq!(end.directory_records, 0);
            assert_eq!(end.directory_size, 0);
            assert_eq!(end.directory_offset, 0);
        }
        other => panic!("expected end record, got {:?}", other),
    }
}

#[test_log::test]
fn archive_comment_survives_rederivation() {
    let recs = vec![Record::End(
        EndRecord::default().with_comment("twenty-two plus these"),
    )];
    let bytes = EncodeOptions::new().write_to_vec(recs).unwrap();
    let decoded = decode(bytes);
    match &decoded[0] {
        Record::End(end) => assert_eq!(end.comment.as_bytes(), b"twenty-two plus these"),
        other => panic!("expected end record, got {:?}", other),
    }
}

#[test_log::test]
fn zip64_end_pair_is_positioned_and_counted() {
    let input = archive(&[("only", b"payload")]);
    let output = EncodeOptions::new()
        .write_to_vec(records(input).to_zip64())
        .unwrap();
    let decoded = decode(output);
    let record_offsets = offsets(&decoded);

    let (z64, z64_offset) = decoded
        .iter()
        .zip(&record_offsets)
        .find_map(|(r, &o)| match r {
            Record::Zip64End(z) => Some((z, o)),
            _ => None,
        })
        .expect("upgraded archive should have a zip64 end record");

    assert_eq!(z64.directory_records, 1);
    assert_eq!(z64.dir_records_this_disk, 1);
    assert_eq!(z64.directory_offset + z64.directory_size, z64_offset);

    let locator = decoded
        .iter()
        .find_map(|r| match r {
            Record::Zip64Locator(l) => Some(l),
            _ => None,
        })
        .expect("upgraded archive should have a locator");
    assert_eq!(locator.directory_offset, z64_offset);

    // and the locator is immediately followed by the sentinel-bearing
    // end record
    match decoded.last().unwrap() {
        Record::End(end) => assert!(end.is_zip64()),
        other => panic!("expected end record, got {:?}", other),
    }
}
