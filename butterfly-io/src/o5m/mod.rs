//! o5m / o5c compact binary format
//!
//! A stream of datasets. Dataset ids `0xf0..=0xff` are a single byte;
//! every other id is followed by a varint byte length and the body.
//!
//! ```text
//! 0xff                       reset: zero all delta contexts and the string table
//! 0xe0 04 "o5m2" | "o5c2"    format signature
//! 0xdb len x1 y1 x2 y2       bounding box, zig-zag varints, 1e-7 degrees
//! 0xdc len ts                file timestamp, zig-zag varint seconds
//! 0x10 len body              node
//! 0x11 len body              way
//! 0x12 len body              relation
//! 0xfe                       end of file
//! ```
//!
//! Object body: `Δid [version [Δtimestamp [Δchangeset (uid,user)]]]`,
//! then the kind-specific part, then key/value string pairs. A body that
//! stops right after the author section is a delete record (o5c).

mod reader;
mod strings;
mod writer;

pub use reader::O5mReader;
pub use writer::O5mWriter;

pub(crate) const RESET: u8 = 0xff;
pub(crate) const END_OF_FILE: u8 = 0xfe;
pub(crate) const NODE_DATASET: u8 = 0x10;
pub(crate) const WAY_DATASET: u8 = 0x11;
pub(crate) const RELATION_DATASET: u8 = 0x12;
pub(crate) const BBOX_DATASET: u8 = 0xdb;
pub(crate) const TIMESTAMP_DATASET: u8 = 0xdc;
pub(crate) const HEADER_DATASET: u8 = 0xe0;
pub(crate) const FORMAT_TAG_DATA: &[u8] = b"o5m2";
pub(crate) const FORMAT_TAG_CHANGE: &[u8] = b"o5c2";

/// Largest dataset body accepted by the decoder
pub(crate) const MAX_DATASET_LEN: usize = 64 * 1024 * 1024;

/// Running values for every delta-coded field; zeroed by a reset
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Delta {
    pub id: i64,
    pub lon: i32,
    pub lat: i32,
    pub timestamp: i64,
    pub changeset: i64,
    /// Member/node reference context per target kind
    pub refs: [i64; 3],
}

/// Whether the bytes start like an o5m or o5c file
pub fn sniff(prefix: &[u8]) -> bool {
    match prefix {
        [RESET, HEADER_DATASET, 0x04, b'o', b'5', b'm' | b'c', b'2', ..] => true,
        [RESET, NODE_DATASET..=RELATION_DATASET | BBOX_DATASET | TIMESTAMP_DATASET, ..] => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Author, BBox, Coord, Geometry, Kind, Member, Object, StreamHeader};
    use crate::stream::{Limits, ObjectReader, ObjectWriter};
    use std::io::Cursor;

    fn sample() -> Vec<Object> {
        let author = Author {
            version: 3,
            timestamp: 1_285_874_610,
            changeset: 5_922_698,
            uid: 45_445,
            user: "UScha".into(),
        };
        vec![
            Object::node(125_799, Coord::new(85_324_351, 539_734_112)).with_author(author.clone()),
            Object::node(125_800, Coord::new(-1_800_000_000, -899_999_999))
                .with_author(author.clone())
                .with_tag("amenity", "cafe")
                .with_tag("name", "Zum Hafen"),
            Object::way(2_000, vec![125_799, 125_800, 125_799])
                .with_tag("highway", "residential"),
            Object::relation(
                -5,
                vec![
                    Member::new(Kind::Way, 2_000, "outer"),
                    Member::new(Kind::Node, 125_800, ""),
                    Member::new(Kind::Relation, 7, "subarea"),
                ],
            )
            .with_author(author)
            .with_tag("type", "multipolygon"),
        ]
    }

    fn encode(objects: &[Object], change: bool, header: &StreamHeader) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = O5mWriter::new(&mut out, change, header).unwrap();
            for object in objects {
                writer.write(object).unwrap();
            }
            writer.finish().unwrap();
        }
        out
    }

    fn decode(bytes: &[u8]) -> (StreamHeader, Vec<Object>) {
        let mut reader = O5mReader::new(Cursor::new(bytes), Limits::default()).unwrap();
        let mut objects = Vec::new();
        while let Some(object) = reader.read_next().unwrap() {
            objects.push(object);
        }
        (*reader.header(), objects)
    }

    #[test]
    fn round_trip_preserves_objects_and_header() {
        let header = StreamHeader {
            bbox: Some(BBox::new(-10, -20, 30, 40)),
            timestamp: Some(1_700_000_000),
        };
        let objects = sample();
        let bytes = encode(&objects, false, &header);
        assert!(sniff(&bytes));
        assert_eq!(&bytes[..7], b"\xff\xe0\x04o5m2");
        assert_eq!(bytes.last(), Some(&END_OF_FILE));

        let (read_header, decoded) = decode(&bytes);
        assert_eq!(read_header, header);
        assert_eq!(decoded, objects);
    }

    #[test]
    fn delete_record_has_no_payload() {
        let deleted = Object::deleted(Kind::Node, 42);
        let bytes = encode(&[deleted.clone()], true, &StreamHeader::default());
        assert_eq!(&bytes[..7], b"\xff\xe0\x04o5c2");
        // node dataset: length 2, Δid 42 (zig-zag 84), version 0
        let node = bytes.iter().position(|&b| b == NODE_DATASET).unwrap();
        assert_eq!(&bytes[node..node + 4], &[NODE_DATASET, 2, 84, 0]);

        let (_, decoded) = decode(&bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].action, Action::Delete);
        assert_eq!(decoded[0].id, 42);
        assert_eq!(decoded[0].geometry, Geometry::Node(Coord::default()));
    }

    #[test]
    fn reset_between_kinds_restarts_deltas() {
        let bytes = encode(&sample(), false, &StreamHeader::default());
        let resets = bytes.iter().filter(|&&b| b == RESET).count();
        // leading reset plus one per kind section
        assert!(resets >= 3);
    }

    #[test]
    fn truncated_dataset_reports_offset() {
        let mut bytes = encode(&sample(), false, &StreamHeader::default());
        bytes.truncate(bytes.len() - 6);
        let mut reader = O5mReader::new(Cursor::new(&bytes), Limits::default()).unwrap();
        let err = loop {
            match reader.read_next() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("truncation not detected"),
                Err(e) => break e,
            }
        };
        assert!(err.to_string().starts_with("Malformed o5m input at byte"));
    }

    #[test]
    fn missing_reset_is_rejected() {
        assert!(O5mReader::new(Cursor::new(&b"<osm>"[..]), Limits::default()).is_err());
    }

    #[test]
    fn unknown_datasets_are_skipped() {
        let mut bytes = vec![RESET, 0x30, 3, 1, 2, 3, 0xf5];
        let node = encode(&sample()[..1], false, &StreamHeader::default());
        // drop the signature and leading reset of the second stream
        bytes.extend_from_slice(&node[8..]);
        let (_, decoded) = decode(&bytes);
        assert_eq!(decoded, sample()[..1].to_vec());
    }
}
