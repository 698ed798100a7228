//! OSM PBF block format
//!
//! ```text
//! repeat {
//!     u32 (big endian)   length of BlobHeader
//!     BlobHeader         type = "OSMHeader" | "OSMData", datasize
//!     Blob               raw | (raw_size, zlib_data)
//! }
//! ```
//!
//! The first blob holds a `HeaderBlock`, every following one a
//! `PrimitiveBlock` with its own string table and primitive groups.
//! Coordinates are `offset + granularity * value` nanodegrees.

pub(crate) mod proto;
mod reader;
mod writer;

pub use reader::PbfReader;
pub use writer::PbfWriter;

pub(crate) const BLOB_HEADER: &str = "OSMHeader";
pub(crate) const BLOB_DATA: &str = "OSMData";

pub(crate) const MAX_BLOB_HEADER_LEN: usize = 64 * 1024;
pub(crate) const MAX_BLOB_LEN: usize = 32 * 1024 * 1024;

/// Nanodegrees per 1e-7 degree unit
pub(crate) const NANO_PER_UNIT: i64 = 100;

pub(crate) const REQUIRED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];
pub(crate) const SUPPORTED_FEATURES: [&str; 3] =
    ["OsmSchema-V0.6", "DenseNodes", "HistoricalInformation"];

pub(crate) const WRITING_PROGRAM: &str = concat!("butterfly-osm ", env!("CARGO_PKG_VERSION"));

/// Flush a block before it holds more objects than this
pub(crate) const BLOCK_OBJECT_LIMIT: usize = 8_000;
/// Raw size no primitive block passes, unless one object alone is larger
pub(crate) const BLOCK_SIZE_LIMIT: usize = 4 * 1024 * 1024;

/// Whether the bytes start like a PBF file: a short big-endian length
/// followed by a BlobHeader whose type is `OSMHeader`
pub fn sniff(prefix: &[u8]) -> bool {
    match prefix {
        [0, 0, _, _, 0x0a, 9, rest @ ..] => rest.starts_with(BLOB_HEADER.as_bytes()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::proto::Message;
    use super::*;
    use crate::model::{Action, Author, BBox, Coord, Kind, Member, Object, StreamHeader};
    use crate::stream::{Limits, ObjectReader, ObjectWriter};
    use std::io::Cursor;

    fn author(version: u32) -> Author {
        Author {
            version,
            timestamp: 1_285_874_610,
            changeset: 5_922_698,
            uid: 45_445,
            user: "UScha".into(),
        }
    }

    fn sample() -> Vec<Object> {
        vec![
            Object::node(1, Coord::new(85_324_351, 539_734_112)).with_author(author(3)),
            Object::node(2, Coord::new(-1_799_999_999, -899_999_999))
                .with_tag("amenity", "cafe")
                .with_tag("name", "Zum Hafen"),
            Object::node(3, Coord::new(0, 0)).with_author(author(1)),
            Object::way(10, vec![1, 2, 3, 1])
                .with_author(author(2))
                .with_tag("highway", "residential"),
            Object::way(11, vec![3, 2]),
            Object::relation(
                20,
                vec![
                    Member::new(Kind::Way, 10, "outer"),
                    Member::new(Kind::Node, 2, ""),
                    Member::new(Kind::Relation, 21, "subarea"),
                ],
            )
            .with_author(author(7))
            .with_tag("type", "multipolygon"),
        ]
    }

    fn encode(objects: &[Object], header: &StreamHeader) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = PbfWriter::new(&mut out, header).unwrap();
            for object in objects {
                writer.write(object).unwrap();
            }
            writer.finish().unwrap();
        }
        out
    }

    fn decode(bytes: &[u8]) -> (StreamHeader, Vec<Object>) {
        let mut reader = PbfReader::new(Cursor::new(bytes), Limits::default()).unwrap();
        let mut objects = Vec::new();
        while let Some(object) = reader.read_next().unwrap() {
            objects.push(object);
        }
        (*reader.header(), objects)
    }

    #[test]
    fn round_trip_preserves_objects_and_header() {
        let header = StreamHeader {
            bbox: Some(BBox::new(-100, -200, 300, 400)),
            timestamp: Some(1_700_000_000),
        };
        let bytes = encode(&sample(), &header);
        assert!(sniff(&bytes));
        let (read_header, objects) = decode(&bytes);
        assert_eq!(read_header, header);
        assert_eq!(objects, sample());
    }

    #[test]
    fn large_inputs_are_split_into_blocks() {
        let nodes: Vec<Object> = (0..20_000)
            .map(|i| Object::node(i, Coord::new(i as i32, -(i as i32))))
            .collect();
        let bytes = encode(&nodes, &StreamHeader::default());
        let blocks = bytes
            .windows(BLOB_DATA.len())
            .filter(|w| *w == BLOB_DATA.as_bytes())
            .count();
        assert_eq!(blocks, 3);
        let (_, decoded) = decode(&bytes);
        assert_eq!(decoded, nodes);
    }

    /// Raw sizes of the data blobs, read from their `Blob` messages
    fn raw_block_sizes(mut bytes: &[u8]) -> Vec<usize> {
        let mut sizes = Vec::new();
        while bytes.len() >= 4 {
            let header_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            let header = &bytes[4..4 + header_len];
            let mut blob_type = &[][..];
            let mut blob_len = 0;
            for field in proto::Fields::new(header) {
                match field.unwrap() {
                    (1, value) => blob_type = value.as_bytes().unwrap(),
                    (3, value) => blob_len = value.as_u64().unwrap() as usize,
                    _ => {}
                }
            }
            let blob = &bytes[4 + header_len..4 + header_len + blob_len];
            if blob_type == BLOB_DATA.as_bytes() {
                for field in proto::Fields::new(blob) {
                    if let (2, value) = field.unwrap() {
                        sizes.push(value.as_u64().unwrap() as usize);
                    }
                }
            }
            bytes = &bytes[4 + header_len + blob_len..];
        }
        sizes
    }

    #[test]
    fn blocks_stay_within_the_raw_size_limit() {
        // distinct long values fill the string table long before the object limit
        let ways: Vec<Object> = (0..400)
            .map(|i| {
                let mut way = Object::way(i, (0..200).map(|r| r * 1_000_003).collect());
                way.tags = vec![("note".into(), format!("{i:06}{}", "x".repeat(30_000)))];
                way.author = author(3);
                way
            })
            .collect();
        let bytes = encode(&ways, &StreamHeader::default());
        let sizes = raw_block_sizes(&bytes);
        assert!(sizes.len() >= 3, "{sizes:?}");
        assert!(sizes.iter().all(|&s| s <= BLOCK_SIZE_LIMIT), "{sizes:?}");
        assert!(sizes[0] > BLOCK_SIZE_LIMIT - 64 * 1024, "{sizes:?}");
        let (_, decoded) = decode(&bytes);
        assert_eq!(decoded, ways);
    }

    #[test]
    fn independent_decoder_reads_our_output() {
        use osmpbf::{Element, ElementReader};

        let bytes = encode(&sample(), &StreamHeader::default());
        let reader = ElementReader::new(Cursor::new(bytes));
        let mut nodes = Vec::new();
        let mut ways = Vec::new();
        let mut relations = Vec::new();
        reader
            .for_each(|element| match element {
                Element::DenseNode(node) => nodes.push((node.id(), node.nano_lat())),
                Element::Node(node) => nodes.push((node.id(), node.nano_lat())),
                Element::Way(way) => ways.push((way.id(), way.refs().collect::<Vec<_>>())),
                Element::Relation(relation) => relations.push((
                    relation.id(),
                    relation
                        .members()
                        .map(|m| m.role().unwrap_or("").to_string())
                        .collect::<Vec<_>>(),
                )),
            })
            .unwrap();
        assert_eq!(
            nodes,
            vec![(1, 53_973_411_200), (2, -89_999_999_900), (3, 0)]
        );
        assert_eq!(ways[0], (10, vec![1, 2, 3, 1]));
        assert_eq!(ways[1], (11, vec![3, 2]));
        assert_eq!(relations, vec![(20, vec!["outer".into(), "".into(), "subarea".into()])]);
    }

    #[test]
    fn unknown_required_feature_is_rejected() {
        let mut block = Message::new();
        block.bytes(4, b"OsmSchema-V0.6").bytes(4, b"Sort.Type_then_ID_v2");
        let mut out = Vec::new();
        write_raw_blob(&mut out, BLOB_HEADER, &block.into_bytes());
        let err = PbfReader::new(Cursor::new(out), Limits::default()).err().unwrap();
        assert!(err.to_string().contains("Sort.Type_then_ID_v2"));
    }

    #[test]
    fn header_must_declare_schema_and_dense_nodes() {
        let header_with = |features: &[&str]| {
            let mut block = Message::new();
            for feature in features {
                block.bytes(4, feature.as_bytes());
            }
            let mut out = Vec::new();
            write_raw_blob(&mut out, BLOB_HEADER, &block.into_bytes());
            PbfReader::new(Cursor::new(out), Limits::default())
        };

        let err = header_with(&["OsmSchema-V0.6"]).err().unwrap();
        assert!(matches!(err, butterfly_common::Error::Unsupported(_)));
        assert!(err.to_string().contains("DenseNodes"));
        let err = header_with(&[]).err().unwrap();
        assert!(err.to_string().contains("OsmSchema-V0.6"));
        assert!(header_with(&["DenseNodes", "OsmSchema-V0.6"]).is_ok());
    }

    #[test]
    fn uncompressed_blobs_and_custom_granularity() {
        let mut header = Message::new();
        header.bytes(4, b"OsmSchema-V0.6").bytes(4, b"DenseNodes");

        // one plain node at granularity 1000 with a latitude offset
        let mut table = Message::new();
        table.bytes(1, b"").bytes(1, b"name").bytes(1, b"Kiosk");
        let mut node = Message::new();
        node.sint(1, 77)
            .packed_uints(2, [1])
            .packed_uints(3, [2])
            .sint(8, 5)
            .sint(9, -7);
        let mut group = Message::new();
        group.message(1, &node);
        let mut block = Message::new();
        block
            .message(1, &table)
            .message(2, &group)
            .int(17, 1000)
            .int(19, 500);

        let mut out = Vec::new();
        write_raw_blob(&mut out, BLOB_HEADER, &header.into_bytes());
        write_raw_blob(&mut out, BLOB_DATA, &block.into_bytes());
        let (_, objects) = decode(&out);
        assert_eq!(
            objects,
            vec![Object::node(77, Coord::new(-70, 55)).with_tag("name", "Kiosk")]
        );
    }

    #[test]
    fn invisible_objects_decode_as_deletes() {
        let mut header = Message::new();
        header
            .bytes(4, b"OsmSchema-V0.6")
            .bytes(4, b"DenseNodes")
            .bytes(4, b"HistoricalInformation");
        let mut table = Message::new();
        table.bytes(1, b"");
        let mut info = Message::new();
        info.int(1, 4).int(6, 0);
        let mut way = Message::new();
        way.int(1, 9).message(4, &info).packed_delta_sints(8, [1, 2]);
        let mut group = Message::new();
        group.message(3, &way);
        let mut block = Message::new();
        block.message(1, &table).message(2, &group);

        let mut out = Vec::new();
        write_raw_blob(&mut out, BLOB_HEADER, &header.into_bytes());
        write_raw_blob(&mut out, BLOB_DATA, &block.into_bytes());
        let (_, objects) = decode(&out);
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].action, Action::Delete);
        assert_eq!(objects[0].author.version, 4);
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let mut bytes = encode(&sample(), &StreamHeader::default());
        bytes.truncate(bytes.len() - 10);
        let mut reader = PbfReader::new(Cursor::new(bytes), Limits::default()).unwrap();
        let err = loop {
            match reader.read_next() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("truncation not detected"),
                Err(e) => break e,
            }
        };
        assert!(err.to_string().contains("Malformed pbf input"));
    }

    fn write_raw_blob(out: &mut Vec<u8>, blob_type: &str, raw: &[u8]) {
        let mut blob = Message::new();
        blob.bytes(1, raw);
        let blob = blob.into_bytes();
        let mut header = Message::new();
        header.bytes(1, blob_type.as_bytes()).int(3, blob.len() as i64);
        let header = header.into_bytes();
        out.extend_from_slice(&(header.len() as u32).to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&blob);
    }
}
