//! OSM XML: `.osm` data, `.osc` change and `.osh` history documents

mod escape;
mod reader;
mod tokenizer;
mod writer;

pub use escape::{escape_into, unescape, EscapeStyle};
pub use reader::XmlReader;
pub use writer::XmlWriter;

pub(crate) const GENERATOR: &str = concat!("butterfly-osm ", env!("CARGO_PKG_VERSION"));

/// Layout conventions of the tools whose output can be reproduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Native,
    Pbf2osm,
    Osmosis,
    Osmium,
}

/// Document type written by [`XmlWriter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XmlKind {
    /// `<osm>`; delete records are dropped
    #[default]
    Osm,
    /// `<osmChange>` with create/modify/delete sections
    Osc,
    /// `<osm>` with a `visible` attribute on every object
    Osh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XmlOptions {
    pub dialect: Dialect,
    pub kind: XmlKind,
    /// Give delete records `lat="0" lon="0"`
    pub fake_lonlat: bool,
}

/// Whether the bytes look like the start of an XML document
pub fn sniff(prefix: &[u8]) -> bool {
    let text = prefix.strip_prefix(b"\xef\xbb\xbf").unwrap_or(prefix);
    text.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'<')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Author, BBox, Coord, Geometry, Kind, Member, Object, StreamHeader};
    use crate::stream::{Limits, ObjectReader, ObjectWriter};

    fn render(objects: &[Object], options: XmlOptions, header: &StreamHeader) -> String {
        let mut out = Vec::new();
        {
            let mut writer = XmlWriter::new(&mut out, options, header).unwrap();
            for object in objects {
                writer.write(object).unwrap();
            }
            writer.finish().unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    fn parse(text: &str) -> (StreamHeader, Vec<Object>) {
        let mut reader = XmlReader::new(text.as_bytes(), Limits::default()).unwrap();
        let mut objects = Vec::new();
        while let Some(object) = reader.read_next().unwrap() {
            objects.push(object);
        }
        (*reader.header(), objects)
    }

    fn author() -> Author {
        Author {
            version: 2,
            timestamp: 1_285_874_610,
            changeset: 5_922_698,
            uid: 45_445,
            user: "UScha".into(),
        }
    }

    fn sample() -> Vec<Object> {
        vec![
            Object::node(1, Coord::new(105_000_000, 538_000_000))
                .with_author(author())
                .with_tag("name", "Tom & Jerry's"),
            Object::node(2, Coord::new(-1, 0)),
            Object::way(10, vec![1, 2]).with_tag("highway", "track"),
            Object::relation(
                20,
                vec![
                    Member::new(Kind::Way, 10, "outer"),
                    Member::new(Kind::Node, 1, "<label>"),
                ],
            )
            .with_author(Author {
                version: 1,
                ..Author::default()
            }),
        ]
    }

    #[test]
    fn native_output_layout() {
        let header = StreamHeader {
            bbox: Some(BBox::new(105_000_000, 538_000_000, 106_000_000, 540_000_000)),
            timestamp: None,
        };
        let text = render(&sample(), XmlOptions::default(), &header);
        let expected = format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <osm version=\"0.6\" generator=\"{GENERATOR}\">\n\
             \t<bounds minlat=\"53.8\" minlon=\"10.5\" maxlat=\"54.0\" maxlon=\"10.6\"/>\n\
             \t<node id=\"1\" lat=\"53.8\" lon=\"10.5\" version=\"2\" timestamp=\"2010-09-30T19:23:30Z\" changeset=\"5922698\" uid=\"45445\" user=\"UScha\">\n\
             \t\t<tag k=\"name\" v=\"Tom &#38; Jerry&#39;s\"/>\n\
             \t</node>\n\
             \t<node id=\"2\" lat=\"0.0\" lon=\"-0.0000001\"/>\n\
             \t<way id=\"10\">\n\
             \t\t<nd ref=\"1\"/>\n\
             \t\t<nd ref=\"2\"/>\n\
             \t\t<tag k=\"highway\" v=\"track\"/>\n\
             \t</way>\n\
             \t<relation id=\"20\" version=\"1\">\n\
             \t\t<member type=\"way\" ref=\"10\" role=\"outer\"/>\n\
             \t\t<member type=\"node\" ref=\"1\" role=\"&#60;label&#62;\"/>\n\
             \t</relation>\n\
             </osm>\n"
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn osmosis_output_layout() {
        let header = StreamHeader {
            bbox: Some(BBox::new(105_000_000, 538_000_000, 106_000_000, 540_000_000)),
            timestamp: None,
        };
        let options = XmlOptions {
            dialect: Dialect::Osmosis,
            ..XmlOptions::default()
        };
        let text = render(&sample()[..1], options, &header);
        let expected = "<?xml version='1.0' encoding='UTF-8'?>\n\
             <osm version=\"0.6\" generator=\"Osmosis 0.39\">\n  \
             <bound box=\"53.8,10.5,54.0,10.6\" origin=\"0.40\"/>\n  \
             <node id=\"1\" version=\"2\" timestamp=\"2010-09-30T19:23:30Z\" uid=\"45445\" user=\"UScha\" changeset=\"5922698\" lat=\"53.8\" lon=\"10.5\">\n    \
             <tag k=\"name\" v=\"Tom &amp; Jerry&apos;s\"/>\n  \
             </node>\n\
             </osm>\n\
             <!--End of emulated output.-->\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn pbf2osm_and_osmium_coordinates() {
        let node = [Object::node(3, Coord::new(123_456_789, -5)).with_tag("a", "b")];
        let pbf2osm = render(
            &node,
            XmlOptions {
                dialect: Dialect::Pbf2osm,
                ..XmlOptions::default()
            },
            &StreamHeader::default(),
        );
        assert!(pbf2osm.contains("\t<node id=\"3\" lat=\"-0.0000005\" lon=\"12.3456789\">\n"));
        assert!(pbf2osm.contains("\t\t<tag k=\"a\" v=\"b\" />\n"));

        let osmium = render(
            &node,
            XmlOptions {
                dialect: Dialect::Osmium,
                ..XmlOptions::default()
            },
            &StreamHeader::default(),
        );
        assert!(osmium.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(osmium.contains("  <node id=\"3\" lon=\"12.345679\" lat=\"-0.000001\">\n"));
    }

    #[test]
    fn change_output_groups_actions() {
        let objects = [
            Object::node(1, Coord::new(105_000_000, 538_000_000)).with_author(Author {
                version: 1,
                ..Author::default()
            }),
            Object::node(2, Coord::new(0, -1))
                .with_author(Author {
                    version: 3,
                    ..Author::default()
                })
                .with_tag("a&b", "c"),
            Object::deleted(Kind::Way, 5),
        ];
        let options = XmlOptions {
            kind: XmlKind::Osc,
            ..XmlOptions::default()
        };
        let text = render(&objects, options, &StreamHeader::default());
        let expected = format!(
            "<?xml version='1.0' encoding='UTF-8'?>\n\
             <osmChange version=\"0.6\" generator=\"{GENERATOR}\">\n\
             <create>\n\
             \t<node id=\"1\" lat=\"53.8\" lon=\"10.5\" version=\"1\"/>\n\
             </create>\n\
             <modify>\n\
             \t<node id=\"2\" lat=\"-0.0000001\" lon=\"0.0\" version=\"3\">\n\
             \t\t<tag k=\"a&#38;b\" v=\"c\"/>\n\
             \t</node>\n\
             </modify>\n\
             <delete>\n\
             \t<way id=\"5\"/>\n\
             </delete>\n\
             </osmChange>\n"
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn deletes_are_dropped_from_plain_output_and_marked_in_history() {
        let objects = [Object::deleted(Kind::Node, 9)];
        let plain = render(&objects, XmlOptions::default(), &StreamHeader::default());
        assert!(!plain.contains("id=\"9\""));

        let history = render(
            &objects,
            XmlOptions {
                kind: XmlKind::Osh,
                fake_lonlat: true,
                ..XmlOptions::default()
            },
            &StreamHeader::default(),
        );
        assert!(history.contains("\t<node id=\"9\" visible=\"false\" lat=\"0\" lon=\"0\"/>\n"));
    }

    #[test]
    fn written_documents_read_back() {
        let header = StreamHeader {
            bbox: Some(BBox::new(-10, -20, 30, 40)),
            timestamp: Some(1_700_000_000),
        };
        let text = render(&sample(), XmlOptions::default(), &header);
        let (read_header, objects) = parse(&text);
        assert_eq!(read_header, header);
        assert_eq!(objects, sample());
    }

    #[test]
    fn reads_change_sections_and_visibility() {
        let text = r#"<?xml version="1.0"?>
<osmChange version="0.6">
  <create>
    <node id="1" version="1" lat="1.5" lon="2.5"/>
  </create>
  <delete>
    <way id="7" version="4"/>
  </delete>
  <node id="2" lat="0" lon="0" visible="false"/>
  <relation id="3" action="delete"/>
  <node id="4" lat="0" lon="0"/>
</osmChange>"#;
        let (_, objects) = parse(text);
        let actions: Vec<(Kind, i64, Action)> =
            objects.iter().map(|o| (o.kind(), o.id, o.action)).collect();
        assert_eq!(
            actions,
            vec![
                (Kind::Node, 1, Action::Create),
                (Kind::Way, 7, Action::Delete),
                (Kind::Node, 2, Action::Delete),
                (Kind::Relation, 3, Action::Delete),
                (Kind::Node, 4, Action::Plain),
            ]
        );
        assert_eq!(objects[0].coord(), Some(Coord::new(25_000_000, 15_000_000)));
        assert_eq!(objects[1].author.version, 4);
    }

    #[test]
    fn reads_osmosis_bound_box() {
        let text = "<osm><bound box=\"53.8,10.5,54,10.6\" origin=\"x\"/></osm>";
        let (header, objects) = parse(text);
        assert!(objects.is_empty());
        assert_eq!(
            header.bbox,
            Some(BBox::new(105_000_000, 538_000_000, 106_000_000, 540_000_000))
        );
    }

    #[test]
    fn unknown_member_types_are_skipped() {
        let text = r#"<osm><relation id="1">
            <member type="area" ref="5" role=""/>
            <member type="node" ref="6"/>
        </relation></osm>"#;
        let (_, objects) = parse(text);
        assert_eq!(
            objects[0].geometry,
            Geometry::Relation(vec![Member::new(Kind::Node, 6, "")])
        );
    }

    #[test]
    fn bad_numbers_are_malformed() {
        let text = "<osm>\n<node id=\"x1\" lat=\"0\" lon=\"0\"/></osm>";
        let mut reader = XmlReader::new(text.as_bytes(), Limits::default()).unwrap();
        let err = reader.read_next().unwrap_err();
        assert!(err.to_string().contains("byte 6"));
    }

    #[test]
    fn sniffs_documents() {
        assert!(sniff(b"\xef\xbb\xbf  <?xml"));
        assert!(sniff(b"<osm>"));
        assert!(!sniff(b"\xff\xe0\x04o5m2"));
    }
}
