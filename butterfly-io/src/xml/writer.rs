//! OSM XML encoder with per-tool output dialects

use std::io::Write;

use butterfly_common::{Error, Result};
use log::debug;

use super::escape::{escape_into, EscapeStyle};
use super::{Dialect, XmlKind, XmlOptions, GENERATOR};
use crate::model::{Action, Author, Coord, Geometry, Object, StreamHeader};
use crate::stream::ObjectWriter;
use crate::text::{format_timestamp, write_fixed7, write_fixed7_padded, write_fixed7_rounded};

impl Dialect {
    fn indent(self) -> &'static str {
        match self {
            Dialect::Native | Dialect::Pbf2osm => "\t",
            Dialect::Osmosis | Dialect::Osmium => "  ",
        }
    }

    fn child_indent(self) -> &'static str {
        match self {
            Dialect::Native | Dialect::Pbf2osm => "\t\t",
            Dialect::Osmosis | Dialect::Osmium => "    ",
        }
    }

    fn escape_style(self) -> EscapeStyle {
        match self {
            Dialect::Native | Dialect::Pbf2osm => EscapeStyle::Numeric,
            Dialect::Osmosis | Dialect::Osmium => EscapeStyle::Mnemonic,
        }
    }

    fn generator(self) -> &'static str {
        match self {
            Dialect::Native => GENERATOR,
            Dialect::Pbf2osm => "pbf2osm",
            Dialect::Osmosis => "Osmosis 0.39",
            Dialect::Osmium => "Osmium (http://wiki.openstreetmap.org/wiki/Osmium)",
        }
    }

    fn is_emulation(self) -> bool {
        self != Dialect::Native
    }
}

fn section_name(action: Action) -> &'static str {
    match action {
        Action::Create => "create",
        Action::Delete => "delete",
        Action::Modify | Action::Plain => "modify",
    }
}

/// Writes objects as `.osm`, `.osc` or `.osh` text
pub struct XmlWriter<W: Write> {
    output: W,
    options: XmlOptions,
    section: Option<Action>,
    line: String,
    dropped_deletes: u64,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(output: W, options: XmlOptions, header: &StreamHeader) -> Result<Self> {
        let mut writer = Self {
            output,
            options,
            section: None,
            line: String::with_capacity(1024),
            dropped_deletes: 0,
        };
        let dialect = options.dialect;
        let line = &mut writer.line;
        if dialect == Dialect::Osmium {
            line.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        } else {
            line.push_str("<?xml version='1.0' encoding='UTF-8'?>\n");
        }
        let root = match options.kind {
            XmlKind::Osc => "osmChange",
            XmlKind::Osm | XmlKind::Osh => "osm",
        };
        line.push_str(&format!("<{root} version=\"0.6\" generator=\"{}\"", dialect.generator()));
        if let (Dialect::Native, Some(ts)) = (dialect, header.timestamp) {
            line.push_str(&format!(" timestamp=\"{}\"", format_timestamp(ts)));
        }
        line.push_str(">\n");

        match (dialect, header.bbox) {
            (Dialect::Pbf2osm, _) | (_, None) => {}
            (Dialect::Osmosis, Some(b)) => {
                line.push_str("  <bound box=\"");
                for (i, v) in [b.min_lat, b.min_lon, b.max_lat, b.max_lon].into_iter().enumerate() {
                    if i > 0 {
                        line.push(',');
                    }
                    write_fixed7(line, v);
                }
                line.push_str("\" origin=\"0.40\"/>\n");
            }
            (_, Some(b)) => {
                line.push_str("\t<bounds");
                for (name, v) in [
                    ("minlat", b.min_lat),
                    ("minlon", b.min_lon),
                    ("maxlat", b.max_lat),
                    ("maxlon", b.max_lon),
                ] {
                    line.push_str(&format!(" {name}=\""));
                    write_fixed7(line, v);
                    line.push('"');
                }
                line.push_str("/>\n");
            }
        }
        writer.flush_line()?;
        Ok(writer)
    }

    fn flush_line(&mut self) -> Result<()> {
        self.output
            .write_all(self.line.as_bytes())
            .map_err(Error::WriteFailed)?;
        self.line.clear();
        Ok(())
    }

    fn enter_section(&mut self, action: Option<Action>) {
        if self.section == action {
            return;
        }
        if let Some(open) = self.section {
            self.line.push_str(&format!("</{}>\n", section_name(open)));
        }
        if let Some(next) = action {
            self.line.push_str(&format!("<{}>\n", section_name(next)));
        }
        self.section = action;
    }

    fn push_author(&mut self, author: &Author) {
        if !author.is_present() {
            return;
        }
        let style = self.options.dialect.escape_style();
        let line = &mut self.line;
        line.push_str(&format!(" version=\"{}\"", author.version));
        if author.timestamp == 0 {
            return;
        }
        let timestamp = format_timestamp(author.timestamp);
        let mut user = String::new();
        escape_into(&mut user, &author.user, style);
        let with_user = author.has_user();
        match self.options.dialect {
            Dialect::Native => {
                line.push_str(&format!(" timestamp=\"{timestamp}\" changeset=\"{}\"", author.changeset));
                if with_user {
                    line.push_str(&format!(" uid=\"{}\" user=\"{user}\"", author.uid));
                }
            }
            Dialect::Pbf2osm => {
                line.push_str(&format!(" changeset=\"{}\"", author.changeset));
                if with_user {
                    line.push_str(&format!(" user=\"{user}\" uid=\"{}\"", author.uid));
                }
                line.push_str(&format!(" timestamp=\"{timestamp}\""));
            }
            Dialect::Osmosis => {
                line.push_str(&format!(" timestamp=\"{timestamp}\""));
                if with_user {
                    line.push_str(&format!(" uid=\"{}\" user=\"{user}\"", author.uid));
                }
                line.push_str(&format!(" changeset=\"{}\"", author.changeset));
            }
            Dialect::Osmium => {
                line.push_str(&format!(" changeset=\"{}\" timestamp=\"{timestamp}\"", author.changeset));
                if with_user {
                    line.push_str(&format!(" uid=\"{}\" user=\"{user}\"", author.uid));
                }
            }
        }
    }

    fn push_coord(&mut self, coord: Coord) {
        let line = &mut self.line;
        match self.options.dialect {
            Dialect::Native | Dialect::Osmosis => {
                line.push_str(" lat=\"");
                write_fixed7(line, coord.lat);
                line.push_str("\" lon=\"");
                write_fixed7(line, coord.lon);
            }
            Dialect::Pbf2osm => {
                line.push_str(" lat=\"");
                write_fixed7_padded(line, coord.lat);
                line.push_str("\" lon=\"");
                write_fixed7_padded(line, coord.lon);
            }
            Dialect::Osmium => {
                line.push_str(" lon=\"");
                write_fixed7_rounded(line, coord.lon, 6);
                line.push_str("\" lat=\"");
                write_fixed7_rounded(line, coord.lat, 6);
            }
        }
        line.push('"');
    }

    fn push_visibility(&mut self, visible: bool) {
        if self.options.kind == XmlKind::Osh {
            self.line.push_str(&format!(" visible=\"{visible}\""));
        }
    }

    fn push_children(&mut self, object: &Object) {
        let dialect = self.options.dialect;
        let style = dialect.escape_style();
        let indent = dialect.child_indent();
        let line = &mut self.line;
        match &object.geometry {
            Geometry::Node(_) => {}
            Geometry::Way(refs) => {
                for r in refs {
                    line.push_str(&format!("{indent}<nd ref=\"{r}\"/>\n"));
                }
            }
            Geometry::Relation(members) => {
                for m in members {
                    line.push_str(&format!("{indent}<member type=\"{}\" ref=\"{}\" role=\"", m.kind, m.id));
                    escape_into(line, &m.role, style);
                    line.push_str("\"/>\n");
                }
            }
        }
        let close = if dialect == Dialect::Pbf2osm { "\" />" } else { "\"/>" };
        for (k, v) in &object.tags {
            line.push_str(&format!("{indent}<tag k=\""));
            escape_into(line, k, style);
            line.push_str("\" v=\"");
            escape_into(line, v, style);
            line.push_str(close);
            line.push('\n');
        }
    }
}

impl<W: Write> ObjectWriter for XmlWriter<W> {
    fn write(&mut self, object: &Object) -> Result<()> {
        let deleted = object.is_deleted();
        if deleted && self.options.kind == XmlKind::Osm {
            self.dropped_deletes += 1;
            return Ok(());
        }
        if self.options.kind == XmlKind::Osc {
            let action = match object.action {
                Action::Plain if object.author.version == 1 => Action::Create,
                Action::Plain => Action::Modify,
                explicit => explicit,
            };
            self.enter_section(Some(action));
        }

        let dialect = self.options.dialect;
        let indent = dialect.indent();
        let name = object.kind().name();
        self.line.push_str(&format!("{indent}<{name} id=\"{}\"", object.id));

        if deleted {
            self.push_author(&object.author);
            self.push_visibility(false);
            if self.options.fake_lonlat {
                self.line.push_str(" lat=\"0\" lon=\"0\"");
            }
            self.line.push_str("/>\n");
            return self.flush_line();
        }

        let coord = object.coord();
        match (dialect, coord) {
            (Dialect::Native | Dialect::Pbf2osm, Some(c)) => {
                self.push_coord(c);
                self.push_author(&object.author);
                self.push_visibility(true);
            }
            (_, Some(c)) => {
                self.push_author(&object.author);
                self.push_visibility(true);
                self.push_coord(c);
            }
            (_, None) => {
                self.push_author(&object.author);
                self.push_visibility(true);
            }
        }

        let has_children = !object.tags.is_empty()
            || match &object.geometry {
                Geometry::Node(_) => false,
                Geometry::Way(refs) => !refs.is_empty(),
                Geometry::Relation(members) => !members.is_empty(),
            };
        if has_children {
            self.line.push_str(">\n");
            self.push_children(object);
            self.line.push_str(&format!("{indent}</{name}>\n"));
        } else {
            self.line.push_str("/>\n");
        }
        self.flush_line()
    }

    fn finish(&mut self) -> Result<()> {
        self.enter_section(None);
        match self.options.kind {
            XmlKind::Osc => self.line.push_str("</osmChange>\n"),
            XmlKind::Osm | XmlKind::Osh => self.line.push_str("</osm>\n"),
        }
        if self.options.dialect.is_emulation() {
            self.line.push_str("<!--End of emulated output.-->\n");
        }
        self.flush_line()?;
        if self.dropped_deletes > 0 {
            debug!("{} delete records have no .osm form, dropped", self.dropped_deletes);
        }
        self.output.flush().map_err(Error::WriteFailed)
    }
}
