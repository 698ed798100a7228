//! Geographic borders: bounding boxes and `.poly` polygons
//!
//! The polygon test is an even-odd ray cast towards north. Edges are kept
//! sorted by their western end; every edge links to the nearest earlier
//! edge that still reaches east of its start, so for a query longitude only
//! the edges on that chain have to be looked at.

use std::fs;
use std::path::Path;

use butterfly_common::{Error, Result};
use butterfly_io::text::parse_fixed7;
use butterfly_io::{BBox, Coord};

/// Parse `x1,y1,x2,y2` in decimal degrees
pub fn parse_bbox(text: &str) -> Result<BBox> {
    let values: Option<Vec<i32>> = text.split(',').map(parse_fixed7).collect();
    match values.as_deref() {
        Some(&[x1, y1, x2, y2]) => Ok(BBox::new(x1, y1, x2, y2)),
        _ => Err(Error::InvalidArguments(format!(
            "bounding box must be x1,y1,x2,y2 in degrees, got {text:?}"
        ))),
    }
}

/// Polygon edge, oriented so that `x1 <= x2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

impl Edge {
    fn new(a: Coord, b: Coord) -> Self {
        if a.lon <= b.lon {
            Self {
                x1: a.lon,
                y1: a.lat,
                x2: b.lon,
                y2: b.lat,
            }
        } else {
            Self {
                x1: b.lon,
                y1: b.lat,
                x2: a.lon,
                y2: a.lat,
            }
        }
    }

    /// Whether the edge spans `x` under the half-open rule `x1 <= x < x2`
    fn spans(&self, x: i32) -> bool {
        self.x1 <= x && x < self.x2
    }

    /// Whether the edge passes strictly north of `p`; requires `spans(p.lon)`
    fn is_north_of(&self, p: Coord) -> bool {
        let dx = i128::from(self.x2) - i128::from(self.x1);
        let dy = i128::from(self.y2) - i128::from(self.y1);
        let along = i128::from(p.lon) - i128::from(self.x1);
        let above = i128::from(self.y1) - i128::from(p.lat);
        above * dx + dy * along > 0
    }
}

/// Closed polygon with optional holes, tested with the even-odd rule
#[derive(Debug, Clone)]
pub struct Polygon {
    edges: Vec<Edge>,
    /// `chain[i]`: largest `j < i` with `edges[j].x2 > edges[i].x1`
    chain: Vec<Option<usize>>,
    bbox: BBox,
}

impl Polygon {
    /// Build from rings; each ring is closed implicitly. Holes are simply
    /// further rings.
    pub fn from_rings(rings: &[Vec<Coord>]) -> Result<Self> {
        let mut edges = Vec::new();
        for ring in rings {
            if ring.len() < 3 {
                continue;
            }
            let closing = ring.first().zip(ring.last());
            for pair in ring.windows(2) {
                edges.push(Edge::new(pair[0], pair[1]));
            }
            if let Some((&first, &last)) = closing {
                if first != last {
                    edges.push(Edge::new(last, first));
                }
            }
        }
        let bbox = BBox::enclosing(rings.iter().flatten().copied())
            .filter(|_| !edges.is_empty())
            .ok_or_else(|| Error::InvalidArguments("polygon has no usable ring".into()))?;

        edges.sort_by_key(|e| (e.x1, e.x2));
        let mut chain: Vec<Option<usize>> = Vec::with_capacity(edges.len());
        for (i, edge) in edges.iter().enumerate() {
            let mut candidate = i.checked_sub(1);
            while let Some(c) = candidate {
                if edges[c].x2 > edge.x1 {
                    break;
                }
                candidate = chain[c];
            }
            chain.push(candidate);
        }
        Ok(Self { edges, chain, bbox })
    }

    /// Parse the Osmosis polygon filter format:
    ///
    /// ```text
    /// name
    /// 1
    ///    10.5  53.8
    ///    ...
    /// END
    /// !2
    ///    ...
    /// END
    /// END
    /// ```
    pub fn parse_poly(text: &str) -> Result<Self> {
        let bad = |line: usize, what: &str| {
            Error::InvalidArguments(format!("polygon file line {line}: {what}"))
        };
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());
        let (mut last, _) = lines.next().ok_or_else(|| bad(1, "empty file"))?;

        let mut rings = Vec::new();
        loop {
            let (number, header) = lines
                .next()
                .ok_or_else(|| bad(last, "missing final END"))?;
            last = number;
            if header.eq_ignore_ascii_case("END") {
                break;
            }
            let mut ring = Vec::new();
            loop {
                let (number, line) = lines
                    .next()
                    .ok_or_else(|| bad(last, "section without END"))?;
                last = number;
                if line.eq_ignore_ascii_case("END") {
                    break;
                }
                let mut fields = line.split_whitespace().map(parse_fixed7);
                match (fields.next().flatten(), fields.next().flatten()) {
                    (Some(lon), Some(lat)) => ring.push(Coord::new(lon, lat)),
                    _ => return Err(bad(number, "expected longitude and latitude")),
                }
            }
            rings.push(ring);
        }
        Self::from_rings(&rings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::unreadable(path, e))?;
        Self::parse_poly(&text)
    }

    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn contains(&self, p: Coord) -> bool {
        if !self.bbox.contains(p) {
            return false;
        }
        let started = self.edges.partition_point(|e| e.x1 <= p.lon);
        let mut next = started.checked_sub(1);
        let mut crossings = 0u32;
        while let Some(i) = next {
            let edge = &self.edges[i];
            if edge.spans(p.lon) && edge.is_north_of(p) {
                crossings += 1;
            }
            next = self.chain[i];
        }
        crossings % 2 == 1
    }
}

/// Area an extract is clipped to
#[derive(Debug, Clone, Default)]
pub enum Border {
    /// Everything is inside
    #[default]
    None,
    BBox(BBox),
    Polygon(Polygon),
}

impl Border {
    pub fn is_active(&self) -> bool {
        !matches!(self, Border::None)
    }

    pub fn contains(&self, p: Coord) -> bool {
        match self {
            Border::None => true,
            Border::BBox(b) => b.contains(p),
            Border::Polygon(poly) => poly.contains(p),
        }
    }

    /// Enclosing box written to output headers
    pub fn bbox(&self) -> Option<BBox> {
        match self {
            Border::None => None,
            Border::BBox(b) => Some(*b),
            Border::Polygon(poly) => Some(poly.bbox()),
        }
    }
}
