//! Cross-crate properties over seeded synthetic datasets

use butterfly_extract::{
    run, Border, DependencyOptions, DiffMode, ExtractConfig, HashMemory, Polygon, PresenceTable,
    Resolver, Source,
};
use butterfly_io::{BBox, Coord, Format, Kind, MemoryReader, Member, Object, ObjectReader};
use butterfly_test::{dataset, evolve, read_objects, star_ring, to_geo, DatasetShape, Scratch};
use geo::{Contains, Intersects, Point};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

fn config(inputs: &[PathBuf], output: PathBuf, format: Format) -> ExtractConfig {
    ExtractConfig {
        inputs: inputs.iter().cloned().map(Source::Path).collect(),
        output: Some(output),
        format,
        hash_memory: HashMemory::new(1, 1, 1),
        ..ExtractConfig::default()
    }
}

fn same_objects(got: &[Object], want: &[Object]) {
    assert_eq!(got.len(), want.len());
    for (g, w) in got.iter().zip(want) {
        assert!(g.same_content(w), "\n got {g:?}\nwant {w:?}");
    }
}

#[test]
fn every_format_round_trips() {
    let scratch = Scratch::new().unwrap();
    for seed in 1..4 {
        let data = dataset(&DatasetShape {
            seed,
            ..DatasetShape::default()
        });
        for format in [Format::O5m, Format::Pbf, Format::Osm] {
            let path = scratch.write(&format!("{seed}.{format}"), format, &data).unwrap();
            same_objects(&read_objects(&path).unwrap(), &data);
        }
    }
}

#[test]
fn conversion_chain_preserves_data() {
    let scratch = Scratch::new().unwrap();
    let data = dataset(&DatasetShape::default());
    let mut current = scratch.write("start.osm", Format::Osm, &data).unwrap();
    for (i, format) in [Format::Pbf, Format::O5m, Format::Osm, Format::O5m].into_iter().enumerate() {
        let next = scratch.path(&format!("step{i}.{format}"));
        run(&config(&[current], next.clone(), format)).unwrap();
        current = next;
    }
    same_objects(&read_objects(&current).unwrap(), &data);
}

#[test]
fn border_extracts_are_idempotent() {
    let scratch = Scratch::new().unwrap();
    let data = dataset(&DatasetShape {
        seed: 11,
        ..DatasetShape::default()
    });
    let input = scratch.write("in.o5m", Format::O5m, &data).unwrap();
    let border = Border::BBox(BBox::new(2_000_000, 2_000_000, 6_000_000, 7_000_000));

    for (name, complete_ways) in [("plain", false), ("complete", true)] {
        let once = scratch.path(&format!("{name}-1.o5m"));
        let twice = scratch.path(&format!("{name}-2.o5m"));
        let mut cfg = config(&[input.clone()], once.clone(), Format::O5m);
        cfg.border = border.clone();
        cfg.dependencies.complete_ways = complete_ways;
        run(&cfg).unwrap();

        cfg.inputs = vec![Source::Path(once.clone())];
        cfg.output = Some(twice.clone());
        run(&cfg).unwrap();

        let first = read_objects(&once).unwrap();
        assert!(!first.is_empty() && first.len() < data.len(), "{name}");
        same_objects(&read_objects(&twice).unwrap(), &first);
    }
}

#[test]
fn diff_of_a_file_with_itself_is_empty() {
    let scratch = Scratch::new().unwrap();
    let data = dataset(&DatasetShape::default());
    let a = scratch.write("a.o5m", Format::O5m, &data).unwrap();
    for mode in [DiffMode::Version, DiffMode::Contents] {
        let change = scratch.path("self.osc");
        let mut cfg = config(&[a.clone(), a.clone()], change.clone(), Format::Osc);
        cfg.diff = Some(mode);
        assert_eq!(run(&cfg).unwrap().written, 0);
        assert!(read_objects(&change).unwrap().is_empty());
    }
}

#[test]
fn applying_a_diff_reproduces_the_new_file() {
    let scratch = Scratch::new().unwrap();
    for seed in [3, 4] {
        let old = dataset(&DatasetShape {
            seed,
            ..DatasetShape::default()
        });
        let new = evolve(&old, seed * 100);
        let a = scratch.write("old.o5m", Format::O5m, &old).unwrap();
        // field-by-field comparison needs o5m on both sides, versions work on any input
        let cases = [
            (scratch.write("new.o5m", Format::O5m, &new).unwrap(), DiffMode::Contents),
            (scratch.write("new.pbf", Format::Pbf, &new).unwrap(), DiffMode::Version),
        ];

        for ((b, mode), change_format) in cases
            .iter()
            .flat_map(|case| [Format::Osc, Format::O5c].map(|f| (case, f)))
        {
            let change = scratch.path(&format!("change.{change_format}"));
            let mut cfg = config(&[a.clone(), b.clone()], change.clone(), change_format);
            cfg.diff = Some(*mode);
            run(&cfg).unwrap();

            let applied = scratch.path("applied.o5m");
            run(&config(&[a.clone(), change], applied.clone(), Format::O5m)).unwrap();
            same_objects(&read_objects(&applied).unwrap(), &new);
        }
    }
}

/// Relation `i` contains relation `i + 1`, the last one holds an inside node
fn nested_relations(depth: i64) -> Vec<Object> {
    let mut data = vec![Object::node(1, Coord::new(5, 5))];
    for id in 1..depth {
        data.push(Object::relation(id, vec![Member::new(Kind::Relation, id + 1, "")]));
    }
    data.push(Object::relation(depth, vec![Member::new(Kind::Node, 1, "")]));
    data
}

fn retained_relations(depth: i64, max_passes: u32) -> (bool, usize) {
    let data = nested_relations(depth);
    let options = DependencyOptions {
        max_relation_passes: max_passes,
        ..DependencyOptions::default()
    };
    let table = PresenceTable::with_bytes([1024, 1024, 1024]).unwrap();
    let border = Border::BBox(BBox::new(0, 0, 10, 10));
    let mut resolver = Resolver::with_table(border, options, table, None);
    let resolution = resolver
        .resolve(|| Ok(Box::new(MemoryReader::new(data.clone())) as Box<dyn ObjectReader>))
        .unwrap();
    let kept = data
        .iter()
        .filter(|o| o.kind() == Kind::Relation && resolver.retains(o))
        .count();
    (resolution.converged, kept)
}

#[test]
fn relation_closure_is_complete_within_the_bound() {
    for depth in [1, 2, 6, 11] {
        assert_eq!(retained_relations(depth, 12), (true, depth as usize), "depth {depth}");
    }
}

#[test]
fn relation_closure_degrades_beyond_the_bound() {
    // one level per pass on top of the relation holding the node
    assert_eq!(retained_relations(30, 12), (false, 13));
    assert_eq!(retained_relations(30, 40), (true, 30));
}

#[test]
fn polygon_agrees_with_geo() {
    let mut rng = StdRng::seed_from_u64(99);
    let center = Coord::new(50_000_000, 30_000_000);
    for seed in 0..20 {
        let outer = star_ring(seed, center, 1_000_000, 5 + seed as usize * 3);
        let hole = star_ring(seed + 1_000, center, 200_000, 7);
        let rings = vec![outer, hole];
        let ours = Polygon::from_rings(&rings).unwrap();
        let theirs = to_geo(&rings);

        for _ in 0..500 {
            let p = Coord::new(
                center.lon + rng.gen_range(-1_100_000..1_100_000),
                center.lat + rng.gen_range(-1_100_000..1_100_000),
            );
            let point = Point::new(f64::from(p.lon), f64::from(p.lat));
            let on_edge = theirs.exterior().intersects(&point)
                || theirs.interiors().iter().any(|ring| ring.intersects(&point));
            if on_edge {
                continue;
            }
            assert_eq!(ours.contains(p), theirs.contains(&point), "seed {seed} point {p:?}");
        }
    }
}
