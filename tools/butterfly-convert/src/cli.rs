//! Command-line definition and its lowering into an [`ExtractConfig`]

use std::path::PathBuf;

use butterfly_common::{Error, Result};
use butterfly_extract::{
    parse_bbox, Border, DependencyOptions, DiffMode, ExtractConfig, FilterSet, HashMemory,
    KindFilter, MetadataPolicy, Polygon, Source, DEFAULT_ID_OFFSET,
};
use butterfly_io::{Dialect, Format, Kind, Limits, WriterOptions};
use clap::Parser;

/// Command-line interface for butterfly-convert
#[derive(Parser, Debug)]
#[command(name = "butterfly-convert")]
#[command(version)]
#[command(about = "Convert, clip, merge and diff OpenStreetMap files")]
#[command(long_about = "Reads .osm/.osc/.osh XML, .o5m/.o5c and .osm.pbf files and writes any of them:
  butterfly-convert in.pbf -o out.o5m              # convert
  butterfly-convert in.o5m -b=5.9,49.4,6.6,50.2 -o lu.osm.pbf
  butterfly-convert in.o5m -B=area.poly --complete-ways -o area.o5m
  butterfly-convert base.o5m change.osc -o new.o5m  # apply a change file
  butterfly-convert --diff old.o5m new.o5m -o change.o5c
  butterfly-convert in.o5m --keep=\"highway=primary\" --drop-tags=\"created_by=\" -o roads.o5m

Several inputs are merged by (kind, id); on duplicates the later file wins.")]
pub struct Cli {
    /// Input files, "-" for standard input
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<String>,

    /// Output file; format follows its extension unless --out-* is given
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Keep only data inside a box, in degrees
    #[arg(short = 'b', long = "bbox", value_name = "X1,Y1,X2,Y2", allow_hyphen_values = true)]
    pub bbox: Option<String>,

    /// Keep only data inside an Osmosis .poly polygon
    #[arg(short = 'B', long = "polygon", value_name = "FILE", conflicts_with = "bbox")]
    pub polygon: Option<PathBuf>,

    /// Keep all nodes of ways that touch the border
    #[arg(long)]
    pub complete_ways: bool,

    /// Keep all member ways of multipolygons touching the border, with their nodes
    #[arg(long)]
    pub complex_ways: bool,

    /// Remove references to objects that are not in the output
    #[arg(long)]
    pub drop_broken_refs: bool,

    /// Upper bound on passes resolving relations inside relations
    #[arg(long, value_name = "N", default_value_t = 12)]
    pub max_relation_passes: u32,

    #[arg(long, group = "out_format")]
    pub out_o5m: bool,
    #[arg(long, group = "out_format")]
    pub out_o5c: bool,
    #[arg(long, group = "out_format")]
    pub out_osm: bool,
    #[arg(long, group = "out_format")]
    pub out_osc: bool,
    #[arg(long, group = "out_format")]
    pub out_osh: bool,
    #[arg(long, group = "out_format")]
    pub out_pbf: bool,

    /// Write XML the way Osmosis does
    #[arg(long, group = "emulation")]
    pub emulate_osmosis: bool,
    /// Write XML the way pbf2osm does
    #[arg(long, group = "emulation")]
    pub emulate_pbf2osm: bool,
    /// Write XML the way Osmium does
    #[arg(long, group = "emulation")]
    pub emulate_osmium: bool,

    /// Write the changes from the first input to the second
    #[arg(long)]
    pub diff: bool,

    /// Like --diff, but also compare contents of objects with equal versions
    #[arg(long)]
    pub diff_contents: bool,

    /// Directory for temporary files
    #[arg(short = 't', long = "temp-dir", value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Keep only the version of the author metadata
    #[arg(long, group = "metadata")]
    pub drop_author: bool,
    /// Drop all author metadata
    #[arg(long, group = "metadata")]
    pub drop_version: bool,
    /// Replace author metadata with version 1, changeset 1, timestamp 1
    #[arg(long, group = "metadata")]
    pub fake_author: bool,
    /// Replace author metadata with version 1
    #[arg(long, group = "metadata")]
    pub fake_version: bool,

    /// Give deleted XML objects zero coordinates
    #[arg(long)]
    pub fake_lonlat: bool,

    /// Keep objects matching a filter, plus what they depend on
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_nodes: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_nodes_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_nodes_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub keep_ways_relations: Vec<String>,

    /// Drop objects matching a filter, whatever keeps them
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub drop: Vec<String>,
    /// Without a filter: write no nodes at all
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true, help_heading = "Filters")]
    pub drop_nodes: Option<Option<String>>,
    /// Without a filter: write no ways at all
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true, help_heading = "Filters")]
    pub drop_ways: Option<Option<String>>,
    /// Without a filter: write no relations at all
    #[arg(long, value_name = "FILTER", num_args = 0..=1, require_equals = true, help_heading = "Filters")]
    pub drop_relations: Option<Option<String>>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub drop_nodes_ways: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub drop_nodes_relations: Vec<String>,
    #[arg(long, value_name = "FILTER", help_heading = "Filters")]
    pub drop_ways_relations: Vec<String>,

    /// Keep only the listed tags; "all" removes every tag not listed
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_node_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_way_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_relation_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_node_way_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_node_relation_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub keep_way_relation_tags: Vec<String>,

    /// Remove the listed tags
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_node_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_way_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_relation_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_node_way_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_node_relation_tags: Vec<String>,
    #[arg(long, value_name = "TAGS", help_heading = "Filters")]
    pub drop_way_relation_tags: Vec<String>,

    /// Judge every object on its own tags, without pulling in members
    #[arg(long, help_heading = "Filters")]
    pub ignore_dependencies: bool,

    /// Turn tagged ways and relations into nodes at their centre
    #[arg(long)]
    pub all_to_nodes: bool,

    /// Id offset for converted ways; relations use twice this value
    #[arg(long, value_name = "N", default_value_t = DEFAULT_ID_OFFSET)]
    pub object_type_offset: i64,

    /// Presence table size in MB: a total, or NODES-WAYS-RELATIONS
    #[arg(long, value_name = "MB")]
    pub hash_memory: Option<String>,

    /// Maximum node references per way or members per relation
    #[arg(long, value_name = "N", default_value_t = Limits::default().max_refs)]
    pub max_refs: usize,

    /// Maximum tags per object
    #[arg(long, value_name = "N", default_value_t = Limits::default().max_tags)]
    pub max_tags: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    fn format(&self) -> Format {
        let flags = [
            (self.out_o5m, Format::O5m),
            (self.out_o5c, Format::O5c),
            (self.out_osm, Format::Osm),
            (self.out_osc, Format::Osc),
            (self.out_osh, Format::Osh),
            (self.out_pbf, Format::Pbf),
        ];
        flags
            .into_iter()
            .find_map(|(set, format)| set.then_some(format))
            .or_else(|| self.output.as_deref().and_then(Format::from_path))
            .unwrap_or_default()
    }

    fn dialect(&self) -> Dialect {
        if self.emulate_osmosis {
            Dialect::Osmosis
        } else if self.emulate_pbf2osm {
            Dialect::Pbf2osm
        } else if self.emulate_osmium {
            Dialect::Osmium
        } else {
            Dialect::Native
        }
    }

    fn metadata(&self) -> MetadataPolicy {
        if self.drop_author {
            MetadataPolicy::DropAuthor
        } else if self.drop_version {
            MetadataPolicy::DropVersion
        } else if self.fake_author {
            MetadataPolicy::FakeAuthor
        } else if self.fake_version {
            MetadataPolicy::FakeVersion
        } else {
            MetadataPolicy::Keep
        }
    }

    fn filters(&self) -> Result<FilterSet> {
        const ALL: &[Kind] = &Kind::ALL;
        const NODES: &[Kind] = &[Kind::Node];
        const WAYS: &[Kind] = &[Kind::Way];
        const RELATIONS: &[Kind] = &[Kind::Relation];
        const NODES_WAYS: &[Kind] = &[Kind::Node, Kind::Way];
        const NODES_RELATIONS: &[Kind] = &[Kind::Node, Kind::Relation];
        const WAYS_RELATIONS: &[Kind] = &[Kind::Way, Kind::Relation];

        let mut set = FilterSet {
            ignore_dependencies: self.ignore_dependencies,
            ..FilterSet::default()
        };
        let keep: [(&Vec<String>, &[Kind]); 7] = [
            (&self.keep, ALL),
            (&self.keep_nodes, NODES),
            (&self.keep_ways, WAYS),
            (&self.keep_relations, RELATIONS),
            (&self.keep_nodes_ways, NODES_WAYS),
            (&self.keep_nodes_relations, NODES_RELATIONS),
            (&self.keep_ways_relations, WAYS_RELATIONS),
        ];
        for (texts, kinds) in keep {
            for text in texts {
                set.add_keep(kinds, &text.parse()?);
            }
        }
        let single_kind_drops = [
            (&self.drop_nodes, NODES),
            (&self.drop_ways, WAYS),
            (&self.drop_relations, RELATIONS),
        ];
        let single_kind_drops = single_kind_drops
            .into_iter()
            .filter_map(|(flag, kinds)| flag.as_ref()?.as_ref().map(|text| (text, kinds)));
        let drops: [(&Vec<String>, &[Kind]); 4] = [
            (&self.drop, ALL),
            (&self.drop_nodes_ways, NODES_WAYS),
            (&self.drop_nodes_relations, NODES_RELATIONS),
            (&self.drop_ways_relations, WAYS_RELATIONS),
        ];
        let drops = drops
            .into_iter()
            .flat_map(|(texts, kinds)| texts.iter().map(move |text| (text, kinds)));
        for (text, kinds) in drops.chain(single_kind_drops) {
            set.add_drop(kinds, &text.parse()?);
        }

        let keep_tags: [(&Vec<String>, &[Kind]); 7] = [
            (&self.keep_tags, ALL),
            (&self.keep_node_tags, NODES),
            (&self.keep_way_tags, WAYS),
            (&self.keep_relation_tags, RELATIONS),
            (&self.keep_node_way_tags, NODES_WAYS),
            (&self.keep_node_relation_tags, NODES_RELATIONS),
            (&self.keep_way_relation_tags, WAYS_RELATIONS),
        ];
        for (texts, kinds) in keep_tags {
            for text in texts {
                set.add_keep_tags(kinds, &text.parse()?);
            }
        }
        let drop_tags: [(&Vec<String>, &[Kind]); 7] = [
            (&self.drop_tags, ALL),
            (&self.drop_node_tags, NODES),
            (&self.drop_way_tags, WAYS),
            (&self.drop_relation_tags, RELATIONS),
            (&self.drop_node_way_tags, NODES_WAYS),
            (&self.drop_node_relation_tags, NODES_RELATIONS),
            (&self.drop_way_relation_tags, WAYS_RELATIONS),
        ];
        for (texts, kinds) in drop_tags {
            for text in texts {
                set.add_drop_tags(kinds, &text.parse()?);
            }
        }
        Ok(set)
    }

    /// Kinds suppressed by a bare `--drop-<kind>`
    fn kinds(&self) -> KindFilter {
        KindFilter {
            nodes: !matches!(self.drop_nodes, Some(None)),
            ways: !matches!(self.drop_ways, Some(None)),
            relations: !matches!(self.drop_relations, Some(None)),
        }
    }

    fn border(&self) -> Result<Border> {
        if let Some(text) = &self.bbox {
            return Ok(Border::BBox(parse_bbox(text)?));
        }
        if let Some(path) = &self.polygon {
            return Ok(Border::Polygon(Polygon::load(path)?));
        }
        Ok(Border::None)
    }

    /// Lower the parsed command line into a run configuration
    pub fn into_config(self) -> Result<ExtractConfig> {
        if self.max_relation_passes == 0 {
            return Err(Error::InvalidArguments(
                "--max-relation-passes must be at least 1".into(),
            ));
        }
        let hash_memory = match &self.hash_memory {
            Some(text) => text.parse()?,
            None => HashMemory::default(),
        };
        let diff = if self.diff_contents {
            Some(DiffMode::Contents)
        } else if self.diff {
            Some(DiffMode::Version)
        } else {
            None
        };
        let inputs = self
            .inputs
            .iter()
            .map(|i| match i.as_str() {
                "-" => Source::Stdin,
                path => Source::Path(PathBuf::from(path)),
            })
            .collect();
        let config = ExtractConfig {
            inputs,
            format: self.format(),
            writer: WriterOptions {
                dialect: self.dialect(),
                fake_lonlat: self.fake_lonlat,
            },
            border: self.border()?,
            dependencies: DependencyOptions {
                complete_ways: self.complete_ways,
                complex_ways: self.complex_ways,
                drop_broken_refs: self.drop_broken_refs,
                max_relation_passes: self.max_relation_passes,
            },
            diff,
            metadata: self.metadata(),
            filters: self.filters()?,
            kinds: self.kinds(),
            all_to_nodes: self.all_to_nodes.then_some(self.object_type_offset),
            hash_memory,
            limits: Limits {
                max_refs: self.max_refs,
                max_tags: self.max_tags,
            },
            output: self.output,
            temp_dir: self.temp_dir,
            ..ExtractConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}
