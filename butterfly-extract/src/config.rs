//! Run configuration
//!
//! The command line is lowered into an [`ExtractConfig`]; [`crate::run`]
//! consumes nothing else.

use std::fmt;
use std::path::PathBuf;

use butterfly_common::{Error, Result};
use butterfly_io::{Format, Limits, WriterOptions};

use crate::border::Border;
use crate::diff::DiffMode;
use crate::merge::MergePolicy;
use crate::policy::{KindFilter, MetadataPolicy};
use crate::presence::HashMemory;
use crate::resolver::DependencyOptions;
use crate::selector::FilterSet;

/// Where an input comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Path(PathBuf),
    Stdin,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(path) => write!(f, "{}", path.display()),
            Source::Stdin => f.write_str("<stdin>"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractConfig {
    pub inputs: Vec<Source>,
    /// `None` writes to stdout
    pub output: Option<PathBuf>,
    pub format: Format,
    pub writer: WriterOptions,
    pub border: Border,
    pub dependencies: DependencyOptions,
    /// Compare the two inputs instead of merging them
    pub diff: Option<DiffMode>,
    pub merge: MergePolicy,
    pub metadata: MetadataPolicy,
    pub filters: FilterSet,
    pub kinds: KindFilter,
    /// Id offset for turning ways and relations into nodes
    pub all_to_nodes: Option<i64>,
    pub hash_memory: HashMemory,
    pub limits: Limits,
    pub temp_dir: Option<PathBuf>,
}

impl ExtractConfig {
    /// Reject contradictory settings
    pub fn validate(&self) -> Result<()> {
        let bad = |message: &str| Err(Error::InvalidArguments(message.to_string()));
        if self.inputs.is_empty() {
            return bad("no input file given");
        }
        if self.inputs.iter().filter(|s| **s == Source::Stdin).count() > 1 {
            return bad("standard input can only be read once");
        }
        if self.diff.is_some() {
            if self.inputs.len() != 2 {
                return bad("--diff needs exactly two input files");
            }
            if self.format.change_variant().is_none() {
                return bad("--diff cannot write PBF, choose an o5c or osc output");
            }
            if self.border.is_active() {
                return bad("--diff cannot be combined with a border");
            }
            if self.filters.is_active() {
                return bad("--diff cannot be combined with object or tag filters");
            }
        }
        if self.all_to_nodes.is_some_and(|offset| offset <= 0) {
            return bad("--object-type-offset must be positive");
        }
        Ok(())
    }

    /// Format actually written: diffs always produce a change format
    pub fn output_format(&self) -> Format {
        match self.diff {
            Some(_) => self.format.change_variant().unwrap_or(self.format),
            None => self.format,
        }
    }

    /// History output keeps every version of an object
    pub fn merge_policy(&self) -> MergePolicy {
        if self.output_format() == Format::Osh {
            MergePolicy::KeepAll
        } else {
            self.merge
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::BBox;

    fn two_files() -> ExtractConfig {
        ExtractConfig {
            inputs: vec![Source::Path("a.osm".into()), Source::Path("b.osm".into())],
            ..ExtractConfig::default()
        }
    }

    #[test]
    fn diff_switches_to_change_formats() {
        let mut config = two_files();
        config.diff = Some(DiffMode::Version);
        assert!(config.validate().is_ok());
        assert_eq!(config.output_format(), Format::Osc);
        config.format = Format::O5m;
        assert_eq!(config.output_format(), Format::O5c);
        config.format = Format::Pbf;
        assert!(matches!(config.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn diff_needs_two_inputs_and_no_border() {
        let mut config = two_files();
        config.diff = Some(DiffMode::Contents);
        config.inputs.pop();
        assert!(config.validate().is_err());
        let mut config = two_files();
        config.diff = Some(DiffMode::Contents);
        config.border = Border::BBox(BBox::new(0, 0, 1, 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn diff_takes_no_filters() {
        let mut config = two_files();
        config.diff = Some(DiffMode::Version);
        config
            .filters
            .add_keep(&[butterfly_io::Kind::Node], &"amenity=pub".parse().unwrap());
        assert!(matches!(config.validate(), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn rejects_missing_or_repeated_stdin() {
        assert!(ExtractConfig::default().validate().is_err());
        let config = ExtractConfig {
            inputs: vec![Source::Stdin, Source::Stdin],
            ..ExtractConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn history_output_keeps_duplicates() {
        let mut config = two_files();
        assert_eq!(config.merge_policy(), MergePolicy::LastWins);
        config.format = Format::Osh;
        assert_eq!(config.merge_policy(), MergePolicy::KeepAll);
    }
}
