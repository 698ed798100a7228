//! Output shaping: author metadata rewriting and per-kind suppression

use butterfly_io::{Author, Kind, Object};

/// Rewrites author metadata on the way out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataPolicy {
    #[default]
    Keep,
    /// Keep the version, drop everything else
    DropAuthor,
    /// Drop all author information including the version
    DropVersion,
    /// Version 1, changeset 1, timestamp 1, no user
    FakeAuthor,
    /// Version 1 and nothing else
    FakeVersion,
}

impl MetadataPolicy {
    pub fn apply(self, object: &mut Object) {
        let author = &mut object.author;
        match self {
            MetadataPolicy::Keep => {}
            MetadataPolicy::DropAuthor => {
                *author = Author {
                    version: author.version,
                    ..Author::default()
                }
            }
            MetadataPolicy::DropVersion => *author = Author::default(),
            MetadataPolicy::FakeAuthor => {
                *author = Author {
                    version: 1,
                    timestamp: 1,
                    changeset: 1,
                    ..Author::default()
                }
            }
            MetadataPolicy::FakeVersion => {
                *author = Author {
                    version: 1,
                    ..Author::default()
                }
            }
        }
    }
}

/// Which kinds reach the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindFilter {
    pub nodes: bool,
    pub ways: bool,
    pub relations: bool,
}

impl Default for KindFilter {
    fn default() -> Self {
        Self {
            nodes: true,
            ways: true,
            relations: true,
        }
    }
}

impl KindFilter {
    pub fn allows(&self, kind: Kind) -> bool {
        match kind {
            Kind::Node => self.nodes,
            Kind::Way => self.ways,
            Kind::Relation => self.relations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use butterfly_io::Coord;

    fn sample() -> Object {
        Object::node(1, Coord::new(1, 1)).with_author(Author {
            version: 7,
            timestamp: 1_285_874_610,
            changeset: 42,
            uid: 9,
            user: "someone".into(),
        })
    }

    #[test]
    fn rewrites_author_fields() {
        let cases = [
            (MetadataPolicy::Keep, sample().author),
            (
                MetadataPolicy::DropAuthor,
                Author {
                    version: 7,
                    ..Author::default()
                },
            ),
            (MetadataPolicy::DropVersion, Author::default()),
            (
                MetadataPolicy::FakeAuthor,
                Author {
                    version: 1,
                    timestamp: 1,
                    changeset: 1,
                    ..Author::default()
                },
            ),
            (
                MetadataPolicy::FakeVersion,
                Author {
                    version: 1,
                    ..Author::default()
                },
            ),
        ];
        for (policy, expected) in cases {
            let mut object = sample();
            policy.apply(&mut object);
            assert_eq!(object.author, expected, "{policy:?}");
        }
    }

    #[test]
    fn kind_filter_defaults_to_everything() {
        let mut filter = KindFilter::default();
        assert!(Kind::ALL.iter().all(|&k| filter.allows(k)));
        filter.ways = false;
        assert!(!filter.allows(Kind::Way));
        assert!(filter.allows(Kind::Relation));
    }
}
