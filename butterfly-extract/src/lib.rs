//! # butterfly-extract
//!
//! Everything between reading and writing OSM streams: clipping to a
//! bounding box or polygon, selecting objects and tags by filter
//! expressions, keeping the output referentially consistent, merging
//! several sorted inputs, computing change files and reshaping metadata.
//!
//! [`run`] executes a whole conversion from an [`ExtractConfig`].

pub mod border;
pub mod config;
pub mod context;
pub mod diff;
pub mod filter;
pub mod merge;
pub mod pipeline;
pub mod policy;
pub mod presence;
pub mod resolver;
pub mod selector;
pub mod tonodes;

pub use border::{parse_bbox, Border, Polygon};
pub use config::{ExtractConfig, Source};
pub use context::Context;
pub use diff::{DiffEngine, DiffMode};
pub use filter::{ObjectFilter, TagFilter};
pub use merge::{MergePolicy, Sequencer};
pub use pipeline::{run, Summary};
pub use policy::{KindFilter, MetadataPolicy};
pub use presence::{HashMemory, PresenceTable};
pub use resolver::{DependencyOptions, Resolution, Resolver};
pub use selector::{FilterSet, Selector};
pub use tonodes::{ToNodes, DEFAULT_ID_OFFSET};
