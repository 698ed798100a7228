//! The run driver: resolve, stream, shape and write

use std::fs::File;
use std::io::{self, Write};

use butterfly_common::{Error, Result};
use butterfly_io::{open_writer, Format, InputFormat, ObjectReader};
use log::{debug, info};

use crate::config::{ExtractConfig, Source};
use crate::context::Context;
use crate::diff::{DiffEngine, DiffMode};
use crate::merge::Sequencer;
use crate::resolver::{Resolution, Resolver};
use crate::selector::Selector;
use crate::tonodes::ToNodes;

/// What a run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub format: Format,
    pub written: u64,
    /// Objects read in the emit pass that did not reach the output
    pub skipped: u64,
    /// Keys in the emit pass that were lower than their predecessor
    pub unsorted: u64,
    /// Present when a border was applied
    pub resolution: Option<Resolution>,
    /// Present when object or tag filters were applied
    pub selection: Option<Resolution>,
}

/// The stream the emit pass reads
enum Input {
    Merged(Sequencer),
    Diff(DiffEngine<Sequencer, Sequencer>),
}

impl Input {
    fn reader(&mut self) -> &mut dyn ObjectReader {
        match self {
            Input::Merged(seq) => seq,
            Input::Diff(engine) => engine,
        }
    }

    fn out_of_order(&self) -> u64 {
        match self {
            Input::Merged(seq) => seq.out_of_order(),
            Input::Diff(engine) => {
                let (old, new) = engine.inputs();
                old.out_of_order() + new.out_of_order()
            }
        }
    }
}

/// Comparing contents field by field needs both sides in o5m
fn check_content_diff_inputs(ctx: &mut Context, sources: &[Source]) -> Result<()> {
    for source in sources {
        match ctx.input_format(source)? {
            Some(InputFormat::O5m) | None => {}
            Some(other) => {
                return Err(Error::InvalidArguments(format!(
                    "--diff-contents needs o5m inputs, {source} is {other:?}"
                )))
            }
        }
    }
    Ok(())
}

/// Execute one conversion as described by `config`
pub fn run(config: &ExtractConfig) -> Result<Summary> {
    config.validate()?;
    let format = config.output_format();
    let policy = config.merge_policy();
    let selecting = config.filters.is_active();
    let multi_pass = config.border.is_active() || config.filters.tracks_dependencies();
    let content_diff = config.diff == Some(DiffMode::Contents);
    let mut ctx = Context::new(
        config.limits,
        config.temp_dir.clone(),
        multi_pass || content_diff,
    );
    if content_diff {
        check_content_diff_inputs(&mut ctx, &config.inputs)?;
    }

    let resolver = if config.border.is_active() {
        let mut resolver = Resolver::new(
            config.border.clone(),
            config.dependencies,
            config.hash_memory,
            config.temp_dir.clone(),
        )?;
        let resolution = resolver.resolve(|| {
            let merged = ctx.open_merged(&config.inputs, policy)?;
            Ok(Box::new(merged) as Box<dyn ObjectReader>)
        })?;
        Some((resolver, resolution))
    } else {
        None
    };

    let selector = if selecting {
        let mut selector = Selector::new(
            config.filters.clone(),
            config.kinds,
            config.hash_memory,
            config.temp_dir.clone(),
        )?
        .max_relation_passes(config.dependencies.max_relation_passes);
        let selection = selector.resolve(|| {
            let merged = ctx.open_merged(&config.inputs, policy)?;
            Ok(Box::new(merged) as Box<dyn ObjectReader>)
        })?;
        Some((selector, selection))
    } else {
        None
    };

    let mut input = match (config.diff, config.inputs.as_slice()) {
        (Some(mode), [old, new]) => {
            let old = ctx.open_merged(std::slice::from_ref(old), policy)?;
            let new = ctx.open_merged(std::slice::from_ref(new), policy)?;
            Input::Diff(DiffEngine::new(old, new, mode))
        }
        _ => Input::Merged(ctx.open_merged(&config.inputs, policy)?),
    };

    let mut header = *input.reader().header();
    if let Some(bbox) = config.border.bbox() {
        header.bbox = Some(bbox);
    }
    let output: Box<dyn Write> = match &config.output {
        Some(path) => Box::new(File::create(path).map_err(Error::WriteFailed)?),
        None => Box::new(io::stdout()),
    };
    let mut writer = open_writer(output, format, config.writer, &header)?;
    debug!("writing {format}");

    let keeps_deletes = format.is_change() || format == Format::Osh;
    let mut to_nodes = config.all_to_nodes.map(ToNodes::new);
    let mut summary = Summary {
        format,
        resolution: resolver.as_ref().map(|(_, r)| *r),
        selection: selector.as_ref().map(|(_, s)| *s),
        ..Summary::default()
    };

    while let Some(object) = input.reader().read_next()? {
        let object = match &resolver {
            Some((resolver, _)) => resolver.admit(object),
            None => Some(object),
        };
        let object = match (object, &selector) {
            (Some(object), Some((selector, _))) => selector.admit(object),
            (object, _) => object,
        };
        let object = match (object, to_nodes.as_mut()) {
            (Some(object), Some(conv)) => conv.convert(object),
            (object, None) => object,
            (None, Some(_)) => None,
        };
        let Some(mut object) = object else {
            summary.skipped += 1;
            continue;
        };
        if !config.kinds.allows(object.kind()) || (object.is_deleted() && !keeps_deletes) {
            summary.skipped += 1;
            continue;
        }
        config.metadata.apply(&mut object);
        writer.write(&object)?;
        summary.written += 1;
    }
    writer.finish()?;
    summary.unsorted = input.out_of_order();
    if let Some(conv) = &to_nodes {
        let [nodes, ways, relations] = conv.table_sizes();
        debug!("node conversion kept {nodes} positions, {ways} way and {relations} relation boxes");
    }
    info!(
        "wrote {} objects as {format}, skipped {}",
        summary.written, summary.skipped
    );
    Ok(summary)
}
