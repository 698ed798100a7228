//! # Butterfly-convert CLI
//!
//! Command-line front end for butterfly-extract. Data goes to stdout or the
//! `-o` file, diagnostics to stderr.

use anyhow::Context as _;
use butterfly_common::exit_code;
use clap::Parser;
use log::{error, info, LevelFilter};

mod cli;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let level = if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(exit_code_of(&e));
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    info!("butterfly-convert v{} starting", env!("CARGO_PKG_VERSION"));
    let config = cli.into_config()?;
    let summary = butterfly_extract::run(&config).with_context(|| {
        let inputs: Vec<String> = config.inputs.iter().map(ToString::to_string).collect();
        format!("converting {} to {}", inputs.join(", "), config.output_format())
    })?;
    if let Some(resolution) = summary.resolution {
        info!(
            "border resolved in {} scans and {} relation passes",
            resolution.scans, resolution.relation_passes
        );
    }
    Ok(())
}

/// Exit code for a failed run, by error category
fn exit_code_of(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<butterfly_common::Error>()
        .map_or(exit_code::OTHER, butterfly_common::Error::exit_code)
}
