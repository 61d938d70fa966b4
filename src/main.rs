// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for hc2mm.
//!
//! This binary provides the `hc2mm` command for converting HipChat
//! export archives into the Mattermost bulk-import format.

use hc2mm::archive::{Archive, ArchiveError};
use hc2mm::convert::{ConvertError, ConvertOptions, convert};
use hc2mm::export::{ExportError, ExportWriter};
use lexopt::prelude::*;
use snafu::prelude::*;
use std::path::PathBuf;

struct Cli {
    archive: PathBuf,
    output: PathBuf,
    strict: bool,
    keep_deleted: bool,
    quiet: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("{source}"))]
    OpenArchive { source: ArchiveError },

    #[snafu(display("{source}"))]
    OpenOutput { source: ExportError },

    #[snafu(display("{source}"))]
    Convert { source: ConvertError },

    #[snafu(display("{source}"))]
    FlushOutput { source: ExportError },
}

fn print_help() {
    println!(
        "\
{name} {version}
Convert HipChat export archives to the Mattermost bulk-import format

Usage: {name} [OPTIONS] <ARCHIVE> <OUTPUT_DIR>

Arguments:
  <ARCHIVE>     HipChat export archive (tar or tar.gz)
  <OUTPUT_DIR>  Directory for hipchat-export.json and export-files/

Options:
      --strict        Fail when a message references an unknown user
                      instead of skipping it with a warning
      --keep-deleted  Import messages that are flagged deleted
  -q, --quiet         Suppress progress and warning messages
  -h, --help          Print help
  -V, --version       Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    // Show help if no arguments provided
    if std::env::args().len() == 1 {
        print_help();
        std::process::exit(0);
    }

    let mut positional: Vec<PathBuf> = Vec::new();
    let mut strict = false;
    let mut keep_deleted = false;
    let mut quiet = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Long("strict") => strict = true,
            Long("keep-deleted") => keep_deleted = true,
            Short('q') | Long("quiet") => quiet = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) => positional.push(val.parse()?),
            _ => return Err(arg.unexpected()),
        }
    }

    let mut positional = positional.into_iter();
    let archive = positional
        .next()
        .ok_or("missing required argument: <ARCHIVE>")?;
    let output = positional
        .next()
        .ok_or("missing required argument: <OUTPUT_DIR>")?;
    if let Some(extra) = positional.next() {
        return Err(format!("unexpected argument: {}", extra.display()).into());
    }

    Ok(Cli {
        archive,
        output,
        strict,
        keep_deleted,
        quiet,
    })
}

fn main() -> Result<(), Error> {
    let cli = parse_args().context(ParseArgsSnafu)?;

    let archive = Archive::open(&cli.archive).context(OpenArchiveSnafu)?;
    let mut writer = ExportWriter::open(&cli.output).context(OpenOutputSnafu)?;

    let options = ConvertOptions {
        strict: cli.strict,
        keep_deleted: cli.keep_deleted,
        quiet: cli.quiet,
    };
    let summary = convert(&archive, &mut writer, &options).context(ConvertSnafu)?;
    writer.finish().context(FlushOutputSnafu)?;

    if !cli.quiet {
        eprintln!(
            "Wrote {}: {} channels, {} users, {} emoji, {} posts, {} direct channels, \
             {} direct posts ({} messages skipped)",
            cli.output.join(hc2mm::export::EXPORT_FILENAME).display(),
            summary.channels,
            summary.users,
            summary.emojis,
            summary.posts,
            summary.direct_channels,
            summary.direct_posts,
            summary.skipped_messages,
        );
    }

    Ok(())
}
