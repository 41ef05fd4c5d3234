//! Command-line interface definitions for the `ami-publish` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{ArgAction, Parser};

/// Top-level CLI for the `ami-publish` binary.
#[derive(Debug, Parser)]
#[command(
    name = "ami-publish",
    about = "Upload raw disk images to EC2 and publish them as machine images",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Download images and publish every variant as a machine image.
    #[command(
        name = "upload",
        about = "Download images and publish every variant as a machine image"
    )]
    Upload(UploadCommand),
}

/// Arguments for the `ami-publish upload` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct UploadCommand {
    /// Compose metadata forwarded with every notification (a JSON object).
    #[arg(long, value_name = "JSON")]
    pub(crate) compose: Option<String>,
    /// Override the number of jobs run concurrently.
    #[arg(long, value_name = "N")]
    pub(crate) workers: Option<usize>,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub(crate) verbose: u8,
    /// Decrease log verbosity (-q warn, -qq error, -qqq off).
    #[arg(short, long, action = ArgAction::Count)]
    pub(crate) quiet: u8,
    /// URLs of `.raw.xz` images to publish.
    #[arg(required = true, value_name = "URL")]
    pub(crate) urls: Vec<String>,
}
