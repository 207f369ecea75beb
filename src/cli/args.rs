// src/cli/args.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Checkpointed importer for real-estate listing feeds
pub struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub debug: u8,

    #[arg(long = "no-color", help = "disable colored output")]
    pub no_color: bool,

    #[arg(long = "generate-config", help = "print a default config file")]
    pub generate_config: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Starts an import job for a feed (XML document or zip archive)
    Import {
        /// Feed file to import
        feed: PathBuf,

        #[arg(
            short = 'f',
            long = "force",
            help = "take over a running job for the same source"
        )]
        force: bool,

        #[arg(
            long = "follow",
            help = "keep resuming until the job completes instead of yielding"
        )]
        follow: bool,
    },
    /// Resumes a yielded import job
    Resume {
        /// Feed file the job was started for
        feed: PathBuf,

        /// Resumption token printed when the job yielded
        token: String,

        #[arg(long = "follow", help = "keep resuming until the job completes")]
        follow: bool,
    },
    /// Shows the checkpoint of an in-flight job
    Status {
        /// Feed file the job was started for
        feed: PathBuf,

        #[arg(long = "json", help = "output the raw checkpoint as json")]
        is_json: bool,
    },
    /// Discards a job's checkpoint and unpack directory
    Reset {
        /// Feed file the job was started for
        feed: PathBuf,
    },
    /// Engages or clears the kill switch
    Kill {
        #[arg(
            short = 'm',
            long = "minutes",
            default_value_t = 60,
            help = "how long the switch stays engaged"
        )]
        minutes: i64,

        #[arg(long = "clear", help = "clear the switch instead of engaging it")]
        clear: bool,
    },
}
