//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! and a [`Commands`] enum with one variant per subcommand.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use membrane::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Recall { project, query, top_k } = cli.command {
//!     println!("searching {project} for {query:?} (top {top_k})");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Config file to use instead of the one in the platform config directory.
    #[arg(long, short = 'c', global = true, env = "MEMBRANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file.
    Init,

    /// Add text, or the chunks of a file, to a project's memory.
    #[clap(name = "remember", alias = "r")]
    Remember {
        project: String,

        /// Text to remember. Required unless `--file` is given.
        text: Option<String>,

        /// Remember the contents of this file instead.
        #[arg(long, short = 'f', conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Maximum characters per chunk when reading a file.
        #[arg(long, default_value_t = 1500)]
        chunk_chars: usize,
    },

    /// Print the memories closest to a query.
    Recall {
        project: String,

        query: String,

        #[arg(short = 'k', long = "top-k", default_value_t = 3)]
        top_k: usize,
    },

    /// Delete a project's memory.
    Forget { project: String },

    /// Ask the assistant about a project and stream the reply.
    #[clap(name = "chat", alias = "c")]
    Chat {
        project: String,

        message: String,

        /// Document the message is about.
        #[arg(long, short = 'd')]
        document: Option<PathBuf>,

        /// Passage currently selected in the document.
        #[arg(long, short = 's')]
        selected: Option<String>,

        /// writing, accounting, research or general.
        #[arg(long, short = 'p', default_value = "general")]
        purpose: String,

        /// critical, balanced or expansive.
        #[arg(long, short = 'm', default_value = "balanced")]
        partner: String,

        /// Generation model; defaults to the configured one.
        #[arg(long)]
        model: Option<String>,
    },

    /// Suggest how the given text continues.
    #[clap(name = "ghost", alias = "g")]
    Ghost {
        text: String,

        #[arg(long, short = 'p', default_value = "general")]
        purpose: String,

        /// Character offset of the cursor; end of text by default.
        #[arg(long)]
        cursor: Option<usize>,
    },

    /// Print a project's chat transcript.
    History { project: String },
}
