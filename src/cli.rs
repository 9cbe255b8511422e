//! 命令行参数定义

use clap::{Parser, Subcommand};
use static_toggle::config::HOME_ENV;
use static_toggle::models::{Generator, LogLevel};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "static-toggle")]
#[command(about = "Start, stop and watch local static-site dev servers")]
#[command(version)]
pub struct Cli {
    /// Override the data directory (projects.json, config.json)
    #[arg(long = "data-dir", env = HOME_ENV, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered projects
    List,

    /// Register a project directory
    Add {
        /// Project directory
        path: PathBuf,
        /// Display name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,
        /// Generator; detected from marker files when omitted
        #[arg(short, long)]
        generator: Option<Generator>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Custom start command, `{port}` is substituted
        #[arg(long)]
        command: Option<String>,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Unregister a project (by id, name or path)
    Remove { project: String },

    /// Run one or more dev servers in the foreground until Ctrl-C
    #[command(alias = "start")]
    Run {
        #[arg(required = true)]
        projects: Vec<String>,
        /// Only print log lines of this level
        #[arg(short, long)]
        level: Option<LogLevel>,
    },

    /// Check whether a port is free
    Port { port: u16 },

    /// Find static-site projects below a directory
    Scan {
        path: PathBuf,
        #[arg(short, long, default_value_t = 3)]
        depth: usize,
        /// Register every site found
        #[arg(long)]
        add: bool,
    },

    /// Show supported generators and their default commands
    Generators,

    /// Read JSON commands from stdin, one per line, and write JSON responses to stdout
    Serve,

    /// Print the effective configuration
    Config,
}
