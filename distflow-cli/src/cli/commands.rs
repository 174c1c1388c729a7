// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line arguments

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "distflow-cli")]
#[command(version, about = "Run distributed query flows on an in-process cluster")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<log::Level>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information
    Version,

    /// Run a plan file and print the gateway's results
    Run {
        /// JSON plan with one fragment per node
        #[arg(short, long)]
        plan: PathBuf,

        /// Nodes to start; defaults to the highest node the plan uses
        #[arg(short, long)]
        nodes: Option<usize>,

        /// JSON server settings applied to every node
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Also print per-node server counters
        #[arg(long)]
        stats: bool,
    },

    /// Print the effective server settings
    Settings {
        /// JSON settings file; defaults are shown when omitted
        #[arg(short, long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}
