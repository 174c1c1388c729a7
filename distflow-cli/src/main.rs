// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! distflow CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // -v wins over --log-level; RUST_LOG still applies on top of the default
    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "distflow".bold().green(), distflow::VERSION);
            println!(
                "flow protocol {} (accepts {} and up)",
                distflow::PROTOCOL_VERSION,
                distflow::MIN_ACCEPTED_VERSION
            );
            Ok(())
        }

        Commands::Run {
            plan,
            nodes,
            settings,
            format,
            stats,
        } => cli::handle_run(plan, nodes, settings, format, stats),

        Commands::Settings { settings } => cli::handle_settings(settings),
    }
}
