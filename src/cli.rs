// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wick_config::Mode;

#[derive(Parser, Debug)]
#[command(
    name = "wick",
    about = "A local-first conversation runtime for open-weight language models",
    version
)]
pub struct Cli {
    /// Path to an explicit settings.json (defaults to the state root).
    #[arg(long, short = 's')]
    pub settings: Option<PathBuf>,

    /// Override the state directory (sessions, snapshots, approvals).
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Model name presented to the session layer.
    #[arg(long, short = 'm', default_value = "llama3.1:8b")]
    pub model: String,

    /// JSON file with an array of canned replies, consumed one per turn.
    /// Without it the mock backend echoes the input.
    #[arg(long)]
    pub replies: Option<PathBuf>,

    /// Initial operational mode.
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Log to stderr (otherwise only WICK_LOG-driven output).
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the effective settings and exit.
    ShowSettings,
    /// List persisted sessions under the state root.
    Sessions,
}
