//! CLI interface for modgen

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Real-time LFO and envelope modulation over MIDI
#[derive(Parser)]
#[command(name = "modgen")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run against MIDI ports in real time
    Run {
        /// Configuration file path
        #[arg(short, long, default_value = "modgen.yaml")]
        config: PathBuf,
    },

    /// Render offline and print the generated messages
    Render {
        /// Configuration file path
        #[arg(short, long, default_value = "modgen.yaml")]
        config: PathBuf,

        /// Length in seconds
        #[arg(short, long, default_value = "4")]
        seconds: f64,

        /// Send a note-on at this time (seconds)
        #[arg(long)]
        note_on: Option<f64>,

        /// Send a note-off at this time (seconds)
        #[arg(long)]
        note_off: Option<f64>,

        /// Velocity of the scripted note
        #[arg(long, default_value = "100")]
        velocity: u8,

        /// Host tempo, reported as playing
        #[arg(long)]
        bpm: Option<f64>,
    },

    /// List MIDI input and output ports
    Ports,

    /// List modulation destinations
    Params,

    /// Validate a configuration file
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "modgen.yaml")]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init,
}

/// Summary of the stdin commands
pub const COMMAND_HELP: &str = "start, stop, restart, rate <hz>, depth <x>, reload, quit";

/// Commands read from stdin while running
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    Rate(f64),
    Depth(f64),
    /// Re-read the configuration file
    Reload,
    Quit,
}

impl ControlCommand {
    /// Parse one line of input; blank lines yield `None`
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(None);
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => ControlCommand::Start,
            "stop" => ControlCommand::Stop,
            "restart" => ControlCommand::Restart,
            "reload" => ControlCommand::Reload,
            "quit" | "exit" | "q" => ControlCommand::Quit,
            "rate" => ControlCommand::Rate(parse_value(words.next(), "rate <hz>")?),
            "depth" => ControlCommand::Depth(parse_value(words.next(), "depth <0-1>")?),
            other => bail!("Unknown command '{}' ({})", other, COMMAND_HELP),
        };
        Ok(Some(command))
    }
}

fn parse_value(word: Option<&str>, usage: &str) -> Result<f64> {
    match word.map(str::parse::<f64>) {
        Some(Ok(value)) if value.is_finite() => Ok(value),
        _ => bail!("Usage: {}", usage),
    }
}
