use clap::{Parser, Subcommand};
use std::path::PathBuf;

use xcomp_capture::capture::WindowId;
use xcomp_capture::config;

#[derive(Parser, Debug)]
#[command(name = "xcomp-capture")]
#[command(version)]
#[command(about = "Capture X11 windows through Composite and MIT-SHM", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/xcomp-capture.toml")]
    pub config: PathBuf,

    /// X11 display (defaults to $DISPLAY)
    #[arg(short, long)]
    pub display: Option<String>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List capturable windows
    List {
        /// Print JSON instead of a table
        #[arg(long, action)]
        json: bool,
    },

    /// Show the resolved window and buffer layout for a window
    Info {
        /// Window id, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_window_id)]
        window: WindowId,
    },

    /// Refresh a window capture in a loop and report frame changes
    Capture {
        /// Window id, decimal or 0x-prefixed hex
        #[arg(value_parser = parse_window_id)]
        window: WindowId,

        /// Number of frames to capture (0 = until a refresh fails)
        #[arg(short = 'n', long)]
        frames: Option<u64>,

        /// Delay between refreshes in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Reopen the capture when the window is resized
        #[arg(long, action)]
        reopen_on_resize: bool,
    },
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }
}

/// Parse a window id as printed by xwininfo (hex) or xdotool (decimal)
pub fn parse_window_id(value: &str) -> Result<WindowId, String> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => WindowId::from_str_radix(hex, 16),
        None => value.parse::<WindowId>(),
    };
    match parsed {
        Ok(0) => Err("window id must be non-zero".to_string()),
        Ok(id) => Ok(id),
        Err(e) => Err(format!("invalid window id {:?}: {}", value, e)),
    }
}
