use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synchronize a raw capture session into per-trial directories
    Consolidate {
        /// Raw session directory (Robot_Input, Processing_Data, Camera*, ...)
        #[arg(long, env = "TRIALSYNC_RAW_ROOT")]
        raw_root: PathBuf,

        /// Directory receiving the consolidated trials
        #[arg(long, env = "TRIALSYNC_OUTPUT_ROOT")]
        output_root: PathBuf,

        /// Session identifier (defaults to the raw directory name)
        #[arg(long)]
        id: Option<String>,
    },

    /// List the trials of a consolidated session
    Trials {
        #[arg(env = "TRIALSYNC_OUTPUT_ROOT")]
        output_root: PathBuf,
    },

    /// Play a consolidated trial as a grid in a window
    Play {
        trial_dir: PathBuf,

        /// Longest wait for a decoder, in milliseconds
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Encode a consolidated trial's grid into a video file
    Export {
        trial_dir: PathBuf,
        output: PathBuf,

        #[arg(long, default_value_t = 15)]
        fps: i32,

        /// Target bit rate in bits per second
        #[arg(long, default_value_t = 512_000)]
        bit_rate: usize,

        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Play (or encode) arbitrary videos side by side
    Grid {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Canvas size
        #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [1920, 1080])]
        resolution: Vec<i32>,

        #[arg(long, default_value_t = 15)]
        fps: i32,

        /// Encode to this file instead of opening a window
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },

    /// Download a remote session into <data-root>/raw/<session>
    Fetch {
        /// JSON table of known sessions
        #[arg(long)]
        sessions: PathBuf,

        #[arg(long)]
        session: String,

        #[arg(long, env = "TRIALSYNC_DATA_ROOT")]
        data_root: PathBuf,

        /// Downloader executable
        #[arg(long, default_value = "kaggle")]
        command: String,
    },
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
