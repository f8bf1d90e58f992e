mod cli;
mod dataset;
mod error;
mod grid;
mod run_context;
mod video;

use anyhow::{anyhow, Context, Result};
use cli::{Args, Command};
use dataset::acquire::{self, CommandFetcher};
use grid::{CompositorConfig, HighguiWindow, VideoGrid};
use std::path::Path;
use std::time::Duration;
use video::encoder::EncoderConfig;

fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Consolidate {
            raw_root,
            output_root,
            id,
        } => {
            let id = match id {
                Some(id) => id,
                None => raw_root
                    .file_name()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("Cannot derive a session id from {:?}", raw_root))?,
            };
            let dataset = dataset::load_raw(&raw_root, &id)?;
            let trials = dataset.save(&output_root)?;
            tracing::info!(
                "Consolidated {} trials of session {} into {:?}",
                trials,
                id,
                output_root
            );
        }

        Command::Trials { output_root } => list_trials(&output_root)?,

        Command::Play {
            trial_dir,
            timeout_ms,
        } => {
            let grid = VideoGrid::open_trial(&trial_dir)?;
            show(&grid, timeout_ms)?;
        }

        Command::Export {
            trial_dir,
            output,
            fps,
            bit_rate,
            timeout_ms,
        } => {
            let grid = VideoGrid::open_trial(&trial_dir)?;
            let encoder = EncoderConfig {
                fps,
                bit_rate,
                ..EncoderConfig::default()
            };
            grid.save(&output, &encoder, &compositor_config(timeout_ms))?;
        }

        Command::Grid {
            paths,
            resolution,
            fps,
            output,
            timeout_ms,
        } => {
            let [width, height] = resolution[..] else {
                return Err(anyhow!("--resolution takes exactly WIDTH HEIGHT"));
            };
            let grid = VideoGrid::from_files(paths, width, height, fps as f64)?;
            match output {
                Some(output) => {
                    let encoder = EncoderConfig {
                        fps,
                        ..EncoderConfig::default()
                    };
                    grid.save(&output, &encoder, &compositor_config(timeout_ms))?;
                }
                None => show(&grid, timeout_ms)?,
            }
        }

        Command::Fetch {
            sessions,
            session,
            data_root,
            command,
        } => {
            let table = acquire::load_sessions(&sessions)?;
            let session = acquire::find_session(&table, &session)?;
            let fetcher = CommandFetcher { program: command };
            let raw = acquire::gather(session, &data_root, &fetcher)
                .with_context(|| format!("Failed to gather session {}", session.id))?;
            println!("{}", raw.display());
        }
    }

    Ok(())
}

fn compositor_config(timeout_ms: u64) -> CompositorConfig {
    CompositorConfig {
        timeout: Duration::from_millis(timeout_ms),
    }
}

fn show(grid: &VideoGrid, timeout_ms: u64) -> Result<()> {
    let layout = grid.layout();
    let window = HighguiWindow::open("Video", layout.width, layout.height)?;
    grid.show(window, &compositor_config(timeout_ms))?;
    Ok(())
}

fn list_trials(output_root: &Path) -> Result<()> {
    let trials = run_context::list_trials(output_root)?;
    println!("{} trials in {:?}", trials.len(), output_root);
    for trial in trials {
        println!("  {} ({} videos)", trial.dir.display(), trial.videos.len());
    }
    Ok(())
}
