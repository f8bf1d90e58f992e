use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

/// Top-level directories of a raw session that survive extraction.
const KEPT_DIRS: [&str; 3] = ["Collision_Data", "Processing_Data", "Robot_Input"];

/// A remote recording session split into downloadable parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub links: Vec<String>,
}

/// Reads the session table (a JSON array of sessions).
pub fn load_sessions(path: &Path) -> Result<Vec<Session>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read session table {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Malformed session table {:?}", path))
}

pub fn find_session<'a>(sessions: &'a [Session], id: &str) -> Result<&'a Session> {
    sessions
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| anyhow!("Unknown session: {}", id))
}

/// `owner/slug` of a dataset URL such as `https://www.kaggle.com/owner/slug`.
pub fn dataset_ref(part_url: &str) -> Result<String> {
    let path = part_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(part_url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [_, owner, slug, ..] => Ok(format!("{}/{}", owner, slug)),
        _ => Err(anyhow!("Cannot find a dataset reference in {}", part_url)),
    }
}

/// Directory a part extracts to: the slug of its URL.
pub fn part_id(part_url: &str) -> Result<String> {
    let reference = dataset_ref(part_url)?;
    reference
        .split('/')
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot find a dataset slug in {}", part_url))
}

/// Downloads and extracts one part of a session into `download_dir`.
pub trait Fetcher {
    fn fetch(&self, part_url: &str, download_dir: &Path) -> Result<()>;
}

/// Runs an external downloader:
/// `<program> datasets download -d <owner/slug> -p <download_dir>/<slug> --unzip`.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    pub program: String,
}

impl Fetcher for CommandFetcher {
    fn fetch(&self, part_url: &str, download_dir: &Path) -> Result<()> {
        let reference = dataset_ref(part_url)?;
        let target = download_dir.join(part_id(part_url)?);
        tracing::info!("Fetching {} into {:?}", reference, target);

        let status = Command::new(&self.program)
            .args(["datasets", "download", "-d", &reference, "-p"])
            .arg(&target)
            .arg("--unzip")
            .status()
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("{} exited with {} for {}", self.program, status, reference));
        }
        Ok(())
    }
}

fn is_kept(name: &str) -> bool {
    name.starts_with("Camera") || KEPT_DIRS.contains(&name)
}

/// Makes `<data_root>/raw/<session id>` available, fetching it if needed.
///
/// Parts go to `<data_root>/download/<slug>` (parts already there are not
/// fetched again). Every session directory found below a part is moved into
/// the raw directory, then the download directory is deleted.
pub fn gather(session: &Session, data_root: &Path, fetcher: &dyn Fetcher) -> Result<PathBuf> {
    let raw_dir = data_root.join("raw").join(&session.id);
    if raw_dir.exists() {
        tracing::info!("Session {} already present at {:?}", session.id, raw_dir);
        return Ok(raw_dir);
    }

    let download_dir = data_root.join("download");
    fs::create_dir_all(&download_dir)
        .with_context(|| format!("Failed to create {:?}", download_dir))?;
    fs::create_dir_all(&raw_dir).with_context(|| format!("Failed to create {:?}", raw_dir))?;

    for part_url in &session.links {
        let part_dir = download_dir.join(part_id(part_url)?);
        if !part_dir.exists() {
            fetcher.fetch(part_url, &download_dir)?;
        }

        let mut found = Vec::new();
        let mut walker = WalkDir::new(&part_dir).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.with_context(|| format!("Failed to scan {:?}", part_dir))?;
            let keep = entry.file_type().is_dir()
                && entry.file_name().to_str().map(is_kept).unwrap_or(false);
            if keep {
                found.push(entry.into_path());
                walker.skip_current_dir();
            }
        }

        for src in found {
            let Some(name) = src.file_name() else {
                continue;
            };
            let dst = raw_dir.join(name);
            tracing::debug!("Moving {:?} to {:?}", src, dst);
            fs::rename(&src, &dst)
                .with_context(|| format!("Failed to move {:?} to {:?}", src, dst))?;
        }
    }

    fs::remove_dir_all(&download_dir)
        .with_context(|| format!("Failed to remove {:?}", download_dir))?;
    tracing::info!("Session {} gathered into {:?}", session.id, raw_dir);
    Ok(raw_dir)
}
