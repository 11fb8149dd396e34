//! Video-to-WAV conversion through ffmpeg.
//!
//! Sources live in a `video` directory and their audio tracks are written to
//! the sibling `raw` directory: `assets/video/intel.mp4` becomes
//! `assets/raw/intel.wav`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::process::run_command;

pub const DEFAULT_VIDEO_PATH: &str = "../assets/video/intel.mp4";
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
const VIDEO_EXTENSION: &str = "mp4";
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub path: PathBuf,
    pub sample_rate: u32,
    pub mono: bool,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_VIDEO_PATH),
            sample_rate: DEFAULT_SAMPLE_RATE,
            mono: true,
        }
    }
}

impl ConversionRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn run(&self) -> Result<Vec<PathBuf>> {
        convert_video_to_wav(&self.path, self.sample_rate, self.mono)
    }
}

/// Accepts the spellings the command line has always taken for `--is_mono`.
pub fn parse_mono_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::InvalidRequest(format!("invalid mono flag `{other}`"))),
    }
}

pub fn parse_sample_rate(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(sr) if sr > 0 => Ok(sr),
        _ => Err(Error::InvalidRequest(format!("invalid sample rate `{value}`"))),
    }
}

/// Converts one `.mp4` file, or every `.mp4` directly inside a directory,
/// and returns the written WAV paths.
pub fn convert_video_to_wav(path: &Path, sample_rate: u32, mono: bool) -> Result<Vec<PathBuf>> {
    if sample_rate == 0 {
        return Err(Error::InvalidRequest("sample rate must be positive".into()));
    }

    let (source_dir, sources) = if path.is_dir() {
        (path.to_path_buf(), list_videos(path)?)
    } else if path.is_file() {
        if !is_video(path) {
            return Err(Error::InvalidRequest(format!(
                "expected a .{VIDEO_EXTENSION} file: {}",
                path.display()
            )));
        }
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        (parent, vec![path.to_path_buf()])
    } else {
        return Err(Error::InputNotFound(path.to_path_buf()));
    };

    if sources.is_empty() {
        tracing::warn!(dir = %source_dir.display(), "no videos to convert");
        return Ok(Vec::new());
    }

    let output_dir = output_dir_for(&source_dir);
    fs::create_dir_all(&output_dir)?;

    let mut written = Vec::with_capacity(sources.len());
    for source in &sources {
        let output = output_path_for(source, &output_dir)?;
        tracing::info!(
            source = %source.display(),
            output = %output.display(),
            sample_rate,
            mono,
            "converting video to wav"
        );
        let args = ffmpeg_args(source, &output, sample_rate, mono);
        run_command("ffmpeg", &args, Some(FFMPEG_TIMEOUT))?;
        if !output.exists() {
            return Err(Error::MissingArtifact(output));
        }
        written.push(output);
    }
    Ok(written)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(VIDEO_EXTENSION))
}

fn list_videos(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_video(&path) {
            videos.push(path);
        }
    }
    videos.sort();
    Ok(videos)
}

/// `…/video` maps to its sibling `…/raw`; any other directory gets a `raw` child.
pub fn output_dir_for(source_dir: &Path) -> PathBuf {
    match (source_dir.file_name(), source_dir.parent()) {
        (Some(name), Some(parent)) if name == "video" => parent.join("raw"),
        _ => source_dir.join("raw"),
    }
}

pub fn output_path_for(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .ok_or_else(|| Error::InvalidRequest(format!("no file name in {}", source.display())))?;
    let mut name = stem.to_os_string();
    name.push(".wav");
    Ok(output_dir.join(name))
}

pub fn ffmpeg_args(source: &Path, output: &Path, sample_rate: u32, mono: bool) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        source.display().to_string(),
        "-vn".to_owned(),
    ];
    if mono {
        args.extend(["-ac".to_owned(), "1".to_owned()]);
    }
    args.extend([
        "-ar".to_owned(),
        sample_rate.to_string(),
        "-f".to_owned(),
        "wav".to_owned(),
        output.display().to_string(),
    ]);
    args
}
