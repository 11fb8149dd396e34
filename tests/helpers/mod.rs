#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use hound::{SampleFormat, WavSpec, WavWriter};

/// Absolute location of the sample inside the release container.
pub const CONTAINER_WELCOME_WAV: &str =
    "/intel-extension-for-transformers/intel_extension_for_transformers/neural_chat/assets/audio/welcome.wav";

pub const GOLDEN_TRANSCRIPT: &str = "Welcome to Neural Chat";

pub fn assets_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets")
}

/// Prefer the container path, fall back to the checked-out assets.
pub fn welcome_wav() -> PathBuf {
    resolve_sample(Path::new(CONTAINER_WELCOME_WAV), &assets_dir().join("audio").join("welcome.wav"))
}

pub fn resolve_sample(primary: &Path, fallback: &Path) -> PathBuf {
    if primary.exists() {
        primary.to_path_buf()
    } else {
        fallback.to_path_buf()
    }
}

pub fn ffmpeg_available() -> bool {
    neural_chat_audio::process::command_exists("ffmpeg")
}

/// One-second 440 Hz tone, 16-bit.
pub fn write_tone_wav(path: &Path, sample_rate: u32, channels: u16) {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for i in 0..sample_rate {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 8000.0) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

static SCRATCH_LOCK: Mutex<()> = Mutex::new(());

/// Output directory that is wiped and recreated on construction and removed
/// on drop, panics included. Holders are serialized because the path is fixed.
pub struct ScratchDir {
    path: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

impl ScratchDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let guard = SCRATCH_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = path.into();
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create scratch dir");
        Self {
            path,
            _guard: guard,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Source clip at a fixed path. When the checked-out asset is absent a short
/// tone clip is synthesized with ffmpeg and removed again on drop.
pub struct SampleVideo {
    path: PathBuf,
    synthesized: bool,
}

impl SampleVideo {
    /// `None` when the asset is absent and ffmpeg cannot build one.
    pub fn ensure(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        if path.exists() {
            return Some(Self {
                path,
                synthesized: false,
            });
        }
        if !ffmpeg_available() {
            return None;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create video dir");
        }
        let args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=1",
            "-c:a",
            "aac",
        ]
        .into_iter()
        .map(str::to_owned)
        .chain([path.display().to_string()])
        .collect();
        neural_chat_audio::process::run_command("ffmpeg", &args, None).expect("synthesize clip");
        Some(Self {
            path,
            synthesized: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn synthesized(&self) -> bool {
        self.synthesized
    }
}

impl Drop for SampleVideo {
    fn drop(&mut self) {
        if self.synthesized {
            let _ = fs::remove_file(&self.path);
        }
    }
}
