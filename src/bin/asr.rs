use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use neural_chat_audio::{
    logging, plan, AsrConfig, AudioSpeechRecognition, Backend, OrtCapabilities, Precision,
    DEFAULT_MODEL_ID,
};

/// Transcribe an audio file with Whisper.
#[derive(Debug, Parser)]
#[command(name = "asr", version)]
struct Cli {
    /// Audio file (wav, mp3, flac, ogg, aac or m4a).
    audio: PathBuf,

    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model: String,

    /// `auto`, `accelerator`, `gpu` or `cpu`.
    #[arg(long, default_value = "auto")]
    device: String,

    /// Use the int8-quantized graphs.
    #[arg(long)]
    reduced_precision: bool,

    /// Whisper language code; `none` lets the model decide.
    #[arg(long, default_value = "en")]
    language: String,

    /// Load the exported graphs from this directory instead of the hub.
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let backend = match cli.device.as_str() {
        "auto" => plan(&OrtCapabilities).backend,
        other => other.parse::<Backend>()?,
    };
    let precision = if cli.reduced_precision {
        Precision::Reduced
    } else {
        Precision::Standard
    };
    let language = match cli.language.as_str() {
        "none" => None,
        lang => Some(lang),
    };

    let mut config = AsrConfig::new(cli.model)
        .with_backend(backend)
        .with_precision(precision)
        .with_language(language);
    if let Some(dir) = cli.model_dir {
        config = config.with_model_dir(dir);
    }

    let asr = AudioSpeechRecognition::new(config).context("loading recognizer")?;
    let text = asr
        .audio2text(&cli.audio)
        .with_context(|| format!("transcribing {}", cli.audio.display()))?;
    println!("{text}");
    Ok(())
}
