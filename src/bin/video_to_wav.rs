use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use neural_chat_audio::convert::{
    parse_mono_flag, parse_sample_rate, ConversionRequest, DEFAULT_VIDEO_PATH,
};
use neural_chat_audio::logging;

/// Extract the audio track of a video (or a directory of videos) into WAV files.
#[derive(Debug, Parser)]
#[command(name = "video-to-wav", version)]
struct Cli {
    /// Source `.mp4` file or directory of `.mp4` files.
    #[arg(long, default_value = DEFAULT_VIDEO_PATH)]
    path: PathBuf,

    /// Downmix to a single channel.
    #[arg(long = "is_mono", default_value = "True")]
    is_mono: String,

    /// Output sample rate in Hz.
    #[arg(long = "sr", default_value = "16000")]
    sr: String,

    /// Increase output verbosity.
    #[arg(long)]
    verbose: bool,
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let request = ConversionRequest {
        mono: parse_mono_flag(&cli.is_mono)?,
        sample_rate: parse_sample_rate(&cli.sr)?,
        path: cli.path,
    };

    if !request.path.exists() {
        eprintln!("path not existed: {}", request.path.display());
        return Ok(ExitCode::FAILURE);
    }

    let written = request
        .run()
        .with_context(|| format!("converting {}", request.path.display()))?;
    for path in written {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
