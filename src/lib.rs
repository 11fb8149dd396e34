pub mod audio;
pub mod backend;
pub mod convert;
pub mod error;
pub mod logging;
pub mod model;
pub mod process;
pub mod text;
pub mod tokenizer;

pub use backend::{plan, select_backend, Backend, BackendPlan, Capabilities, CapabilityProvider, OrtCapabilities};
pub use convert::{convert_video_to_wav, ConversionRequest};
pub use error::{Error, Result};
pub use model::Precision;

use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;

use crate::audio::AudioProcessor;
use crate::model::{SessionOptions, WhisperModel};
use crate::text::normalize_transcript;
use crate::tokenizer::Tokenizer;

pub const DEFAULT_MODEL_ID: &str = "openai/whisper-small";

const SUPPORTED_VARIANTS: &[&str] = &[
    "tiny", "tiny.en", "base", "base.en", "small", "small.en", "medium", "medium.en",
];

#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub model_id: String,
    pub backend: Backend,
    pub precision: Precision,
    /// Whisper language code; `None` lets the model pick.
    pub language: Option<String>,
    /// Directory holding the exported graphs; downloaded from the Hugging Face hub when unset.
    pub model_dir: Option<PathBuf>,
    pub intra_threads: usize,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_owned(),
            backend: Backend::Cpu,
            precision: Precision::Standard,
            language: Some("en".to_owned()),
            model_dir: None,
            intra_threads: 4,
        }
    }
}

impl AsrConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_language(mut self, language: Option<&str>) -> Self {
        self.language = language.map(str::to_owned);
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }
}

/// Maps `openai/whisper-small` (or `whisper-small`, `small`) to the export
/// variant name `small`.
pub fn model_variant(model_id: &str) -> Result<&str> {
    let name = model_id.rsplit('/').next().unwrap_or(model_id);
    let variant = name.strip_prefix("whisper-").unwrap_or(name);
    SUPPORTED_VARIANTS
        .iter()
        .find(|v| **v == variant)
        .copied()
        .ok_or_else(|| Error::UnknownModel(model_id.to_owned()))
}

/// `.en` exports use the English-only vocabulary.
pub fn is_english_only(variant: &str) -> bool {
    variant.ends_with(".en")
}

/// File names of the encoder, decoder and vocabulary for a variant.
pub fn model_file_names(variant: &str, precision: Precision) -> [String; 3] {
    let suffix = match precision {
        Precision::Standard => "onnx",
        Precision::Reduced => "int8.onnx",
    };
    [
        format!("{variant}-encoder.{suffix}"),
        format!("{variant}-decoder.{suffix}"),
        format!("{variant}-tokens.txt"),
    ]
}

fn resolve_model_files(config: &AsrConfig) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let variant = model_variant(&config.model_id)?;
    let [encoder, decoder, tokens] = model_file_names(variant, config.precision);

    match &config.model_dir {
        Some(dir) => Ok((dir.join(encoder), dir.join(decoder), dir.join(tokens))),
        None => {
            let repo_id = format!("csukuangfj/sherpa-onnx-whisper-{variant}");
            tracing::info!(repo = %repo_id, "fetching model files");
            let api = Api::new()?;
            let repo = api.model(repo_id);
            Ok((repo.get(&encoder)?, repo.get(&decoder)?, repo.get(&tokens)?))
        }
    }
}

/// Whisper speech recognizer bound to one backend and precision.
pub struct AudioSpeechRecognition {
    model: WhisperModel,
    tokenizer: Tokenizer,
    audio_processor: AudioProcessor,
    config: AsrConfig,
}

impl AudioSpeechRecognition {
    pub fn new(config: AsrConfig) -> Result<Self> {
        let (encoder_path, decoder_path, tokenizer_path) = resolve_model_files(&config)?;
        for path in [&encoder_path, &decoder_path, &tokenizer_path] {
            if !path.is_file() {
                return Err(Error::InputNotFound(path.clone()));
            }
        }

        let options = SessionOptions {
            backend: config.backend,
            precision: config.precision,
            intra_threads: config.intra_threads,
        };
        let english_only = is_english_only(model_variant(&config.model_id)?);
        let model = WhisperModel::new(&encoder_path, &decoder_path, &options, english_only)?;
        let tokenizer = Tokenizer::new(&tokenizer_path)?;
        let audio_processor = AudioProcessor::new(model.meta().n_mels)?;

        tracing::info!(
            model = %config.model_id,
            backend = %config.backend,
            precision = ?config.precision,
            "recognizer ready"
        );
        Ok(Self {
            model,
            tokenizer,
            audio_processor,
            config,
        })
    }

    pub fn config(&self) -> &AsrConfig {
        &self.config
    }

    /// Transcribes one audio file and returns the normalized text.
    pub fn audio2text(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let mel = self.audio_processor.load_and_preprocess(path)?;
        let tokens = self.model.infer(&mel, self.config.language.as_deref())?;
        let text = normalize_transcript(&self.tokenizer.decode(&tokens));
        tracing::debug!(path = %path.display(), %text, "transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_model_variants() {
        assert_eq!(model_variant("openai/whisper-small").unwrap(), "small");
        assert_eq!(model_variant("whisper-base.en").unwrap(), "base.en");
        assert_eq!(model_variant("tiny").unwrap(), "tiny");
        assert!(matches!(model_variant("openai/whisper-huge"), Err(Error::UnknownModel(_))));
        assert!(is_english_only(model_variant("openai/whisper-small.en").unwrap()));
        assert!(!is_english_only(model_variant("openai/whisper-small").unwrap()));
    }

    #[test]
    fn reduced_precision_uses_quantized_graphs() {
        assert_eq!(
            model_file_names("small", Precision::Standard),
            ["small-encoder.onnx", "small-decoder.onnx", "small-tokens.txt"]
        );
        assert_eq!(
            model_file_names("small", Precision::Reduced),
            ["small-encoder.int8.onnx", "small-decoder.int8.onnx", "small-tokens.txt"]
        );
    }

    #[test]
    fn local_model_dir_skips_download() {
        let config = AsrConfig::default().with_model_dir("/models/whisper");
        let (encoder, decoder, tokens) = resolve_model_files(&config).unwrap();
        assert_eq!(encoder, Path::new("/models/whisper/small-encoder.onnx"));
        assert_eq!(decoder, Path::new("/models/whisper/small-decoder.onnx"));
        assert_eq!(tokens, Path::new("/models/whisper/small-tokens.txt"));
    }

    #[test]
    fn missing_local_model_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let config = AsrConfig::new("openai/whisper-tiny").with_model_dir(dir.path());
        let err = AudioSpeechRecognition::new(config).err().unwrap();
        assert!(matches!(err, Error::InputNotFound(p) if p.ends_with("tiny-encoder.onnx")));
    }

    #[test]
    fn config_builders_compose() {
        let config = AsrConfig::new("openai/whisper-base")
            .with_backend(Backend::Gpu)
            .with_precision(Precision::Reduced)
            .with_language(None);
        assert_eq!(config.model_id, "openai/whisper-base");
        assert_eq!(config.backend, Backend::Gpu);
        assert_eq!(config.precision, Precision::Reduced);
        assert_eq!(config.language, None);
        assert_eq!(config.intra_threads, 4);
    }
}
