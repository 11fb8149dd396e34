use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use ndarray::{Array1, Array2, Array3, Array4, Axis};
use ort::{
    execution_providers::{
        CUDAExecutionProvider, ExecutionProviderDispatch, OneDNNExecutionProvider,
        OpenVINOExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session, SessionInputValue},
    value::{DynValue, Tensor},
};

use crate::audio::DEFAULT_N_MELS;
use crate::backend::Backend;
use crate::error::{catch_runtime, ort_err, Error, Result};

// Whisper vocabularies, used when the export carries no metadata.
const SOT: i64 = 50258;
const EOT: i64 = 50257;
const TRANSCRIBE: i64 = 50359;
const NO_TIMESTAMPS: i64 = 50363;
const EN: i64 = 50259;
const EN_ONLY_SOT: i64 = 50257;
const EN_ONLY_EOT: i64 = 50256;
const EN_ONLY_TRANSCRIBE: i64 = 50358;
const EN_ONLY_NO_TIMESTAMPS: i64 = 50362;
const N_TEXT_CTX: usize = 448;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Standard,
    /// Int8-quantized graphs; on CPU the oneDNN provider is registered too.
    Reduced,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub backend: Backend,
    pub precision: Precision,
    pub intra_threads: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            backend: Backend::Cpu,
            precision: Precision::Standard,
            intra_threads: 4,
        }
    }
}

impl SessionOptions {
    fn execution_providers(&self) -> Vec<ExecutionProviderDispatch> {
        match (self.backend, self.precision) {
            (Backend::Accelerator, _) => vec![OpenVINOExecutionProvider::default().build()],
            (Backend::Gpu, _) => vec![CUDAExecutionProvider::default().build()],
            (Backend::Cpu, Precision::Reduced) => vec![OneDNNExecutionProvider::default().build()],
            (Backend::Cpu, Precision::Standard) => Vec::new(),
        }
    }
}

/// Decoding constants read from the encoder's custom metadata.
#[derive(Debug, Clone)]
pub struct WhisperMeta {
    pub n_mels: usize,
    pub n_text_ctx: usize,
    pub n_text_layer: Option<usize>,
    pub n_text_state: Option<usize>,
    pub sot: i64,
    pub eot: i64,
    pub transcribe: i64,
    pub no_timestamps: i64,
    pub multilingual: bool,
    pub language_tokens: HashMap<String, i64>,
}

impl Default for WhisperMeta {
    fn default() -> Self {
        Self {
            n_mels: DEFAULT_N_MELS,
            n_text_ctx: N_TEXT_CTX,
            n_text_layer: None,
            n_text_state: None,
            sot: SOT,
            eot: EOT,
            transcribe: TRANSCRIBE,
            no_timestamps: NO_TIMESTAMPS,
            multilingual: true,
            language_tokens: HashMap::from([("en".to_owned(), EN)]),
        }
    }
}

impl WhisperMeta {
    /// Defaults for the `.en` exports, whose vocabulary lacks language tokens.
    pub fn english_only() -> Self {
        Self {
            sot: EN_ONLY_SOT,
            eot: EN_ONLY_EOT,
            transcribe: EN_ONLY_TRANSCRIBE,
            no_timestamps: EN_ONLY_NO_TIMESTAMPS,
            multilingual: false,
            language_tokens: HashMap::new(),
            ..Self::default()
        }
    }

    pub fn defaults_for(english_only: bool) -> Self {
        if english_only {
            Self::english_only()
        } else {
            Self::default()
        }
    }

    /// Overlays a key lookup on `base`; absent or malformed keys keep the base value.
    pub fn from_lookup(base: Self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(v: Option<String>) -> Option<T> {
            v.and_then(|s| s.trim().parse().ok())
        }

        let mut meta = base;
        if let Some(v) = parse(lookup("n_mels")) {
            meta.n_mels = v;
        }
        if let Some(v) = parse(lookup("n_text_ctx")) {
            meta.n_text_ctx = v;
        }
        if let Some(v) = parse(lookup("n_text_layer")) {
            meta.n_text_layer = Some(v);
        }
        if let Some(v) = parse(lookup("n_text_state")) {
            meta.n_text_state = Some(v);
        }
        if let Some(v) = parse(lookup("sot")) {
            meta.sot = v;
        }
        if let Some(v) = parse(lookup("eot")) {
            meta.eot = v;
        }
        if let Some(v) = parse(lookup("transcribe")) {
            meta.transcribe = v;
        }
        if let Some(v) = parse(lookup("no_timestamps")) {
            meta.no_timestamps = v;
        }
        if let Some(v) = parse::<i64>(lookup("is_multilingual")) {
            meta.multilingual = v != 0;
        }
        if let (Some(codes), Some(tokens)) =
            (lookup("all_language_codes"), lookup("all_language_tokens"))
        {
            let table: HashMap<String, i64> = codes
                .split(',')
                .zip(tokens.split(','))
                .filter_map(|(c, t)| Some((c.trim().to_owned(), t.trim().parse().ok()?)))
                .collect();
            if !table.is_empty() {
                meta.language_tokens = table;
            }
        }
        meta
    }

    fn from_session(session: &Session, english_only: bool) -> Self {
        let base = Self::defaults_for(english_only);
        match session.metadata() {
            Ok(metadata) => Self::from_lookup(base, |key| metadata.custom(key).ok().flatten()),
            Err(e) => {
                tracing::warn!(error = %e, "encoder has no readable metadata, using whisper defaults");
                base
            }
        }
    }

    /// `<|startoftranscript|> [<|lang|> <|transcribe|>] <|notimestamps|>`.
    /// English-only models take neither a language nor a task token.
    pub fn prompt(&self, language: Option<&str>) -> Result<Vec<i64>> {
        let mut prompt = vec![self.sot];
        if self.multilingual {
            if let Some(lang) = language {
                let token = self
                    .language_tokens
                    .get(lang)
                    .ok_or_else(|| Error::InvalidRequest(format!("unsupported language `{lang}`")))?;
                prompt.push(*token);
            }
            prompt.push(self.transcribe);
        }
        prompt.push(self.no_timestamps);
        Ok(prompt)
    }
}

pub struct WhisperModel {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    meta: WhisperMeta,
}

impl WhisperModel {
    /// `english_only` selects the fallback vocabulary for `.en` exports
    /// that carry no metadata.
    pub fn new(
        encoder_path: &Path,
        decoder_path: &Path,
        options: &SessionOptions,
        english_only: bool,
    ) -> Result<Self> {
        let encoder = build_session(encoder_path, options)?;
        let decoder = build_session(decoder_path, options)?;
        let meta = WhisperMeta::from_session(&encoder, english_only);
        tracing::debug!(?meta, "whisper metadata");

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            meta,
        })
    }

    pub fn meta(&self) -> &WhisperMeta {
        &self.meta
    }

    /// Greedy decoding of one 30 s mel window. Returns the generated ids
    /// without the prompt.
    pub fn infer(&self, mel: &Array2<f32>, language: Option<&str>) -> Result<Vec<i64>> {
        let batch_mel = mel.view().insert_axis(Axis(0));

        let (cross_k, cross_v) = {
            let inputs = ort::inputs![
                "mel" => Tensor::from_array(batch_mel.to_owned()).map_err(ort_err)?,
            ];

            let mut encoder_session = self
                .encoder
                .lock()
                .map_err(|e| ort_err(format!("failed to lock encoder: {e}")))?;
            let encoder_out = encoder_session.run(inputs).map_err(ort_err)?;

            (
                to_array4(&encoder_out["n_layer_cross_k"])?,
                to_array4(&encoder_out["n_layer_cross_v"])?,
            )
        };

        // cross_k is [n_layer, batch, n_audio_ctx, d_model]
        let n_layer = self.meta.n_text_layer.unwrap_or(cross_k.shape()[0]);
        let d_model = self.meta.n_text_state.unwrap_or(cross_k.shape()[3]);
        let max_len = self.meta.n_text_ctx;
        let cross_k = Tensor::from_array(cross_k).map_err(ort_err)?;
        let cross_v = Tensor::from_array(cross_v).map_err(ort_err)?;

        let prompt = self.meta.prompt(language)?;
        let mut tokens = prompt.clone();

        let mut decoder_session = self
            .decoder
            .lock()
            .map_err(|e| ort_err(format!("failed to lock decoder: {e}")))?;

        let mut self_k_cache = Array4::<f32>::zeros((n_layer, 1, max_len, d_model));
        let mut self_v_cache = Array4::<f32>::zeros((n_layer, 1, max_len, d_model));

        let mut offset = 0;
        while offset < max_len {
            let token_input = Array2::from_shape_vec((1, 1), vec![tokens[offset]])?;
            let offset_input = Array1::from_shape_vec((1,), vec![offset as i64])?;

            let mut inputs: HashMap<String, SessionInputValue<'_>> = HashMap::new();
            inputs.insert("tokens".to_string(), Tensor::from_array(token_input).map_err(ort_err)?.into());
            inputs.insert("in_n_layer_self_k_cache".to_string(), Tensor::from_array(self_k_cache.clone()).map_err(ort_err)?.into());
            inputs.insert("in_n_layer_self_v_cache".to_string(), Tensor::from_array(self_v_cache.clone()).map_err(ort_err)?.into());
            inputs.insert("n_layer_cross_k".to_string(), cross_k.clone().into());
            inputs.insert("n_layer_cross_v".to_string(), cross_v.clone().into());
            inputs.insert("offset".to_string(), Tensor::from_array(offset_input).map_err(ort_err)?.into());

            let outputs = decoder_session
                .run(inputs)
                .map_err(|e| ort_err(format!("decoder run failed at step {offset}: {e}")))?;

            self_k_cache.assign(&to_array4(&outputs["out_n_layer_self_k_cache"])?);
            self_v_cache.assign(&to_array4(&outputs["out_n_layer_self_v_cache"])?);
            offset += 1;

            // Still feeding the prompt; its logits are not needed.
            if offset < tokens.len() {
                continue;
            }

            let next_token = last_step_argmax(&to_array3(&outputs["logits"])?)?;

            if next_token == self.meta.eot {
                break;
            }
            tokens.push(next_token);
        }

        Ok(tokens.split_off(prompt.len()))
    }
}

/// Session construction is the first call into the runtime library, so a
/// missing library surfaces here as `Error::Ort`.
fn build_session(path: &Path, options: &SessionOptions) -> Result<Session> {
    catch_runtime(|| build_session_inner(path, options))?
}

fn build_session_inner(path: &Path, options: &SessionOptions) -> Result<Session> {
    tracing::debug!(
        path = %path.display(),
        backend = %options.backend,
        precision = ?options.precision,
        "building onnx session"
    );
    let builder = Session::builder()
        .map_err(ort_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort_err)?
        .with_intra_threads(options.intra_threads)
        .map_err(ort_err)?;

    let providers = options.execution_providers();
    let builder = if providers.is_empty() {
        builder
    } else {
        builder.with_execution_providers(providers).map_err(ort_err)?
    };
    builder.commit_from_file(path).map_err(ort_err)
}

fn to_array3(value: &DynValue) -> Result<Array3<f32>> {
    let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_err)?;
    let shape_vec: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
    if shape_vec.len() != 3 {
        return Err(ort_err(format!("expected a 3-d tensor, got shape {shape_vec:?}")));
    }
    Ok(Array3::from_shape_vec(
        (shape_vec[0], shape_vec[1], shape_vec[2]),
        data.to_vec(),
    )?)
}

/// Logits are `[batch, steps, vocab]`; the prediction is at the last step of batch 0.
fn last_step_argmax(logits: &Array3<f32>) -> Result<i64> {
    let (batch, steps, vocab) = logits.dim();
    if batch == 0 || steps == 0 || vocab == 0 {
        return Err(ort_err(format!("empty logits of shape {:?}", logits.dim())));
    }
    Ok(argmax(logits.slice(ndarray::s![0, steps - 1, ..]).iter().copied()))
}

fn to_array4(value: &DynValue) -> Result<Array4<f32>> {
    let (shape, data) = value.try_extract_tensor::<f32>().map_err(ort_err)?;
    let shape_vec: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
    if shape_vec.len() != 4 {
        return Err(ort_err(format!("expected a 4-d tensor, got shape {shape_vec:?}")));
    }
    Ok(Array4::from_shape_vec(
        (shape_vec[0], shape_vec[1], shape_vec[2], shape_vec[3]),
        data.to_vec(),
    )?)
}

fn argmax(values: impl Iterator<Item = f32>) -> i64 {
    let (token, _) = values.enumerate().fold((0, f32::NEG_INFINITY), |(argmax, max), (i, val)| {
        if val > max {
            (i, val)
        } else {
            (argmax, max)
        }
    });
    token as i64
}
