use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use ndarray::{Array1, Array2};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use rustfft::{num_complex::Complex, FftPlanner};

use crate::error::{Error, Result};
use crate::process::run_command;

// Whisper front-end parameters
pub const SAMPLE_RATE: usize = 16000;
const N_FFT: usize = 400;
const HOP_LENGTH: usize = 160;
const CHUNK_LENGTH: usize = 30;
const N_SAMPLES: usize = CHUNK_LENGTH * SAMPLE_RATE;
const N_FRAMES: usize = 3000;
pub const DEFAULT_N_MELS: usize = 80;

/// Formats ffmpeg has to turn into WAV before they can be read.
const TRANSCODED_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "aac", "m4a"];

pub struct AudioProcessor {
    n_mels: usize,
    mel_filters: Array2<f32>,
}

impl AudioProcessor {
    pub fn new(n_mels: usize) -> Result<Self> {
        if n_mels == 0 {
            return Err(Error::InvalidRequest("n_mels must be positive".into()));
        }
        let mel_filters = mel_filter_bank(SAMPLE_RATE as f32, N_FFT as f32, n_mels, 0.0, 8000.0);
        Ok(Self {
            n_mels,
            mel_filters,
        })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Loads any supported audio file and returns the `[n_mels, 3000]` log-mel input.
    pub fn load_and_preprocess(&self, path: &Path) -> Result<Array2<f32>> {
        let samples = load_audio(path)?;
        Ok(self.process_pcm(&samples))
    }

    /// Process mono PCM audio samples (must be 16kHz).
    pub fn process_pcm(&self, samples: &[f32]) -> Array2<f32> {
        self.log_mel_spectrogram(samples)
    }

    fn log_mel_spectrogram(&self, audio: &[f32]) -> Array2<f32> {
        let mut padded_audio = audio.to_vec();
        padded_audio.resize(N_SAMPLES, 0.0);

        let window = hann_window(N_FFT);
        let stft_out = stft(&padded_audio, N_FFT, HOP_LENGTH, &window);

        let magnitudes = stft_out.mapv(|c| c.norm_sqr());
        let magnitudes = magnitudes.slice(ndarray::s![.., ..(N_FFT / 2 + 1)]);

        // [Time, Freq] x [Freq, Mel] -> [Time, Mel]
        let mel_spec = magnitudes.dot(&self.mel_filters);

        let mut log_spec = mel_spec.mapv(|x| x.max(1e-10).log10());
        let max_val = log_spec.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        log_spec.mapv_inplace(|x| (x.max(max_val - 8.0) + 4.0) / 4.0);

        let current_frames = log_spec.shape()[0];
        let final_spec = if current_frames < N_FRAMES {
            let mut padded = Array2::zeros((N_FRAMES, self.n_mels));
            padded
                .slice_mut(ndarray::s![..current_frames, ..])
                .assign(&log_spec);
            padded
        } else {
            log_spec.slice(ndarray::s![..N_FRAMES, ..]).to_owned()
        };

        // [Mel, Time]
        final_spec.t().to_owned()
    }
}

/// Decodes `path` to 16 kHz mono samples. WAV is read directly; the
/// compressed formats go through ffmpeg first.
pub fn load_audio(path: &Path) -> Result<Vec<f32>> {
    if !path.is_file() {
        return Err(Error::InputNotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    tracing::debug!(path = %path.display(), format = %extension, "loading audio");
    let (samples, sr) = if extension == "wav" {
        read_wav(path)?
    } else if TRANSCODED_EXTENSIONS.contains(&extension.as_str()) {
        let work_dir = tempfile::tempdir()?;
        let wav = transcode_to_wav(path, work_dir.path())?;
        read_wav(&wav)?
    } else {
        return Err(Error::UnsupportedFormat(extension));
    };

    if sr != SAMPLE_RATE {
        resample_audio(&samples, sr, SAMPLE_RATE)
    } else {
        Ok(samples)
    }
}

fn transcode_to_wav(input: &Path, work_dir: &Path) -> Result<PathBuf> {
    let output = work_dir.join("input_16k_mono.wav");
    let args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        input.display().to_string(),
        "-ar".to_owned(),
        SAMPLE_RATE.to_string(),
        "-ac".to_owned(),
        "1".to_owned(),
        "-c:a".to_owned(),
        "pcm_s16le".to_owned(),
        output.display().to_string(),
    ];
    run_command("ffmpeg", &args, None)?;
    if !output.exists() {
        return Err(Error::MissingArtifact(output));
    }
    Ok(output)
}

/// Reads a WAV file as mono f32 in `[-1, 1]`, averaging channels.
pub fn read_wav(path: &Path) -> Result<(Vec<f32>, usize)> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int if spec.bits_per_sample <= 16 => {
            let scale = (1i32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i16>()
                .map(|s| s.map(|x| x as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|x| x as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok((downmix(&interleaved, spec.channels as usize), spec.sample_rate as usize))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample_audio(samples: &[f32], from_sr: usize, to_sr: usize) -> Result<Vec<f32>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_sr as f64 / from_sr as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, ratio, params, samples.len(), 1)
        .map_err(|e| Error::Resample(e.to_string()))?;

    let waves_in = vec![samples.to_vec()];
    let mut waves_out = resampler
        .process(&waves_in, None)
        .map_err(|e| Error::Resample(e.to_string()))?;
    Ok(waves_out.swap_remove(0))
}

fn hann_window(size: usize) -> Array1<f32> {
    Array1::from_shape_fn(size, |i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
}

fn stft(input: &[f32], n_fft: usize, hop_length: usize, window: &Array1<f32>) -> Array2<Complex<f32>> {
    let n_frames = (input.len() - n_fft) / hop_length + 1;
    let mut output = Array2::<Complex<f32>>::zeros((n_frames, n_fft));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    for (i, mut row) in output.outer_iter_mut().enumerate() {
        let start = i * hop_length;
        let mut frame: Vec<Complex<f32>> = input[start..start + n_fft]
            .iter()
            .zip(window.iter())
            .map(|(&x, &w)| Complex::new(x * w, 0.0))
            .collect();
        fft.process(&mut frame);
        for (dst, src) in row.iter_mut().zip(frame) {
            *dst = src;
        }
    }
    output
}

// Slaney-normalized triangular filters on the HTK mel scale
fn mel_filter_bank(sr: f32, n_fft: f32, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let fft_freqs = (0..(n_fft as usize / 2 + 1))
        .map(|i| i as f32 * sr / n_fft)
        .collect::<Vec<_>>();
    let n_freqs = fft_freqs.len();

    let mel_min = 2595.0 * (1.0 + fmin / 700.0).log10();
    let mel_max = 2595.0 * (1.0 + fmax / 700.0).log10();

    let mels = (0..(n_mels + 2))
        .map(|i| {
            let m = mel_min + (mel_max - mel_min) * i as f32 / (n_mels as f32 + 1.0);
            700.0 * (10.0f32.powf(m / 2595.0) - 1.0)
        })
        .collect::<Vec<_>>();

    let mut weights = Array2::<f32>::zeros((n_freqs, n_mels));

    for i in 0..n_mels {
        let (f_prev, f_curr, f_next) = (mels[i], mels[i + 1], mels[i + 2]);
        for (j, &freq) in fft_freqs.iter().enumerate() {
            if freq >= f_prev && freq < f_curr {
                weights[[j, i]] = (freq - f_prev) / (f_curr - f_prev);
            } else if freq >= f_curr && freq < f_next {
                weights[[j, i]] = (f_next - freq) / (f_next - f_curr);
            }
        }
        let norm_factor = 2.0 / (f_next - f_prev);
        weights
            .slice_mut(ndarray::s![.., i])
            .mapv_inplace(|x| x * norm_factor);
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in frames {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn spectrogram_has_whisper_shape() {
        let processor = AudioProcessor::new(80).unwrap();
        let tone: Vec<f32> = (0..SAMPLE_RATE)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.5)
            .collect();
        let mel = processor.process_pcm(&tone);
        assert_eq!(mel.shape(), &[80, N_FRAMES]);
        assert!(mel.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn supports_large_mel_banks() {
        let processor = AudioProcessor::new(128).unwrap();
        assert_eq!(processor.process_pcm(&[]).shape(), &[128, N_FRAMES]);
    }

    #[test]
    fn zero_mels_is_rejected() {
        assert!(AudioProcessor::new(0).is_err());
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 16000, 2, &[16384, 0, -16384, -16384]);
        let (samples, sr) = read_wav(&path).unwrap();
        assert_eq!(sr, 16000);
        assert_eq!(samples, vec![0.25, -0.5]);
    }

    #[test]
    fn non_16k_audio_is_resampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("8k.wav");
        write_wav(&path, 8000, 1, &vec![1000; 8000]);
        let samples = load_audio(&path).unwrap();
        let expected = SAMPLE_RATE as f32;
        assert!((samples.len() as f32 - expected).abs() / expected < 0.05, "got {}", samples.len());
    }

    #[test]
    fn missing_file_fails_cleanly() {
        let err = load_audio(Path::new("/definitely/not/here/welcome.wav")).unwrap_err();
        assert!(matches!(err, Error::InputNotFound(_)));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not audio").unwrap();
        let err = load_audio(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(ext) if ext == "txt"));
    }
}
