//! Compute backend discovery.
//!
//! Which execution provider a recognizer runs on is decided once, from a
//! [`Capabilities`] snapshot. The snapshot comes from a [`CapabilityProvider`]
//! so the selection rules can be exercised without any hardware present.

use std::fmt;
use std::str::FromStr;

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider, OneDNNExecutionProvider,
    OpenVINOExecutionProvider,
};

use crate::error::{catch_runtime, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Specialized accelerator runtime (OpenVINO).
    Accelerator,
    /// CUDA GPU.
    Gpu,
    Cpu,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accelerator => "accelerator",
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accelerator" | "hpu" => Ok(Self::Accelerator),
            "gpu" | "cuda" => Ok(Self::Gpu),
            "cpu" => Ok(Self::Cpu),
            other => Err(Error::InvalidRequest(format!("unknown backend `{other}`"))),
        }
    }
}

/// What the runtime reported as usable on this machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub accelerator: bool,
    pub gpu: bool,
    /// Reduced-precision CPU extension (oneDNN).
    pub reduced_precision: bool,
}

pub trait CapabilityProvider {
    fn probe(&self) -> Capabilities;
}

impl CapabilityProvider for Capabilities {
    fn probe(&self) -> Capabilities {
        *self
    }
}

/// Asks ONNX Runtime which execution providers it can load.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrtCapabilities;

impl CapabilityProvider for OrtCapabilities {
    fn probe(&self) -> Capabilities {
        // Without a loadable runtime nothing but the plain CPU path is usable.
        if !provider_available("cpu", &CPUExecutionProvider::default()) {
            tracing::debug!("onnx runtime could not be loaded, reporting no capabilities");
            return Capabilities::default();
        }
        let caps = Capabilities {
            accelerator: provider_available("openvino", &OpenVINOExecutionProvider::default()),
            gpu: provider_available("cuda", &CUDAExecutionProvider::default()),
            reduced_precision: provider_available("onednn", &OneDNNExecutionProvider::default()),
        };
        tracing::debug!(?caps, "probed execution providers");
        caps
    }
}

fn provider_available(name: &str, provider: &impl ExecutionProvider) -> bool {
    match catch_runtime(|| provider.is_available()) {
        Ok(Ok(available)) => available,
        Ok(Err(e)) => {
            tracing::debug!(provider = name, error = %e, "execution provider probe failed");
            false
        }
        Err(e) => {
            tracing::debug!(provider = name, error = %e, "onnx runtime unavailable");
            false
        }
    }
}

/// Accelerator beats GPU; CPU is the fallback.
pub fn select_backend(caps: &Capabilities) -> Backend {
    if caps.accelerator {
        Backend::Accelerator
    } else if caps.gpu {
        Backend::Gpu
    } else {
        Backend::Cpu
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendPlan {
    pub backend: Backend,
    /// Whether a second, reduced-precision recognizer should be built.
    pub reduced_precision: bool,
}

pub fn plan(provider: &dyn CapabilityProvider) -> BackendPlan {
    let caps = provider.probe();
    let backend = select_backend(&caps);
    let plan = BackendPlan {
        backend,
        reduced_precision: backend == Backend::Cpu && caps.reduced_precision,
    };
    tracing::info!(backend = %plan.backend, reduced_precision = plan.reduced_precision, "selected backend");
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProvider {
        caps: Capabilities,
    }

    impl CapabilityProvider for FakeProvider {
        fn probe(&self) -> Capabilities {
            self.caps
        }
    }

    fn caps(accelerator: bool, gpu: bool, reduced_precision: bool) -> Capabilities {
        Capabilities {
            accelerator,
            gpu,
            reduced_precision,
        }
    }

    #[test]
    fn selection_is_total_and_prioritized() {
        for accelerator in [false, true] {
            for gpu in [false, true] {
                for reduced in [false, true] {
                    let selected = select_backend(&caps(accelerator, gpu, reduced));
                    let expected = if accelerator {
                        Backend::Accelerator
                    } else if gpu {
                        Backend::Gpu
                    } else {
                        Backend::Cpu
                    };
                    assert_eq!(selected, expected, "accelerator={accelerator} gpu={gpu}");
                }
            }
        }
    }

    #[test]
    fn accelerator_wins_over_gpu() {
        assert_eq!(select_backend(&caps(true, true, false)), Backend::Accelerator);
    }

    #[test]
    fn reduced_precision_only_planned_on_cpu() {
        let cpu = plan(&FakeProvider { caps: caps(false, false, true) });
        assert_eq!(cpu.backend, Backend::Cpu);
        assert!(cpu.reduced_precision);

        let gpu = plan(&FakeProvider { caps: caps(false, true, true) });
        assert_eq!(gpu.backend, Backend::Gpu);
        assert!(!gpu.reduced_precision);

        let accel = plan(&FakeProvider { caps: caps(true, false, true) });
        assert_eq!(accel.backend, Backend::Accelerator);
        assert!(!accel.reduced_precision);
    }

    #[test]
    fn no_extension_means_no_reduced_variant() {
        let p = plan(&caps(false, false, false));
        assert_eq!(
            p,
            BackendPlan {
                backend: Backend::Cpu,
                reduced_precision: false
            }
        );
    }

    #[test]
    fn parses_backend_names_and_aliases() {
        assert_eq!("hpu".parse::<Backend>().unwrap(), Backend::Accelerator);
        assert_eq!("CUDA".parse::<Backend>().unwrap(), Backend::Gpu);
        assert_eq!(" cpu ".parse::<Backend>().unwrap(), Backend::Cpu);
        assert!("tpu".parse::<Backend>().is_err());
        assert_eq!(Backend::Gpu.to_string(), "gpu");
    }
}
