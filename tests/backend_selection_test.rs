use neural_chat_audio::{plan, select_backend, Backend, Capabilities, CapabilityProvider};

/// Stands in for the hardware probe.
struct FakeCapabilities(Capabilities);

impl CapabilityProvider for FakeCapabilities {
    fn probe(&self) -> Capabilities {
        self.0
    }
}

fn fake(accelerator: bool, gpu: bool, reduced_precision: bool) -> FakeCapabilities {
    FakeCapabilities(Capabilities {
        accelerator,
        gpu,
        reduced_precision,
    })
}

#[test]
fn exactly_one_backend_for_every_combination() {
    let cases = [
        (true, true, Backend::Accelerator),
        (true, false, Backend::Accelerator),
        (false, true, Backend::Gpu),
        (false, false, Backend::Cpu),
    ];
    for (accelerator, gpu, expected) in cases {
        assert_eq!(plan(&fake(accelerator, gpu, false)).backend, expected);
        assert_eq!(select_backend(&fake(accelerator, gpu, true).probe()), expected);
    }
}

#[test]
fn selection_is_deterministic() {
    let provider = fake(false, true, true);
    let first = plan(&provider);
    for _ in 0..10 {
        assert_eq!(plan(&provider), first);
    }
}

#[test]
fn reduced_precision_variant_needs_cpu_and_extension() {
    assert!(plan(&fake(false, false, true)).reduced_precision);
    assert!(!plan(&fake(false, false, false)).reduced_precision);
    assert!(!plan(&fake(false, true, true)).reduced_precision);
    assert!(!plan(&fake(true, false, true)).reduced_precision);
}
