//! Plugin recalls driven through the core scheduler.

use std::sync::Arc;

use ripieno_core::arena::Arena;
use ripieno_core::graph::audio::AudioEntry;
use ripieno_core::{
    AudioId, AudioRuntime, ChannelRef, Direction, Driver, EngineConfig, EngineEvent, Note,
    Notifier, PatternData, ProcessorFactory, RecallProcessor, ScopeRef, SoundScope, Strand,
    TemplateKind, Waveform,
};
use ripieno_plugin::{
    native_template, PluginProcessor, PluginSpec, PortDescriptor, PortDirection, PortKind,
    RangeHint, UnitMetadata,
};

// ---------------------------------------------------------------------
// A pure-Rust stand-in for a native unit: out = in * gain.
// ---------------------------------------------------------------------

struct MockGainUnit {
    metadata: UnitMetadata,
    ports: Vec<PortDescriptor>,
    gain: *mut f32,
    input: *mut f32,
    output: *mut f32,
}

unsafe impl Send for MockGainUnit {}

impl MockGainUnit {
    fn new(default_gain: f32) -> Self {
        Self {
            metadata: UnitMetadata {
                label: "mock_gain".into(),
                name: "Mock Gain".into(),
                maker: "tests".into(),
                samplerate: None,
            },
            ports: vec![
                PortDescriptor {
                    index: 0,
                    name: "Gain".into(),
                    direction: PortDirection::Input,
                    kind: PortKind::Control,
                    range: RangeHint {
                        lower: Some(0.0),
                        upper: Some(2.0),
                        default: Some(default_gain),
                    },
                },
                PortDescriptor {
                    index: 1,
                    name: "Input".into(),
                    direction: PortDirection::Input,
                    kind: PortKind::Audio,
                    range: RangeHint::default(),
                },
                PortDescriptor {
                    index: 2,
                    name: "Output".into(),
                    direction: PortDirection::Output,
                    kind: PortKind::Audio,
                    range: RangeHint::default(),
                },
            ],
            gain: std::ptr::null_mut(),
            input: std::ptr::null_mut(),
            output: std::ptr::null_mut(),
        }
    }
}

impl ripieno_plugin::NativeUnit for MockGainUnit {
    fn metadata(&self) -> &UnitMetadata {
        &self.metadata
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut f32) {
        match index {
            0 => self.gain = buffer,
            1 => self.input = buffer,
            2 => self.output = buffer,
            _ => {}
        }
    }

    fn run(&mut self, sample_count: usize) {
        if self.input.is_null() || self.output.is_null() {
            return;
        }
        let gain = if self.gain.is_null() {
            1.0
        } else {
            unsafe { *self.gain }
        };
        for i in 0..sample_count {
            unsafe { *self.output.add(i) = *self.input.add(i) * gain };
        }
    }
}

struct MockGainFactory {
    gain: f32,
}

impl ProcessorFactory for MockGainFactory {
    fn label(&self) -> &str {
        "mock_gain"
    }

    fn make(&self, config: &EngineConfig) -> ripieno_core::Result<Box<dyn RecallProcessor>> {
        Ok(Box::new(PluginProcessor::new(
            Box::new(MockGainUnit::new(self.gain)),
            config,
        )))
    }
}

// ---------------------------------------------------------------------

fn build_driver(
    config: &EngineConfig,
    plugin_kind: Option<TemplateKind>,
) -> (
    Driver,
    AudioId,
    crossbeam_channel::Receiver<EngineEvent>,
) {
    let mut arena: Arena<AudioEntry> = Arena::new();
    let id = arena.insert(AudioEntry { runtime: None });
    let mut runtime = AudioRuntime::new(id, config);
    runtime.resize_pads(Direction::Input, 1, 0, config).unwrap();
    runtime.resize_pads(Direction::Output, 1, 0, config).unwrap();

    runtime
        .templates
        .register(TemplateKind::Counter, ScopeRef::Audio(id), Vec::new())
        .unwrap();
    let note = Note::new(440.0, 1500).with_waveform(Waveform::Square);
    runtime
        .templates
        .register(
            TemplateKind::Pattern(PatternData::new(16).with_row(0, &[0], note)),
            ScopeRef::Audio(id),
            Vec::new(),
        )
        .unwrap();
    for audio_channel in 0..config.audio_channels {
        let channel = runtime
            .channel_at(Direction::Input, 0, audio_channel)
            .unwrap();
        runtime
            .templates
            .register(
                TemplateKind::Stream,
                ScopeRef::Recycling(ChannelRef { audio: id, channel }),
                Vec::new(),
            )
            .unwrap();
    }
    if let Some(kind) = plugin_kind {
        // Plugin on audio channel 0 only; channel 1 stays dry.
        let channel = runtime.channel_at(Direction::Input, 0, 0).unwrap();
        runtime
            .templates
            .register(
                kind,
                ScopeRef::Recycling(ChannelRef { audio: id, channel }),
                Vec::new(),
            )
            .unwrap();
    }
    runtime
        .templates
        .register(
            TemplateKind::Output { master: true },
            ScopeRef::Audio(id),
            Vec::new(),
        )
        .unwrap();

    let (notifier, events) = Notifier::channel();
    let driver = Driver::new(
        Strand::new(vec![(id, runtime)]),
        config.clone(),
        notifier,
        Arc::new(atomic_float::AtomicF64::new(120.0)),
    );
    (driver, id, events)
}

#[test]
fn test_plugin_scales_its_channel_of_the_mix() {
    let config = EngineConfig::default();
    let kind = TemplateKind::Native(Arc::new(MockGainFactory { gain: 0.5 }));
    let (mut driver, _audio, _events) = build_driver(&config, Some(kind));
    driver.begin_pass(SoundScope::Sequencer);

    // Run past the first beat and find a frame with signal.
    let mut checked = false;
    for _ in 0..30 {
        let frame = driver.run_tic().to_vec();
        let has_signal = frame.iter().any(|s| s.abs() > 1e-6);
        if has_signal {
            for i in 0..config.buffer_size {
                let left = frame[i * 2];
                let right = frame[i * 2 + 1];
                assert!(
                    (left - right * 0.5).abs() < 1e-5,
                    "left channel runs through the gain plugin: {left} vs {right}"
                );
            }
            checked = true;
            break;
        }
    }
    assert!(checked, "a note reached the sink");
}

#[test]
fn test_failed_plugin_load_forces_done_and_keeps_the_tic_alive() {
    let config = EngineConfig::default();
    let kind = native_template(PluginSpec::ladspa("/nonexistent/amp.so", None));
    let (mut driver, _audio, events) = build_driver(&config, Some(kind));
    driver.begin_pass(SoundScope::Sequencer);

    let mut heard = false;
    for _ in 0..30 {
        let frame = driver.run_tic();
        heard |= frame.iter().any(|s| s.abs() > 1e-6);
    }

    let diagnostics: Vec<String> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::RecallDone {
                diagnostic: Some(d),
                ..
            } => Some(d),
            _ => None,
        })
        .collect();
    assert!(
        diagnostics.iter().any(|d| d.contains("plugin load failed")),
        "recall-done carries the load failure: {diagnostics:?}"
    );
    assert!(heard, "the dry channels still reach the sink");
}
