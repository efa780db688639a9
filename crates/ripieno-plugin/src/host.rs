//! Port binding and the plugin recall processor.

use std::path::PathBuf;
use std::sync::Arc;

use ripieno_core::{EngineConfig, ProcessCx, ProcessorFactory, RecallProcessor, TemplateKind};

use crate::dssi::DssiLibrary;
use crate::error::PluginError;
use crate::ladspa::LadspaLibrary;
use crate::lv2::Lv2Library;
use crate::port::{PortBlock, PortDescriptor, PortDirection, PortKind};
use crate::unit::NativeUnit;

/// Allocate host buffers for every advertised port and bind them by
/// index: one scalar per control port, one channel-count x buffer-size
/// block per audio port.
pub fn load_ports(unit: &mut dyn NativeUnit, channels: usize, buffer_size: usize) -> PortBlock {
    let ports = unit.ports().to_vec();
    let mut block = PortBlock::allocate(&ports, channels, buffer_size);
    for port in &ports {
        let pointer = match port.kind {
            PortKind::Control => block.control_ptr(port.index),
            PortKind::Audio => block.audio_ptr(port.index),
        };
        if let Some(pointer) = pointer {
            // SAFETY: the block outlives the unit inside PluginProcessor
            // and each pointer targets a distinct buffer.
            unsafe { unit.connect_port(port.index, pointer) };
        }
    }
    block
}

/// Linear interpolation between sampling grids.
pub fn resample_linear(input: &[f32], output: &mut [f32]) {
    if output.is_empty() {
        return;
    }
    if input.is_empty() {
        output.fill(0.0);
        return;
    }
    if input.len() == 1 || output.len() == 1 {
        output.fill(input[0]);
        return;
    }
    let step = (input.len() - 1) as f64 / (output.len() - 1) as f64;
    for (i, out) in output.iter_mut().enumerate() {
        let position = i as f64 * step;
        let base = position as usize;
        let frac = (position - base as f64) as f32;
        let a = input[base];
        let b = input[(base + 1).min(input.len() - 1)];
        *out = a + (b - a) * frac;
    }
}

/// Recall processor wrapping one native unit. Runs in the run phase on
/// the recycling's pass mix: copy in (resampling if the unit is fixed to
/// another rate), invoke the block entry point, copy back out.
pub struct PluginProcessor {
    unit: Box<dyn NativeUnit>,
    block: PortBlock,
    input_port: Option<u32>,
    output_port: Option<u32>,
    /// Unit-rate block length when resampling, engine block length
    /// otherwise.
    unit_block: usize,
    engine_block: usize,
    scratch: Vec<f32>,
    drained: bool,
}

impl PluginProcessor {
    pub fn new(mut unit: Box<dyn NativeUnit>, config: &EngineConfig) -> Self {
        let engine_block = config.buffer_size;
        let unit_block = match unit.metadata().samplerate {
            Some(rate) if rate != config.samplerate => {
                ((engine_block as u64 * rate as u64) / config.samplerate as u64).max(1) as usize
            }
            _ => engine_block,
        };
        let block = load_ports(
            unit.as_mut(),
            config.audio_channels,
            engine_block.max(unit_block),
        );
        let ports = unit.ports();
        let input_port = ports
            .iter()
            .find(|p| p.is(PortDirection::Input, PortKind::Audio))
            .map(|p| p.index);
        let output_port = ports
            .iter()
            .find(|p| p.is(PortDirection::Output, PortKind::Audio))
            .map(|p| p.index);
        unit.activate();
        Self {
            unit,
            block,
            input_port,
            output_port,
            unit_block,
            engine_block,
            scratch: Vec::new(),
            drained: false,
        }
    }

    pub fn set_control(&mut self, index: u32, value: f32) {
        self.block.set_control(index, value);
    }
}

impl RecallProcessor for PluginProcessor {
    fn run(&mut self, cx: &mut ProcessCx<'_>) -> ripieno_core::Result<()> {
        let Some(channel_ref) = cx.scope.channel() else {
            return Ok(());
        };
        let (Some(input_port), Some(output_port)) = (self.input_port, self.output_port) else {
            return Ok(());
        };
        let root = cx.root;
        let tic = cx.tic_index;
        let buffer_size = cx.config.buffer_size;

        let Some(runtime) = cx.strand.get_mut(channel_ref.audio) else {
            return Ok(());
        };
        let Some(recycling) = runtime.recycling_of_mut(channel_ref.channel) else {
            return Ok(());
        };
        // Nothing mixed this tic: the slot stays silent.
        let Some(mix) = recycling.mix_if_current(root, tic) else {
            return Ok(());
        };
        self.scratch.clear();
        self.scratch.extend_from_slice(mix);

        if let Some(lane) = self.block.audio_lane_mut(input_port) {
            if self.unit_block == self.engine_block {
                lane[..buffer_size].copy_from_slice(&self.scratch);
            } else {
                resample_linear(&self.scratch, &mut lane[..self.unit_block]);
            }
        }
        self.unit.run(self.unit_block);

        let mix = recycling.mix_for(root, tic, buffer_size);
        if let Some(lane) = self.block.audio_lane(output_port) {
            if self.unit_block == self.engine_block {
                mix.copy_from_slice(&lane[..buffer_size]);
            } else {
                resample_linear(&lane[..self.unit_block], mix);
            }
        }
        Ok(())
    }

    fn post(&mut self, cx: &mut ProcessCx<'_>) -> ripieno_core::Result<()> {
        // A note-scoped plugin slot finishes with its context's signals,
        // like the stream recall it rides on.
        if let Some(channel_ref) = cx.scope.channel() {
            let silent = cx
                .strand
                .get(channel_ref.audio)
                .and_then(|rt| rt.recycling_of(channel_ref.channel))
                .map(|r| !r.has_signals_for(cx.context))
                .unwrap_or(true);
            if silent {
                self.drained = true;
            }
        }
        Ok(())
    }

    fn cancel(&mut self) {
        // Cancellation releases native resources ahead of the drop.
        self.unit.deactivate();
    }

    fn finished(&self) -> bool {
        self.drained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginFormat {
    Ladspa,
    Dssi,
    Lv2,
}

/// Everything needed to load one native unit at duplication time.
#[derive(Clone)]
pub struct PluginSpec {
    pub format: PluginFormat,
    pub path: PathBuf,
    /// LADSPA/DSSI label or LV2 URI; `None` takes the first descriptor.
    pub label: Option<String>,
    /// LV2 port metadata from the bundle manifest (parsed upstream).
    pub lv2_ports: Vec<PortDescriptor>,
}

impl PluginSpec {
    pub fn ladspa(path: impl Into<PathBuf>, label: Option<String>) -> Self {
        Self {
            format: PluginFormat::Ladspa,
            path: path.into(),
            label,
            lv2_ports: Vec::new(),
        }
    }

    pub fn dssi(path: impl Into<PathBuf>, label: Option<String>) -> Self {
        Self {
            format: PluginFormat::Dssi,
            path: path.into(),
            label,
            lv2_ports: Vec::new(),
        }
    }

    pub fn lv2(path: impl Into<PathBuf>, uri: Option<String>, ports: Vec<PortDescriptor>) -> Self {
        Self {
            format: PluginFormat::Lv2,
            path: path.into(),
            label: uri,
            lv2_ports: ports,
        }
    }
}

/// Factory handed to the engine as `TemplateKind::Native`. Instantiation
/// happens per duplicated instance; a failure forces that instance to
/// Done with a `PluginLoadFailure` diagnostic and the slot plays silence.
pub struct PluginRecallFactory {
    spec: PluginSpec,
    display: String,
}

impl PluginRecallFactory {
    pub fn new(spec: PluginSpec) -> Self {
        let display = spec
            .label
            .clone()
            .or_else(|| {
                spec.path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "plugin".to_string());
        Self { spec, display }
    }

    fn load(&self, config: &EngineConfig) -> Result<Box<dyn NativeUnit>, PluginError> {
        let label = self.spec.label.as_deref();
        Ok(match self.spec.format {
            PluginFormat::Ladspa => Box::new(
                LadspaLibrary::open(&self.spec.path)?.instantiate(label, config.samplerate)?,
            ),
            PluginFormat::Dssi => Box::new(
                DssiLibrary::open(&self.spec.path)?.instantiate(label, config.samplerate)?,
            ),
            PluginFormat::Lv2 => Box::new(Lv2Library::open(&self.spec.path)?.instantiate(
                label,
                self.spec.lv2_ports.clone(),
                config.samplerate,
            )?),
        })
    }
}

impl ProcessorFactory for PluginRecallFactory {
    fn label(&self) -> &str {
        &self.display
    }

    fn make(&self, config: &EngineConfig) -> ripieno_core::Result<Box<dyn RecallProcessor>> {
        let unit = self.load(config)?;
        tracing::info!(plugin = %self.display, "loaded native unit");
        Ok(Box::new(PluginProcessor::new(unit, config)))
    }
}

/// Template kind for one native plugin slot.
pub fn native_template(spec: PluginSpec) -> TemplateKind {
    TemplateKind::Native(Arc::new(PluginRecallFactory::new(spec)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_linear_identity() {
        let input = [0.0, 1.0, 2.0, 3.0];
        let mut output = [0.0; 4];
        resample_linear(&input, &mut output);
        assert_eq!(output, input);
    }

    #[test]
    fn test_resample_linear_upsample_endpoints() {
        let input = [0.0, 1.0];
        let mut output = [0.0; 5];
        resample_linear(&input, &mut output);
        assert_eq!(output[0], 0.0);
        assert_eq!(output[4], 1.0);
        assert!((output[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_linear_empty_input_silences() {
        let mut output = [1.0; 3];
        resample_linear(&[], &mut output);
        assert_eq!(output, [0.0; 3]);
    }
}
