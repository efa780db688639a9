//! LADSPA plugin loading.
//!
//! Binds the stable C ABI directly: a shared object exports
//! `ladspa_descriptor(index)` returning static descriptors whose
//! function pointers the host calls with an opaque instance handle.

use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::error::{LoadStage, PluginError, Result};
use crate::port::{PortDescriptor, PortDirection, PortKind, RangeHint};
use crate::unit::{NativeUnit, UnitMetadata};

pub const LADSPA_PORT_INPUT: c_int = 0x1;
pub const LADSPA_PORT_OUTPUT: c_int = 0x2;
pub const LADSPA_PORT_CONTROL: c_int = 0x4;
pub const LADSPA_PORT_AUDIO: c_int = 0x8;

pub const LADSPA_HINT_BOUNDED_BELOW: c_int = 0x1;
pub const LADSPA_HINT_BOUNDED_ABOVE: c_int = 0x2;
pub const LADSPA_HINT_DEFAULT_MASK: c_int = 0x3C0;
pub const LADSPA_HINT_DEFAULT_MINIMUM: c_int = 0x40;
pub const LADSPA_HINT_DEFAULT_MIDDLE: c_int = 0xC0;
pub const LADSPA_HINT_DEFAULT_MAXIMUM: c_int = 0x140;
pub const LADSPA_HINT_DEFAULT_0: c_int = 0x200;
pub const LADSPA_HINT_DEFAULT_1: c_int = 0x240;

#[repr(C)]
pub struct LadspaPortRangeHint {
    pub hint_descriptor: c_int,
    pub lower_bound: f32,
    pub upper_bound: f32,
}

pub type LadspaHandle = *mut c_void;

#[repr(C)]
pub struct LadspaDescriptor {
    pub unique_id: c_ulong,
    pub label: *const c_char,
    pub properties: c_int,
    pub name: *const c_char,
    pub maker: *const c_char,
    pub copyright: *const c_char,
    pub port_count: c_ulong,
    pub port_descriptors: *const c_int,
    pub port_names: *const *const c_char,
    pub port_range_hints: *const LadspaPortRangeHint,
    pub implementation_data: *mut c_void,
    pub instantiate:
        Option<unsafe extern "C" fn(*const LadspaDescriptor, c_ulong) -> LadspaHandle>,
    pub connect_port: Option<unsafe extern "C" fn(LadspaHandle, c_ulong, *mut f32)>,
    pub activate: Option<unsafe extern "C" fn(LadspaHandle)>,
    pub run: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    pub run_adding: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    pub set_run_adding_gain: Option<unsafe extern "C" fn(LadspaHandle, f32)>,
    pub deactivate: Option<unsafe extern "C" fn(LadspaHandle)>,
    pub cleanup: Option<unsafe extern "C" fn(LadspaHandle)>,
}

type LadspaDescriptorFn = unsafe extern "C" fn(c_ulong) -> *const LadspaDescriptor;

fn cstr_or_empty(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Control-port default from the hint bits, if one is declared.
pub fn default_from_hint(hint: c_int, lower: f32, upper: f32) -> Option<f32> {
    match hint & LADSPA_HINT_DEFAULT_MASK {
        x if x == LADSPA_HINT_DEFAULT_MINIMUM => Some(lower),
        x if x == LADSPA_HINT_DEFAULT_MIDDLE => Some(0.5 * (lower + upper)),
        x if x == LADSPA_HINT_DEFAULT_MAXIMUM => Some(upper),
        x if x == LADSPA_HINT_DEFAULT_0 => Some(0.0),
        x if x == LADSPA_HINT_DEFAULT_1 => Some(1.0),
        _ => None,
    }
}

/// Translate one LADSPA port entry into the uniform descriptor.
pub fn parse_port(
    index: u32,
    name: String,
    descriptor_bits: c_int,
    hint: &LadspaPortRangeHint,
) -> Option<PortDescriptor> {
    let direction = if descriptor_bits & LADSPA_PORT_INPUT != 0 {
        PortDirection::Input
    } else if descriptor_bits & LADSPA_PORT_OUTPUT != 0 {
        PortDirection::Output
    } else {
        return None;
    };
    let kind = if descriptor_bits & LADSPA_PORT_CONTROL != 0 {
        PortKind::Control
    } else if descriptor_bits & LADSPA_PORT_AUDIO != 0 {
        PortKind::Audio
    } else {
        return None;
    };
    let lower = (hint.hint_descriptor & LADSPA_HINT_BOUNDED_BELOW != 0)
        .then_some(hint.lower_bound);
    let upper = (hint.hint_descriptor & LADSPA_HINT_BOUNDED_ABOVE != 0)
        .then_some(hint.upper_bound);
    Some(PortDescriptor {
        index,
        name,
        direction,
        kind,
        range: RangeHint {
            lower,
            upper,
            default: default_from_hint(
                hint.hint_descriptor,
                hint.lower_bound,
                hint.upper_bound,
            ),
        },
    })
}

unsafe fn parse_ports(descriptor: &LadspaDescriptor) -> Vec<PortDescriptor> {
    let count = descriptor.port_count as usize;
    let mut ports = Vec::with_capacity(count);
    for index in 0..count {
        let bits = *descriptor.port_descriptors.add(index);
        let name = cstr_or_empty(*descriptor.port_names.add(index));
        let hint = &*descriptor.port_range_hints.add(index);
        if let Some(port) = parse_port(index as u32, name, bits, hint) {
            ports.push(port);
        }
    }
    ports
}

/// An opened LADSPA shared object.
#[derive(Debug)]
pub struct LadspaLibrary {
    library: Arc<Library>,
    path: PathBuf,
}

impl LadspaLibrary {
    pub fn open(path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Opening,
            reason: e.to_string(),
        })?;
        Ok(Self {
            library: Arc::new(library),
            path: path.to_path_buf(),
        })
    }

    fn entry(&self) -> Result<libloading::Symbol<'_, LadspaDescriptorFn>> {
        unsafe { self.library.get(b"ladspa_descriptor\0") }.map_err(|e| {
            PluginError::LoadFailed {
                path: self.path.clone(),
                stage: LoadStage::EntryPoint,
                reason: e.to_string(),
            }
        })
    }

    /// Labels of every descriptor the library exports.
    pub fn labels(&self) -> Result<Vec<String>> {
        let entry = self.entry()?;
        let mut labels = Vec::new();
        let mut index: c_ulong = 0;
        loop {
            let descriptor = unsafe { entry(index) };
            if descriptor.is_null() {
                break;
            }
            labels.push(cstr_or_empty(unsafe { (*descriptor).label }));
            index += 1;
        }
        Ok(labels)
    }

    /// Instantiate the descriptor with the given label (or the first one
    /// when `None`) at the engine samplerate.
    pub fn instantiate(&self, label: Option<&str>, samplerate: u32) -> Result<LadspaUnit> {
        let entry = self.entry()?;
        let mut index: c_ulong = 0;
        let descriptor = loop {
            let descriptor = unsafe { entry(index) };
            if descriptor.is_null() {
                return Err(match label {
                    Some(label) => PluginError::UnknownLabel {
                        path: self.path.clone(),
                        label: label.to_string(),
                    },
                    None => PluginError::LoadFailed {
                        path: self.path.clone(),
                        stage: LoadStage::Descriptor,
                        reason: "library exports no descriptors".into(),
                    },
                });
            }
            let found = cstr_or_empty(unsafe { (*descriptor).label });
            if label.map(|l| l == found).unwrap_or(true) {
                break descriptor;
            }
            index += 1;
        };

        LadspaUnit::from_descriptor(descriptor, Arc::clone(&self.library), &self.path, samplerate)
    }
}

/// One instantiated LADSPA unit.
pub struct LadspaUnit {
    descriptor: *const LadspaDescriptor,
    handle: LadspaHandle,
    metadata: UnitMetadata,
    ports: Vec<PortDescriptor>,
    active: bool,
    // Keeps the shared object mapped for as long as the handle lives.
    _library: Arc<Library>,
}

// The handle is only ever driven from the thread owning the recall
// instance; LADSPA requires no more than that.
unsafe impl Send for LadspaUnit {}

impl LadspaUnit {
    pub(crate) fn from_descriptor(
        descriptor: *const LadspaDescriptor,
        library: Arc<Library>,
        path: &Path,
        samplerate: u32,
    ) -> Result<Self> {
        let reference = unsafe { &*descriptor };
        let instantiate = reference.instantiate.ok_or_else(|| PluginError::LoadFailed {
            path: path.to_path_buf(),
            stage: LoadStage::Descriptor,
            reason: "descriptor has no instantiate".into(),
        })?;
        let handle = unsafe { instantiate(descriptor, samplerate as c_ulong) };
        if handle.is_null() {
            return Err(PluginError::LoadFailed {
                path: path.to_path_buf(),
                stage: LoadStage::Instantiation,
                reason: "instantiate returned null".into(),
            });
        }

        let ports = unsafe { parse_ports(reference) };
        let metadata = UnitMetadata {
            label: cstr_or_empty(reference.label),
            name: cstr_or_empty(reference.name),
            maker: cstr_or_empty(reference.maker),
            samplerate: None,
        };
        tracing::debug!(label = %metadata.label, ports = ports.len(), "instantiated LADSPA unit");
        Ok(Self {
            descriptor,
            handle,
            metadata,
            ports,
            active: false,
            _library: library,
        })
    }

    fn descriptor(&self) -> &LadspaDescriptor {
        unsafe { &*self.descriptor }
    }

    pub(crate) fn raw_handle(&self) -> LadspaHandle {
        self.handle
    }
}

impl NativeUnit for LadspaUnit {
    fn metadata(&self) -> &UnitMetadata {
        &self.metadata
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut f32) {
        if self.ports.iter().all(|p| p.index != index) {
            // Un-advertised port: skipped, not a fault.
            return;
        }
        if let Some(connect) = self.descriptor().connect_port {
            connect(self.handle, index as c_ulong, buffer);
        }
    }

    fn activate(&mut self) {
        if let Some(activate) = self.descriptor().activate {
            unsafe { activate(self.handle) };
        }
        self.active = true;
    }

    fn run(&mut self, sample_count: usize) {
        if let Some(run) = self.descriptor().run {
            unsafe { run(self.handle, sample_count as c_ulong) };
        }
    }

    fn deactivate(&mut self) {
        if self.active {
            if let Some(deactivate) = self.descriptor().deactivate {
                unsafe { deactivate(self.handle) };
            }
            self.active = false;
        }
    }
}

impl Drop for LadspaUnit {
    fn drop(&mut self) {
        self.deactivate();
        if let Some(cleanup) = self.descriptor().cleanup {
            unsafe { cleanup(self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_direction_and_kind() {
        let hint = LadspaPortRangeHint {
            hint_descriptor: LADSPA_HINT_BOUNDED_BELOW
                | LADSPA_HINT_BOUNDED_ABOVE
                | LADSPA_HINT_DEFAULT_MIDDLE,
            lower_bound: 0.0,
            upper_bound: 2.0,
        };
        let port = parse_port(
            3,
            "Gain".into(),
            LADSPA_PORT_INPUT | LADSPA_PORT_CONTROL,
            &hint,
        )
        .unwrap();
        assert_eq!(port.direction, PortDirection::Input);
        assert_eq!(port.kind, PortKind::Control);
        assert_eq!(port.range.lower, Some(0.0));
        assert_eq!(port.range.upper, Some(2.0));
        assert_eq!(port.range.default, Some(1.0));
    }

    #[test]
    fn test_parse_port_rejects_malformed_bits() {
        let hint = LadspaPortRangeHint {
            hint_descriptor: 0,
            lower_bound: 0.0,
            upper_bound: 0.0,
        };
        assert!(parse_port(0, "x".into(), LADSPA_PORT_CONTROL, &hint).is_none());
        assert!(parse_port(0, "x".into(), LADSPA_PORT_INPUT, &hint).is_none());
    }

    #[test]
    fn test_default_hints() {
        assert_eq!(default_from_hint(LADSPA_HINT_DEFAULT_0, -1.0, 1.0), Some(0.0));
        assert_eq!(default_from_hint(LADSPA_HINT_DEFAULT_1, -1.0, 1.0), Some(1.0));
        assert_eq!(
            default_from_hint(LADSPA_HINT_DEFAULT_MAXIMUM, -1.0, 1.0),
            Some(1.0)
        );
        assert_eq!(default_from_hint(0, -1.0, 1.0), None);
    }

    #[test]
    fn test_open_missing_library_fails_at_opening() {
        let err = LadspaLibrary::open(Path::new("/nonexistent/plugin.so")).unwrap_err();
        assert!(matches!(
            err,
            PluginError::LoadFailed {
                stage: LoadStage::Opening,
                ..
            }
        ));
    }
}
