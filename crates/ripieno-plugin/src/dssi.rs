//! DSSI plugin loading.
//!
//! A DSSI descriptor wraps a LADSPA descriptor and adds synth entry
//! points. Hosted here as an effect/instrument without MIDI delivery:
//! audio runs through `run_synth` with an empty event list when the
//! plugin provides it, plain LADSPA `run` otherwise.

use std::ffi::{c_char, c_int, c_ulong, c_void};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::error::{LoadStage, PluginError, Result};
use crate::ladspa::{LadspaDescriptor, LadspaUnit};
use crate::port::PortDescriptor;
use crate::unit::{NativeUnit, UnitMetadata};

#[repr(C)]
pub struct DssiDescriptor {
    pub dssi_api_version: c_int,
    pub ladspa_plugin: *const LadspaDescriptor,
    pub configure:
        Option<unsafe extern "C" fn(*mut c_void, *const c_char, *const c_char) -> *mut c_char>,
    pub get_program: Option<unsafe extern "C" fn(*mut c_void, c_ulong) -> *const c_void>,
    pub select_program: Option<unsafe extern "C" fn(*mut c_void, c_ulong, c_ulong)>,
    pub get_midi_controller_for_port: Option<unsafe extern "C" fn(*mut c_void, c_ulong) -> c_int>,
    pub run_synth: Option<unsafe extern "C" fn(*mut c_void, c_ulong, *mut c_void, c_ulong)>,
    pub run_synth_adding: Option<unsafe extern "C" fn(*mut c_void, c_ulong, *mut c_void, c_ulong)>,
    pub run_multiple_synths:
        Option<unsafe extern "C" fn(c_ulong, *mut *mut c_void, c_ulong, *mut *mut c_void, *mut c_ulong)>,
    pub run_multiple_synths_adding:
        Option<unsafe extern "C" fn(c_ulong, *mut *mut c_void, c_ulong, *mut *mut c_void, *mut c_ulong)>,
}

type DssiDescriptorFn = unsafe extern "C" fn(c_ulong) -> *const DssiDescriptor;

pub struct DssiLibrary {
    library: Arc<Library>,
    path: PathBuf,
}

impl DssiLibrary {
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

    pub fn instantiate(&self, label: Option<&str>, samplerate: u32) -> Result<DssiUnit> {
        let entry: libloading::Symbol<'_, DssiDescriptorFn> =
            unsafe { self.library.get(b"dssi_descriptor\0") }.map_err(|e| {
                PluginError::LoadFailed {
                    path: self.path.clone(),
                    stage: LoadStage::EntryPoint,
                    reason: e.to_string(),
                }
            })?;

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
                        reason: "library exports no DSSI descriptors".into(),
                    },
                });
            }
            let ladspa = unsafe { (*descriptor).ladspa_plugin };
            if ladspa.is_null() {
                return Err(PluginError::LoadFailed {
                    path: self.path.clone(),
                    stage: LoadStage::Descriptor,
                    reason: "DSSI descriptor carries no LADSPA plugin".into(),
                });
            }
            let found = unsafe { std::ffi::CStr::from_ptr((*ladspa).label) }
                .to_string_lossy()
                .into_owned();
            if label.map(|l| l == found).unwrap_or(true) {
                break descriptor;
            }
            index += 1;
        };

        let ladspa = LadspaUnit::from_descriptor(
            unsafe { (*descriptor).ladspa_plugin },
            Arc::clone(&self.library),
            &self.path,
            samplerate,
        )?;
        Ok(DssiUnit {
            descriptor,
            inner: ladspa,
        })
    }
}

/// A DSSI unit: LADSPA lifecycle underneath, synth run entry on top.
pub struct DssiUnit {
    descriptor: *const DssiDescriptor,
    inner: LadspaUnit,
}

unsafe impl Send for DssiUnit {}

impl NativeUnit for DssiUnit {
    fn metadata(&self) -> &UnitMetadata {
        self.inner.metadata()
    }

    fn ports(&self) -> &[PortDescriptor] {
        self.inner.ports()
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut f32) {
        self.inner.connect_port(index, buffer);
    }

    fn activate(&mut self) {
        self.inner.activate();
    }

    fn run(&mut self, sample_count: usize) {
        let run_synth = unsafe { (*self.descriptor).run_synth };
        match run_synth {
            Some(run_synth) => {
                let handle = self.inner.raw_handle();
                unsafe { run_synth(handle, sample_count as c_ulong, std::ptr::null_mut(), 0) };
            }
            None => self.inner.run(sample_count),
        }
    }

    fn deactivate(&mut self) {
        self.inner.deactivate();
    }
}
