//! LV2 plugin loading.
//!
//! Binds the `lv2_descriptor` C entry point directly. Port metadata
//! lives in the bundle's Turtle manifest, which the session layer parses
//! and supplies as uniform descriptors; the host here only needs the
//! indices and kinds to allocate and bind buffers.

use std::ffi::{c_char, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;

use crate::error::{LoadStage, PluginError, Result};
use crate::port::PortDescriptor;
use crate::unit::{NativeUnit, UnitMetadata};

pub type Lv2Handle = *mut c_void;

#[repr(C)]
pub struct Lv2Descriptor {
    pub uri: *const c_char,
    pub instantiate: Option<
        unsafe extern "C" fn(
            *const Lv2Descriptor,
            f64,
            *const c_char,
            *const *const c_void,
        ) -> Lv2Handle,
    >,
    pub connect_port: Option<unsafe extern "C" fn(Lv2Handle, u32, *mut c_void)>,
    pub activate: Option<unsafe extern "C" fn(Lv2Handle)>,
    pub run: Option<unsafe extern "C" fn(Lv2Handle, u32)>,
    pub deactivate: Option<unsafe extern "C" fn(Lv2Handle)>,
    pub cleanup: Option<unsafe extern "C" fn(Lv2Handle)>,
    pub extension_data: Option<unsafe extern "C" fn(*const c_char) -> *const c_void>,
}

type Lv2DescriptorFn = unsafe extern "C" fn(u32) -> *const Lv2Descriptor;

pub struct Lv2Library {
    library: Arc<Library>,
    path: PathBuf,
}

impl Lv2Library {
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

    /// Instantiate the descriptor matching `uri` (or the first exported
    /// one) with externally supplied port metadata.
    pub fn instantiate(
        &self,
        uri: Option<&str>,
        ports: Vec<PortDescriptor>,
        samplerate: u32,
    ) -> Result<Lv2Unit> {
        let entry: libloading::Symbol<'_, Lv2DescriptorFn> =
            unsafe { self.library.get(b"lv2_descriptor\0") }.map_err(|e| {
                PluginError::LoadFailed {
                    path: self.path.clone(),
                    stage: LoadStage::EntryPoint,
                    reason: e.to_string(),
                }
            })?;

        let mut index = 0u32;
        let descriptor = loop {
            let descriptor = unsafe { entry(index) };
            if descriptor.is_null() {
                return Err(match uri {
                    Some(uri) => PluginError::UnknownLabel {
                        path: self.path.clone(),
                        label: uri.to_string(),
                    },
                    None => PluginError::LoadFailed {
                        path: self.path.clone(),
                        stage: LoadStage::Descriptor,
                        reason: "library exports no LV2 descriptors".into(),
                    },
                });
            }
            let found = unsafe { CStr::from_ptr((*descriptor).uri) }.to_string_lossy();
            if uri.map(|u| u == found).unwrap_or(true) {
                break descriptor;
            }
            index += 1;
        };

        let reference = unsafe { &*descriptor };
        let instantiate = reference.instantiate.ok_or_else(|| PluginError::LoadFailed {
            path: self.path.clone(),
            stage: LoadStage::Descriptor,
            reason: "descriptor has no instantiate".into(),
        })?;
        let bundle = self
            .path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bundle = CString::new(bundle).unwrap_or_default();
        // No host features offered; a feature-demanding plugin refuses
        // by returning null.
        let features: [*const c_void; 1] = [std::ptr::null()];
        let handle = unsafe {
            instantiate(
                descriptor,
                samplerate as f64,
                bundle.as_ptr(),
                features.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(PluginError::LoadFailed {
                path: self.path.clone(),
                stage: LoadStage::Instantiation,
                reason: "instantiate returned null".into(),
            });
        }

        let metadata = UnitMetadata {
            label: unsafe { CStr::from_ptr(reference.uri) }
                .to_string_lossy()
                .into_owned(),
            name: String::new(),
            maker: String::new(),
            samplerate: None,
        };
        tracing::debug!(uri = %metadata.label, "instantiated LV2 unit");
        Ok(Lv2Unit {
            descriptor,
            handle,
            metadata,
            ports,
            active: false,
            _library: Arc::clone(&self.library),
        })
    }
}

pub struct Lv2Unit {
    descriptor: *const Lv2Descriptor,
    handle: Lv2Handle,
    metadata: UnitMetadata,
    ports: Vec<PortDescriptor>,
    active: bool,
    _library: Arc<Library>,
}

unsafe impl Send for Lv2Unit {}

impl Lv2Unit {
    fn descriptor(&self) -> &Lv2Descriptor {
        unsafe { &*self.descriptor }
    }
}

impl NativeUnit for Lv2Unit {
    fn metadata(&self) -> &UnitMetadata {
        &self.metadata
    }

    fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    unsafe fn connect_port(&mut self, index: u32, buffer: *mut f32) {
        if self.ports.iter().all(|p| p.index != index) {
            return;
        }
        if let Some(connect) = self.descriptor().connect_port {
            connect(self.handle, index, buffer as *mut c_void);
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
            unsafe { run(self.handle, sample_count as u32) };
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

impl Drop for Lv2Unit {
    fn drop(&mut self) {
        self.deactivate();
        if let Some(cleanup) = self.descriptor().cleanup {
            unsafe { cleanup(self.handle) };
        }
    }
}
