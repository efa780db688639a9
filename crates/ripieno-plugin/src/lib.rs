//! Native plugin host for ripieno: LADSPA/DSSI/LV2 loading and port
//! binding.
//!
//! # Primary API
//!
//! - [`PluginSpec`] / [`native_template`]: describe a native unit and
//!   register it as a recall template on a recycling scope
//! - [`load_ports`]: allocate and bind host buffers for a unit
//! - [`registry`]: discover plugin libraries across platform paths
//! - [`NativeUnit`]: the abstraction each backend loader produces
//!
//! # Example
//!
//! ```ignore
//! use ripieno_plugin::{native_template, PluginSpec};
//!
//! let kind = native_template(PluginSpec::ladspa(
//!     "/usr/lib/ladspa/amp.so",
//!     Some("amp_mono".into()),
//! ));
//! engine.add_recall(ScopeRef::Recycling(channel), kind, vec![])?;
//! ```

pub mod dssi;
pub mod error;
pub mod host;
pub mod ladspa;
pub mod lv2;
pub mod port;
pub mod registry;
pub mod unit;

pub use error::{LoadStage, PluginError};
pub use host::{
    load_ports, native_template, resample_linear, PluginFormat, PluginProcessor,
    PluginRecallFactory, PluginSpec,
};
pub use ladspa::{LadspaLibrary, LadspaUnit};
pub use lv2::{Lv2Library, Lv2Unit};
pub use port::{PortBlock, PortDescriptor, PortDirection, PortKind, RangeHint};
pub use registry::{scan_directory, scan_system, search_paths, PluginCandidate};
pub use unit::{NativeUnit, UnitMetadata};
