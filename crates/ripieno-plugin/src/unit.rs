//! The native unit abstraction every backend loader produces.

use crate::port::PortDescriptor;

#[derive(Debug, Clone, Default)]
pub struct UnitMetadata {
    pub label: String,
    pub name: String,
    pub maker: String,
    /// Units processing at a fixed rate report it here; the host
    /// resamples around `run` when it differs from the engine rate.
    pub samplerate: Option<u32>,
}

/// One loaded native processing unit.
///
/// The contract mirrors the C plugin ABIs: the host binds buffers by
/// index with `connect_port`, then calls `run` per block. Indices the
/// unit does not advertise must be ignored, not faulted on.
pub trait NativeUnit: Send {
    fn metadata(&self) -> &UnitMetadata;

    fn ports(&self) -> &[PortDescriptor];

    /// Bind a host buffer to a port.
    ///
    /// # Safety
    ///
    /// `buffer` must stay valid and unaliased by other units until the
    /// next `connect_port` for the same index or the unit is dropped.
    unsafe fn connect_port(&mut self, index: u32, buffer: *mut f32);

    fn activate(&mut self) {}

    fn run(&mut self, sample_count: usize);

    fn deactivate(&mut self) {}
}
