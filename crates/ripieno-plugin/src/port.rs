//! Uniform port descriptors and the host-side buffers bound to them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Control,
    Audio,
}

/// Numeric range hint for a control port.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RangeHint {
    pub lower: Option<f32>,
    pub upper: Option<f32>,
    pub default: Option<f32>,
}

/// One port as advertised by a native unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDescriptor {
    pub index: u32,
    pub name: String,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub range: RangeHint,
}

impl PortDescriptor {
    pub fn is(&self, direction: PortDirection, kind: PortKind) -> bool {
        self.direction == direction && self.kind == kind
    }
}

/// Host-owned buffers for one unit instance: one scalar per control
/// port, one channel-count x buffer-size block per audio port. Buffers
/// stay at stable addresses for the lifetime of the block, as the unit
/// holds raw pointers into them between `connect_port` and `run`.
pub struct PortBlock {
    controls: Vec<(u32, Box<f32>)>,
    audio: Vec<(u32, Box<[f32]>)>,
    buffer_size: usize,
}

impl PortBlock {
    pub fn allocate(ports: &[PortDescriptor], channels: usize, buffer_size: usize) -> Self {
        let mut controls = Vec::new();
        let mut audio = Vec::new();
        for port in ports {
            match port.kind {
                PortKind::Control => {
                    let initial = port.range.default.unwrap_or(0.0);
                    controls.push((port.index, Box::new(initial)));
                }
                PortKind::Audio => {
                    let block = vec![0.0f32; channels.max(1) * buffer_size];
                    audio.push((port.index, block.into_boxed_slice()));
                }
            }
        }
        Self {
            controls,
            audio,
            buffer_size,
        }
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    pub fn audio_count(&self) -> usize {
        self.audio.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn control_value(&self, index: u32) -> Option<f32> {
        self.controls
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| **v)
    }

    pub fn set_control(&mut self, index: u32, value: f32) {
        if let Some((_, v)) = self.controls.iter_mut().find(|(i, _)| *i == index) {
            **v = value;
        }
    }

    pub fn control_ptr(&mut self, index: u32) -> Option<*mut f32> {
        self.controls
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, v)| v.as_mut() as *mut f32)
    }

    pub fn audio_ptr(&mut self, index: u32) -> Option<*mut f32> {
        self.audio
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, b)| b.as_mut_ptr())
    }

    /// First channel lane of an audio port's block.
    pub fn audio_lane(&self, index: u32) -> Option<&[f32]> {
        self.audio
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, b)| &b[..self.buffer_size])
    }

    pub fn audio_lane_mut(&mut self, index: u32) -> Option<&mut [f32]> {
        let buffer_size = self.buffer_size;
        self.audio
            .iter_mut()
            .find(|(i, _)| *i == index)
            .map(|(_, b)| &mut b[..buffer_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> Vec<PortDescriptor> {
        vec![
            PortDescriptor {
                index: 0,
                name: "Gain".into(),
                direction: PortDirection::Input,
                kind: PortKind::Control,
                range: RangeHint {
                    lower: Some(0.0),
                    upper: Some(2.0),
                    default: Some(1.0),
                },
            },
            PortDescriptor {
                index: 1,
                name: "In".into(),
                direction: PortDirection::Input,
                kind: PortKind::Audio,
                range: RangeHint::default(),
            },
            PortDescriptor {
                index: 2,
                name: "Out".into(),
                direction: PortDirection::Output,
                kind: PortKind::Audio,
                range: RangeHint::default(),
            },
        ]
    }

    #[test]
    fn test_allocation_shape() {
        let block = PortBlock::allocate(&ports(), 2, 256);
        assert_eq!(block.control_count(), 1);
        assert_eq!(block.audio_count(), 2);
        assert_eq!(block.audio_lane(1).unwrap().len(), 256);
        assert_eq!(block.control_value(0), Some(1.0), "default from range hint");
    }

    #[test]
    fn test_control_pointer_is_stable() {
        let mut block = PortBlock::allocate(&ports(), 2, 64);
        let ptr = block.control_ptr(0).unwrap();
        block.set_control(0, 0.5);
        // The pointer handed to the unit observes the update.
        assert_eq!(unsafe { *ptr }, 0.5);
    }

    #[test]
    fn test_unknown_index_is_none() {
        let mut block = PortBlock::allocate(&ports(), 1, 64);
        assert!(block.control_ptr(9).is_none());
        assert!(block.audio_ptr(9).is_none());
        assert_eq!(block.control_value(9), None);
    }
}
