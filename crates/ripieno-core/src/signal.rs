//! Audio signal streams and their fixed-size buffer chunks.
//!
//! An [`AudioSignal`] is an ordered forward sequence of [`BufferStream`]
//! nodes scoped to one recycling and one playback context. The cursor
//! advances exactly one node per tic; nodes behind it (and outside any
//! loop region) are reclaimed. A template signal carries shape only and is
//! never mixed.

use std::collections::VecDeque;

use crate::config::SampleFormat;
use crate::context::ContextId;

/// One fixed-size chunk of samples.
pub struct BufferStream {
    data: Box<[f32]>,
}

impl BufferStream {
    pub fn silent(buffer_size: usize) -> Self {
        Self {
            data: vec![0.0; buffer_size].into_boxed_slice(),
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    fn clear(&mut self) {
        self.data.fill(0.0);
    }
}

/// Result of advancing the stream cursor by one tic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamAdvance {
    Continue,
    /// Cursor wrapped back to the node containing `loop_start`.
    Looped,
    /// Non-looping stream fully consumed. Expected drain, a precondition
    /// for the governing recall's transition to Done.
    Exhausted,
}

/// Number of stream nodes a write of `total_length` samples starting at
/// `attack` touches.
pub fn nodes_touched(attack: usize, total_length: usize, buffer_size: usize) -> usize {
    (attack + total_length).div_ceil(buffer_size)
}

/// Samples copied into the last touched node.
pub fn tail_copy_length(attack: usize, total_length: usize, buffer_size: usize) -> usize {
    let rem = (attack + total_length) % buffer_size;
    if rem == 0 {
        buffer_size
    } else {
        rem
    }
}

pub struct AudioSignal {
    buffer_size: usize,
    format: SampleFormat,
    samplerate: u32,
    pub loop_start: usize,
    pub loop_end: usize,
    pub looping: bool,
    context: Option<ContextId>,
    template: bool,
    stream: VecDeque<BufferStream>,
    /// Reclaimed nodes kept for reuse when extending the stream.
    spare: Vec<BufferStream>,
    /// Index into `stream` of the current node.
    cursor: usize,
    /// Logical node index of `stream[0]` (nodes before it were reclaimed).
    first_node: usize,
    /// Logical end offset of written content, in samples.
    length: usize,
    exhausted: bool,
}

impl AudioSignal {
    /// A sounding signal scoped to `context`.
    pub fn new(
        buffer_size: usize,
        format: SampleFormat,
        samplerate: u32,
        context: ContextId,
    ) -> Self {
        Self {
            buffer_size,
            format,
            samplerate,
            loop_start: 0,
            loop_end: 0,
            looping: false,
            context: Some(context),
            template: false,
            stream: VecDeque::new(),
            spare: Vec::new(),
            cursor: 0,
            first_node: 0,
            length: 0,
            exhausted: false,
        }
    }

    /// A template signal: shape only, no sample data, never mixed.
    pub fn template(buffer_size: usize, format: SampleFormat, samplerate: u32) -> Self {
        Self {
            buffer_size,
            format,
            samplerate,
            loop_start: 0,
            loop_end: 0,
            looping: false,
            context: None,
            template: true,
            stream: VecDeque::new(),
            spare: Vec::new(),
            cursor: 0,
            first_node: 0,
            length: 0,
            exhausted: false,
        }
    }

    /// A fresh sounding signal stamped from a template's shape.
    pub fn from_template(template: &AudioSignal, context: ContextId) -> Self {
        let mut signal = Self::new(
            template.buffer_size,
            template.format,
            template.samplerate,
            context,
        );
        signal.loop_start = template.loop_start;
        signal.loop_end = template.loop_end;
        signal.looping = template.looping;
        signal
    }

    /// Reset a drained signal for reuse from the pool, keeping its node
    /// allocations.
    pub fn reset_for_reuse(&mut self, context: ContextId) {
        while let Some(mut node) = self.stream.pop_front() {
            node.clear();
            self.spare.push(node);
        }
        self.cursor = 0;
        self.first_node = 0;
        self.length = 0;
        self.exhausted = false;
        self.looping = false;
        self.loop_start = 0;
        self.loop_end = 0;
        self.context = Some(context);
    }

    pub fn is_template(&self) -> bool {
        self.template
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    /// Logical end offset of written content, in samples.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn node_count(&self) -> usize {
        self.stream.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn push_node(&mut self) {
        let node = self
            .spare
            .pop()
            .unwrap_or_else(|| BufferStream::silent(self.buffer_size));
        self.stream.push_back(node);
    }

    /// Grow the stream so the logical node range covers `end_offset`
    /// samples.
    fn ensure_nodes_to(&mut self, end_offset: usize) {
        let needed = end_offset.div_ceil(self.buffer_size);
        while self.first_node + self.stream.len() < needed {
            self.push_node();
        }
    }

    /// Sum `samples` into the stream starting at logical offset `attack`,
    /// front-padded with the silence already present. Touches
    /// `nodes_touched(attack, samples.len(), buffer_size)` nodes.
    pub fn write(&mut self, attack: usize, samples: &[f32]) {
        debug_assert!(!self.template, "template signals carry no sample data");
        if samples.is_empty() {
            return;
        }
        let end = attack + samples.len();
        self.ensure_nodes_to(end);

        let buffer_size = self.buffer_size;
        let first_node = self.first_node;
        let mut written = 0;
        while written < samples.len() {
            let offset = attack + written;
            let node = offset / buffer_size;
            let within = offset % buffer_size;
            let take = (buffer_size - within).min(samples.len() - written);
            debug_assert!(node >= first_node, "writing into a reclaimed node");
            let data = self.stream[node - first_node].data_mut();
            for i in 0..take {
                data[within + i] += samples[written + i];
            }
            written += take;
        }
        self.length = self.length.max(end);
        if self.looping && self.loop_end == 0 {
            self.loop_end = self.length;
        }
    }

    /// Current node's samples, if the stream still sounds.
    pub fn current(&self) -> Option<&[f32]> {
        if self.exhausted {
            return None;
        }
        self.stream.get(self.cursor).map(|n| n.data())
    }

    pub fn current_mut(&mut self) -> Option<&mut [f32]> {
        if self.exhausted {
            return None;
        }
        self.stream.get_mut(self.cursor).map(|n| n.data_mut())
    }

    /// Sum the current node into `acc`, sample-wise.
    pub fn mix_into(&self, acc: &mut [f32]) {
        if let Some(current) = self.current() {
            for (a, s) in acc.iter_mut().zip(current.iter()) {
                *a += *s;
            }
        }
    }

    /// Advance the cursor exactly one node, wrapping at `loop_end` when
    /// looping, reclaiming nodes behind the cursor.
    pub fn advance_tic(&mut self) -> StreamAdvance {
        if self.exhausted || self.stream.is_empty() {
            self.exhausted = true;
            return StreamAdvance::Exhausted;
        }
        let node_end = (self.first_node + self.cursor + 1) * self.buffer_size;
        if self.looping && self.loop_end > self.loop_start && node_end >= self.loop_end {
            let target = self.loop_start / self.buffer_size;
            debug_assert!(target >= self.first_node, "loop region was reclaimed");
            self.cursor = target.saturating_sub(self.first_node);
            return StreamAdvance::Looped;
        }
        if node_end >= self.length {
            self.exhausted = true;
            return StreamAdvance::Exhausted;
        }
        self.cursor += 1;
        self.reclaim();
        StreamAdvance::Continue
    }

    /// Drop consumed nodes. When looping, nodes from the loop region stay
    /// resident so the wrap target is always present.
    fn reclaim(&mut self) {
        let current = self.first_node + self.cursor;
        let keep_from = if self.looping {
            (self.loop_start / self.buffer_size).min(current)
        } else {
            current
        };
        while self.first_node < keep_from && self.cursor > 0 {
            if let Some(mut node) = self.stream.pop_front() {
                node.clear();
                self.spare.push(node);
            }
            self.first_node += 1;
            self.cursor -= 1;
        }
    }
}

/// Conversions between the f32 accumulation representation and the
/// native formats consumed at the soundcard and plugin boundaries.
pub mod convert {
    /// Interleave per-channel buffers into `out`.
    pub fn interleave(channels: &[&[f32]], out: &mut Vec<f32>) {
        out.clear();
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        out.reserve(frames * channels.len());
        for frame in 0..frames {
            for channel in channels {
                out.push(channel[frame]);
            }
        }
    }

    pub fn f32_to_i16(sample: f32) -> i16 {
        (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
    }

    pub fn i16_to_f32(sample: i16) -> f32 {
        sample as f32 / i16::MAX as f32
    }

    pub fn slice_to_i16(samples: &[f32], out: &mut Vec<i16>) {
        out.clear();
        out.extend(samples.iter().map(|s| f32_to_i16(*s)));
    }

    pub fn slice_to_f64(samples: &[f32], out: &mut Vec<f64>) {
        out.clear();
        out.extend(samples.iter().map(|s| *s as f64));
    }
}
