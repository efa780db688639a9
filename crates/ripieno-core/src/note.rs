//! Note events and their rendered waveforms.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Saw,
}

/// One note event as fired by a pattern or notation recall.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub frequency: f64,
    /// Length in samples at the engine samplerate.
    pub length: usize,
    pub velocity: f32,
    pub waveform: Waveform,
}

impl Note {
    pub fn new(frequency: f64, length: usize) -> Self {
        Self {
            frequency,
            length,
            velocity: 1.0,
            waveform: Waveform::Sine,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Render the note into a fresh sample buffer via a phase accumulator.
    pub fn render(&self, samplerate: u32) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.length);
        let step = self.frequency / samplerate as f64;
        let mut phase = 0.0f64;
        for _ in 0..self.length {
            let sample = match self.waveform {
                Waveform::Sine => (phase * core::f64::consts::TAU).sin() as f32,
                Waveform::Square => {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                }
                Waveform::Saw => (2.0 * phase - 1.0) as f32,
            };
            out.push(sample * self.velocity);
            phase += step;
            if phase >= 1.0 {
                phase -= 1.0;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_render_length_and_amplitude() {
        let note = Note::new(440.0, 256).with_velocity(0.5);
        let samples = note.render(44100);
        assert_eq!(samples.len(), 256);
        assert!(samples.iter().all(|s| s.abs() <= 0.5 + f32::EPSILON));
    }

    #[test]
    fn test_sine_starts_at_zero() {
        let note = Note::new(100.0, 8);
        let samples = note.render(44100);
        assert_relative_eq!(samples[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_square_alternates() {
        // 11025 Hz at 44100 Hz gives a 4-sample period
        let note = Note::new(11025.0, 4).with_waveform(Waveform::Square);
        let samples = note.render(44100);
        assert_eq!(samples, vec![1.0, 1.0, -1.0, -1.0]);
    }
}
