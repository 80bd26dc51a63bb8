//! Voice rendering.
//!
//! Evaluates [`Voice`]s sample by sample: a naive (non band-limited)
//! oscillator shaped by the voice's gain timeline. Shared by the real-time
//! cpal mixer and the offline renderer.

use crate::errors::Result;
use crate::graph::{ParamTimeline, Voice};
use statesonic_core::Waveform;
use std::f64::consts::TAU;
use std::path::Path;

/// Default sample rate for offline rendering.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// One sample of `waveform` at `phase` in `[0, 1)`.
pub fn waveform_sample(waveform: Waveform, phase: f64) -> f64 {
    match waveform {
        Waveform::Sine => (TAU * phase).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * phase - 1.0,
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
    }
}

impl Voice {
    /// Whether the voice sounds at time `t`.
    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start && t < self.stop
    }

    /// Output sample at time `t` (seconds on the context clock).
    pub fn sample_at(&self, t: f64) -> f64 {
        voice_sample(self.waveform, self.frequency, self.start, self.stop, &self.gain, t)
    }
}

/// Sample of an oscillator running from `start` to `stop` through `gain`.
pub fn voice_sample(waveform: Waveform, frequency: f64, start: f64, stop: f64, gain: &ParamTimeline, t: f64) -> f64 {
    if t < start || t >= stop {
        return 0.0;
    }
    let phase = ((t - start) * frequency).fract();
    waveform_sample(waveform, phase) * gain.value_at(t)
}

/// Mix `voices` into `buffer`, whose first frame is at `start_time`.
pub fn mix_into(voices: &[Voice], buffer: &mut [f32], start_time: f64, sample_rate: u32) {
    let step = 1.0 / sample_rate as f64;
    for (i, out) in buffer.iter_mut().enumerate() {
        let t = start_time + i as f64 * step;
        let sum: f64 = voices.iter().map(|v| v.sample_at(t)).sum();
        *out = (*out as f64 + sum).clamp(-1.0, 1.0) as f32;
    }
}

/// Render `voices` offline, from time zero to the last finite stop time.
pub fn render(voices: &[Voice], sample_rate: u32) -> Vec<f32> {
    let end = voices
        .iter()
        .map(|v| v.stop)
        .filter(|s| s.is_finite())
        .fold(0.0_f64, f64::max);
    let frames = (end * sample_rate as f64).ceil() as usize;
    let mut buffer = vec![0.0; frames];
    mix_into(voices, &mut buffer, 0.0, sample_rate);
    buffer
}

/// Write mono samples as a 32-bit float WAV file.
pub fn write_wav(path: impl AsRef<Path>, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Automation, NodeId, ParamTimeline};

    fn voice(start: f64, stop: f64, level: f64) -> Voice {
        let mut gain = ParamTimeline::new(level);
        gain.push(Automation::SetValue { value: level, at: start });
        Voice {
            oscillator: NodeId(1),
            waveform: Waveform::Square,
            frequency: 100.0,
            start,
            stop,
            gain,
        }
    }

    #[test]
    fn test_waveform_shapes() {
        assert!(waveform_sample(Waveform::Sine, 0.0).abs() < 1e-12);
        assert!((waveform_sample(Waveform::Sine, 0.25) - 1.0).abs() < 1e-12);
        assert_eq!(waveform_sample(Waveform::Square, 0.1), 1.0);
        assert_eq!(waveform_sample(Waveform::Square, 0.6), -1.0);
        assert_eq!(waveform_sample(Waveform::Sawtooth, 0.0), -1.0);
        assert_eq!(waveform_sample(Waveform::Triangle, 0.5), 1.0);
        assert_eq!(waveform_sample(Waveform::Triangle, 0.0), -1.0);
    }

    #[test]
    fn test_voice_is_silent_outside_its_span() {
        let v = voice(0.1, 0.2, 0.5);
        assert_eq!(v.sample_at(0.05), 0.0);
        assert_eq!(v.sample_at(0.2), 0.0);
        assert_eq!(v.sample_at(0.1), 0.5);
    }

    #[test]
    fn test_render_length_and_content() {
        let samples = render(&[voice(0.0, 0.5, 0.25)], 1000);
        assert_eq!(samples.len(), 500);
        assert_eq!(samples[0], 0.25);
        assert!(samples.iter().all(|s| s.abs() <= 0.25 + 1e-6));
    }

    #[test]
    fn test_mix_clamps() {
        let loud = [voice(0.0, 1.0, 0.8), voice(0.0, 1.0, 0.8)];
        let mut buffer = vec![0.0; 4];
        mix_into(&loud, &mut buffer, 0.0, 1000);
        assert_eq!(buffer[0], 1.0);
    }

    #[test]
    fn test_write_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let samples = render(&[voice(0.0, 0.1, 0.5)], 8000);
        write_wav(&path, &samples, 8000).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.len() as usize, samples.len());
    }
}
