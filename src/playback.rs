//! Streaming playback of server-produced audio.
//!
//! Reply audio is a WAV file fetched by URL. It is decoded incrementally and
//! pushed to the output in small blocks, so playback starts while the rest of
//! the body is still arriving.

use std::io::{BufReader, Read};
use thiserror::Error;

use crate::audio_capture::AudioPeripheral;
use crate::server::AudioStreamOpener;

/// Samples pushed to the output per step.
const STEP_SAMPLES: usize = 1024;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to open audio source: {0}")]
    Source(String),
    #[error("Failed to decode audio: {0}")]
    Decode(#[from] hound::Error),
    #[error("Unsupported audio format: {0}")]
    Unsupported(String),
    #[error("Audio output error: {0}")]
    Output(String),
}

/// Format of the audio being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open output stream; one per played clip.
pub trait AudioOutput {
    /// Queue interleaved samples for playback.
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError>;

    /// Block until everything queued has been played, then close.
    fn finish(self: Box<Self>) -> Result<(), PlaybackError>;
}

/// The speaker side of the audio transport.
pub trait AudioOutputDevice {
    fn open(&mut self, spec: &OutputSpec) -> Result<Box<dyn AudioOutput>, PlaybackError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub samples: usize,
    pub steps: usize,
}

pub struct PlaybackEngine {
    step_samples: usize,
    gain: f32,
}

impl Default for PlaybackEngine {
    fn default() -> Self {
        Self {
            step_samples: STEP_SAMPLES,
            gain: 2.0,
        }
    }
}

impl PlaybackEngine {
    pub fn new(step_samples: usize, gain: f32) -> Self {
        Self {
            step_samples: step_samples.max(1),
            gain,
        }
    }

    /// Fetch and play the clip at `url`.
    ///
    /// The capture side of the transport is torn down first; recording and
    /// playback never hold it at the same time.
    pub fn play_url(
        &self,
        url: &str,
        microphone: &mut dyn AudioPeripheral,
        opener: &mut dyn AudioStreamOpener,
        output: &mut dyn AudioOutputDevice,
    ) -> Result<PlaybackReport, PlaybackError> {
        microphone.release();

        log::info!("🔊 Playing {}", url);
        let source = opener
            .open(url)
            .map_err(|e| PlaybackError::Source(e.to_string()))?;
        let report = self.render(source, output)?;
        log::debug!(
            "🔊 Playback finished: {} samples in {} steps",
            report.samples,
            report.steps
        );
        Ok(report)
    }

    /// Decode a WAV stream and feed it to a fresh output until it ends.
    pub fn render<R: Read>(
        &self,
        source: R,
        output: &mut dyn AudioOutputDevice,
    ) -> Result<PlaybackReport, PlaybackError> {
        let reader = hound::WavReader::new(BufReader::new(source))?;
        let spec = reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(PlaybackError::Unsupported(format!(
                "{:?} {}-bit",
                spec.sample_format, spec.bits_per_sample
            )));
        }

        let mut out = output.open(&OutputSpec {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })?;

        let mut report = PlaybackReport::default();
        let mut samples = reader.into_samples::<i16>();
        let mut block = Vec::with_capacity(self.step_samples);

        loop {
            block.clear();
            for sample in samples.by_ref().take(self.step_samples) {
                block.push(self.amplify(sample?));
            }
            if block.is_empty() {
                break;
            }
            out.write(&block)?;
            report.samples += block.len();
            report.steps += 1;
        }

        out.finish()?;
        Ok(report)
    }

    fn amplify(&self, sample: i16) -> i16 {
        (f32::from(sample) * self.gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
    }
}
