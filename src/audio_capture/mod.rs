//! Microphone capture peripheral.
//!
//! The device has one audio transport shared between recording and playback.
//! Recording code never talks to it directly: it acquires a [`CaptureHandle`],
//! which reinitialises the peripheral in record mode and tears it down again
//! when dropped, whatever path the caller leaves by.

#[cfg(feature = "host_audio")]
pub mod imp_cpal;

use thiserror::Error;

use crate::wav::{WavFramer, WAV_HEADER_SIZE};

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Peripheral not in record mode")]
    NotRecording,
}

/// Parameters the record-mode init needs. 16-bit mono is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    /// Bytes per captured frame.
    pub chunk_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_size: 4096,
        }
    }
}

impl CaptureConfig {
    /// PCM bytes produced per second of capture.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * 2
    }
}

/// The physical capture transport.
pub trait AudioPeripheral {
    /// Install the record-mode driver. Callers release first.
    fn init_record(&mut self, config: &CaptureConfig) -> Result<(), AudioError>;

    /// Fill `buf` with little-endian i16 PCM. Blocks until data is available
    /// or the peripheral's internal wait elapses; returns bytes written.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, AudioError>;

    /// Stop the stream without uninstalling the driver.
    fn pause(&mut self) -> Result<(), AudioError>;

    /// Restart a paused stream.
    fn resume(&mut self) -> Result<(), AudioError>;

    /// Uninstall the driver. Must be idempotent.
    fn release(&mut self);
}

/// Exclusive, short-lived record-mode access to the peripheral.
pub struct CaptureHandle<'a> {
    peripheral: &'a mut dyn AudioPeripheral,
    config: CaptureConfig,
}

impl<'a> CaptureHandle<'a> {
    /// Tear the peripheral down unconditionally and bring it up in record
    /// mode. Whatever mode it was left in is irrelevant.
    pub fn acquire(
        peripheral: &'a mut dyn AudioPeripheral,
        config: &CaptureConfig,
    ) -> Result<Self, AudioError> {
        peripheral.release();
        peripheral.init_record(config)?;
        log::debug!(
            "🎤 Capture peripheral initialised ({} Hz, {} byte frames)",
            config.sample_rate,
            config.chunk_size
        );
        Ok(Self {
            peripheral,
            config: *config,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        self.peripheral.read_frame(buf)
    }

    /// Stop and restart the stream, dropping stale DMA data, without a full
    /// driver reinstall.
    pub fn restart(&mut self) -> Result<(), AudioError> {
        self.peripheral.pause()?;
        self.peripheral.resume()
    }
}

impl Drop for CaptureHandle<'_> {
    fn drop(&mut self) {
        self.peripheral.release();
        log::debug!("🎤 Capture peripheral released");
    }
}

/// One capture quantum, overwritten in place on every read.
///
/// Capacity is the chunk size plus room for a WAV header so the first frame
/// of a session can carry header and PCM in a single request body.
pub struct AudioFrame {
    buf: Vec<u8>,
    chunk_size: usize,
    len: usize,
}

impl AudioFrame {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0u8; chunk_size + WAV_HEADER_SIZE],
            chunk_size,
            len: 0,
        }
    }

    /// Read the next frame. With a framer, the frame is laid out as header
    /// followed by PCM. Returns the PCM byte count.
    pub fn capture(
        &mut self,
        handle: &mut CaptureHandle<'_>,
        framer: Option<&WavFramer>,
    ) -> Result<usize, AudioError> {
        let offset = match framer {
            Some(framer) => {
                framer.write_header(&mut self.buf[..WAV_HEADER_SIZE]);
                WAV_HEADER_SIZE
            }
            None => 0,
        };

        let pcm_len = handle.read(&mut self.buf[offset..offset + self.chunk_size])?;
        self.len = if pcm_len == 0 { 0 } else { offset + pcm_len };
        Ok(pcm_len)
    }

    /// The request body for this frame.
    pub fn payload(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}
