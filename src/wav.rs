//! WAV container framing for uploads.
//!
//! The header is synthesised once per upload session from the byte budget the
//! session *expects* to send, before any audio exists. If the capture stops
//! early the declared sizes overstate what was sent; the server tolerates it.

use std::time::Duration;

pub const WAV_HEADER_SIZE: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 1;
const BLOCK_ALIGN: u16 = CHANNELS * BITS_PER_SAMPLE / 8;

/// Builds the 44-byte RIFF/WAVE header for a capture of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFramer {
    sample_rate: u32,
    data_len: u32,
}

impl WavFramer {
    pub fn new(sample_rate: u32, data_len: u32) -> Self {
        Self {
            sample_rate,
            data_len,
        }
    }

    /// Framer for `duration` of 16-bit mono audio at `sample_rate`.
    pub fn for_duration(sample_rate: u32, duration: Duration) -> Self {
        Self::new(sample_rate, byte_budget(sample_rate, duration))
    }

    /// Size declared in the `data` chunk.
    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    pub fn header(&self) -> [u8; WAV_HEADER_SIZE] {
        let mut header = [0u8; WAV_HEADER_SIZE];
        self.write_header(&mut header);
        header
    }

    /// Write the header into the first 44 bytes of `out`.
    pub fn write_header(&self, out: &mut [u8]) {
        let byte_rate = self.sample_rate * u32::from(BLOCK_ALIGN);

        out[0..4].copy_from_slice(b"RIFF");
        out[4..8].copy_from_slice(&(self.data_len.wrapping_add(36)).to_le_bytes());
        out[8..16].copy_from_slice(b"WAVEfmt ");
        out[16..20].copy_from_slice(&16u32.to_le_bytes());
        out[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
        out[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
        out[24..28].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        out[32..34].copy_from_slice(&BLOCK_ALIGN.to_le_bytes());
        out[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        out[36..40].copy_from_slice(b"data");
        out[40..44].copy_from_slice(&self.data_len.to_le_bytes());
    }
}

/// PCM bytes in `duration` of 16-bit mono audio: `sample_rate × secs × 2`.
pub fn byte_budget(sample_rate: u32, duration: Duration) -> u32 {
    let bytes = u64::from(sample_rate) * duration.as_millis() as u64 * 2 / 1000;
    bytes.min(u64::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_declared_budget_matches_duration() {
        assert_eq!(byte_budget(16000, Duration::from_secs(3)), 96000);
        assert_eq!(byte_budget(16000, Duration::from_secs(10)), 320000);
        assert_eq!(
            WavFramer::for_duration(16000, Duration::from_secs(3)).data_len(),
            96000
        );
    }

    #[test]
    fn test_header_layout() {
        let header = WavFramer::new(16000, 96000).header();
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 96036);
        assert_eq!(&header[8..16], b"WAVEfmt ");
        assert_eq!(u32::from_le_bytes(header[24..28].try_into().unwrap()), 16000);
        assert_eq!(u32::from_le_bytes(header[28..32].try_into().unwrap()), 32000);
        assert_eq!(&header[36..40], b"data");
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 96000);
    }

    #[test]
    fn test_header_parses_with_standard_reader() {
        // Declared budget equals the PCM that follows, as in a completed capture
        let samples: Vec<i16> = (0..800).map(|i| (i * 37 % 2000) as i16 - 1000).collect();
        let framer = WavFramer::new(16000, (samples.len() * 2) as u32);

        let mut bytes = framer.header().to_vec();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_other_sample_rates_round_trip() {
        let framer = WavFramer::for_duration(8000, Duration::from_secs(1));
        let mut bytes = framer.header().to_vec();
        bytes.resize(WAV_HEADER_SIZE + framer.data_len() as usize, 0);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.duration(), 8000);
    }
}
