//! Fixed-window voice captures used by the menus.
//!
//! Each capture takes the peripheral for itself and gives it back when done,
//! so playback can follow immediately.

use std::time::Duration;

use crate::audio_capture::{AudioPeripheral, CaptureConfig, CaptureHandle};
use crate::clock::Clock;
use crate::config::DeviceConfig;
use crate::error::Result;
use crate::intent::fold_case;
use crate::server::UploadTransport;
use crate::upload::{ChunkedUploadSession, UploadOptions, UploadOutcome};

pub struct VoiceCaptureService {
    capture: CaptureConfig,
    prompt_time: Duration,
    record_time: Duration,
}

impl VoiceCaptureService {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            capture: config.capture(),
            prompt_time: config.prompt_time,
            record_time: config.record_time,
        }
    }

    /// Short spoken command, lower-cased. Empty when nothing was understood.
    pub fn capture_command(
        &self,
        microphone: &mut dyn AudioPeripheral,
        transport: &mut dyn UploadTransport,
        clock: &dyn Clock,
    ) -> Result<String> {
        log::info!("🎙️ Listening for a command ({:?})", self.prompt_time);
        let outcome = self.record(
            microphone,
            transport,
            clock,
            UploadOptions::transcript(self.prompt_time),
        )?;
        let command = outcome
            .transcript
            .map(|t| fold_case(t.trim()))
            .unwrap_or_default();
        log::info!("🎙️ Command: '{}'", command);
        Ok(command)
    }

    /// Spoken name, trimmed. Empty when nothing was understood.
    pub fn capture_name(
        &self,
        microphone: &mut dyn AudioPeripheral,
        transport: &mut dyn UploadTransport,
        clock: &dyn Clock,
    ) -> Result<String> {
        log::info!("🎙️ Listening for a name ({:?})", self.prompt_time);
        let outcome = self.record(
            microphone,
            transport,
            clock,
            UploadOptions::transcript(self.prompt_time),
        )?;
        let name = outcome
            .transcript
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        log::info!("🎙️ Name: '{}'", name);
        Ok(name)
    }

    /// Full-length assistant query; returns the reply audio URL, if any.
    pub fn capture_assistant_reply(
        &self,
        microphone: &mut dyn AudioPeripheral,
        transport: &mut dyn UploadTransport,
        clock: &dyn Clock,
    ) -> Result<Option<String>> {
        log::info!("🎙️ Recording assistant query ({:?})", self.record_time);
        let outcome = self.record(
            microphone,
            transport,
            clock,
            UploadOptions::assistant(self.record_time),
        )?;
        if outcome.audio_url.is_none() {
            log::warn!("🔇 No reply audio from server");
        }
        Ok(outcome.audio_url)
    }

    fn record(
        &self,
        microphone: &mut dyn AudioPeripheral,
        transport: &mut dyn UploadTransport,
        clock: &dyn Clock,
        options: UploadOptions,
    ) -> Result<UploadOutcome> {
        let mut handle = CaptureHandle::acquire(microphone, &self.capture)?;
        let outcome = ChunkedUploadSession::new(&self.capture, options).run(
            &mut handle,
            transport,
            clock,
        )?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_utils::{FakeMicrophone, ScriptedServer};
    use std::sync::Arc;

    fn service() -> VoiceCaptureService {
        VoiceCaptureService::new(&DeviceConfig::default())
    }

    #[test]
    fn test_command_is_lower_cased_and_peripheral_released() {
        let clock = Arc::new(ManualClock::new());
        let mut mic = FakeMicrophone::with_clock(4096, clock.clone());
        let mut server = ScriptedServer::new().with_transcripts(["  Giriş Yap "]);

        let command = service()
            .capture_command(&mut mic, &mut server, clock.as_ref())
            .unwrap();
        assert_eq!(command, "giriş yap");
        assert!(!mic.stats().recording);
        assert_eq!(server.log().sessions(), 1);
    }

    #[test]
    fn test_empty_name_is_valid() {
        let clock = Arc::new(ManualClock::new());
        let mut mic = FakeMicrophone::with_clock(4096, clock.clone());
        let mut server = ScriptedServer::new();

        let name = service()
            .capture_name(&mut mic, &mut server, clock.as_ref())
            .unwrap();
        assert!(name.is_empty());
    }

    #[test]
    fn test_assistant_capture_uses_full_window() {
        let clock = Arc::new(ManualClock::new());
        let mut mic = FakeMicrophone::with_clock(4096, clock.clone());
        let mut server =
            ScriptedServer::new().with_transcripts(["http://srv/audios/a_reply.wav"]);

        let url = service()
            .capture_assistant_reply(&mut mic, &mut server, clock.as_ref())
            .unwrap();
        assert_eq!(url.as_deref(), Some("http://srv/audios/a_reply.wav"));

        let chunks = server.log().chunks();
        // 10 s at 32000 B/s in 4096 byte frames
        assert_eq!(chunks.len(), (320000 + 4095) / 4096);
        assert!(chunks.iter().all(|c| !c.headers.wake_check));
    }
}
