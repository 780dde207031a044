//! Wake-phrase listening loop.
//!
//! Detection is delegated to the server: short windows are uploaded with the
//! wake-check flag and the returned transcript is searched for the phrase.

use std::time::Duration;

use crate::audio_capture::{AudioPeripheral, CaptureConfig, CaptureHandle};
use crate::clock::Clock;
use crate::config::DeviceConfig;
use crate::error::{EdgeError, Result};
use crate::intent::fold_case;
use crate::server::SpeechServer;
use crate::upload::{ChunkedUploadSession, UploadOptions};

/// Pause between listening windows.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeDetection {
    /// Windows uploaded, including the one that matched.
    pub attempts: u32,
    pub transcript: String,
}

pub struct WakeWordDetector {
    phrase: String,
    window: Duration,
    capture: CaptureConfig,
}

impl WakeWordDetector {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            phrase: fold_case(config.wake_phrase.trim()),
            window: config.wake_time,
            capture: config.capture(),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn matches(&self, transcript: &str) -> bool {
        fold_case(transcript).contains(&self.phrase)
    }

    /// Upload listening windows until one contains the wake phrase.
    ///
    /// Fails fast when the server does not answer a probe; once listening has
    /// started only a capture failure ends the loop.
    pub fn listen(
        &self,
        microphone: &mut dyn AudioPeripheral,
        server: &mut dyn SpeechServer,
        clock: &dyn Clock,
    ) -> Result<WakeDetection> {
        if let Err(e) = server.as_api().probe() {
            log::error!("❌ Server not reachable, cannot listen for wake word: {}", e);
            return Err(EdgeError::NetworkUnavailable(e.to_string()));
        }

        log::info!("👂 Listening for wake phrase '{}'", self.phrase);
        let mut handle = CaptureHandle::acquire(microphone, &self.capture)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            log::debug!("👂 Wake window #{}", attempts);

            let outcome = ChunkedUploadSession::new(
                &self.capture,
                UploadOptions::transcript(self.window),
            )
            .run(&mut handle, server.as_transport(), clock)?;

            let transcript = outcome.transcript.unwrap_or_default();
            if self.matches(&transcript) {
                log::info!(
                    "🎯 Wake phrase detected after {} window(s): '{}'",
                    attempts,
                    transcript
                );
                return Ok(WakeDetection {
                    attempts,
                    transcript,
                });
            }

            if !transcript.is_empty() {
                log::debug!("👂 Heard '{}', not the wake phrase", transcript);
            }
            handle.restart()?;
            clock.sleep(RETRY_PAUSE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_utils::{FakeMicrophone, ScriptedServer};
    use std::sync::Arc;

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let detector = WakeWordDetector::new(&DeviceConfig::default());
        assert!(detector.matches("Hey UYAN artık"));
        assert!(detector.matches("UYAN"));
        assert!(!detector.matches("merhaba"));
        assert!(!detector.matches(""));
    }

    #[test]
    fn test_single_iteration_when_phrase_first() {
        let clock = Arc::new(ManualClock::new());
        let mut mic = FakeMicrophone::with_clock(4096, clock.clone());
        let mut server = ScriptedServer::new().with_transcripts(["Uyan"]);
        let detector = WakeWordDetector::new(&DeviceConfig::default());

        let detection = detector.listen(&mut mic, &mut server, clock.as_ref()).unwrap();
        assert_eq!(detection.attempts, 1);
        assert_eq!(server.log().sessions(), 1);
        assert_eq!(mic.stats().restarts, 0);
        assert!(!mic.stats().recording);
    }

    #[test]
    fn test_fresh_session_per_window() {
        let clock = Arc::new(ManualClock::new());
        let mut mic = FakeMicrophone::with_clock(4096, clock.clone());
        let mut server = ScriptedServer::new().with_transcripts(["", "kapı", "uyan lütfen"]);
        let detector = WakeWordDetector::new(&DeviceConfig::default());

        let detection = detector.listen(&mut mic, &mut server, clock.as_ref()).unwrap();
        assert_eq!(detection.attempts, 3);
        assert_eq!(server.log().sessions(), 3);
        assert_eq!(mic.stats().restarts, 2);
        // One acquire for the whole loop
        assert_eq!(mic.stats().inits, 1);
    }

    #[test]
    fn test_unreachable_server_fails_fast() {
        let clock = ManualClock::new();
        let mut mic = FakeMicrophone::new(4096);
        let mut server = ScriptedServer::new().offline();
        let detector = WakeWordDetector::new(&DeviceConfig::default());

        let result = detector.listen(&mut mic, &mut server, &clock);
        assert!(matches!(result, Err(EdgeError::NetworkUnavailable(_))));
        assert_eq!(mic.stats().inits, 0);
    }
}
