use std::sync::Arc;

use crate::audio_capture::AudioPeripheral;
use crate::clock::Clock;
use crate::keypad::Keypad;
use crate::playback::{AudioOutputDevice, PlaybackEngine};
use crate::server::SpeechServer;

/// The hardware and network endpoints a device session works with.
///
/// Built once at startup and owned by the orchestrator. The microphone and
/// speaker share one physical transport; callers never hold both at once.
pub struct Peripherals {
    pub microphone: Box<dyn AudioPeripheral>,
    pub speaker: Box<dyn AudioOutputDevice>,
    pub keypad: Box<dyn Keypad>,
    pub server: Box<dyn SpeechServer>,
    pub clock: Arc<dyn Clock>,
}

impl Peripherals {
    /// Play the clip at `url`. Failures are logged; returns whether it played.
    pub fn play(&mut self, engine: &PlaybackEngine, url: &str) -> bool {
        play_with(
            engine,
            url,
            self.microphone.as_mut(),
            self.server.as_mut(),
            self.speaker.as_mut(),
        )
    }
}

pub(crate) fn play_with(
    engine: &PlaybackEngine,
    url: &str,
    microphone: &mut dyn AudioPeripheral,
    server: &mut dyn SpeechServer,
    speaker: &mut dyn AudioOutputDevice,
) -> bool {
    match engine.play_url(url, microphone, server.as_opener(), speaker) {
        Ok(_) => true,
        Err(e) => {
            log::warn!("🔇 Playback of {} failed: {}", url, e);
            false
        }
    }
}

pub(crate) fn speak_with(
    engine: &PlaybackEngine,
    text: &str,
    lang: &str,
    microphone: &mut dyn AudioPeripheral,
    server: &mut dyn SpeechServer,
    speaker: &mut dyn AudioOutputDevice,
) -> bool {
    match server.as_api().synthesize(text, lang) {
        Ok(Some(url)) => play_with(engine, &url, microphone, server, speaker),
        Ok(None) => {
            log::warn!("🔇 Server returned no audio for '{}'", text);
            false
        }
        Err(e) => {
            log::warn!("🔇 Synthesis of '{}' failed: {}", text, e);
            false
        }
    }
}
