//! Voice-gated registration and login.
//!
//! Both flows start from a spoken name. Login checks the name, runs PIN entry
//! against the server and opens the door on success; registration confirms
//! the name, takes a new PIN and creates the account.

use std::time::Duration;

use crate::audio_capture::AudioPeripheral;
use crate::config::DeviceConfig;
use crate::device::{speak_with, Peripherals};
use crate::door::{Door, DoorActuator, DoorState};
use crate::error::{EdgeError, Result};
use crate::keypad::{Key, KeypadReader};
use crate::pin::{PinAttempt, PinEntryFlow, PinOutcome, PinVerifier, Verdict};
use crate::playback::{AudioOutputDevice, PlaybackEngine};
use crate::protocol::{playable, RegisterStatus, VerifyResponse, VerifyStatus};
use crate::server::{ServerError, SpeechServer};
use crate::voice_capture::VoiceCaptureService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Granted(String),
    /// Wrong PIN; this many attempts remain.
    ///
    /// Only announced while entry continues. PIN entry ends in `Granted` or
    /// `DeniedLockout`, so `login` never returns it.
    DeniedRetry(u32),
    DeniedLockout,
    UserNotFound,
    ServerUnreachable,
    Registered,
    AlreadyRegistered,
    RegistrationRejected(String),
    /// The name capture came back empty.
    NameNotDetected,
}

impl AuthOutcome {
    /// Text the server is asked to speak for this outcome, if any.
    pub fn feedback(&self) -> Option<String> {
        match self {
            AuthOutcome::Granted(name) => Some(format!("Hoş geldiniz {}", name)),
            AuthOutcome::DeniedRetry(remaining) => {
                Some(format!("Şifre yanlış. Kalan hakkınız: {}", remaining))
            }
            AuthOutcome::DeniedLockout => {
                Some("Hakkınız kalmadı. Ana menüye dönülüyor.".to_string())
            }
            _ => None,
        }
    }
}

pub struct AuthController {
    door: Door,
    pins: PinEntryFlow,
    voice: VoiceCaptureService,
    playback: PlaybackEngine,
    lang: String,
    poll_interval: Duration,
}

impl AuthController {
    pub fn new(config: &DeviceConfig, actuator: Box<dyn DoorActuator>) -> Self {
        Self {
            door: Door::new(actuator, config),
            pins: PinEntryFlow::default(),
            voice: VoiceCaptureService::new(config),
            playback: PlaybackEngine::default(),
            lang: config.lang.clone(),
            poll_interval: config.poll_interval,
        }
    }

    pub fn door_state(&self) -> DoorState {
        self.door.state()
    }

    /// Identify by voice, then unlock with a PIN.
    pub fn login(&mut self, io: &mut Peripherals) -> Result<AuthOutcome> {
        println!("Lütfen adınızı söyleyin...");
        let name = self.voice.capture_name(
            io.microphone.as_mut(),
            io.server.as_transport(),
            io.clock.as_ref(),
        )?;
        if let Err(e) = require_name(&name) {
            log::info!("👤 {}", e);
            println!("İsim algılanamadı.");
            return Ok(AuthOutcome::NameNotDetected);
        }

        match io.server.as_api().check_user(&name) {
            Ok(true) => log::info!("👤 User '{}' found", name),
            Ok(false) => {
                println!("Kullanıcı bulunamadı: {}", name);
                return Ok(AuthOutcome::UserNotFound);
            }
            Err(e) if e.is_unreachable() => {
                log::warn!("❌ User check failed: {}", e);
                return Ok(AuthOutcome::ServerUnreachable);
            }
            Err(e) => return Err(e.into()),
        }

        println!("{} için 4 haneli şifrenizi girin ve # ile bitirin.", name);
        let Peripherals {
            microphone,
            speaker,
            keypad,
            server,
            clock,
        } = io;
        let mut reader = KeypadReader::new(&mut **keypad, &**clock, self.poll_interval);
        let mut verifier = LoginVerifier {
            name: &name,
            lang: &self.lang,
            playback: &self.playback,
            microphone: &mut **microphone,
            server: &mut **server,
            speaker: &mut **speaker,
        };

        match self.pins.run(&mut reader, &mut verifier) {
            PinOutcome::Accepted { attempts } => {
                log::info!("🔓 Access granted to '{}' (attempt {})", name, attempts);
                println!("Giriş başarılı!");
                self.door.open_momentarily(&**clock);

                let granted = AuthOutcome::Granted(name);
                if let Some(text) = granted.feedback() {
                    speak_with(
                        &self.playback,
                        &text,
                        &self.lang,
                        &mut **microphone,
                        &mut **server,
                        &mut **speaker,
                    );
                }
                Ok(granted)
            }
            PinOutcome::Lockout => {
                log::warn!("🔒 Login locked out for '{}'", name);
                Ok(AuthOutcome::DeniedLockout)
            }
        }
    }

    /// Create an account from a confirmed spoken name and a new PIN.
    pub fn register(&mut self, io: &mut Peripherals) -> Result<AuthOutcome> {
        let name = loop {
            println!("Lütfen adınızı söyleyin...");
            let name = self.voice.capture_name(
                io.microphone.as_mut(),
                io.server.as_transport(),
                io.clock.as_ref(),
            )?;
            if let Err(e) = require_name(&name) {
                log::info!("👤 {}", e);
                println!("İsim algılanamadı.");
                return Ok(AuthOutcome::NameNotDetected);
            }

            println!("Algılanan isim: {}", name);
            match io.server.as_api().confirm_name(&name) {
                Ok(response) => {
                    if let Some(url) = playable(response.audio_url) {
                        io.play(&self.playback, &url);
                    }
                }
                Err(e) => log::warn!("⚠️ Name confirmation prompt unavailable: {}", e),
            }

            println!("Onaylamak için #, tekrar söylemek için C tuşuna basın.");
            let key = KeypadReader::new(io.keypad.as_mut(), io.clock.as_ref(), self.poll_interval)
                .wait_for(|k| matches!(k, Key::Hash | Key::Letter('C')));
            if key == Key::Hash {
                break name;
            }
            log::info!("🔁 Repeating name capture");
        };

        println!("4 haneli bir şifre belirleyin ve # ile bitirin.");
        let attempt = {
            let mut reader =
                KeypadReader::new(io.keypad.as_mut(), io.clock.as_ref(), self.poll_interval);
            self.pins.read_valid(&mut reader)
        };

        let response = match io.server.as_api().register_user(&name, attempt.secret()) {
            Ok(response) => response,
            Err(e) if e.is_unreachable() => {
                log::warn!("❌ Registration request failed: {}", e);
                println!("Kayıt başarısız!");
                return Ok(AuthOutcome::ServerUnreachable);
            }
            Err(e) => {
                println!("Kayıt başarısız!");
                return Err(e.into());
            }
        };

        let outcome = match response.status {
            RegisterStatus::Success => {
                log::info!("📝 Registered '{}'", name);
                println!("Kayıt başarılı!");
                AuthOutcome::Registered
            }
            RegisterStatus::Exists => {
                log::info!("📝 '{}' is already registered", name);
                println!("Bu kullanıcı zaten kayıtlı.");
                AuthOutcome::AlreadyRegistered
            }
            RegisterStatus::Error => {
                let message = response.message.clone().unwrap_or_default();
                log::warn!("❌ Registration rejected: {}", message);
                println!("Kayıt başarısız!");
                AuthOutcome::RegistrationRejected(message)
            }
        };

        if let Some(url) = playable(response.audio_url) {
            io.play(&self.playback, &url);
        }
        Ok(outcome)
    }
}

fn require_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(EdgeError::Validation("no name detected".to_string()));
    }
    Ok(())
}

/// Fold a verification round-trip into the error taxonomy.
fn check_verification(result: std::result::Result<VerifyResponse, ServerError>) -> Result<()> {
    let response = result?;
    match response.status {
        VerifyStatus::Success => Ok(()),
        VerifyStatus::Rejected => Err(EdgeError::AuthFailure(
            response.message.unwrap_or_else(|| "wrong PIN".to_string()),
        )),
    }
}

/// Verifies login attempts against the server and voices each rejection.
struct LoginVerifier<'a> {
    name: &'a str,
    lang: &'a str,
    playback: &'a PlaybackEngine,
    microphone: &'a mut dyn AudioPeripheral,
    server: &'a mut dyn SpeechServer,
    speaker: &'a mut dyn AudioOutputDevice,
}

impl PinVerifier for LoginVerifier<'_> {
    fn verify(&mut self, attempt: &PinAttempt) -> Verdict {
        let result = self.server.as_api().verify_user(self.name, attempt.secret());
        match check_verification(result) {
            Ok(()) => Verdict::Accepted,
            Err(e @ EdgeError::AuthFailure(_)) => {
                log::info!("🔒 {}", e);
                Verdict::Rejected
            }
            // A failed request counts against the budget like a wrong PIN
            Err(e) => {
                log::warn!("❌ Verification request failed: {}", e);
                Verdict::Rejected
            }
        }
    }

    fn rejected(&mut self, remaining: u32) {
        let outcome = if remaining == 0 {
            AuthOutcome::DeniedLockout
        } else {
            AuthOutcome::DeniedRetry(remaining)
        };
        if let Some(text) = outcome.feedback() {
            println!("{}", text);
            speak_with(
                self.playback,
                &text,
                self.lang,
                &mut *self.microphone,
                &mut *self.server,
                &mut *self.speaker,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_phrases() {
        assert_eq!(
            AuthOutcome::Granted("Ada".into()).feedback().as_deref(),
            Some("Hoş geldiniz Ada")
        );
        assert_eq!(
            AuthOutcome::DeniedRetry(2).feedback().as_deref(),
            Some("Şifre yanlış. Kalan hakkınız: 2")
        );
        assert_eq!(
            AuthOutcome::DeniedLockout.feedback().as_deref(),
            Some("Hakkınız kalmadı. Ana menüye dönülüyor.")
        );
        assert_eq!(AuthOutcome::Registered.feedback(), None);
        assert_eq!(AuthOutcome::UserNotFound.feedback(), None);
    }

    #[test]
    fn test_empty_name_is_a_validation_error() {
        assert!(matches!(require_name(""), Err(EdgeError::Validation(_))));
        assert!(require_name("Ada").is_ok());
    }

    #[test]
    fn test_verification_results_map_to_taxonomy() {
        let accepted = check_verification(Ok(VerifyResponse {
            status: VerifyStatus::Success,
            message: None,
        }));
        assert!(accepted.is_ok());

        let rejected = check_verification(Ok(VerifyResponse {
            status: VerifyStatus::Rejected,
            message: Some("Invalid password".into()),
        }));
        match rejected {
            Err(EdgeError::AuthFailure(reason)) => assert_eq!(reason, "Invalid password"),
            other => panic!("expected AuthFailure, got {:?}", other),
        }

        let offline = check_verification(Err(ServerError::Unreachable("down".into())));
        assert!(matches!(offline, Err(EdgeError::NetworkUnavailable(_))));

        let broken = check_verification(Err(ServerError::ApiError {
            status: 500,
            message: "boom".into(),
        }));
        assert!(matches!(broken, Err(EdgeError::Server(_))));
    }
}
