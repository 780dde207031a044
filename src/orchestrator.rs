//! Top-level device loop.
//!
//! The keypad picks between the voice assistant (`A`) and the access-control
//! flow (`B`). Every path ends back at this menu; nothing that goes wrong in a
//! flow stops the device.

use std::time::Duration;

use crate::auth::{AuthController, AuthOutcome};
use crate::config::DeviceConfig;
use crate::device::Peripherals;
use crate::door::DoorActuator;
use crate::error::{EdgeError, Result};
use crate::intent::{Intent, VoiceCommandRouter};
use crate::keypad::{Key, KeypadReader};
use crate::playback::PlaybackEngine;
use crate::protocol::playable;
use crate::voice_capture::VoiceCaptureService;
use crate::wakeword::WakeWordDetector;

/// Back-off after a flow fails with an error.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MenuChoice {
    VoiceAssistant,
    AccessControl,
}

impl MenuChoice {
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::Letter('A') => Some(MenuChoice::VoiceAssistant),
            Key::Letter('B') => Some(MenuChoice::AccessControl),
            _ => None,
        }
    }
}

/// How one pass through the menu ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    AssistantReplied,
    /// The assistant produced no playable reply.
    AssistantSilent,
    ServerUnreachable,
    Auth(AuthOutcome),
    /// Name of the most recent visitor, if the server knows one.
    LastLogin(Option<String>),
    ReturnedToMenu,
}

pub struct SessionOrchestrator {
    io: Peripherals,
    auth: AuthController,
    wake: WakeWordDetector,
    voice: VoiceCaptureService,
    router: VoiceCommandRouter,
    playback: PlaybackEngine,
    poll_interval: Duration,
}

impl SessionOrchestrator {
    pub fn new(config: &DeviceConfig, io: Peripherals, actuator: Box<dyn DoorActuator>) -> Self {
        Self {
            io,
            auth: AuthController::new(config, actuator),
            wake: WakeWordDetector::new(config),
            voice: VoiceCaptureService::new(config),
            router: VoiceCommandRouter::default(),
            playback: PlaybackEngine::default(),
            poll_interval: config.poll_interval,
        }
    }

    pub fn auth(&self) -> &AuthController {
        &self.auth
    }

    /// Serve the menu forever.
    pub fn run(&mut self) -> ! {
        log::info!("🚀 Device ready");
        loop {
            match self.run_once() {
                Ok(outcome) => log::info!("🏁 Session finished: {:?}", outcome),
                Err(e) => {
                    log::error!("❌ Session failed: {}", e);
                    self.io.clock.sleep(ERROR_BACKOFF);
                }
            }
        }
    }

    /// Show the menu, wait for a choice and run it to completion.
    pub fn run_once(&mut self) -> Result<SessionOutcome> {
        let choice = self.select_menu();
        log::info!("📋 Menu choice: {}", choice);
        self.run_choice(choice)
    }

    pub fn select_menu(&mut self) -> MenuChoice {
        println!();
        println!("A: Sesli asistan");
        println!("B: Giriş sistemi");
        let mut reader =
            KeypadReader::new(self.io.keypad.as_mut(), self.io.clock.as_ref(), self.poll_interval);
        loop {
            if let Some(choice) = MenuChoice::from_key(reader.wait_for_key()) {
                return choice;
            }
        }
    }

    pub fn run_choice(&mut self, choice: MenuChoice) -> Result<SessionOutcome> {
        match choice {
            MenuChoice::VoiceAssistant => self.voice_assistant(),
            MenuChoice::AccessControl => self.access_control(),
        }
    }

    fn voice_assistant(&mut self) -> Result<SessionOutcome> {
        let io = &mut self.io;
        match self
            .wake
            .listen(io.microphone.as_mut(), io.server.as_mut(), io.clock.as_ref())
        {
            Ok(_) => {}
            Err(EdgeError::NetworkUnavailable(reason)) => {
                println!("Sunucuya ulaşılamıyor.");
                log::warn!("📡 Assistant unavailable: {}", reason);
                return Ok(SessionOutcome::ServerUnreachable);
            }
            Err(e) => return Err(e),
        }

        println!("Dinliyorum, sorunuzu sorun...");
        let reply = self.voice.capture_assistant_reply(
            io.microphone.as_mut(),
            io.server.as_transport(),
            io.clock.as_ref(),
        )?;

        match reply {
            Some(url) if io.play(&self.playback, &url) => Ok(SessionOutcome::AssistantReplied),
            _ => Ok(SessionOutcome::AssistantSilent),
        }
    }

    fn access_control(&mut self) -> Result<SessionOutcome> {
        loop {
            println!("Komut söyleyin: 'giriş yap', 'yeni kullanıcı', 'en son kim girmiş' veya 'ana menü'");
            let io = &mut self.io;
            let command = self.voice.capture_command(
                io.microphone.as_mut(),
                io.server.as_transport(),
                io.clock.as_ref(),
            )?;

            match self.router.route(&command) {
                Intent::Register => return Ok(SessionOutcome::Auth(self.auth.register(io)?)),
                Intent::Login => return Ok(SessionOutcome::Auth(self.auth.login(io)?)),
                Intent::QueryLastLogin => return Ok(self.last_login()),
                Intent::Exit => return Ok(SessionOutcome::ReturnedToMenu),
                Intent::Unrecognized => {
                    println!("Komut anlaşılamadı, tekrar deneyin.");
                }
            }
        }
    }

    fn last_login(&mut self) -> SessionOutcome {
        let response = match self.io.server.as_api().last_login() {
            Ok(response) => response,
            Err(e) => {
                log::warn!("❌ Last-login query failed: {}", e);
                println!("Veri alınamadı.");
                return SessionOutcome::LastLogin(None);
            }
        };

        match response.name {
            Some(name) => {
                println!("En son giriş yapan: {}", name);
                if let Some(url) = playable(response.url) {
                    self.io.play(&self.playback, &url);
                }
                SessionOutcome::LastLogin(Some(name))
            }
            None => {
                println!(
                    "Veri yok{}",
                    response
                        .message
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                );
                SessionOutcome::LastLogin(None)
            }
        }
    }
}
