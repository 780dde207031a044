#![allow(dead_code)]

pub mod http;

use std::sync::{Arc, Mutex};

use voice_access_edge::clock::ManualClock;
use voice_access_edge::config::DeviceConfig;
use voice_access_edge::device::Peripherals;
use voice_access_edge::orchestrator::SessionOrchestrator;
use voice_access_edge::test_utils::{
    FakeMicrophone, MicStats, RecordingServo, RecordingSpeaker, ScriptedKeypad, ScriptedServer,
    ServerLog, ServoLog, SpeakerLog,
};

/// Handles for inspecting a device built from fakes.
pub struct Rig {
    pub clock: Arc<ManualClock>,
    pub server: ServerLog,
    pub speaker: SpeakerLog,
    pub servo: ServoLog,
    pub mic: Arc<Mutex<MicStats>>,
}

impl Rig {
    pub fn mic_stats(&self) -> MicStats {
        self.mic.lock().unwrap().clone()
    }
}

/// A device with the reference configuration, driven by `server` and `keys`.
pub fn device(server: ScriptedServer, keys: ScriptedKeypad) -> (SessionOrchestrator, Rig) {
    let config = DeviceConfig::default();
    let clock = Arc::new(ManualClock::new());

    let microphone = FakeMicrophone::with_clock(config.chunk_size, clock.clone());
    let speaker = RecordingSpeaker::new();
    let servo = RecordingServo::with_clock(clock.clone());

    let rig = Rig {
        clock: clock.clone(),
        server: server.log(),
        speaker: speaker.log(),
        servo: servo.log(),
        mic: microphone.stats_handle(),
    };

    let peripherals = Peripherals {
        microphone: Box::new(microphone),
        speaker: Box::new(speaker),
        keypad: Box::new(keys),
        server: Box::new(server),
        clock,
    };

    (
        SessionOrchestrator::new(&config, peripherals, Box::new(servo)),
        rig,
    )
}
