//! In-memory peripherals and a scripted server for tests.
//!
//! Every fake keeps its observations behind a shared handle so a test can
//! still inspect them after the fake itself has been boxed into
//! [`Peripherals`](crate::device::Peripherals).

use secrecy::{ExposeSecret, SecretBox};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::audio_capture::{AudioError, AudioPeripheral, CaptureConfig};
use crate::clock::{Clock, ManualClock};
use crate::door::DoorActuator;
use crate::keypad::{Key, Keypad};
use crate::playback::{AudioOutput, AudioOutputDevice, OutputSpec, PlaybackError};
use crate::protocol::{
    ChunkHeaders, ConfirmNameResponse, LastLoginResponse, RegisterResponse, RegisterStatus,
    SessionId, VerifyResponse, VerifyStatus,
};
use crate::server::{AudioStreamOpener, ServerApi, ServerError, UploadTransport};
use crate::wav::WAV_HEADER_SIZE;

/// Encode mono 16-bit samples as a complete WAV file.
pub fn wav_bytes(sample_rate: u32, samples: &[i16]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for &s in samples {
            writer.write_sample(s).expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicStats {
    pub inits: usize,
    pub releases: usize,
    pub restarts: usize,
    pub frames_read: usize,
    pub recording: bool,
}

/// Produces a deterministic tone. With a clock attached, every read advances
/// it by the real-time length of the frame.
pub struct FakeMicrophone {
    chunk_size: usize,
    clock: Option<Arc<ManualClock>>,
    config: Option<CaptureConfig>,
    stats: Arc<Mutex<MicStats>>,
    phase: u32,
}

impl FakeMicrophone {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            clock: None,
            config: None,
            stats: Arc::new(Mutex::new(MicStats::default())),
            phase: 0,
        }
    }

    pub fn with_clock(chunk_size: usize, clock: Arc<ManualClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::new(chunk_size)
        }
    }

    pub fn stats(&self) -> MicStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn stats_handle(&self) -> Arc<Mutex<MicStats>> {
        Arc::clone(&self.stats)
    }
}

impl AudioPeripheral for FakeMicrophone {
    fn init_record(&mut self, config: &CaptureConfig) -> Result<(), AudioError> {
        let mut stats = self.stats.lock().unwrap();
        if stats.recording {
            return Err(AudioError::Device("driver already installed".into()));
        }
        stats.inits += 1;
        stats.recording = true;
        self.config = Some(*config);
        Ok(())
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, AudioError> {
        let config = match self.config {
            Some(config) if self.stats.lock().unwrap().recording => config,
            _ => return Err(AudioError::NotRecording),
        };

        let len = buf.len().min(self.chunk_size) & !1;
        for slot in buf[..len].chunks_exact_mut(2) {
            let sample = ((self.phase % 64) as i16 - 32) * 200;
            slot.copy_from_slice(&sample.to_le_bytes());
            self.phase = self.phase.wrapping_add(1);
        }

        if let Some(clock) = &self.clock {
            let nanos = len as u64 * 1_000_000_000 / u64::from(config.byte_rate());
            clock.advance(Duration::from_nanos(nanos));
        }
        self.stats.lock().unwrap().frames_read += 1;
        Ok(len)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn resume(&mut self) -> Result<(), AudioError> {
        self.stats.lock().unwrap().restarts += 1;
        Ok(())
    }

    fn release(&mut self) {
        let mut stats = self.stats.lock().unwrap();
        stats.releases += 1;
        stats.recording = false;
    }
}

// ---------------------------------------------------------------------------
// Keypad
// ---------------------------------------------------------------------------

/// Polls beyond the end of the script before the test is declared stuck.
const MAX_IDLE_POLLS: usize = 100_000;

/// Replays a script of key presses. Characters that are not keys are ignored.
pub struct ScriptedKeypad {
    script: VecDeque<Option<Key>>,
    idle_polls: usize,
}

impl ScriptedKeypad {
    pub fn new(keys: &str) -> Self {
        Self {
            script: VecDeque::new(),
            idle_polls: 0,
        }
        .then(keys)
    }

    pub fn then(mut self, keys: &str) -> Self {
        self.script
            .extend(keys.chars().filter_map(Key::from_char).map(Some));
        self
    }

    /// Insert `polls` empty polls.
    pub fn then_idle(mut self, polls: usize) -> Self {
        self.script.extend(std::iter::repeat(None).take(polls));
        self
    }
}

impl Keypad for ScriptedKeypad {
    fn poll_key(&mut self) -> Option<Key> {
        match self.script.pop_front() {
            Some(step) => step,
            None => {
                self.idle_polls += 1;
                assert!(
                    self.idle_polls < MAX_IDLE_POLLS,
                    "keypad script exhausted"
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Door
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoMove {
    pub angle: u16,
    pub at: Duration,
}

#[derive(Clone, Default)]
pub struct ServoLog(Arc<Mutex<Vec<ServoMove>>>);

impl ServoLog {
    pub fn moves(&self) -> Vec<ServoMove> {
        self.0.lock().unwrap().clone()
    }

    pub fn angles(&self) -> Vec<u16> {
        self.moves().iter().map(|m| m.angle).collect()
    }
}

pub struct RecordingServo {
    clock: Option<Arc<ManualClock>>,
    log: ServoLog,
}

impl RecordingServo {
    pub fn new() -> Self {
        Self {
            clock: None,
            log: ServoLog::default(),
        }
    }

    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            clock: Some(clock),
            log: ServoLog::default(),
        }
    }

    pub fn log(&self) -> ServoLog {
        self.log.clone()
    }
}

impl Default for RecordingServo {
    fn default() -> Self {
        Self::new()
    }
}

impl DoorActuator for RecordingServo {
    fn set_angle(&mut self, angle: u16) {
        let at = self
            .clock
            .as_ref()
            .map(|c| c.elapsed())
            .unwrap_or_default();
        self.log.0.lock().unwrap().push(ServoMove { angle, at });
    }
}

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedClip {
    pub spec: OutputSpec,
    pub samples: usize,
    pub finished: bool,
}

#[derive(Clone, Default)]
pub struct SpeakerLog(Arc<Mutex<Vec<PlayedClip>>>);

impl SpeakerLog {
    pub fn clips(&self) -> Vec<PlayedClip> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingSpeaker {
    log: SpeakerLog,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> SpeakerLog {
        self.log.clone()
    }
}

impl AudioOutputDevice for RecordingSpeaker {
    fn open(&mut self, spec: &OutputSpec) -> Result<Box<dyn AudioOutput>, PlaybackError> {
        let mut clips = self.log.0.lock().unwrap();
        clips.push(PlayedClip {
            spec: *spec,
            samples: 0,
            finished: false,
        });
        Ok(Box::new(RecordingOutput {
            log: self.log.clone(),
            index: clips.len() - 1,
        }))
    }
}

struct RecordingOutput {
    log: SpeakerLog,
    index: usize,
}

impl AudioOutput for RecordingOutput {
    fn write(&mut self, samples: &[i16]) -> Result<(), PlaybackError> {
        self.log.0.lock().unwrap()[self.index].samples += samples.len();
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), PlaybackError> {
        self.log.0.lock().unwrap()[self.index].finished = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChunk {
    pub headers: ChunkHeaders,
    pub body_len: usize,
    /// Leading WAV header, for first chunks.
    pub header: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct ServerRecord {
    chunks: Vec<RecordedChunk>,
    sessions: Vec<SessionId>,
    dropped: Vec<SessionId>,
    reconnects: usize,
    probes: usize,
    checks: Vec<String>,
    verifications: Vec<(String, String)>,
    registrations: Vec<(String, String)>,
    confirmations: Vec<String>,
    syntheses: Vec<String>,
    opened: Vec<String>,
}

/// Read access to everything a [`ScriptedServer`] was asked to do.
#[derive(Clone, Default)]
pub struct ServerLog(Arc<Mutex<ServerRecord>>);

impl ServerLog {
    pub fn chunks(&self) -> Vec<RecordedChunk> {
        self.0.lock().unwrap().chunks.clone()
    }

    /// Distinct upload sessions seen.
    pub fn sessions(&self) -> usize {
        self.0.lock().unwrap().sessions.len()
    }

    /// Session ids of chunks failed as link drops.
    pub fn dropped(&self) -> Vec<SessionId> {
        self.0.lock().unwrap().dropped.clone()
    }

    pub fn reconnects(&self) -> usize {
        self.0.lock().unwrap().reconnects
    }

    pub fn probes(&self) -> usize {
        self.0.lock().unwrap().probes
    }

    pub fn checks(&self) -> Vec<String> {
        self.0.lock().unwrap().checks.clone()
    }

    /// `(name, pin)` per verification request.
    pub fn verifications(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().verifications.clone()
    }

    pub fn registrations(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().registrations.clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.0.lock().unwrap().confirmations.clone()
    }

    pub fn syntheses(&self) -> Vec<String> {
        self.0.lock().unwrap().syntheses.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.0.lock().unwrap().opened.clone()
    }
}

/// Speech server double.
///
/// Intermediate chunks are acknowledged with `OK`; the last chunk of each
/// upload session is answered with the next scripted transcript (empty once
/// the script runs out). Synthesis returns a fresh URL per request and every
/// URL opens as a short tone.
pub struct ScriptedServer {
    log: ServerLog,
    transcripts: VecDeque<String>,
    chunk_replies: VecDeque<String>,
    answered: HashMap<SessionId, String>,
    failing_uploads: usize,
    link_up: bool,
    offline: bool,
    users: HashMap<String, String>,
    register_reply: Option<RegisterResponse>,
    register_failure: Option<ServerError>,
    last_login: LastLoginResponse,
}

impl Default for ScriptedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedServer {
    pub fn new() -> Self {
        Self {
            log: ServerLog::default(),
            transcripts: VecDeque::new(),
            chunk_replies: VecDeque::new(),
            answered: HashMap::new(),
            failing_uploads: 0,
            link_up: true,
            offline: false,
            users: HashMap::new(),
            register_reply: None,
            register_failure: None,
            last_login: LastLoginResponse::default(),
        }
    }

    /// Final answers for successive upload sessions.
    pub fn with_transcripts<I, S>(mut self, transcripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transcripts.extend(transcripts.into_iter().map(Into::into));
        self
    }

    /// Raw bodies for successive chunks, overriding the default answers.
    pub fn with_chunk_replies<I, S>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunk_replies.extend(replies.into_iter().map(Into::into));
        self
    }

    /// Fail the next `count` chunk uploads as if the link dropped.
    pub fn failing_uploads(mut self, count: usize) -> Self {
        self.failing_uploads = count;
        self
    }

    /// Every request fails as unreachable.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn with_user(mut self, name: &str, pin: &str) -> Self {
        self.users.insert(name.to_string(), pin.to_string());
        self
    }

    /// Fixed answer for `register_user`, instead of creating the account.
    pub fn with_register_reply(mut self, reply: RegisterResponse) -> Self {
        self.register_reply = Some(reply);
        self
    }

    /// Fail the next `register_user` call with `error`.
    pub fn with_register_failure(mut self, error: ServerError) -> Self {
        self.register_failure = Some(error);
        self
    }

    pub fn with_last_login(mut self, reply: LastLoginResponse) -> Self {
        self.last_login = reply;
        self
    }

    pub fn log(&self) -> ServerLog {
        self.log.clone()
    }

    fn reachable(&self) -> Result<(), ServerError> {
        if self.offline {
            Err(ServerError::Unreachable("scripted outage".into()))
        } else {
            Ok(())
        }
    }

    fn record(&self) -> std::sync::MutexGuard<'_, ServerRecord> {
        self.log.0.lock().unwrap()
    }
}

impl UploadTransport for ScriptedServer {
    fn post_chunk(&mut self, headers: &ChunkHeaders, body: &[u8]) -> Result<String, ServerError> {
        self.reachable()?;
        if self.failing_uploads > 0 {
            self.failing_uploads -= 1;
            self.link_up = false;
            self.record().dropped.push(headers.session_id.clone());
            return Err(ServerError::Unreachable("scripted link drop".into()));
        }

        {
            let mut record = self.record();
            if !record.sessions.contains(&headers.session_id) {
                record.sessions.push(headers.session_id.clone());
            }
            record.chunks.push(RecordedChunk {
                headers: headers.clone(),
                body_len: body.len(),
                header: headers
                    .first_chunk
                    .then(|| body[..WAV_HEADER_SIZE.min(body.len())].to_vec()),
            });
        }

        if let Some(reply) = self.chunk_replies.pop_front() {
            return Ok(reply);
        }
        if !headers.last_chunk {
            return Ok("OK".to_string());
        }
        let transcripts = &mut self.transcripts;
        let answer = self
            .answered
            .entry(headers.session_id.clone())
            .or_insert_with(|| transcripts.pop_front().unwrap_or_default());
        Ok(answer.clone())
    }

    fn is_connected(&self) -> bool {
        self.link_up
    }

    fn reconnect(&mut self) -> Result<(), ServerError> {
        self.record().reconnects += 1;
        self.reachable()?;
        self.link_up = true;
        Ok(())
    }
}

impl ServerApi for ScriptedServer {
    fn probe(&mut self) -> Result<u16, ServerError> {
        self.record().probes += 1;
        self.reachable()?;
        Ok(200)
    }

    fn register_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<RegisterResponse, ServerError> {
        self.reachable()?;
        let pin = password.expose_secret().clone();
        self.record()
            .registrations
            .push((name.to_string(), pin.clone()));

        if let Some(error) = self.register_failure.take() {
            return Err(error);
        }
        if let Some(reply) = &self.register_reply {
            return Ok(reply.clone());
        }
        let status = if self.users.contains_key(name) {
            RegisterStatus::Exists
        } else {
            self.users.insert(name.to_string(), pin);
            RegisterStatus::Success
        };
        Ok(RegisterResponse {
            status,
            message: None,
            name: Some(name.to_string()),
            audio_url: Some(format!("http://srv/audios/register_{}.wav", name)),
        })
    }

    fn check_user(&mut self, name: &str) -> Result<bool, ServerError> {
        self.reachable()?;
        self.record().checks.push(name.to_string());
        Ok(self.users.contains_key(name))
    }

    fn verify_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<VerifyResponse, ServerError> {
        self.reachable()?;
        let pin = password.expose_secret().clone();
        self.record()
            .verifications
            .push((name.to_string(), pin.clone()));

        let status = if self.users.get(name) == Some(&pin) {
            VerifyStatus::Success
        } else {
            VerifyStatus::Rejected
        };
        Ok(VerifyResponse {
            status,
            message: None,
        })
    }

    fn confirm_name(&mut self, name: &str) -> Result<ConfirmNameResponse, ServerError> {
        self.reachable()?;
        self.record().confirmations.push(name.to_string());
        Ok(ConfirmNameResponse {
            status: Some("success".to_string()),
            audio_url: Some(format!("http://srv/audios/confirm_{}.wav", name)),
        })
    }

    fn last_login(&mut self) -> Result<LastLoginResponse, ServerError> {
        self.reachable()?;
        Ok(self.last_login.clone())
    }

    fn synthesize(&mut self, text: &str, _lang: &str) -> Result<Option<String>, ServerError> {
        self.reachable()?;
        let mut record = self.record();
        record.syntheses.push(text.to_string());
        Ok(Some(format!(
            "http://srv/audios/tts_{}.wav",
            record.syntheses.len()
        )))
    }
}

impl AudioStreamOpener for ScriptedServer {
    fn open(&mut self, url: &str) -> Result<Box<dyn Read + Send>, ServerError> {
        self.reachable()?;
        self.record().opened.push(url.to_string());
        let tone: Vec<i16> = (0..1600).map(|i| ((i % 40) as i16 - 20) * 500).collect();
        Ok(Box::new(Cursor::new(wav_bytes(16000, &tone))))
    }
}
