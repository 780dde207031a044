//! Time-boxed chunked upload of one capture.
//!
//! A session streams frames to the server as they are read. The first frame
//! carries the WAV header, the frame read within the last-chunk margin of the
//! deadline is flagged last, and the session's result is whatever substantive
//! reply the server produced most recently.

use std::time::Duration;

use crate::audio_capture::{AudioError, AudioFrame, CaptureConfig, CaptureHandle};
use crate::clock::{since, Clock};
use crate::protocol::{ChunkHeaders, ServerReply, SessionId};
use crate::server::UploadTransport;
use crate::wav::WavFramer;

/// Transmission errors tolerated before a session gives up.
pub const MAX_UPLOAD_ERRORS: u32 = 5;

/// Frames read this close to the deadline are flagged last.
pub const LAST_CHUNK_MARGIN: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub duration: Duration,
    /// Ask for a transcript rather than an assistant reply.
    pub wake_check: bool,
}

impl UploadOptions {
    pub fn transcript(duration: Duration) -> Self {
        Self {
            duration,
            wake_check: true,
        }
    }

    pub fn assistant(duration: Duration) -> Self {
        Self {
            duration,
            wake_check: false,
        }
    }
}

/// Bookkeeping for one upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: SessionId,
    /// PCM bytes declared in the WAV header.
    pub byte_budget: u32,
    pub duration: Duration,
    pub first_chunk_sent: bool,
    pub last_chunk_sent: bool,
    pub error_count: u32,
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Final bookkeeping, including the flags and error count.
    pub session: UploadSession,
    pub transcript: Option<String>,
    pub audio_url: Option<String>,
    pub chunks_sent: usize,
    pub pcm_bytes_sent: usize,
    /// Stopped early on the error budget.
    pub aborted: bool,
}

pub struct ChunkedUploadSession {
    state: UploadSession,
    framer: WavFramer,
    wake_check: bool,
}

impl ChunkedUploadSession {
    pub fn new(capture: &CaptureConfig, options: UploadOptions) -> Self {
        Self::with_session_id(SessionId::generate(), capture, options)
    }

    pub fn with_session_id(
        session_id: SessionId,
        capture: &CaptureConfig,
        options: UploadOptions,
    ) -> Self {
        let framer = WavFramer::for_duration(capture.sample_rate, options.duration);
        Self {
            state: UploadSession {
                session_id,
                byte_budget: framer.data_len(),
                duration: options.duration,
                first_chunk_sent: false,
                last_chunk_sent: false,
                error_count: 0,
            },
            framer,
            wake_check: options.wake_check,
        }
    }

    /// Stream frames from `handle` until the session duration has elapsed or
    /// the error budget is exhausted.
    ///
    /// Transmission failures are absorbed; only a failing capture read ends
    /// the session with an error.
    pub fn run(
        mut self,
        handle: &mut CaptureHandle<'_>,
        transport: &mut dyn UploadTransport,
        clock: &dyn Clock,
    ) -> Result<UploadOutcome, AudioError> {
        let duration = self.state.duration;
        let mut frame = AudioFrame::new(handle.config().chunk_size);
        let mut transcript = None;
        let mut audio_url = None;
        let mut chunks_sent = 0;
        let mut pcm_bytes_sent = 0;
        let mut aborted = false;
        let start = clock.elapsed();

        log::debug!(
            "📤 Upload session {} started ({:?}, {} byte budget)",
            self.state.session_id,
            duration,
            self.state.byte_budget
        );

        while since(clock, start) < duration {
            let framer = (!self.state.first_chunk_sent).then_some(&self.framer);
            let pcm_len = frame.capture(handle, framer)?;
            if pcm_len == 0 {
                continue;
            }

            let last_chunk = since(clock, start) + LAST_CHUNK_MARGIN >= duration;
            let headers = ChunkHeaders {
                session_id: self.state.session_id.clone(),
                first_chunk: !self.state.first_chunk_sent,
                last_chunk,
                wake_check: self.wake_check,
            };

            match transport.post_chunk(&headers, frame.payload()) {
                Ok(body) => {
                    self.state.first_chunk_sent = true;
                    if last_chunk {
                        self.state.last_chunk_sent = true;
                    }
                    chunks_sent += 1;
                    pcm_bytes_sent += pcm_len;

                    match ServerReply::classify(&body) {
                        ServerReply::Transcript(text) => {
                            log::debug!("📝 Interim transcript: '{}'", text);
                            transcript = Some(text);
                        }
                        ServerReply::AudioUrl(url) => {
                            log::debug!("🔊 Reply audio available at {}", url);
                            audio_url = Some(url);
                        }
                        ServerReply::Ack | ServerReply::Empty => {}
                    }
                }
                Err(e) => {
                    self.state.error_count += 1;
                    log::warn!(
                        "⚠️ Chunk upload failed ({}/{}): {}",
                        self.state.error_count,
                        MAX_UPLOAD_ERRORS,
                        e
                    );

                    if self.state.error_count > MAX_UPLOAD_ERRORS {
                        log::error!(
                            "❌ Too many upload errors, abandoning session {}",
                            self.state.session_id
                        );
                        aborted = true;
                        break;
                    }

                    if !transport.is_connected() {
                        if let Err(e) = transport.reconnect() {
                            log::warn!("🔌 Reconnect failed: {}", e);
                        }
                    }
                }
            }
        }

        log::info!(
            "📤 Upload complete: {} bytes in {} chunks ({} errors)",
            pcm_bytes_sent,
            chunks_sent,
            self.state.error_count
        );
        Ok(UploadOutcome {
            session: self.state,
            transcript,
            audio_url,
            chunks_sent,
            pcm_bytes_sent,
            aborted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_utils::{FakeMicrophone, ScriptedServer};
    use crate::wav::WAV_HEADER_SIZE;
    use std::sync::Arc;

    fn run_session(
        server: &mut ScriptedServer,
        options: UploadOptions,
    ) -> (UploadOutcome, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CaptureConfig::default();
        let mut mic = FakeMicrophone::with_clock(config.chunk_size, clock.clone());
        let mut handle = CaptureHandle::acquire(&mut mic, &config).unwrap();
        let outcome = ChunkedUploadSession::new(&config, options)
            .run(&mut handle, server, clock.as_ref())
            .unwrap();
        (outcome, clock)
    }

    #[test]
    fn test_frame_count_and_flags() {
        let mut server = ScriptedServer::new().with_transcripts(["merhaba"]);
        let (outcome, _) = run_session(
            &mut server,
            UploadOptions::transcript(Duration::from_secs(3)),
        );

        // 3 s at 32000 B/s in 4096 byte frames
        let expected = (96000 + 4095) / 4096;
        assert_eq!(outcome.chunks_sent, expected);

        let chunks = server.log().chunks();
        assert_eq!(chunks.len(), expected);
        assert_eq!(chunks.iter().filter(|c| c.headers.first_chunk).count(), 1);
        assert!(chunks[0].headers.first_chunk);
        assert!(chunks.last().unwrap().headers.last_chunk);
        assert!(chunks.iter().all(|c| c.headers.wake_check));

        // Only the first body carries the header
        assert_eq!(chunks[0].body_len, 4096 + WAV_HEADER_SIZE);
        assert_eq!(chunks[1].body_len, 4096);

        let session = &chunks[0].headers.session_id;
        assert!(chunks.iter().all(|c| &c.headers.session_id == session));
        assert_eq!(&outcome.session.session_id, session);
        assert!(outcome.session.first_chunk_sent);
        assert!(outcome.session.last_chunk_sent);
        assert_eq!(outcome.session.byte_budget, 96000);
        assert_eq!(outcome.transcript.as_deref(), Some("merhaba"));
    }

    #[test]
    fn test_declared_budget_in_first_frame() {
        let mut server = ScriptedServer::new();
        run_session(&mut server, UploadOptions::transcript(Duration::from_secs(3)));

        let header = server.log().chunks()[0].header.clone().unwrap();
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 96000);
    }

    #[test]
    fn test_latest_reply_kept_per_kind() {
        let mut server = ScriptedServer::new().with_chunk_replies([
            "OK",
            "ilk",
            "http://srv/audios/r.wav",
            "OK",
            "",
        ]);
        let (outcome, _) = run_session(
            &mut server,
            UploadOptions::assistant(Duration::from_secs(1)),
        );
        assert_eq!(outcome.transcript.as_deref(), Some("ilk"));
        assert_eq!(outcome.audio_url.as_deref(), Some("http://srv/audios/r.wav"));
        assert!(server.log().chunks().iter().all(|c| !c.headers.wake_check));
    }

    #[test]
    fn test_error_budget_aborts_session() {
        let mut server = ScriptedServer::new().failing_uploads(usize::MAX);
        let (outcome, _) = run_session(
            &mut server,
            UploadOptions::transcript(Duration::from_secs(10)),
        );
        assert!(outcome.aborted);
        assert_eq!(outcome.session.error_count, MAX_UPLOAD_ERRORS + 1);
        assert_eq!(outcome.chunks_sent, 0);
        assert!(!outcome.session.first_chunk_sent);
        assert!(!outcome.session.last_chunk_sent);
        assert!(server.log().reconnects() > 0);

        // Every attempt, before and after each reconnect, used one id
        let dropped = server.log().dropped();
        assert_eq!(dropped.len(), (MAX_UPLOAD_ERRORS + 1) as usize);
        assert!(dropped.iter().all(|id| id == &outcome.session.session_id));
    }

    #[test]
    fn test_first_flag_retried_after_failed_send() {
        let mut server = ScriptedServer::new().failing_uploads(1);
        let (outcome, _) = run_session(
            &mut server,
            UploadOptions::transcript(Duration::from_secs(1)),
        );
        assert!(!outcome.aborted);
        assert_eq!(outcome.session.error_count, 1);

        let chunks = server.log().chunks();
        assert_eq!(chunks.iter().filter(|c| c.headers.first_chunk).count(), 1);
        assert!(chunks[0].headers.first_chunk);
    }

    #[test]
    fn test_reconnect_keeps_session_id() {
        let mut server = ScriptedServer::new()
            .failing_uploads(1)
            .with_transcripts(["merhaba"]);
        let (outcome, _) = run_session(
            &mut server,
            UploadOptions::transcript(Duration::from_secs(1)),
        );

        let log = server.log();
        assert_eq!(log.reconnects(), 1);
        assert_eq!(log.sessions(), 1);

        // The dropped frame and every frame after the reconnect share the id
        let id = &outcome.session.session_id;
        assert_eq!(log.dropped(), vec![id.clone()]);
        let chunks = log.chunks();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| &c.headers.session_id == id));
        assert_eq!(outcome.transcript.as_deref(), Some("merhaba"));
    }
}
