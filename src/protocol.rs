//! Wire contract with the speech server: upload framing headers, the tagged
//! reply adapter, and the JSON bodies of the account endpoints.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HEADER_SESSION_ID: &str = "X-Session-ID";
pub const HEADER_FIRST_CHUNK: &str = "X-First-Chunk";
pub const HEADER_LAST_CHUNK: &str = "X-Last-Chunk";
pub const HEADER_WAKE_CHECK: &str = "X-Wake-Check";
pub const CONTENT_TYPE_WAV: &str = "audio/wav";

/// Body of an intermediate chunk acknowledgment.
const ACK_BODY: &str = "OK";

/// Opaque token grouping the chunks of one capture at the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Random 32-bit token rendered as lower-case hex.
    pub fn generate() -> Self {
        let value: u32 = rand::thread_rng().gen();
        Self(format!("{:x}", value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Framing headers carried by every upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeaders {
    pub session_id: SessionId,
    pub first_chunk: bool,
    pub last_chunk: bool,
    /// Ask the server for the bare transcript instead of an assistant reply.
    pub wake_check: bool,
}

impl ChunkHeaders {
    /// Header name/value pairs in the order they are sent.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (HEADER_SESSION_ID, self.session_id.to_string()),
            (HEADER_FIRST_CHUNK, flag(self.first_chunk)),
            (HEADER_LAST_CHUNK, flag(self.last_chunk)),
        ];
        if self.wake_check {
            pairs.push((HEADER_WAKE_CHECK, flag(true)));
        }
        pairs
    }
}

fn flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// What an upload response body means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerReply {
    Transcript(String),
    AudioUrl(String),
    /// Intermediate chunk accepted, nothing to report yet.
    Ack,
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
enum TaggedReply {
    Transcript(String),
    AudioUrl(String),
}

impl ServerReply {
    /// Interpret an upload response body.
    ///
    /// A JSON body tagged with `kind` is taken at its word. Anything else goes
    /// through the legacy rule where a URL is recognised by its `http` prefix.
    pub fn classify(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.starts_with('{') {
            if let Ok(tagged) = serde_json::from_str::<TaggedReply>(trimmed) {
                return match tagged {
                    TaggedReply::Transcript(text) => Self::from_text(text.trim()),
                    TaggedReply::AudioUrl(url) if !url.trim().is_empty() => {
                        Self::AudioUrl(url.trim().to_string())
                    }
                    TaggedReply::AudioUrl(_) => Self::Empty,
                };
            }
        }

        if trimmed.starts_with("http") {
            return Self::AudioUrl(trimmed.to_string());
        }
        if trimmed == ACK_BODY {
            return Self::Ack;
        }
        Self::from_text(trimmed)
    }

    fn from_text(text: &str) -> Self {
        if text.is_empty() {
            Self::Empty
        } else {
            Self::Transcript(text.to_string())
        }
    }
}

/// `{name, password}` body of `register_user` and `verify_user`.
#[derive(Debug, Serialize)]
pub struct Credentials<'a> {
    pub name: &'a str,
    pub password: &'a str,
}

/// `{name}` body of `check_user` and `confirm_name`.
#[derive(Debug, Serialize)]
pub struct NameRequest<'a> {
    pub name: &'a str,
}

/// `{text, lang}` body of a synthesis request.
#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub lang: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    Success,
    Exists,
    #[serde(other)]
    Error,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub status: RegisterStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Success,
    #[serde(other)]
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub status: VerifyStatus,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmNameResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastLoginResponse {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Keep only URLs the playback engine can open.
pub fn playable(url: Option<String>) -> Option<String> {
    url.map(|u| u.trim().to_string())
        .filter(|u| u.starts_with("http"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_hex() {
        let id = SessionId::generate();
        assert!(!id.as_str().is_empty());
        assert!(id.as_str().len() <= 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_header_pairs() {
        let headers = ChunkHeaders {
            session_id: SessionId::from("beef"),
            first_chunk: true,
            last_chunk: false,
            wake_check: false,
        };
        assert_eq!(
            headers.pairs(),
            vec![
                (HEADER_SESSION_ID, "beef".to_string()),
                (HEADER_FIRST_CHUNK, "true".to_string()),
                (HEADER_LAST_CHUNK, "false".to_string()),
            ]
        );

        let wake = ChunkHeaders {
            wake_check: true,
            ..headers
        };
        assert_eq!(wake.pairs().last().unwrap().0, HEADER_WAKE_CHECK);
    }

    #[test]
    fn test_legacy_classification() {
        assert_eq!(
            ServerReply::classify("http://srv/audios/a_reply.wav\n"),
            ServerReply::AudioUrl("http://srv/audios/a_reply.wav".into())
        );
        assert_eq!(
            ServerReply::classify("  Uyan lütfen "),
            ServerReply::Transcript("Uyan lütfen".into())
        );
        assert_eq!(ServerReply::classify("OK"), ServerReply::Ack);
        assert_eq!(ServerReply::classify("   "), ServerReply::Empty);
    }

    #[test]
    fn test_tagged_classification_wins_over_prefix() {
        assert_eq!(
            ServerReply::classify(r#"{"kind":"transcript","value":"http is a protocol"}"#),
            ServerReply::Transcript("http is a protocol".into())
        );
        assert_eq!(
            ServerReply::classify(r#"{"kind":"audio_url","value":"https://srv/x.wav"}"#),
            ServerReply::AudioUrl("https://srv/x.wav".into())
        );
        // Unrelated JSON is still just text
        assert_eq!(
            ServerReply::classify(r#"{"error":"bad"}"#),
            ServerReply::Transcript(r#"{"error":"bad"}"#.into())
        );
    }

    #[test]
    fn test_status_parsing() {
        let exists: RegisterResponse =
            serde_json::from_str(r#"{"status":"exists","audio_url":"http://a/b.wav"}"#).unwrap();
        assert_eq!(exists.status, RegisterStatus::Exists);

        let odd: RegisterResponse = serde_json::from_str(r#"{"status":"teapot"}"#).unwrap();
        assert_eq!(odd.status, RegisterStatus::Error);

        let denied: VerifyResponse =
            serde_json::from_str(r#"{"status":"error","message":"Invalid password"}"#).unwrap();
        assert_eq!(denied.status, VerifyStatus::Rejected);
    }

    #[test]
    fn test_playable_filter() {
        assert_eq!(
            playable(Some(" http://a/b.wav ".into())),
            Some("http://a/b.wav".into())
        );
        assert_eq!(playable(Some("ftp://a".into())), None);
        assert_eq!(playable(None), None);
    }
}
