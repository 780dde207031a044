//! Speech server client.
//!
//! One blocking HTTP client serves every concern the device has with the
//! server: chunked audio upload, the account endpoints, speech synthesis and
//! streaming of reply audio.

use reqwest::blocking::{Client, Response};
use secrecy::{ExposeSecret, SecretBox};
use std::io::Read;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, DeviceConfig};
use crate::protocol::{
    playable, ChunkHeaders, ConfirmNameResponse, Credentials, LastLoginResponse, NameRequest,
    RegisterResponse, RegisterStatus, SynthesisRequest, VerifyResponse, VerifyStatus,
    CONTENT_TYPE_WAV,
};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("Server unreachable: {0}")]
    Unreachable(String),
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] ConfigError),
}

impl ServerError {
    /// True when the server could not be reached at all, as opposed to
    /// answering with something unexpected.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ServerError::Request(e) => e.is_connect() || e.is_timeout(),
            ServerError::Unreachable(_) => true,
            _ => false,
        }
    }
}

/// Chunked audio upload pipe.
pub trait UploadTransport {
    /// Send one frame; returns the response body of a successful request.
    fn post_chunk(&mut self, headers: &ChunkHeaders, body: &[u8]) -> Result<String, ServerError>;

    /// Whether the network link is believed to be up.
    fn is_connected(&self) -> bool;

    /// Tear down and re-establish the request pipe.
    fn reconnect(&mut self) -> Result<(), ServerError>;
}

/// Account, synthesis and liveness endpoints.
pub trait ServerApi {
    /// Liveness probe; any HTTP answer counts. Returns the status code.
    fn probe(&mut self) -> Result<u16, ServerError>;

    fn register_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<RegisterResponse, ServerError>;

    /// Whether a user with this name exists.
    fn check_user(&mut self, name: &str) -> Result<bool, ServerError>;

    fn verify_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<VerifyResponse, ServerError>;

    fn confirm_name(&mut self, name: &str) -> Result<ConfirmNameResponse, ServerError>;

    fn last_login(&mut self) -> Result<LastLoginResponse, ServerError>;

    /// Synthesise `text`; returns a playable URL if the server produced one.
    fn synthesize(&mut self, text: &str, lang: &str) -> Result<Option<String>, ServerError>;
}

/// Opens reply audio for streaming playback.
pub trait AudioStreamOpener {
    fn open(&mut self, url: &str) -> Result<Box<dyn Read + Send>, ServerError>;
}

/// Everything the device needs from the server, behind one handle.
pub trait SpeechServer: UploadTransport + ServerApi + AudioStreamOpener {
    fn as_transport(&mut self) -> &mut dyn UploadTransport;
    fn as_api(&mut self) -> &mut dyn ServerApi;
    fn as_opener(&mut self) -> &mut dyn AudioStreamOpener;
}

impl<T: UploadTransport + ServerApi + AudioStreamOpener> SpeechServer for T {
    fn as_transport(&mut self) -> &mut dyn UploadTransport {
        self
    }

    fn as_api(&mut self) -> &mut dyn ServerApi {
        self
    }

    fn as_opener(&mut self) -> &mut dyn AudioStreamOpener {
        self
    }
}

/// Resolved endpoint URLs.
#[derive(Debug, Clone)]
struct Endpoints {
    root: Url,
    upload: Url,
    register_user: Url,
    check_user: Url,
    verify_user: Url,
    confirm_name: Url,
    last_login: Url,
}

impl Endpoints {
    fn resolve(config: &DeviceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            root: config.server_url.clone(),
            upload: config.endpoint("upload")?,
            register_user: config.endpoint("register_user")?,
            check_user: config.endpoint("check_user")?,
            verify_user: config.endpoint("verify_user")?,
            confirm_name: config.endpoint("confirm_name")?,
            last_login: config.endpoint("last_login")?,
        })
    }
}

/// Blocking HTTP implementation of [`SpeechServer`].
pub struct HttpSpeechServer {
    client: Client,
    endpoints: Endpoints,
    timeout: Duration,
    link_up: bool,
}

impl HttpSpeechServer {
    pub fn new(config: &DeviceConfig) -> Result<Self, ServerError> {
        let endpoints = Endpoints::resolve(config)?;
        let client = Self::build_client(config.http_timeout)?;

        Ok(Self {
            client,
            endpoints,
            timeout: config.http_timeout,
            link_up: true,
        })
    }

    fn build_client(timeout: Duration) -> Result<Client, ServerError> {
        Ok(Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?)
    }

    /// Record link loss on transport-level failures.
    fn track<T>(&mut self, result: Result<T, reqwest::Error>) -> Result<T, ServerError> {
        result.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                if self.link_up {
                    log::warn!("📡 Link to server lost: {}", e);
                }
                self.link_up = false;
            }
            ServerError::Request(e)
        })
    }

    fn post_json<B: serde::Serialize>(&mut self, url: Url, body: &B) -> Result<Response, ServerError> {
        let result = self.client.post(url).json(body).send();
        let response = self.track(result)?;
        self.link_up = true;
        Ok(response)
    }

    fn get(&mut self, url: Url) -> Result<Response, ServerError> {
        let result = self.client.get(url).send();
        let response = self.track(result)?;
        self.link_up = true;
        Ok(response)
    }

    /// Body of a 2xx response, or an `ApiError` carrying the body.
    fn success_text(response: Response) -> Result<String, ServerError> {
        let status = response.status();
        let text = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());
        if !status.is_success() {
            return Err(ServerError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }

    fn parse<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, ServerError> {
        serde_json::from_str(text).map_err(|e| {
            ServerError::ParseError(format!("Invalid JSON ({}): {}", e, text.trim()))
        })
    }
}

impl UploadTransport for HttpSpeechServer {
    fn post_chunk(&mut self, headers: &ChunkHeaders, body: &[u8]) -> Result<String, ServerError> {
        let mut request = self
            .client
            .post(self.endpoints.upload.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_WAV);
        for (name, value) in headers.pairs() {
            request = request.header(name, value);
        }

        let result = request.body(body.to_vec()).send();
        let response = self.track(result)?;
        self.link_up = true;
        Self::success_text(response)
    }

    fn is_connected(&self) -> bool {
        self.link_up
    }

    fn reconnect(&mut self) -> Result<(), ServerError> {
        log::info!("🔌 Re-establishing connection to {}", self.endpoints.root);
        self.client = Self::build_client(self.timeout)?;
        self.probe()?;
        Ok(())
    }
}

impl ServerApi for HttpSpeechServer {
    fn probe(&mut self) -> Result<u16, ServerError> {
        log::debug!("🔍 Probing server at {}", self.endpoints.root);
        let response = self.get(self.endpoints.root.clone())?;
        let status = response.status().as_u16();
        log::debug!("✅ Server answered (HTTP {})", status);
        Ok(status)
    }

    fn register_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<RegisterResponse, ServerError> {
        let body = Credentials {
            name,
            password: password.expose_secret(),
        };
        let response = self.post_json(self.endpoints.register_user.clone(), &body)?;
        let status = response.status();
        let text = response.text()?;

        // Missing fields and storage failures come back as 400/500 with a
        // structured body
        match serde_json::from_str::<RegisterResponse>(&text) {
            Ok(mut parsed) => {
                if !status.is_success() {
                    parsed.status = RegisterStatus::Error;
                }
                Ok(parsed)
            }
            Err(_) if !status.is_success() => Err(ServerError::ApiError {
                status: status.as_u16(),
                message: text,
            }),
            Err(e) => Err(ServerError::ParseError(e.to_string())),
        }
    }

    fn check_user(&mut self, name: &str) -> Result<bool, ServerError> {
        let response = self.post_json(self.endpoints.check_user.clone(), &NameRequest { name })?;
        let text = Self::success_text(response)?;
        Ok(text.trim() == "OK")
    }

    fn verify_user(
        &mut self,
        name: &str,
        password: &SecretBox<String>,
    ) -> Result<VerifyResponse, ServerError> {
        let body = Credentials {
            name,
            password: password.expose_secret(),
        };
        let response = self.post_json(self.endpoints.verify_user.clone(), &body)?;
        let status = response.status();
        let text = response.text()?;

        // Wrong credentials come back as 401 with a structured body
        match serde_json::from_str::<VerifyResponse>(&text) {
            Ok(mut parsed) => {
                if !status.is_success() {
                    parsed.status = VerifyStatus::Rejected;
                }
                Ok(parsed)
            }
            Err(_) if !status.is_success() => Err(ServerError::ApiError {
                status: status.as_u16(),
                message: text,
            }),
            Err(e) => Err(ServerError::ParseError(e.to_string())),
        }
    }

    fn confirm_name(&mut self, name: &str) -> Result<ConfirmNameResponse, ServerError> {
        let response =
            self.post_json(self.endpoints.confirm_name.clone(), &NameRequest { name })?;
        let text = Self::success_text(response)?;
        Self::parse(&text)
    }

    fn last_login(&mut self) -> Result<LastLoginResponse, ServerError> {
        let response = self.get(self.endpoints.last_login.clone())?;
        let text = Self::success_text(response)?;
        Self::parse(&text)
    }

    fn synthesize(&mut self, text: &str, lang: &str) -> Result<Option<String>, ServerError> {
        log::debug!("🗣️ Requesting synthesis: '{}'", text);
        let response = self.post_json(
            self.endpoints.upload.clone(),
            &SynthesisRequest { text, lang },
        )?;
        let body = Self::success_text(response)?;
        Ok(playable(Some(body)))
    }
}

impl AudioStreamOpener for HttpSpeechServer {
    fn open(&mut self, url: &str) -> Result<Box<dyn Read + Send>, ServerError> {
        let url = Url::parse(url)
            .map_err(|e| ServerError::ParseError(format!("Invalid audio URL '{}': {}", url, e)))?;
        let response = self.get(url)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServerError::ApiError {
                status: status.as_u16(),
                message: "audio stream unavailable".to_string(),
            });
        }
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_resolves_endpoints() {
        let config = DeviceConfig::default()
            .with_server_url("http://192.168.1.20:5000")
            .unwrap();
        let server = HttpSpeechServer::new(&config).unwrap();
        assert_eq!(
            server.endpoints.upload.as_str(),
            "http://192.168.1.20:5000/upload"
        );
        assert_eq!(
            server.endpoints.last_login.as_str(),
            "http://192.168.1.20:5000/last_login"
        );
        assert!(server.is_connected());
        assert_eq!(server.timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(ServerError::Unreachable("down".into()).is_unreachable());
        assert!(!ServerError::ApiError {
            status: 500,
            message: "boom".into()
        }
        .is_unreachable());
        assert!(!ServerError::ParseError("bad".into()).is_unreachable());
    }

    #[test]
    fn test_unreachable_server_marks_link_down() {
        // Port 9 (discard) on localhost is normally closed
        let config = DeviceConfig::default()
            .with_server_url("http://127.0.0.1:9")
            .unwrap();
        let mut server = HttpSpeechServer::new(&config).unwrap();
        let err = server.probe().unwrap_err();
        assert!(err.is_unreachable());
        assert!(!server.is_connected());
    }
}
