pub mod audio_capture;
#[cfg(feature = "host_audio")]
pub mod audio_sink;
pub mod auth;
pub mod clock;
pub mod config;
pub mod device;
pub mod door;
pub mod error;
pub mod intent;
pub mod keypad;
pub mod orchestrator;
pub mod pin;
pub mod playback;
pub mod protocol;
pub mod server;
#[doc(hidden)]
pub mod test_utils;
pub mod upload;
pub mod voice_capture;
pub mod wakeword;
pub mod wav;

pub use error::{EdgeError, Result};
