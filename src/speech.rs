//! Speech I/O
//!
//! Capture yields one final transcript per start/stop cycle; playback takes
//! encoded audio bytes. A missing capability is reported as
//! `SpeechError::Unavailable`, which callers surface as a notice.

mod command;

pub use command::CommandSpeech;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpeechError {
    #[error("{0} is not available on this system")]
    Unavailable(String),
    #[error("Voice capture failed: {0}")]
    Capture(String),
    #[error("Audio playback failed: {0}")]
    Playback(String),
}

impl SpeechError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SpeechError::Unavailable(_))
    }
}

#[async_trait]
pub trait SpeechIo: Send + Sync {
    /// Begin a capture. The receiver yields at most one transcript and then
    /// closes.
    async fn start_capture(&self) -> Result<mpsc::Receiver<String>, SpeechError>;

    /// Finish the capture in progress, if any
    async fn stop_capture(&self) -> Result<(), SpeechError>;

    async fn speak(&self, audio: &[u8], mime: &str) -> Result<(), SpeechError>;
}

#[async_trait]
impl<T: SpeechIo + ?Sized> SpeechIo for Arc<T> {
    async fn start_capture(&self) -> Result<mpsc::Receiver<String>, SpeechError> {
        (**self).start_capture().await
    }

    async fn stop_capture(&self) -> Result<(), SpeechError> {
        (**self).stop_capture().await
    }

    async fn speak(&self, audio: &[u8], mime: &str) -> Result<(), SpeechError> {
        (**self).speak(audio, mime).await
    }
}
