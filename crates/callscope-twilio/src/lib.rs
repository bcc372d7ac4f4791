//! Twilio-side integration: webhook signature validation, TwiML synthesis,
//! and recording downloads. The HTTP routes themselves live in the server
//! crate; everything here is transport-free and unit-testable except the
//! recording download.

pub mod download;
pub mod signature;
pub mod twiml;
pub mod webhook;

use callscope_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwilioError {
    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("incomplete settings: {0}")]
    Settings(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("recording API returned status {status}")]
    RecordingStatus { status: u16 },
}

impl From<TwilioError> for CoreError {
    fn from(e: TwilioError) -> Self {
        match e {
            TwilioError::InvalidSignature => CoreError::Auth(e.to_string()),
            TwilioError::Settings(_) => CoreError::Config(e.to_string()),
            TwilioError::Http(inner) => CoreError::Transport {
                message: inner.to_string(),
                retryable: true,
            },
            TwilioError::RecordingStatus { status } => CoreError::ExternalApi {
                status,
                message: "twilio recording fetch failed".into(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TwilioError>;
