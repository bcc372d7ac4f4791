//! Speech-to-text and chat-completion wrappers around the OpenAI API, plus
//! the structured report parser for analysis responses.

mod chat;
mod client;
mod report;
mod whisper;

use callscope_core::CoreError;
use thiserror::Error;

pub use chat::{AnalysisOutcome, DEFAULT_ANALYSIS_PROMPT};
pub use client::OpenAiClient;
pub use report::{parse_report, CallReport};
pub use whisper::Transcription;

#[derive(Debug, Error)]
pub enum OpenAiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("openai api key is not configured")]
    MissingKey,
}

impl From<OpenAiError> for CoreError {
    fn from(e: OpenAiError) -> Self {
        match e {
            OpenAiError::MissingKey => CoreError::Config(e.to_string()),
            OpenAiError::Http(inner) => CoreError::Transport {
                message: inner.to_string(),
                retryable: true,
            },
            OpenAiError::Api { status, message } => CoreError::ExternalApi { status, message },
            OpenAiError::Parse(msg) => CoreError::Data(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, OpenAiError>;
