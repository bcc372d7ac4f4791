use callscope_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FreePbxError {
    #[error("incomplete settings: {0}")]
    Settings(String),

    #[error("cdr database error: {0}")]
    Cdr(#[from] mysql_async::Error),

    #[error("rest error: {0}")]
    Rest(#[from] reqwest::Error),

    #[error("rest API returned status {status}")]
    RestStatus { status: u16 },

    #[error("remote filesystem error: {0}")]
    RemoteFs(#[from] callscope_remotefs::RemoteFsError),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<FreePbxError> for CoreError {
    fn from(e: FreePbxError) -> Self {
        match e {
            FreePbxError::Settings(_) => CoreError::Config(e.to_string()),
            FreePbxError::Cdr(_) | FreePbxError::Rest(_) => CoreError::Transport {
                message: e.to_string(),
                retryable: true,
            },
            FreePbxError::RestStatus { status } => CoreError::ExternalApi {
                status,
                message: "freepbx rest api error".into(),
            },
            FreePbxError::RemoteFs(inner) => inner.into(),
            FreePbxError::Parse(msg) => CoreError::Data(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, FreePbxError>;
