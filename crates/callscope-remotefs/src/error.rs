use callscope_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteFsError {
    #[error("connect to {host}:{port} failed: {message}")]
    Connect {
        host: String,
        port: u16,
        message: String,
    },

    #[error("ssh authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("operation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("remote path error on {path}: {message}")]
    Path { path: String, message: String },

    #[error("remote command exited with status {status}: {stderr}")]
    Command { status: i32, stderr: String },

    #[error("ssh transport error: {0}")]
    Ssh(String),

    #[error("incomplete settings: {0}")]
    Settings(String),
}

impl From<ssh2::Error> for RemoteFsError {
    fn from(e: ssh2::Error) -> Self {
        RemoteFsError::Ssh(e.to_string())
    }
}

impl From<RemoteFsError> for CoreError {
    fn from(e: RemoteFsError) -> Self {
        match e {
            RemoteFsError::Connect { .. } | RemoteFsError::Timeout { .. } => {
                CoreError::Transport {
                    message: e.to_string(),
                    retryable: true,
                }
            }
            RemoteFsError::Ssh(_) => CoreError::Transport {
                message: e.to_string(),
                retryable: true,
            },
            RemoteFsError::Auth { .. } => CoreError::Auth(e.to_string()),
            RemoteFsError::Settings(_) => CoreError::Config(e.to_string()),
            RemoteFsError::Path { .. } | RemoteFsError::Command { .. } => {
                CoreError::RemoteFs(e.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteFsError>;
