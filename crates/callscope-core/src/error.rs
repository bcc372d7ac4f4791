use thiserror::Error;

/// Shared error taxonomy. Subsystem crates define their own error enums and
/// convert into this one at the pipeline/scheduler/HTTP boundary, where the
/// kind decides retry behaviour and the response status family.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("remote filesystem error: {0}")]
    RemoteFs(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("illegal state transition: {0}")]
    State(String),

    #[error("external API error ({status}): {message}")]
    ExternalApi { status: u16, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable kind string persisted in `last_error` and used by the HTTP
    /// surface to pick a status family.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "ConfigError",
            CoreError::Auth(_) => "AuthError",
            CoreError::Transport { .. } => "TransportError",
            CoreError::RemoteFs(_) => "RemoteFSError",
            CoreError::Data(_) => "DataError",
            CoreError::State(_) => "StateError",
            CoreError::ExternalApi { .. } => "ExternalAPIError",
            CoreError::Internal(_) => "InternalError",
        }
    }

    /// Whether a retry with no operator intervention could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport { retryable: true, .. })
    }

    /// Short one-line form persisted on failed rows, e.g.
    /// `ConfigError: openai api key is not configured`.
    pub fn to_short_string(&self) -> String {
        let mut msg = self.to_string();
        if let Some(idx) = msg.find('\n') {
            msg.truncate(idx);
        }
        if msg.len() > 500 {
            msg.truncate(500);
        }
        format!("{}: {}", self.kind(), msg)
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(CoreError::Config("x".into()).kind(), "ConfigError");
        assert_eq!(
            CoreError::ExternalApi {
                status: 500,
                message: "boom".into()
            }
            .kind(),
            "ExternalAPIError"
        );
    }

    #[test]
    fn only_retryable_transport_is_retryable() {
        let t = CoreError::Transport {
            message: "timeout".into(),
            retryable: true,
        };
        assert!(t.is_retryable());
        let t = CoreError::Transport {
            message: "refused".into(),
            retryable: false,
        };
        assert!(!t.is_retryable());
        assert!(!CoreError::Auth("bad signature".into()).is_retryable());
    }

    #[test]
    fn short_string_is_single_line_and_bounded() {
        let e = CoreError::Data(format!("line one\nline two {}", "x".repeat(600)));
        let s = e.to_short_string();
        assert!(s.starts_with("DataError:"));
        assert!(!s.contains('\n'));
        assert!(s.len() <= 520);
    }
}
