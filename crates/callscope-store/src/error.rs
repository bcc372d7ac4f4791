use callscope_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("illegal transition for {entity} {id}: {detail}")]
    IllegalTransition {
        entity: &'static str,
        id: String,
        detail: String,
    },

    #[error("malformed stored value in {column}: {detail}")]
    Corrupt { column: &'static str, detail: String },

    #[error("secret error: {0}")]
    Secret(#[from] callscope_secrets::SecretError),
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::NotFound { .. } => CoreError::Data(e.to_string()),
            StoreError::IllegalTransition { .. } => CoreError::State(e.to_string()),
            StoreError::Corrupt { .. } => CoreError::Data(e.to_string()),
            StoreError::Secret(_) => CoreError::Config(e.to_string()),
            StoreError::Database(_) => CoreError::Internal(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
