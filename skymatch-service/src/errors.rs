use skymatch_core::CoreError;
use skymatch_engine::EngineError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Network-level failure talking to the upstream portal. Retried on
    /// the next poll cycle; engine operations are idempotent, so replays
    /// are harmless.
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// An upstream payload did not match the expected shape.
    #[error("Payload error: {message}")]
    Payload { message: String },

    /// Skymap validation exceeded its time budget; the store is unaffected.
    #[error("Skymap '{id}' ingest exceeded the validation time budget")]
    IngestTimeout { id: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ServiceError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload {
            message: message.into(),
        }
    }
}
