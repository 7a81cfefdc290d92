use skymatch_core::CoreError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The probability array failed structural or numeric validation.
    /// The map is rejected and must be resent corrected by upstream.
    #[error("Malformed skymap{}: {message}", id_suffix(.id))]
    MalformedSkymap { id: Option<String>, message: String },

    /// The map was already past its expiry (beyond the grace window) when
    /// it arrived.
    #[error("Stale skymap '{id}': expired {expired_for_s:.0}s before ingest")]
    StaleSkymap { id: String, expired_for_s: f64 },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl EngineError {
    pub fn malformed_skymap(id: impl Into<Option<String>>, message: impl Into<String>) -> Self {
        Self::MalformedSkymap {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn stale_skymap(id: impl Into<String>, expired_for_s: f64) -> Self {
        Self::StaleSkymap {
            id: id.into(),
            expired_for_s,
        }
    }
}

fn id_suffix(id: &Option<String>) -> String {
    match id {
        Some(id) => format!(" '{}'", id),
        None => String::new(),
    }
}
