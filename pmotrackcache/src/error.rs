//! Types d'erreur du cache de pistes

use std::sync::Arc;

/// Result type alias for track cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, serving or evicting a track
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Identifiant mal formé (11 caractères `[A-Za-z0-9_-]` attendus)
    #[error("Invalid track id {0:?}: expected 11 characters in [A-Za-z0-9_-]")]
    InvalidId(String),

    /// Piste absente du disque
    #[error("Track {0} not found")]
    NotFound(String),

    /// Le téléchargeur a échoué
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Le téléchargeur a réussi mais aucun fichier `{id}_raw*` n'a été produit
    #[error("Fetch produced no staged file for {0}")]
    FetchArtifactMissing(String),

    /// Le transcodeur a échoué ou produit un fichier vide
    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    /// Un outil externe a dépassé son délai
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    /// Plage demandée hors du fichier
    #[error("Range not satisfiable for a file of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Erreur de base recopiée depuis une erreur partagée
    #[error("Database error: {0}")]
    Store(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Code HTTP associé à l'erreur
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidId(_) => 400,
            Error::NotFound(_) => 404,
            Error::RangeNotSatisfiable { .. } => 416,
            _ => 500,
        }
    }

    /// Code stable exposé dans le champ `error` des réponses JSON
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidId(_) => "INVALID_ID",
            Error::NotFound(_) => "NOT_FOUND",
            Error::FetchFailed(_) | Error::FetchArtifactMissing(_) => "FETCH_FAILED",
            Error::TranscodeFailed(_) => "TRANSCODE_FAILED",
            Error::Timeout { .. } => "TIMEOUT",
            Error::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
            Error::Database(_) | Error::Store(_) => "DATABASE_ERROR",
            Error::Io(_) | Error::Other(_) => "STORAGE_ERROR",
        }
    }

    /// Reconstruit une erreur possédée à partir d'une erreur partagée par
    /// plusieurs attentes d'un même téléchargement.
    ///
    /// La variante (donc le code HTTP) est conservée.
    pub fn from_shared(err: Arc<Error>) -> Self {
        match Arc::try_unwrap(err) {
            Ok(owned) => owned,
            Err(shared) => match shared.as_ref() {
                Error::InvalidId(s) => Error::InvalidId(s.clone()),
                Error::NotFound(s) => Error::NotFound(s.clone()),
                Error::FetchFailed(s) => Error::FetchFailed(s.clone()),
                Error::FetchArtifactMissing(s) => Error::FetchArtifactMissing(s.clone()),
                Error::TranscodeFailed(s) => Error::TranscodeFailed(s.clone()),
                Error::Timeout { stage, secs } => Error::Timeout {
                    stage,
                    secs: *secs,
                },
                Error::RangeNotSatisfiable { size } => Error::RangeNotSatisfiable { size: *size },
                Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
                Error::Database(e) => Error::Store(e.to_string()),
                Error::Store(s) => Error::Store(s.clone()),
                Error::Other(s) => Error::Other(s.clone()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::InvalidId("x".into()).status_code(), 400);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::RangeNotSatisfiable { size: 10 }.status_code(), 416);
        assert_eq!(Error::FetchArtifactMissing("x".into()).status_code(), 500);
        assert_eq!(
            Error::Timeout {
                stage: "fetch",
                secs: 3
            }
            .code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_from_shared_keeps_variant() {
        let shared = Arc::new(Error::TranscodeFailed("boom".into()));
        let _other = shared.clone();
        let owned = Error::from_shared(shared);
        assert_eq!(owned.code(), "TRANSCODE_FAILED");

        let io = Arc::new(Error::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        )));
        let _keep = io.clone();
        match Error::from_shared(io) {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied),
            other => panic!("unexpected {other:?}"),
        }
    }
}
