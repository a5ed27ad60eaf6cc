//! Handlers HTTP du service de streaming
//!
//! Ce module expose les routes documentées avec OpenAPI/Swagger pour :
//! - Streamer une piste avec support des requêtes `Range`
//! - Consulter l'état d'une piste
//! - Supprimer une piste
//! - Consulter l'occupation disque et forcer une éviction

use crate::cache::{Resolved, Source, TrackCache};
use crate::db::RecordStore;
use crate::error::Error;
use crate::range::{parse_range, RangeRequest};
use crate::storage::{bytes_to_mb, StorageStats};
use crate::track_id::TrackId;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
const CACHE_CONTROL: &str = "public, max-age=86400";

/// Réponse d'erreur générique
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Code d'erreur
    #[schema(example = "NOT_FOUND")]
    pub error: String,
    /// Message descriptif
    #[schema(example = "Track dQw4w9WgXcQ not found")]
    pub message: String,
}

/// Informations sur une piste
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrackInfo {
    #[schema(example = "dQw4w9WgXcQ")]
    pub id: String,
    /// URL de streaming
    #[schema(example = "/stream/dQw4w9WgXcQ")]
    pub url: String,
    /// État enregistré dans la base
    #[serde(rename = "isDownloaded")]
    pub is_downloaded: bool,
    #[serde(rename = "sizeMB")]
    #[schema(example = 4.2)]
    pub size_mb: f64,
    /// Chemin du fichier local
    pub path: String,
}

/// Réponse de suppression d'une piste
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteTrackResponse {
    #[schema(example = "Track deleted successfully")]
    pub message: String,
    #[schema(example = "dQw4w9WgXcQ")]
    pub id: String,
}

/// Réponse d'une éviction forcée
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CleanupResponse {
    #[schema(example = "Cleanup completed: 3 files removed")]
    pub message: String,
}

/// Convertit une erreur du cache en réponse JSON
pub fn error_response(err: &Error) -> Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        error!(code = err.code(), "{}", err);
    } else {
        debug!(code = err.code(), "{}", err);
    }

    let mut response = (
        status,
        Json(ErrorResponse {
            error: err.code().to_string(),
            message: err.to_string(),
        }),
    )
        .into_response();

    if let Error::RangeNotSatisfiable { size } = err {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            response.headers_mut().insert(header::CONTENT_RANGE, value);
        }
    }

    response
}

fn parse_id(raw: &str) -> Result<TrackId, Response> {
    TrackId::parse(raw).map_err(|e| error_response(&e))
}

/// Streame une piste audio
///
/// Télécharge et transcode la piste si elle n'est pas en cache, puis la sert
/// en entier (200) ou partiellement (206) selon l'en-tête `Range`.
#[utoipa::path(
    get,
    path = "/stream/{id}",
    params(
        ("id" = String, Path, description = "Identifiant de la piste (11 caractères)"),
        ("Range" = Option<String>, Header, description = "Plage d'octets, ex: bytes=0-1023")
    ),
    responses(
        (status = 200, description = "Fichier complet", content_type = "audio/mpeg"),
        (status = 206, description = "Contenu partiel", content_type = "audio/mpeg"),
        (status = 400, description = "Identifiant invalide", body = ErrorResponse),
        (status = 404, description = "Piste introuvable", body = ErrorResponse),
        (status = 416, description = "Plage non satisfiable", body = ErrorResponse),
        (status = 500, description = "Échec du téléchargement ou du transcodage", body = ErrorResponse)
    ),
    tag = "stream"
)]
pub async fn stream_track(
    State(cache): State<Arc<TrackCache>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let resolved = match cache.resolve(&id).await {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&e),
    };

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    serve_resolved(&cache, &id, &resolved, range).await
}

/// Sert une piste résolue
///
/// Vérifie que le fichier existe toujours (404 sinon), enregistre l'écoute
/// en arrière-plan puis streame le fichier entier ou la plage demandée.
pub async fn serve_resolved(
    cache: &TrackCache,
    id: &TrackId,
    resolved: &Resolved,
    range: Option<&str>,
) -> Response {
    let file = match tokio::fs::File::open(&resolved.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(id = %id, "Resolved file vanished before serving");
            return error_response(&Error::NotFound(id.to_string()));
        }
        Err(e) => return error_response(&Error::from(e)),
    };

    let total = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => return error_response(&Error::from(e)),
    };

    let request = parse_range(range, total);
    if request == RangeRequest::Unsatisfiable {
        return error_response(&Error::RangeNotSatisfiable { size: total });
    }

    cache.record_play_detached(id);

    match serve_file(file, total, request, resolved.source).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

/// Construit la réponse audio à partir du fichier ouvert
async fn serve_file(
    file: tokio::fs::File,
    total: u64,
    request: RangeRequest,
    source: Source,
) -> Result<Response, Error> {
    let (status, body, content_length, content_range) = match request {
        RangeRequest::Unsatisfiable => return Err(Error::RangeNotSatisfiable { size: total }),
        RangeRequest::Full => (
            StatusCode::OK,
            Body::from_stream(ReaderStream::new(file)),
            total,
            None,
        ),
        RangeRequest::Partial(r) => {
            let mut file = file;
            file.seek(SeekFrom::Start(r.start)).await?;
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(file.take(r.len()))),
                r.len(),
                Some(r.content_range(total)),
            )
        }
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, AUDIO_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, CACHE_CONTROL)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header("x-source", source.as_header());
    if let Some(content_range) = content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    builder
        .body(body)
        .map_err(|e| Error::other(format!("cannot build response: {}", e)))
}

/// Requête sans identifiant (`/stream/`)
pub async fn missing_id() -> Response {
    error_response(&Error::InvalidId(String::new()))
}

/// Informations sur une piste
///
/// Force le téléchargement si la piste n'est pas encore en cache.
#[utoipa::path(
    get,
    path = "/stream/info/{id}",
    params(("id" = String, Path, description = "Identifiant de la piste")),
    responses(
        (status = 200, description = "Piste disponible", body = TrackInfo),
        (status = 400, description = "Identifiant invalide", body = ErrorResponse),
        (status = 500, description = "Échec de la résolution", body = ErrorResponse)
    ),
    tag = "stream"
)]
pub async fn track_info(
    State(cache): State<Arc<TrackCache>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let resolved = match cache.lookup(&id).await {
        Ok(Some(resolved)) => Ok(resolved),
        Ok(None) => cache.resolve(&id).await,
        Err(e) => Err(e),
    };

    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(e) => return error_response(&e),
    };

    // Le drapeau vient de la base, pas de la présence du fichier
    let is_downloaded = match cache.store().find_by_entry_id(&id) {
        Ok(entry) => entry.is_some_and(|e| e.is_downloaded),
        Err(e) => return error_response(&e),
    };

    (
        StatusCode::OK,
        Json(TrackInfo {
            url: format!("/stream/{}", id),
            id: id.to_string(),
            is_downloaded,
            size_mb: bytes_to_mb(resolved.size_bytes),
            path: resolved.path.to_string_lossy().to_string(),
        }),
    )
        .into_response()
}

/// Supprime une piste du cache
///
/// L'entrée est conservée avec ses statistiques d'écoute.
#[utoipa::path(
    delete,
    path = "/stream/{id}",
    params(("id" = String, Path, description = "Identifiant de la piste")),
    responses(
        (status = 200, description = "Piste supprimée", body = DeleteTrackResponse),
        (status = 400, description = "Identifiant invalide", body = ErrorResponse),
        (status = 404, description = "Piste absente du cache", body = ErrorResponse)
    ),
    tag = "stream"
)]
pub async fn delete_track(
    State(cache): State<Arc<TrackCache>>,
    Path(id): Path<String>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match cache.delete(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(DeleteTrackResponse {
                message: "Track deleted successfully".to_string(),
                id: id.to_string(),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// Occupation disque du cache
#[utoipa::path(
    get,
    path = "/stream/stats/storage",
    responses((status = 200, description = "Statistiques d'occupation", body = StorageStats)),
    tag = "stream"
)]
pub async fn storage_stats(State(cache): State<Arc<TrackCache>>) -> impl IntoResponse {
    (StatusCode::OK, Json(cache.storage_stats()))
}

/// Force une passe d'éviction
#[utoipa::path(
    post,
    path = "/stream/cleanup",
    responses(
        (status = 200, description = "Éviction effectuée", body = CleanupResponse),
        (status = 500, description = "Erreur de stockage", body = ErrorResponse)
    ),
    tag = "stream"
)]
pub async fn cleanup(State(cache): State<Arc<TrackCache>>) -> Response {
    match cache.cleanup().await {
        Ok(report) => (
            StatusCode::OK,
            Json(CleanupResponse {
                message: format!("Cleanup completed: {} files removed", report.removed),
            }),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}
