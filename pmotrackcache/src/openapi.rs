//! Documentation OpenAPI du service de streaming

use utoipa::OpenApi;

/// Documentation OpenAPI pour l'API PMOStream
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::stream_track,
        crate::api::track_info,
        crate::api::delete_track,
        crate::api::storage_stats,
        crate::api::cleanup,
    ),
    components(
        schemas(
            crate::api::ErrorResponse,
            crate::api::TrackInfo,
            crate::api::DeleteTrackResponse,
            crate::api::CleanupResponse,
            crate::storage::StorageStats,
        )
    ),
    tags(
        (name = "stream", description = "Streaming et gestion du cache de pistes")
    ),
    info(
        title = "PMOStream API",
        version = "0.1.0",
        description = r#"
# API de streaming de pistes audio

Chaque piste est identifiée par un identifiant externe de 11 caractères.
Au premier accès, la piste est téléchargée, convertie en MP3 192 kbps
normalisé puis conservée sur disque. Les accès suivants sont servis
directement depuis le cache.

## Endpoints principaux

### GET /stream/{id}
Streame la piste (200 ou 206 selon l'en-tête `Range`)

### GET /stream/info/{id}
Informations sur la piste, téléchargement forcé si absente

### DELETE /stream/{id}
Supprime le fichier local (les statistiques sont conservées)

### GET /stream/stats/storage
Occupation disque du cache

### POST /stream/cleanup
Force une passe d'éviction LRU
        "#
    )
)]
pub struct ApiDoc;
