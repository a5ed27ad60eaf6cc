//! Extension pmoserver pour servir les pistes du cache via HTTP
//!
//! ## Routes générées
//!
//! - `GET /stream/{id}` - Streaming (avec support `Range`)
//! - `DELETE /stream/{id}` - Suppression
//! - `GET /stream/info/{id}` - Informations sur la piste
//! - `GET /stream/stats/storage` - Occupation disque
//! - `POST /stream/cleanup` - Éviction forcée
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmotrackcache::{pmoserver_ext, TrackCache};
//! use std::sync::Arc;
//!
//! # fn example(cache: Arc<TrackCache>) {
//! let router = pmoserver_ext::create_stream_router(cache);
//! // Le router est monté à la racine du serveur
//! # }
//! ```

use crate::{api, CacheSettings, TrackCache};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Crée le router du service de streaming
pub fn create_stream_router(cache: Arc<TrackCache>) -> Router {
    Router::new()
        .route(
            "/stream/{id}",
            get(api::stream_track).delete(api::delete_track),
        )
        .route("/stream/", get(api::missing_id).delete(api::missing_id))
        .route("/stream/info/{id}", get(api::track_info))
        .route("/stream/stats/storage", get(api::storage_stats))
        .route("/stream/cleanup", post(api::cleanup))
        .with_state(cache)
}

/// Trait pour étendre un serveur HTTP avec le cache de pistes.
///
/// Ce trait permet à `pmotrackcache` d'ajouter des méthodes d'extension sur des types
/// de serveurs externes (comme `pmoserver::Server`) sans que ces crates dépendent de `pmotrackcache`.
pub trait TrackCacheExt {
    /// Initialise le cache de pistes et enregistre les routes HTTP.
    ///
    /// # Arguments
    ///
    /// * `settings` - Paramètres complets du cache
    ///
    /// # Returns
    ///
    /// * `Arc<TrackCache>` - Instance partagée du cache
    async fn init_track_cache(
        &mut self,
        settings: &CacheSettings,
    ) -> anyhow::Result<Arc<TrackCache>>;

    /// Initialise le cache de pistes à partir de la configuration.
    ///
    /// Utilise les paramètres `track_cache.*` de `pmoconfig::Config`.
    async fn init_track_cache_configured(
        &mut self,
        config: &pmoconfig::Config,
    ) -> anyhow::Result<Arc<TrackCache>>;
}
