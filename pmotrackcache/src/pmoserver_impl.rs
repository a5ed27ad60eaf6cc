//! Implémentation du trait TrackCacheExt pour pmoserver::Server

use crate::config_ext::TrackCacheConfigExt;
use crate::pmoserver_ext::{create_stream_router, TrackCacheExt};
use crate::{ApiDoc, CacheSettings, TrackCache};
use std::sync::Arc;
use utoipa::OpenApi;

impl TrackCacheExt for pmoserver::Server {
    async fn init_track_cache(
        &mut self,
        settings: &CacheSettings,
    ) -> anyhow::Result<Arc<TrackCache>> {
        let cache = Arc::new(TrackCache::from_settings(settings).await?);

        // Routes: GET/DELETE /stream/{id}, GET /stream/info/{id}, etc.
        let router = create_stream_router(cache.clone());
        self.add_router("/", router).await;

        // Documentation : /swagger-ui/stream et /api-docs/stream.json
        self.add_swagger(ApiDoc::openapi(), "stream").await;

        Ok(cache)
    }

    async fn init_track_cache_configured(
        &mut self,
        config: &pmoconfig::Config,
    ) -> anyhow::Result<Arc<TrackCache>> {
        let settings = config.track_cache_settings()?;
        self.init_track_cache(&settings).await
    }
}
