use pmoconfig::Config;
use pmoserver::{ServerBuilder, logs::LoggingOptions};
use pmotrackcache::{TrackCache, TrackCacheConfigExt, TrackCacheExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration et logs ==========
    // Premier argument : répertoire de configuration (sinon recherche par défaut)
    let config_dir = std::env::args().nth(1).unwrap_or_default();
    let config = Config::load_config(&config_dir)?;

    let mut server = ServerBuilder::from_config(&config).build();
    server
        .init_logging(LoggingOptions::from_config(&config))
        .await;

    info!("Configuration loaded from {}", config.directory().display());

    // ========== PHASE 2 : Cache de pistes ==========
    let cache = server.init_track_cache_configured(&config).await?;
    info!(
        "Track cache ready: {} files, {} Mo max",
        cache.storage().file_count(),
        cache.storage().max_size_mb()
    );

    let interval = config.get_track_reconcile_interval()?;
    let _reconciler = spawn_reconciler(cache, interval);

    // ========== PHASE 3 : Démarrage du serveur ==========
    server.start().await?;

    info!("PMOStream is ready at {}", server.info().base_url);
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    Ok(())
}

/// Recalcule périodiquement l'occupation disque à partir d'un scan complet
fn spawn_reconciler(cache: Arc<TrackCache>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // Le premier tick est immédiat, la consolidation vient d'être faite
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.storage().reconcile().await {
                Ok(bytes) => debug!("Cache usage reconciled: {} bytes", bytes),
                Err(e) => warn!("Cannot reconcile cache usage: {}", e),
            }
        }
    })
}
