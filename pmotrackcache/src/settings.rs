//! Paramètres du cache de pistes, construits une fois au démarrage

use crate::fetcher::FetcherSettings;
use crate::transcoder::TranscoderSettings;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_SIZE_MB: u64 = 5000;
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(600);

/// Configuration complète d'un [`TrackCache`](crate::TrackCache)
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Répertoire des fichiers MP3 canoniques
    pub audio_dir: PathBuf,
    /// Répertoire des fichiers bruts téléchargés
    pub staging_dir: PathBuf,
    /// Fichier SQLite
    pub database_path: PathBuf,
    /// Budget disque
    pub max_size_mb: u64,
    /// Période de recalcul complet de l'occupation
    pub reconcile_interval: Duration,
    pub fetcher: FetcherSettings,
    pub transcoder: TranscoderSettings,
}

impl CacheSettings {
    /// Paramètres par défaut dans `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            audio_dir: base_dir.join("cache_audio"),
            staging_dir: base_dir.join("cache_staging"),
            database_path: base_dir.join("tracks.db"),
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            fetcher: FetcherSettings::default(),
            transcoder: TranscoderSettings::default(),
        }
    }
}
