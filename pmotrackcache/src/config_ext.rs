//! Extension pour intégrer le cache de pistes dans pmoconfig
//!
//! Ce module fournit le trait `TrackCacheConfigExt` qui ajoute à
//! `pmoconfig::Config` les réglages de la section `track_cache`.

use crate::fetcher::{FetcherKind, FetcherSettings};
use crate::settings::{CacheSettings, DEFAULT_MAX_SIZE_MB, DEFAULT_RECONCILE_INTERVAL};
use crate::transcoder::TranscoderSettings;
use anyhow::{anyhow, Result};
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::path::PathBuf;
use std::time::Duration;

const SECTION: &str = "track_cache";
const DEFAULT_AUDIO_DIR: &str = "cache_audio";
const DEFAULT_STAGING_DIR: &str = "cache_staging";
const DEFAULT_DATABASE: &str = "tracks.db";

/// Trait d'extension pour gérer le cache de pistes dans pmoconfig
///
/// # Exemple
///
/// ```rust,no_run
/// use pmoconfig::Config;
/// use pmotrackcache::TrackCacheConfigExt;
///
/// let config = Config::load_config("")?;
/// let settings = config.track_cache_settings()?;
/// println!("Budget: {} Mo", settings.max_size_mb);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub trait TrackCacheConfigExt {
    /// Répertoire des fichiers MP3 (default: "cache_audio")
    fn get_track_audio_dir(&self) -> Result<String>;

    /// Définit le répertoire des fichiers MP3
    fn set_track_audio_dir(&self, directory: String) -> Result<()>;

    /// Répertoire de staging (default: "cache_staging")
    fn get_track_staging_dir(&self) -> Result<String>;

    /// Budget disque en Mo (default: 5000)
    fn get_track_cache_max_size_mb(&self) -> Result<u64>;

    /// Définit le budget disque en Mo
    fn set_track_cache_max_size_mb(&self, size: u64) -> Result<()>;

    /// Période de recalcul de l'occupation
    fn get_track_reconcile_interval(&self) -> Result<Duration>;

    /// Paramètres du téléchargeur
    fn get_track_fetcher_settings(&self) -> Result<FetcherSettings>;

    /// Paramètres du transcodeur
    fn get_track_transcoder_settings(&self) -> Result<TranscoderSettings>;

    /// Construit les paramètres complets du cache
    fn track_cache_settings(&self) -> Result<CacheSettings>;
}

impl TrackCacheConfigExt for Config {
    fn get_track_audio_dir(&self) -> Result<String> {
        self.get_managed_dir(&[SECTION, "audio_dir"], DEFAULT_AUDIO_DIR)
    }

    fn set_track_audio_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&[SECTION, "audio_dir"], directory)
    }

    fn get_track_staging_dir(&self) -> Result<String> {
        self.get_managed_dir(&[SECTION, "staging_dir"], DEFAULT_STAGING_DIR)
    }

    fn get_track_cache_max_size_mb(&self) -> Result<u64> {
        self.get_u64(&[SECTION, "max_size_mb"], DEFAULT_MAX_SIZE_MB)
    }

    fn set_track_cache_max_size_mb(&self, size: u64) -> Result<()> {
        self.set_value(&[SECTION, "max_size_mb"], Value::Number(Number::from(size)))
    }

    fn get_track_reconcile_interval(&self) -> Result<Duration> {
        let secs = self.get_u64(
            &[SECTION, "reconcile_interval_secs"],
            DEFAULT_RECONCILE_INTERVAL.as_secs(),
        )?;
        Ok(Duration::from_secs(secs.max(1)))
    }

    fn get_track_fetcher_settings(&self) -> Result<FetcherSettings> {
        let defaults = FetcherSettings::default();
        let kind: FetcherKind = self
            .get_string(&[SECTION, "fetcher", "kind"], "command")?
            .parse()?;

        Ok(FetcherSettings {
            kind,
            program: self.get_string(&[SECTION, "fetcher", "program"], &defaults.program)?,
            source_url: self.get_string(&[SECTION, "fetcher", "source_url"], &defaults.source_url)?,
            referer: self.get_string(&[SECTION, "fetcher", "referer"], &defaults.referer)?,
            user_agent: self.get_string(&[SECTION, "fetcher", "user_agent"], &defaults.user_agent)?,
            timeout: Duration::from_secs(self.get_u64(
                &[SECTION, "fetcher", "timeout_secs"],
                defaults.timeout.as_secs(),
            )?),
        })
    }

    fn get_track_transcoder_settings(&self) -> Result<TranscoderSettings> {
        let defaults = TranscoderSettings::default();
        let raw_bitrate = self.get_u64(
            &[SECTION, "transcoder", "bitrate_kbps"],
            u64::from(defaults.bitrate_kbps),
        )?;
        let bitrate_kbps = u32::try_from(raw_bitrate)
            .map_err(|_| anyhow!("track_cache.transcoder.bitrate_kbps out of range: {}", raw_bitrate))?;

        Ok(TranscoderSettings {
            program: self.get_string(&[SECTION, "transcoder", "program"], &defaults.program)?,
            bitrate_kbps,
            loudness_normalization: self.get_bool(
                &[SECTION, "transcoder", "loudness_normalization"],
                defaults.loudness_normalization,
            )?,
            timeout: Duration::from_secs(self.get_u64(
                &[SECTION, "transcoder", "timeout_secs"],
                defaults.timeout.as_secs(),
            )?),
        })
    }

    fn track_cache_settings(&self) -> Result<CacheSettings> {
        let database = self.get_string(&[SECTION, "database"], DEFAULT_DATABASE)?;

        Ok(CacheSettings {
            audio_dir: PathBuf::from(self.get_track_audio_dir()?),
            staging_dir: PathBuf::from(self.get_track_staging_dir()?),
            database_path: self.resolve_path(&database),
            max_size_mb: self.get_track_cache_max_size_mb()?,
            reconcile_interval: self.get_track_reconcile_interval()?,
            fetcher: self.get_track_fetcher_settings()?,
            transcoder: self.get_track_transcoder_settings()?,
        })
    }
}
