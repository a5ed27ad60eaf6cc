//! Orchestrateur du cache de pistes
//!
//! [`TrackCache`] garantit qu'une copie MP3 jouable d'une piste existe sur le
//! disque local :
//!
//! 1. Fast path : l'entrée est marquée téléchargée et le fichier existe
//! 2. Sinon, une seule opération par identifiant (singleflight) :
//!    téléchargement dans le staging, transcodage vers `{id}.mp3.part`,
//!    renommage atomique vers `{id}.mp3`, mise à jour de la base
//! 3. Nettoyage du staging et vérification du budget disque en arrière-plan
//!
//! Les divergences entre la base et le disque sont corrigées au passage : le
//! disque fait foi.

use crate::db::{RecordStore, DB};
use crate::error::{Error, Result};
use crate::fetcher::{build_fetcher, find_staged_artifact, remove_staged_artifacts, ContentFetcher};
use crate::flight::FlightGroup;
use crate::settings::CacheSettings;
use crate::storage::{bytes_to_mb, EvictionReport, StorageManager, StorageStats};
use crate::track_id::TrackId;
use crate::transcoder::{FfmpegTranscoder, Transcoder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Origine du fichier servi
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Déjà présent sur le disque
    Cached,
    /// Téléchargé et transcodé pour cette requête
    Fetched,
}

impl Source {
    /// Valeur de l'en-tête `X-Source`
    pub fn as_header(&self) -> &'static str {
        match self {
            Source::Cached => "local-disk",
            Source::Fetched => "remote-fetch",
        }
    }
}

/// Résultat d'une résolution
#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: PathBuf,
    pub source: Source,
    pub size_bytes: u64,
}

/// Bilan de la consolidation au démarrage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub partials_removed: usize,
    pub staging_removed: usize,
    pub entries_reset: usize,
    pub entries_repaired: usize,
    pub usage_bytes: u64,
}

/// Cache de pistes audio
pub struct TrackCache {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn ContentFetcher>,
    transcoder: Arc<dyn Transcoder>,
    storage: StorageManager,
    staging_dir: PathBuf,
    flights: FlightGroup<Resolved>,
}

impl TrackCache {
    /// Assemble un cache à partir de ses composants
    ///
    /// Les répertoires sont créés si nécessaire. Le total d'occupation reste à
    /// zéro jusqu'au premier [`consolidate`](Self::consolidate).
    pub async fn new(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn ContentFetcher>,
        transcoder: Arc<dyn Transcoder>,
        audio_dir: impl Into<PathBuf>,
        staging_dir: impl Into<PathBuf>,
        max_size_mb: u64,
    ) -> Result<Self> {
        let audio_dir = audio_dir.into();
        let staging_dir = staging_dir.into();
        tokio::fs::create_dir_all(&audio_dir).await?;
        tokio::fs::create_dir_all(&staging_dir).await?;

        Ok(Self {
            store,
            fetcher,
            transcoder,
            storage: StorageManager::new(audio_dir, max_size_mb),
            staging_dir,
            flights: FlightGroup::new(),
        })
    }

    /// Construit le cache de production (SQLite, téléchargeur et ffmpeg)
    /// puis le consolide.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        if let Some(parent) = settings.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store: Arc<dyn RecordStore> = Arc::new(DB::init(&settings.database_path)?);
        let fetcher = build_fetcher(&settings.fetcher)?;
        let transcoder: Arc<dyn Transcoder> =
            Arc::new(FfmpegTranscoder::new(settings.transcoder.clone()));

        let cache = Self::new(
            store,
            fetcher,
            transcoder,
            &settings.audio_dir,
            &settings.staging_dir,
            settings.max_size_mb,
        )
        .await?;
        cache.consolidate().await?;

        info!(
            audio_dir = %settings.audio_dir.display(),
            max_size_mb = settings.max_size_mb,
            "Track cache ready"
        );
        Ok(cache)
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Vrai si une résolution est en cours pour `id`
    pub fn is_in_flight(&self, id: &TrackId) -> bool {
        self.flights.contains(id)
    }

    /// Résolution sans téléchargement
    ///
    /// Corrige la base si elle diverge du disque et met à jour la date d'accès
    /// lorsque le fichier est présent.
    pub async fn lookup(&self, id: &TrackId) -> Result<Option<Resolved>> {
        let path = self.storage.canonical_path(id);
        let entry = self.store.find_by_entry_id(id)?;
        let on_disk = file_size(&path).await?;

        match (entry, on_disk) {
            (entry, Some(size)) => {
                let consistent = entry.as_ref().is_some_and(|e| {
                    e.is_downloaded && e.local_path.as_deref() == Some(&*path.to_string_lossy())
                });
                if consistent {
                    self.store.touch(id)?;
                } else {
                    debug!(id = %id, "Repairing entry for file present on disk");
                    self.store
                        .update_local_status(id, Some(&path), bytes_to_mb(size))?;
                }
                Ok(Some(Resolved {
                    path,
                    source: Source::Cached,
                    size_bytes: size,
                }))
            }
            (Some(entry), None) if entry.is_downloaded => {
                warn!(id = %id, "Entry marked downloaded but file is missing, resetting");
                self.store.update_local_status(id, None, 0.0)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Garantit la présence locale de la piste
    ///
    /// Les appels concurrents pour un même identifiant partagent une seule
    /// opération de téléchargement et de transcodage. Cette opération continue
    /// même si tous les appelants abandonnent. Une fois l'opération terminée,
    /// une vérification du budget disque est lancée en arrière-plan.
    pub async fn resolve(self: &Arc<Self>, id: &TrackId) -> Result<Resolved> {
        if let Some(hit) = self.lookup(id).await? {
            debug!(id = %id, "Cache hit");
            return Ok(hit);
        }

        let this = Arc::clone(self);
        let key = id.clone();
        let resolved = self
            .flights
            .run(id, move || this.fetch_and_place(key))
            .await
            .map_err(Error::from_shared)?;

        // L'identifiant a quitté le registre : l'éviction peut le considérer
        if resolved.source == Source::Fetched {
            self.schedule_budget_check();
        }
        Ok(resolved)
    }

    async fn fetch_and_place(self: Arc<Self>, id: TrackId) -> Result<Resolved> {
        // Une opération terminée juste avant a pu placer le fichier
        if let Some(hit) = self.lookup(&id).await? {
            return Ok(hit);
        }

        let started = std::time::Instant::now();
        let result = self.produce(&id).await;

        remove_staged_artifacts(&self.staging_dir, &id).await;

        match result {
            Ok(resolved) => {
                info!(
                    id = %id,
                    size_mb = bytes_to_mb(resolved.size_bytes),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Track fetched and cached"
                );
                Ok(resolved)
            }
            Err(e) => {
                let partial = self.storage.partial_path(&id);
                if let Err(rm) = tokio::fs::remove_file(&partial).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), error = %rm, "Cannot remove partial file");
                    }
                }
                warn!(id = %id, error = %e, "Track resolution failed");
                Err(e)
            }
        }
    }

    async fn produce(&self, id: &TrackId) -> Result<Resolved> {
        debug!(id = %id, "Fetching track");
        self.fetcher.fetch(id, &self.staging_dir).await?;

        let artifact = find_staged_artifact(&self.staging_dir, id)
            .await?
            .ok_or_else(|| Error::FetchArtifactMissing(id.to_string()))?;

        let partial = self.storage.partial_path(id);
        debug!(id = %id, input = %artifact.display(), "Transcoding track");
        self.transcoder.transcode(&artifact, &partial).await?;

        let size = file_size(&partial).await?.unwrap_or(0);
        if size == 0 {
            return Err(Error::TranscodeFailed(format!(
                "transcoder produced no output for {}",
                id
            )));
        }

        let canonical = self.storage.canonical_path(id);
        tokio::fs::rename(&partial, &canonical).await?;
        self.storage.record_placement(size);

        // Le fichier est en place : un échec ici sera corrigé au prochain accès
        if let Err(e) = self
            .store
            .update_local_status(id, Some(&canonical), bytes_to_mb(size))
        {
            warn!(id = %id, error = %e, "Cannot record placement");
        }

        Ok(Resolved {
            path: canonical,
            source: Source::Fetched,
            size_bytes: size,
        })
    }

    /// Supprime le fichier d'une piste
    ///
    /// L'entrée est conservée (statistiques) mais marquée non téléchargée.
    /// Une résolution en cours pour le même identifiant recréera le fichier.
    pub async fn delete(&self, id: &TrackId) -> Result<()> {
        let path = self.storage.canonical_path(id);

        let Some(size) = file_size(&path).await? else {
            if self.store.find_by_entry_id(id)?.is_some_and(|e| e.is_downloaded) {
                self.store.update_local_status(id, None, 0.0)?;
            }
            return Err(Error::NotFound(id.to_string()));
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        self.storage.record_removal(size);
        self.store.update_local_status(id, None, 0.0)?;
        info!(id = %id, "Track deleted");
        Ok(())
    }

    /// Enregistre une écoute sans bloquer l'appelant
    ///
    /// Les erreurs sont journalisées et ignorées.
    pub fn record_play_detached(&self, id: &TrackId) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let id = id.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.record_play(&id) {
                warn!(id = %id, error = %e, "Cannot record play");
            }
        })
    }

    /// Répare l'état du cache au démarrage
    ///
    /// - supprime les `.part` et le contenu du staging
    /// - remet à zéro les entrées dont le fichier a disparu
    /// - répare les entrées dont le fichier existe
    /// - recalcule l'occupation
    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport {
            partials_removed: self.storage.remove_partials().await?,
            staging_removed: clear_directory(&self.staging_dir).await?,
            ..Default::default()
        };

        for entry in self.store.downloaded_entries()? {
            let Ok(id) = TrackId::parse(&entry.entry_id) else {
                continue;
            };
            if file_size(&self.storage.canonical_path(&id)).await?.is_none() {
                self.store.update_local_status(&id, None, 0.0)?;
                report.entries_reset += 1;
            }
        }

        for file in self.storage.list_files().await? {
            let downloaded = self
                .store
                .find_by_entry_id(&file.id)?
                .is_some_and(|e| e.is_downloaded);
            if !downloaded {
                self.store
                    .update_local_status(&file.id, Some(&file.path), bytes_to_mb(file.size))?;
                report.entries_repaired += 1;
            }
        }

        report.usage_bytes = self.storage.reconcile().await?;

        info!(
            partials = report.partials_removed,
            staging = report.staging_removed,
            reset = report.entries_reset,
            repaired = report.entries_repaired,
            usage_mb = bytes_to_mb(report.usage_bytes),
            "Track cache consolidated"
        );
        Ok(report)
    }

    /// Statistiques d'occupation
    pub fn storage_stats(&self) -> StorageStats {
        self.storage.stats()
    }

    /// Passe d'éviction forcée
    pub async fn cleanup(&self) -> Result<EvictionReport> {
        self.storage
            .evict_if_over_budget(self.store.as_ref(), |id| self.flights.contains(id))
            .await
    }

    fn schedule_budget_check(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.cleanup().await {
                warn!(error = %e, "Background eviction failed");
            }
        });
    }
}

/// Taille d'un fichier régulier, `None` s'il n'existe pas
async fn file_size(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => Ok(Some(m.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Vide un répertoire de ses fichiers, en journalisant les échecs
async fn clear_directory(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Cannot remove staging leftover"),
        }
    }
    Ok(removed)
}
