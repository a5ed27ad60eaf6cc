//! Gestion du répertoire audio : occupation disque et éviction LRU
//!
//! L'occupation est tenue dans un total courant (incrémenté au placement,
//! décrémenté à la suppression) et recalculée périodiquement par un parcours
//! complet du répertoire. Seuls les fichiers canoniques `{id}.mp3` comptent ;
//! les fichiers `.part` en cours d'écriture sont ignorés.

use crate::db::RecordStore;
use crate::error::Result;
use crate::track_id::TrackId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Extension des fichiers canoniques
pub const AUDIO_EXTENSION: &str = "mp3";

/// Extension ajoutée aux fichiers en cours de transcodage
pub const PARTIAL_EXTENSION: &str = "part";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Conversion octets → Mo
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Fichier canonique présent dans le répertoire audio
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub id: TrackId,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Bilan d'une passe d'éviction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Fichiers canoniques examinés
    pub scanned: usize,
    /// Fichiers supprimés
    pub removed: usize,
    pub freed_bytes: u64,
}

/// Statistiques d'occupation
#[derive(Debug, Clone, Serialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    #[cfg_attr(feature = "openapi", schema(example = 42))]
    pub total_files: usize,
    #[serde(rename = "totalSizeMB")]
    #[cfg_attr(feature = "openapi", schema(example = 180.5))]
    pub total_size_mb: f64,
    #[serde(rename = "maxSizeMB")]
    #[cfg_attr(feature = "openapi", schema(example = 5000))]
    pub max_size_mb: u64,
    #[cfg_attr(feature = "openapi", schema(example = 3.61))]
    pub usage_percent: f64,
}

/// Gestionnaire du répertoire audio
#[derive(Debug)]
pub struct StorageManager {
    audio_dir: PathBuf,
    max_size_mb: u64,
    used_bytes: AtomicU64,
    file_count: AtomicUsize,
    // Une seule passe d'éviction à la fois
    eviction_lock: Mutex<()>,
}

impl StorageManager {
    /// Crée le gestionnaire ; le total courant démarre à zéro jusqu'au
    /// premier [`reconcile`](Self::reconcile).
    pub fn new(audio_dir: impl Into<PathBuf>, max_size_mb: u64) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            max_size_mb,
            used_bytes: AtomicU64::new(0),
            file_count: AtomicUsize::new(0),
            eviction_lock: Mutex::new(()),
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    pub fn max_size_mb(&self) -> u64 {
        self.max_size_mb
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Chemin canonique `{audio_dir}/{id}.mp3`
    pub fn canonical_path(&self, id: &TrackId) -> PathBuf {
        self.audio_dir.join(format!("{}.{}", id, AUDIO_EXTENSION))
    }

    /// Chemin temporaire `{audio_dir}/{id}.mp3.part`
    pub fn partial_path(&self, id: &TrackId) -> PathBuf {
        self.audio_dir
            .join(format!("{}.{}.{}", id, AUDIO_EXTENSION, PARTIAL_EXTENSION))
    }

    /// Occupation courante en octets (total maintenu, sans parcours disque)
    pub fn usage(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn file_count(&self) -> usize {
        self.file_count.load(Ordering::Relaxed)
    }

    /// Comptabilise un fichier nouvellement placé
    pub fn record_placement(&self, bytes: u64) {
        self.used_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.file_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Décompte un fichier supprimé
    pub fn record_removal(&self, bytes: u64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
        let _ = self
            .file_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    fn set_totals(&self, bytes: u64, files: usize) {
        self.used_bytes.store(bytes, Ordering::Relaxed);
        self.file_count.store(files, Ordering::Relaxed);
    }

    /// Liste les fichiers canoniques du répertoire audio
    ///
    /// Les fichiers dont le nom n'est pas un identifiant valide sont ignorés.
    pub async fn list_files(&self) -> Result<Vec<CachedFile>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.audio_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(AUDIO_EXTENSION) {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| TrackId::parse(s).ok())
            else {
                continue;
            };

            // Le fichier a pu disparaître entre le listing et le stat
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            files.push(CachedFile {
                id,
                path,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }

        Ok(files)
    }

    /// Somme complète des tailles des fichiers canoniques
    pub async fn scan_usage(&self) -> Result<u64> {
        Ok(self.list_files().await?.iter().map(|f| f.size).sum())
    }

    /// Remplace le total courant par un parcours complet
    pub async fn reconcile(&self) -> Result<u64> {
        let files = self.list_files().await?;
        let bytes = files.iter().map(|f| f.size).sum();
        let previous = self.usage();
        self.set_totals(bytes, files.len());

        if previous != bytes {
            debug!(previous, actual = bytes, files = files.len(), "Storage usage reconciled");
        }
        Ok(bytes)
    }

    /// Supprime les fichiers `.part` laissés par un arrêt brutal
    pub async fn remove_partials(&self) -> Result<usize> {
        let suffix = format!(".{}.{}", AUDIO_EXTENSION, PARTIAL_EXTENSION);
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.audio_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let is_partial = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(&suffix));
            if !is_partial {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Cannot remove partial file"),
            }
        }

        Ok(removed)
    }

    /// Statistiques d'occupation à partir du total courant
    pub fn stats(&self) -> StorageStats {
        let used = self.usage();
        let max = self.max_bytes();
        let usage_percent = if max == 0 {
            0.0
        } else {
            round2(used as f64 * 100.0 / max as f64)
        };

        StorageStats {
            total_files: self.file_count(),
            total_size_mb: round2(bytes_to_mb(used)),
            max_size_mb: self.max_size_mb,
            usage_percent,
        }
    }

    /// Passe d'éviction LRU
    ///
    /// Si l'occupation dépasse le budget, supprime les `ceil(20 %)` fichiers les
    /// moins récemment utilisés, en sautant ceux pour lesquels `in_flight`
    /// répond vrai. La récence vient de `store.last_access`, à défaut de la date
    /// de modification du fichier. Chaque entrée supprimée est remise à l'état
    /// non téléchargé ; ses statistiques d'écoute sont conservées.
    pub async fn evict_if_over_budget<F>(
        &self,
        store: &dyn RecordStore,
        in_flight: F,
    ) -> Result<EvictionReport>
    where
        F: Fn(&TrackId) -> bool,
    {
        let _guard = self.eviction_lock.lock().await;
        let mut report = EvictionReport::default();

        if self.usage() <= self.max_bytes() {
            return Ok(report);
        }

        let mut files = self.list_files().await?;
        let total: u64 = files.iter().map(|f| f.size).sum();
        self.set_totals(total, files.len());
        report.scanned = files.len();

        if total <= self.max_bytes() {
            debug!(total, "Usage back under budget after reconciliation");
            return Ok(report);
        }

        let quota = files.len().div_ceil(5);

        let mut ranked: Vec<(SystemTime, CachedFile)> = files
            .drain(..)
            .map(|file| {
                let recency = match store.last_access(&file.id) {
                    Ok(Some(at)) => SystemTime::from(at),
                    Ok(None) => file.modified,
                    Err(e) => {
                        warn!(id = %file.id, error = %e, "Cannot read last access, using mtime");
                        file.modified
                    }
                };
                (recency, file)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        for (_, file) in ranked {
            if report.removed >= quota {
                break;
            }
            if in_flight(&file.id) {
                debug!(id = %file.id, "Skipping eviction of in-flight track");
                continue;
            }

            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.record_removal(file.size);
                    continue;
                }
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "Cannot evict file");
                    continue;
                }
            }

            self.record_removal(file.size);
            report.removed += 1;
            report.freed_bytes += file.size;

            if let Err(e) = store.update_local_status(&file.id, None, 0.0) {
                warn!(id = %file.id, error = %e, "Cannot reset evicted entry");
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            freed_mb = round2(bytes_to_mb(report.freed_bytes)),
            "Eviction pass completed"
        );

        Ok(report)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let storage = StorageManager::new("/cache", 10);
        let id = TrackId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(storage.canonical_path(&id), PathBuf::from("/cache/dQw4w9WgXcQ.mp3"));
        assert_eq!(
            storage.partial_path(&id),
            PathBuf::from("/cache/dQw4w9WgXcQ.mp3.part")
        );
    }

    #[test]
    fn test_running_total_never_underflows() {
        let storage = StorageManager::new("/cache", 10);
        storage.record_placement(100);
        storage.record_removal(250);
        assert_eq!(storage.usage(), 0);
        assert_eq!(storage.file_count(), 0);
    }

    #[tokio::test]
    async fn test_list_ignores_partials_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("aaaaaaaaaaa.mp3"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("bbbbbbbbbbb.mp3.part"), vec![0u8; 20]).unwrap();
        std::fs::write(dir.path().join("notes.mp3"), vec![0u8; 30]).unwrap();
        std::fs::write(dir.path().join("ccccccccccc.txt"), vec![0u8; 40]).unwrap();

        let storage = StorageManager::new(dir.path(), 10);
        assert_eq!(storage.scan_usage().await.unwrap(), 10);
        assert_eq!(storage.reconcile().await.unwrap(), 10);
        assert_eq!(storage.file_count(), 1);

        assert_eq!(storage.remove_partials().await.unwrap(), 1);
        assert!(!dir.path().join("bbbbbbbbbbb.mp3.part").exists());
    }

    #[test]
    fn test_stats_shape() {
        let storage = StorageManager::new("/cache", 100);
        storage.record_placement(25 * 1024 * 1024);
        let stats = storage.stats();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.total_size_mb, 25.0);
        assert_eq!(stats.usage_percent, 25.0);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("totalSizeMB").is_some());
        assert!(json.get("maxSizeMB").is_some());
        assert!(json.get("usagePercent").is_some());
        assert!(json.get("totalFiles").is_some());
    }
}
