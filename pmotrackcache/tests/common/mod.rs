//! Doublures de test partagées : téléchargeur et transcodeur simulés

#![allow(dead_code)]

use async_trait::async_trait;
use pmotrackcache::{ContentFetcher, Error, RecordStore, Result, TrackCache, TrackId, Transcoder, DB};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Contenu déterministe d'un fichier audio de `len` octets
pub fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn id(raw: &str) -> TrackId {
    TrackId::parse(raw).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Ok,
    /// Laisse un fichier partiel dans le staging puis échoue
    Fail,
    /// Réussit sans rien déposer
    NoArtifact,
}

pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub delay: Duration,
    pub mode: FetchMode,
}

impl FakeFetcher {
    pub fn new(mode: FetchMode) -> Arc<Self> {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: FetchMode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            mode,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, id: &TrackId, staging_dir: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.mode {
            FetchMode::Ok => {
                tokio::fs::write(staging_dir.join(format!("{}_raw.webm", id)), b"raw media").await?;
                Ok(())
            }
            FetchMode::Fail => {
                tokio::fs::write(staging_dir.join(format!("{}_raw.webm.part", id)), b"half").await?;
                Err(Error::FetchFailed("remote refused".to_string()))
            }
            FetchMode::NoArtifact => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    /// Produit un fichier de la taille donnée
    Ok(usize),
    /// Écrit une sortie partielle puis échoue
    Fail,
    /// Réussit avec une sortie vide
    Empty,
}

pub struct FakeTranscoder {
    pub calls: AtomicUsize,
    pub mode: TranscodeMode,
}

impl FakeTranscoder {
    pub fn new(mode: TranscodeMode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            mode,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(input.exists(), "staged input must exist");

        match self.mode {
            TranscodeMode::Ok(len) => {
                tokio::fs::write(output, audio_bytes(len)).await?;
                Ok(())
            }
            TranscodeMode::Fail => {
                tokio::fs::write(output, b"garbage").await?;
                Err(Error::TranscodeFailed("ffmpeg exited with 1".to_string()))
            }
            TranscodeMode::Empty => {
                tokio::fs::write(output, b"").await?;
                Ok(())
            }
        }
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub cache: Arc<TrackCache>,
    pub db: Arc<DB>,
    pub fetcher: Arc<FakeFetcher>,
    pub transcoder: Arc<FakeTranscoder>,
}

impl Harness {
    pub async fn new(fetcher: Arc<FakeFetcher>, transcoder: Arc<FakeTranscoder>) -> Self {
        Self::with_budget(fetcher, transcoder, 5000).await
    }

    pub async fn with_budget(
        fetcher: Arc<FakeFetcher>,
        transcoder: Arc<FakeTranscoder>,
        max_size_mb: u64,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DB::init(&dir.path().join("tracks.db")).unwrap());
        let store: Arc<dyn RecordStore> = db.clone();

        let cache = TrackCache::new(
            store,
            fetcher.clone(),
            transcoder.clone(),
            dir.path().join("audio"),
            dir.path().join("staging"),
            max_size_mb,
        )
        .await
        .unwrap();
        cache.consolidate().await.unwrap();

        Self {
            dir,
            cache: Arc::new(cache),
            db,
            fetcher,
            transcoder,
        }
    }

    pub fn audio_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("audio")
    }

    pub fn staging_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("staging")
    }

    /// Noms des fichiers présents dans un répertoire
    pub fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }
}
