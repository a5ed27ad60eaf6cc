//! Récupération du média brut depuis le fournisseur distant
//!
//! Un [`ContentFetcher`] dépose, pour une piste donnée, un fichier nommé
//! `{id}_raw.<ext>` dans le répertoire de staging. L'orchestrateur retrouve ce
//! fichier par préfixe, le transcode puis le supprime.
//!
//! Deux implémentations sont fournies :
//! - [`CommandFetcher`] : pilote un téléchargeur compatible `yt-dlp`
//! - [`HttpFetcher`] : télécharge directement une URL avec `reqwest`

use crate::error::{Error, Result};
use crate::process::run_tool;
use crate::track_id::TrackId;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Suffixe des fichiers bruts déposés dans le staging
pub const STAGING_SUFFIX: &str = "_raw";

const DEFAULT_SOURCE_URL: &str = "https://www.youtube.com/watch?v={id}";
const DEFAULT_REFERER: &str = "https://www.youtube.com/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                                  (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Récupère le média brut d'une piste dans le staging
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Dépose `{staging_dir}/{id}_raw.<ext>` ou échoue
    async fn fetch(&self, id: &TrackId, staging_dir: &Path) -> Result<()>;
}

/// Type de téléchargeur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Command,
    Http,
}

impl FromStr for FetcherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "command" | "yt-dlp" => Ok(FetcherKind::Command),
            "http" => Ok(FetcherKind::Http),
            other => Err(Error::other(format!("Unknown fetcher kind: {}", other))),
        }
    }
}

/// Paramètres du téléchargement
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub kind: FetcherKind,
    /// Exécutable du téléchargeur (mode `Command`)
    pub program: String,
    /// URL de la ressource, `{id}` y est remplacé par l'identifiant
    pub source_url: String,
    pub referer: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            kind: FetcherKind::Command,
            program: "yt-dlp".to_string(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl FetcherSettings {
    /// URL source de la piste
    pub fn url_for(&self, id: &TrackId) -> String {
        self.source_url.replace("{id}", id.as_str())
    }
}

/// Construit le téléchargeur décrit par `settings`
pub fn build_fetcher(settings: &FetcherSettings) -> Result<Arc<dyn ContentFetcher>> {
    Ok(match settings.kind {
        FetcherKind::Command => Arc::new(CommandFetcher::new(settings.clone())),
        FetcherKind::Http => Arc::new(HttpFetcher::new(settings.clone())?),
    })
}

fn staging_prefix(id: &TrackId) -> String {
    format!("{}{}", id, STAGING_SUFFIX)
}

/// Fichiers temporaires des téléchargeurs, jamais pris pour un artefact
fn is_incomplete(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl") || name.ends_with(".tmp")
}

/// Cherche le fichier brut déposé pour `id` dans le staging
pub async fn find_staged_artifact(staging_dir: &Path, id: &TrackId) -> Result<Option<PathBuf>> {
    let prefix = staging_prefix(id);
    let mut candidates = Vec::new();

    let mut entries = tokio::fs::read_dir(staging_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && !is_incomplete(name) && entry.file_type().await?.is_file() {
            candidates.push(entry.path());
        }
    }

    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Supprime tous les fichiers `{id}_raw*` du staging
///
/// Les échecs sont journalisés et ignorés. Retourne le nombre de fichiers supprimés.
pub async fn remove_staged_artifacts(staging_dir: &Path, id: &TrackId) -> usize {
    let prefix = staging_prefix(id);
    let mut removed = 0;

    let mut entries = match tokio::fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %staging_dir.display(), error = %e, "Cannot list staging directory");
            return 0;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Error while listing staging directory");
                break;
            }
        };

        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix));
        if !matches {
            continue;
        }

        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Cannot remove staged file"),
        }
    }

    if removed > 0 {
        debug!(id = %id, removed, "Staging cleaned");
    }
    removed
}

/// Téléchargeur externe compatible `yt-dlp`
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    settings: FetcherSettings,
}

impl CommandFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }

    /// Arguments passés au téléchargeur
    pub fn args(&self, id: &TrackId, staging_dir: &Path) -> Vec<String> {
        let template = staging_dir.join(format!("{}.%(ext)s", staging_prefix(id)));
        vec![
            "--no-check-certificates".to_string(),
            "--no-playlist".to_string(),
            "--no-progress".to_string(),
            "--format".to_string(),
            "bestaudio/best".to_string(),
            "--referer".to_string(),
            self.settings.referer.clone(),
            "--user-agent".to_string(),
            self.settings.user_agent.clone(),
            "--output".to_string(),
            template.to_string_lossy().to_string(),
            self.settings.url_for(id),
        ]
    }
}

#[async_trait]
impl ContentFetcher for CommandFetcher {
    async fn fetch(&self, id: &TrackId, staging_dir: &Path) -> Result<()> {
        let mut command = Command::new(&self.settings.program);
        command.args(self.args(id, staging_dir));
        run_tool(command, "fetch", self.settings.timeout, Error::FetchFailed).await
    }
}

/// Téléchargement HTTP direct de `source_url`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    settings: FetcherSettings,
}

impl HttpFetcher {
    pub fn new(settings: FetcherSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| Error::FetchFailed(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client, settings })
    }

    async fn download(&self, id: &TrackId, staging_dir: &Path) -> Result<()> {
        let url = self.settings.url_for(id);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::REFERER, &self.settings.referer)
            .send()
            .await
            .map_err(|e| Error::FetchFailed(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::FetchFailed(format!("GET {} returned {}", url, status)));
        }

        let extension = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for_mime)
            .unwrap_or("bin");

        let target = staging_dir.join(format!("{}.{}", staging_prefix(id), extension));
        let mut file = tokio::fs::File::create(&target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::FetchFailed(format!("GET {}: {}", url, e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, id: &TrackId, staging_dir: &Path) -> Result<()> {
        let limit = self.settings.timeout;
        match tokio::time::timeout(limit, self.download(id, staging_dir)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                stage: "fetch",
                secs: limit.as_secs(),
            }),
        }
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    let mime = mime.split(';').next().unwrap_or("").trim();
    match mime {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/wav" | "audio/x-wav" => "wav",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}
