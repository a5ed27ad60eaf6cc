//! Module de gestion de la base de données SQLite pour le cache de pistes
//!
//! Ce module fournit le contrat [`RecordStore`] utilisé par l'orchestrateur et
//! son implémentation SQLite [`DB`]. La base conserve, pour chaque piste :
//! - l'état local (chemin, drapeau de téléchargement, taille)
//! - les statistiques d'écoute (compteur, dernière écoute, historique)
//! - la date du dernier accès, utilisée comme clé de la politique LRU

use crate::error::Result;
use crate::track_id::TrackId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Entrée de cache représentant une piste dans la base de données
#[derive(Debug, Serialize, Clone, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CacheEntry {
    /// Identifiant externe de la piste
    #[cfg_attr(feature = "openapi", schema(example = "dQw4w9WgXcQ"))]
    pub entry_id: String,
    /// Chemin du fichier MP3 s'il est censé exister
    pub local_path: Option<String>,
    /// Vrai si le fichier a été placé dans le cache
    pub is_downloaded: bool,
    /// Taille du fichier lors du dernier placement (Mo)
    #[cfg_attr(feature = "openapi", schema(example = 4.2))]
    pub size_mb: f64,
    /// Nombre d'écoutes
    pub play_count: i64,
    /// Date/heure de la dernière écoute (RFC3339)
    pub last_played_at: Option<String>,
    /// Date/heure du dernier accès (RFC3339)
    #[cfg_attr(feature = "openapi", schema(example = "2025-01-15T10:30:00Z"))]
    pub last_access_at: Option<String>,
    /// Date/heure de création de l'entrée (RFC3339)
    pub created_at: String,
}

/// Contrat de persistance des métadonnées de pistes
///
/// Les appels sont synchrones et courts ; l'enregistrement des écoutes est
/// déporté sur un thread bloquant par l'orchestrateur.
pub trait RecordStore: Send + Sync {
    /// Récupère l'entrée d'une piste
    fn find_by_entry_id(&self, id: &TrackId) -> Result<Option<CacheEntry>>;

    /// Met à jour l'état local d'une piste
    ///
    /// Avec un chemin, l'entrée est créée si besoin et marquée téléchargée.
    /// Sans chemin, l'entrée existante est remise à l'état non téléchargé ;
    /// les statistiques d'écoute sont conservées.
    fn update_local_status(&self, id: &TrackId, path: Option<&Path>, size_mb: f64) -> Result<()>;

    /// Enregistre une écoute (compteur et historique dans une même transaction)
    fn record_play(&self, id: &TrackId) -> Result<()>;

    /// Met à jour la date du dernier accès
    fn touch(&self, id: &TrackId) -> Result<()>;

    /// Date du dernier accès connue pour la piste
    fn last_access(&self, id: &TrackId) -> Result<Option<DateTime<Utc>>>;

    /// Entrées marquées comme téléchargées
    fn downloaded_entries(&self) -> Result<Vec<CacheEntry>>;
}

const ENTRY_COLUMNS: &str = "entry_id, local_path, is_downloaded, size_mb, play_count, \
                             last_played_at, last_access_at, created_at";

/// Base de données SQLite du cache de pistes
#[derive(Debug)]
pub struct DB {
    conn: Mutex<Connection>,
}

impl DB {
    /// Ouvre (ou crée) la base et son schéma
    ///
    /// # Exemple
    ///
    /// ```rust,no_run
    /// use pmotrackcache::db::DB;
    /// use std::path::Path;
    ///
    /// let db = DB::init(Path::new("tracks.db")).unwrap();
    /// ```
    pub fn init(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracks (
                entry_id TEXT PRIMARY KEY,
                local_path TEXT,
                is_downloaded INTEGER NOT NULL DEFAULT 0,
                size_mb REAL NOT NULL DEFAULT 0,
                play_count INTEGER NOT NULL DEFAULT 0,
                last_played_at TEXT,
                last_access_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_lru ON tracks (last_access_at ASC);
            CREATE TABLE IF NOT EXISTS play_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entry_id TEXT NOT NULL,
                played_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_play_history_entry ON play_history (entry_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheEntry> {
        Ok(CacheEntry {
            entry_id: row.get(0)?,
            local_path: row.get(1)?,
            is_downloaded: row.get(2)?,
            size_mb: row.get(3)?,
            play_count: row.get(4)?,
            last_played_at: row.get(5)?,
            last_access_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    /// Force la date du dernier accès
    pub fn set_last_access(&self, id: &TrackId, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE tracks SET last_access_at = ?1 WHERE entry_id = ?2",
            params![at.to_rfc3339(), id.as_str()],
        )?;
        Ok(())
    }

    /// Nombre d'écoutes enregistrées dans l'historique d'une piste
    pub fn play_history_count(&self, id: &TrackId) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM play_history WHERE entry_id = ?1",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Toutes les entrées, les plus écoutées en premier
    pub fn get_all(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM tracks ORDER BY play_count DESC, entry_id ASC"
        ))?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl RecordStore for DB {
    fn find_by_entry_id(&self, id: &TrackId) -> Result<Option<CacheEntry>> {
        let entry = self
            .conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM tracks WHERE entry_id = ?1"),
                [id.as_str()],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn update_local_status(&self, id: &TrackId, path: Option<&Path>, size_mb: f64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();

        match path {
            Some(path) => {
                conn.execute(
                    "INSERT INTO tracks (entry_id, local_path, is_downloaded, size_mb, last_access_at, created_at)
                     VALUES (?1, ?2, 1, ?3, ?4, ?4)
                     ON CONFLICT(entry_id) DO UPDATE SET
                         local_path = excluded.local_path,
                         is_downloaded = 1,
                         size_mb = excluded.size_mb,
                         last_access_at = excluded.last_access_at",
                    params![id.as_str(), path.to_string_lossy(), size_mb, now],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE tracks SET local_path = NULL, is_downloaded = 0, size_mb = ?1
                     WHERE entry_id = ?2",
                    params![size_mb, id.as_str()],
                )?;
            }
        }

        Ok(())
    }

    fn record_play(&self, id: &TrackId) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO tracks (entry_id, play_count, last_played_at, created_at)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(entry_id) DO UPDATE SET
                 play_count = play_count + 1,
                 last_played_at = excluded.last_played_at",
            params![id.as_str(), now],
        )?;
        tx.execute(
            "INSERT INTO play_history (entry_id, played_at) VALUES (?1, ?2)",
            params![id.as_str(), now],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn touch(&self, id: &TrackId) -> Result<()> {
        self.conn().execute(
            "UPDATE tracks SET last_access_at = ?1 WHERE entry_id = ?2",
            params![Utc::now().to_rfc3339(), id.as_str()],
        )?;
        Ok(())
    }

    fn last_access(&self, id: &TrackId) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT last_access_at FROM tracks WHERE entry_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        // Une date illisible est traitée comme absente
        Ok(raw
            .flatten()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    fn downloaded_entries(&self) -> Result<Vec<CacheEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM tracks WHERE is_downloaded = 1"
        ))?;
        let entries = stmt
            .query_map([], Self::row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
