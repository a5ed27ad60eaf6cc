//! # pmotrackcache - Cache de pistes audio pour PMOStream
//!
//! Cette crate garantit qu'une copie MP3 jouable d'une piste identifiée de
//! l'extérieur existe sur le disque local, la télécharge et la normalise au
//! premier accès, puis la sert avec support des requêtes `Range` tout en
//! respectant un budget disque par éviction LRU.
//!
//! ## Architecture
//!
//! ```text
//! pmotrackcache
//!     ├── db.rs          - Métadonnées SQLite (RecordStore)
//!     ├── fetcher.rs     - Téléchargement du média brut (yt-dlp, HTTP)
//!     ├── transcoder.rs  - Conversion MP3 (ffmpeg)
//!     ├── storage.rs     - Occupation disque et éviction
//!     ├── flight.rs      - Déduplication des téléchargements concurrents
//!     ├── cache.rs       - Orchestrateur (TrackCache)
//!     └── api.rs         - Handlers HTTP (feature `pmoserver`)
//! ```
//!
//! ## Utilisation
//!
//! ```rust,no_run
//! use pmotrackcache::{CacheSettings, TrackCache, TrackId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = CacheSettings::new("./data");
//!     let cache = Arc::new(TrackCache::from_settings(&settings).await?);
//!
//!     let id = TrackId::parse("dQw4w9WgXcQ")?;
//!     let resolved = cache.resolve(&id).await?;
//!     println!("Piste disponible: {:?}", resolved.path);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `pmoserver` : routes HTTP et extension `TrackCacheExt` pour `pmoserver::Server`
//! - `pmoconfig` : extension `TrackCacheConfigExt` pour `pmoconfig::Config`
//! - `openapi` : schémas utoipa

pub mod cache;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod flight;
mod process;
pub mod range;
pub mod settings;
pub mod storage;
pub mod track_id;
pub mod transcoder;

#[cfg(feature = "pmoserver")]
pub mod api;
#[cfg(feature = "pmoserver")]
pub mod openapi;
#[cfg(feature = "pmoserver")]
pub mod pmoserver_ext;
#[cfg(feature = "pmoserver")]
mod pmoserver_impl;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

pub use cache::{ConsolidationReport, Resolved, Source, TrackCache};
pub use db::{CacheEntry, RecordStore, DB};
pub use error::{Error, Result};
pub use fetcher::{CommandFetcher, ContentFetcher, FetcherKind, FetcherSettings, HttpFetcher};
pub use flight::FlightGroup;
pub use range::{parse_range, ByteRange, RangeRequest};
pub use settings::CacheSettings;
pub use storage::{EvictionReport, StorageManager, StorageStats};
pub use track_id::TrackId;
pub use transcoder::{FfmpegTranscoder, Transcoder, TranscoderSettings};

#[cfg(feature = "pmoserver")]
pub use openapi::ApiDoc;
#[cfg(feature = "pmoserver")]
pub use pmoserver_ext::TrackCacheExt;

#[cfg(feature = "pmoconfig")]
pub use config_ext::TrackCacheConfigExt;
