//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour créer le serveur HTTP de
//! PMOStream. Les autres crates y montent leurs routes via des traits
//! d'extension (voir `pmotrackcache::TrackCacheExt`).
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : routers, handlers avec état, builder depuis la configuration
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Documentation OpenAPI** : Swagger UI par API
//! - **Arrêt gracieux** : gestion de Ctrl+C
//!
//! ## Architecture
//!
//! - [`server`] : serveur principal et builder
//! - [`logs`] : buffer circulaire, layer tracing et handlers de logs
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = pmoconfig::Config::load_config("")?;
//!
//!     let mut server = ServerBuilder::from_config(&config).build();
//!     server.init_logging(LoggingOptions::from_config(&config)).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{BufferLayer, LogState, LoggingOptions, init_logging, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
