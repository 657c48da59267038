//! # Tocadiscos
//!
//! Núcleo de reproducción de música multi-guild: caché persistente de audio,
//! descargas coalescidas con reintentos, cola FIFO por guild con AutoPlay y
//! una máquina de estados de reproducción desacoplada del transporte de voz.
//!
//! La capa de comandos de Discord y las herramientas de descarga reales
//! quedan fuera: se integran implementando los traits de [`sources`] y
//! [`audio::transport`].

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod sources;

pub use audio::{EffectMode, PlayerEvent, PlayerRegistry, PlayerState, QueueSnapshot};
pub use cache::{CacheStore, DownloadCoordinator};
pub use config::Config;
pub use error::MusicError;
pub use sources::{AutoplaySupplier, Track, TrackFetcher};
