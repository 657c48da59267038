use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Taxonomía de errores del núcleo de reproducción.
///
/// Los fallos por track (`DownloadFailed`, `ConnectionTimeout`, `Playback`)
/// nunca son fatales para la cola del guild: el controlador descarta el track
/// y continúa con el siguiente. `CacheCorrupt` se maneja internamente con una
/// re-descarga transparente y sólo se propaga si esa también falla.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("descarga fallida tras {attempts} intentos: {reason}")]
    DownloadFailed { attempts: u32, reason: String },

    #[error("archivo de caché corrupto o truncado: {}", path.display())]
    CacheCorrupt { path: PathBuf },

    #[error("timeout al conectar con el canal de voz ({0:?})")]
    ConnectionTimeout(Duration),

    #[error("error del reproductor externo: {0}")]
    Playback(String),

    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("posición inválida: {0}")]
    InvalidPosition(usize),

    #[error("no hay canal de voz disponible para el guild")]
    NoVoiceChannel,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
