use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Caché
    pub cache_dir: PathBuf,
    pub cache_capacity: usize,
    pub min_file_bytes: u64,

    // Descargas
    pub download_retries: u32,
    pub retry_delay_ms: u64,

    // Reproducción
    pub max_queue_size: usize,
    pub connect_timeout_secs: u64,
    pub autoplay_threshold: usize,

    // Limpieza de guilds inactivos
    pub inactivity_window_secs: u64,
    pub cleanup_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Caché
            cache_dir: std::env::var("CACHE_DIR")
                .unwrap_or_else(|_| "./music_cache".to_string())
                .into(),
            cache_capacity: std::env::var("CACHE_CAPACITY")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            min_file_bytes: std::env::var("MIN_FILE_BYTES")
                .unwrap_or_else(|_| "1024".to_string())
                .parse()?,

            // Descargas
            download_retries: std::env::var("DOWNLOAD_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
            retry_delay_ms: std::env::var("RETRY_DELAY_MS")
                .unwrap_or_else(|_| "1500".to_string())
                .parse()?,

            // Reproducción
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            connect_timeout_secs: std::env::var("CONNECT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()?,
            autoplay_threshold: std::env::var("AUTOPLAY_THRESHOLD")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,

            // Limpieza
            inactivity_window_secs: std::env::var("INACTIVITY_WINDOW_SECS")
                .unwrap_or_else(|_| "1800".to_string()) // 30 minutos
                .parse()?,
            cleanup_interval_secs: std::env::var("CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string()) // 5 minutos
                .parse()?,
        };

        // Crear el directorio de caché si no existe
        std::fs::create_dir_all(&config.cache_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Chequeos de sanidad sobre los valores configurados.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            anyhow::bail!("La capacidad del caché debe ser mayor a 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("El tamaño máximo de cola debe ser mayor a 0");
        }

        if self.download_retries == 0 {
            anyhow::bail!("Se requiere al menos 1 intento de descarga");
        }

        if self.connect_timeout_secs == 0 {
            anyhow::bail!("El timeout de conexión debe ser mayor a 0");
        }

        Ok(())
    }

    /// Resumen de la configuración activa para logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Cache: {} entradas en {} (mínimo {} bytes)\n  \
            Descargas: {} intentos, {}ms entre reintentos\n  \
            Cola: {} máximo, autoplay con <= {} pendientes\n  \
            Limpieza: guilds inactivos tras {}s, barrido cada {}s",
            self.cache_capacity,
            self.cache_dir.display(),
            self.min_file_bytes,
            self.download_retries,
            self.retry_delay_ms,
            self.max_queue_size,
            self.autoplay_threshold,
            self.inactivity_window_secs,
            self.cleanup_interval_secs,
        )
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn inactivity_window(&self) -> Duration {
        Duration::from_secs(self.inactivity_window_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Valores por defecto, iguales a los del servicio original.
impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: "./music_cache".into(),
            cache_capacity: 1000,
            min_file_bytes: 1024,

            download_retries: 3,
            retry_delay_ms: 1500,

            max_queue_size: 1000,
            connect_timeout_secs: 15,
            autoplay_threshold: 2,

            inactivity_window_secs: 1800,
            cleanup_interval_secs: 300,
        }
    }
}
