//! # Sources Module
//!
//! Track metadata and the external collaborator interfaces the playback core
//! consumes: the download tool that materializes audio files on disk and the
//! recommendation supplier that feeds autoplay. Both are implemented outside
//! this crate (yt-dlp wrappers, Spotify/AI recommenders, etc.); the core only
//! depends on the traits defined here.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serenity::model::id::UserId;
use std::path::{Path, PathBuf};

/// Track resuelto desde una búsqueda, listo para encolar.
///
/// Inmutable salvo por la resolución de `file`, que se completa cuando el
/// caché entrega la ruta local.
#[derive(Debug, Clone)]
pub struct Track {
    /// Id estable de la fuente (video id); clave del caché
    pub video_id: String,
    pub title: String,
    pub url: String,
    /// Ruta local resuelta; `None` hasta que el caché la entrega
    pub file: Option<PathBuf>,
    /// Quién lo pidió; `None` para tracks generados por AutoPlay
    pub requested_by: Option<UserId>,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        requested_by: UserId,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            url: url.into(),
            file: None,
            requested_by: Some(requested_by),
            added_at: Utc::now(),
        }
    }

    /// Track generado por AutoPlay (sin solicitante).
    pub fn autoplay(
        video_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            url: url.into(),
            file: None,
            requested_by: None,
            added_at: Utc::now(),
        }
    }

    /// Construye un track extrayendo el id estable desde la URL.
    pub fn from_url(
        title: impl Into<String>,
        url: impl Into<String>,
        requested_by: UserId,
    ) -> Result<Self> {
        let url = url.into();
        let video_id = extract_video_id(&url)?;
        Ok(Self::new(video_id, title, url, requested_by))
    }

    pub fn with_file(mut self, file: PathBuf) -> Self {
        self.file = Some(file);
        self
    }

    pub fn is_autoplay(&self) -> bool {
        self.requested_by.is_none()
    }
}

/// Extrae el video ID de una URL de YouTube.
pub fn extract_video_id(url: &str) -> Result<String> {
    use url::Url;

    let parsed = Url::parse(url)?;

    // youtube.com/watch?v=VIDEO_ID
    if let Some(query) = parsed.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            if key == "v" {
                return Ok(value.into_owned());
            }
        }
    }

    // youtu.be/VIDEO_ID
    if parsed.host_str() == Some("youtu.be") {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(video_id) = segments.next() {
                if !video_id.is_empty() {
                    return Ok(video_id.to_string());
                }
            }
        }
    }

    anyhow::bail!("No se pudo extraer video ID de: {}", url)
}

/// Quita paréntesis y corchetes de un título de YouTube.
fn strip_title_noise(title: &str) -> String {
    let parens = Regex::new(r"\s*\([^)]*\)").unwrap();
    let brackets = Regex::new(r"\s*\[[^\]]*\]").unwrap();
    let cleaned = parens.replace_all(title, "");
    brackets.replace_all(&cleaned, "").trim().to_string()
}

/// Quita sufijos de canal ("Official Video", "VEVO", "HD"...).
fn strip_channel_suffix(text: &str) -> String {
    let suffix = Regex::new(r"(?i)\s*(Official|Music|Video|Lyrics|Audio|VEVO|HD)\s*$").unwrap();
    let mut out = text.trim().to_string();
    loop {
        let next = suffix.replace(&out, "").trim().to_string();
        if next == out {
            return out;
        }
        out = next;
    }
}

/// Extrae el artista de un título de YouTube.
///
/// Reconoce "Artista - Tema", "Artista: Tema" y "Tema by Artista"; sin
/// patrón reconocible devuelve "Various Artists".
pub fn extract_artist_from_title(title: &str) -> String {
    let cleaned = strip_title_noise(title);

    let separator = Regex::new(r"^(?P<artist>[^-–—:]+?)\s*[-–—:]\s*.+$").unwrap();
    if let Some(caps) = separator.captures(&cleaned) {
        let artist = strip_channel_suffix(&caps["artist"]);
        if artist.len() > 1 {
            return artist;
        }
    }

    let by = Regex::new(r"(?i)^.+?\s+by\s+(?P<artist>.+)$").unwrap();
    if let Some(caps) = by.captures(&cleaned) {
        let artist = strip_channel_suffix(&caps["artist"]);
        if artist.len() > 1 {
            return artist;
        }
    }

    "Various Artists".to_string()
}

/// Extrae el nombre del tema de un título de YouTube.
///
/// Contraparte de [`extract_artist_from_title`]; sin patrón reconocible
/// devuelve el título limpio.
pub fn extract_track_from_title(title: &str) -> String {
    let cleaned = strip_title_noise(title);

    let separator = Regex::new(r"^[^-–—:]+?\s*[-–—:]\s*(?P<track>.+)$").unwrap();
    if let Some(caps) = separator.captures(&cleaned) {
        let track = strip_channel_suffix(&caps["track"]);
        if track.len() > 1 {
            return track;
        }
    }

    let by = Regex::new(r"(?i)^(?P<track>.+?)\s+by\s+.+$").unwrap();
    if let Some(caps) = by.captures(&cleaned) {
        let track = strip_channel_suffix(&caps["track"]);
        if track.len() > 1 {
            return track;
        }
    }

    if cleaned.is_empty() {
        "Unknown Track".to_string()
    } else {
        cleaned
    }
}

/// Herramienta externa de descarga (p. ej. un wrapper de yt-dlp).
///
/// Debe dejar el audio del track en `dest` (o una ruta equivalente que
/// devuelve) y retornar error si la descarga no pudo completarse. La
/// validación del archivo y los reintentos corren por cuenta del coordinador.
#[async_trait]
pub trait TrackFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        video_id: &str,
        title: &str,
        dest: &Path,
    ) -> Result<PathBuf>;
}

/// Proveedor de recomendaciones para AutoPlay.
#[async_trait]
pub trait AutoplaySupplier: Send + Sync {
    /// Devuelve un candidato similar al track semilla, o `None` si no hay.
    async fn recommend(&self, seed: &Track) -> Result<Option<Track>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraccion_de_video_id() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert!(extract_video_id("https://example.com/video").is_err());
    }

    #[test]
    fn test_from_url_usa_el_id_de_la_url() {
        let track = Track::from_url(
            "Test",
            "https://www.youtube.com/watch?v=abc123",
            UserId::new(1),
        )
        .unwrap();
        assert_eq!(track.video_id, "abc123");
        assert!(!track.is_autoplay());
    }

    #[test]
    fn test_extraccion_de_artista() {
        assert_eq!(
            extract_artist_from_title("BAD OMENS - Impose (Official Music Video)"),
            "BAD OMENS"
        );
        assert_eq!(
            extract_artist_from_title("Daft Punk: Around the World"),
            "Daft Punk"
        );
        assert_eq!(extract_artist_from_title("Halcyon by OceanLab"), "OceanLab");
        assert_eq!(extract_artist_from_title("lofi beats"), "Various Artists");
    }

    #[test]
    fn test_extraccion_de_tema() {
        assert_eq!(
            extract_track_from_title("BAD OMENS - Impose (Official Music Video)"),
            "Impose"
        );
        assert_eq!(
            extract_track_from_title("Daft Punk: Around the World"),
            "Around the World"
        );
        assert_eq!(extract_track_from_title("Halcyon by OceanLab"), "Halcyon");
        // sin patrón: el título limpio tal cual
        assert_eq!(extract_track_from_title("lofi beats [HD]"), "lofi beats");
    }

    #[test]
    fn test_autoplay_no_tiene_solicitante() {
        let track = Track::autoplay("abc123", "Test", "https://youtu.be/abc123");
        assert!(track.is_autoplay());
    }
}
