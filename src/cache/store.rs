use dashmap::DashMap;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::error::MusicError;
use crate::sources::{extract_artist_from_title, extract_track_from_title};

/// Entrada residente del caché de audio.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    /// Número de secuencia de inserción; la evicción saca el menor primero
    pub seq: u64,
}

/// Caché de archivos de audio direccionado por video id.
///
/// El límite de capacidad se aplica por orden de inserción (FIFO), no por
/// recencia de uso: al superar el límite se evicta la entrada más antigua que
/// no esté fijada por una reproducción activa. Los archivos en disco llevan el
/// video id entre corchetes en el nombre, lo que permite readoptarlos tras un
/// reinicio o un renombre externo.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    capacity: usize,
    min_file_bytes: u64,
    index: DashMap<String, CacheEntry>,
    /// Claves fijadas por reproducciones activas (conteo de referencias)
    pinned: DashMap<String, usize>,
    seq: AtomicU64,
}

impl CacheStore {
    /// Un directorio de caché inutilizable es un fallo fatal del proceso.
    pub fn new(
        dir: impl Into<PathBuf>,
        capacity: usize,
        min_file_bytes: u64,
    ) -> Result<Self, MusicError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            capacity,
            min_file_bytes,
            index: DashMap::new(),
            pinned: DashMap::new(),
            seq: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn min_file_bytes(&self) -> u64 {
        self.min_file_bytes
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ruta canónica del archivo de un track: `Artista • Tema [id].mp3`,
    /// con artista y tema separados del título.
    pub fn canonical_path(&self, video_id: &str, title: &str) -> PathBuf {
        let artist = extract_artist_from_title(title);
        let track = extract_track_from_title(title);
        self.dir.join(format!(
            "{} • {} [{}].mp3",
            sanitize_filename(&artist),
            sanitize_filename(&track),
            video_id
        ))
    }

    /// Busca el archivo residente de una clave.
    ///
    /// Valida el archivo de respaldo: si está por debajo del tamaño mínimo se
    /// purga y se reporta miss para forzar la re-descarga. Si la entrada no
    /// está en el índice se intenta un escaneo lineal del directorio por el
    /// video id embebido en el nombre (tolera renombres externos).
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        if let Some(entry) = self.index.get(key) {
            let path = entry.path.clone();
            drop(entry);

            match fs::metadata(&path) {
                Ok(meta) if meta.len() >= self.min_file_bytes => {
                    debug!("✅ Cache hit: {} -> {}", key, path.display());
                    return Some(path);
                }
                Ok(meta) => {
                    warn!(
                        "🗑️ Archivo truncado en caché ({} bytes), purgando: {}",
                        meta.len(),
                        path.display()
                    );
                    self.purge(key);
                    return None;
                }
                Err(_) => {
                    // el archivo desapareció por fuera; quitamos la entrada
                    // y caemos al escaneo del directorio
                    self.index.remove(key);
                }
            }
        }

        self.scan_for(key)
    }

    /// Registra un archivo descargado bajo su clave.
    ///
    /// Este es el único punto de normalización de nombres: colapsa sufijos
    /// `.mp3.mp3` duplicados y renombra archivos que no embeben el video id.
    /// Reemplaza cualquier entrada previa de la misma clave y evicta por FIFO
    /// si la capacidad quedó superada.
    pub fn commit(&self, key: &str, path: &Path, size: u64) -> Result<CacheEntry, MusicError> {
        if size < self.min_file_bytes {
            return Err(MusicError::CacheCorrupt {
                path: path.to_path_buf(),
            });
        }

        let path = self.normalize(key, path);

        if let Some((_, old)) = self.index.remove(key) {
            if old.path != path {
                if let Err(e) = fs::remove_file(&old.path) {
                    debug!(
                        "No se pudo borrar la entrada previa {}: {}",
                        old.path.display(),
                        e
                    );
                }
            }
        }

        let entry = CacheEntry {
            key: key.to_string(),
            path,
            size,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        debug!(
            "💾 Entrada registrada en caché: {} (seq {})",
            entry.path.display(),
            entry.seq
        );
        self.index.insert(key.to_string(), entry.clone());

        self.evict_if_needed();

        Ok(entry)
    }

    /// Fija una entrada mientras se reproduce; queda excluida de la evicción.
    pub fn pin(&self, key: &str) {
        *self.pinned.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn unpin(&self, key: &str) {
        let remove = {
            let Some(mut count) = self.pinned.get_mut(key) else {
                return;
            };
            *count = count.saturating_sub(1);
            *count == 0
        };
        if remove {
            self.pinned.remove_if(key, |_, count| *count == 0);
        }
    }

    fn is_pinned(&self, key: &str) -> bool {
        self.pinned.contains_key(key)
    }

    /// Adopta archivos pre-existentes del directorio (recuperación tras
    /// reinicio). Devuelve cuántos se incorporaron al índice.
    pub fn scan_existing(&self) -> usize {
        let Ok(id_pattern) = Regex::new(r"\[([^\[\]]+)\]\.mp3$") else {
            return 0;
        };
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };

        let mut adopted = 0;
        for item in entries.flatten() {
            let name = item.file_name().to_string_lossy().into_owned();
            let Some(caps) = id_pattern.captures(&name) else {
                continue;
            };
            let key = caps[1].to_string();
            if self.index.contains_key(&key) {
                continue;
            }
            if let Ok(meta) = fs::metadata(item.path()) {
                if meta.len() >= self.min_file_bytes
                    && self.commit(&key, &item.path(), meta.len()).is_ok()
                {
                    adopted += 1;
                }
            }
        }

        if adopted > 0 {
            info!("📂 Caché recuperado del disco: {} archivos adoptados", adopted);
        }
        adopted
    }

    /// Evicción FIFO: sale primero la entrada más antigua por inserción,
    /// saltando las fijadas por reproducciones activas.
    fn evict_if_needed(&self) {
        while self.index.len() > self.capacity {
            let victim = self
                .index
                .iter()
                .filter(|entry| !self.is_pinned(entry.key()))
                .min_by_key(|entry| entry.value().seq)
                .map(|entry| entry.key().clone());

            let Some(key) = victim else {
                warn!("⚠️ Caché sobre capacidad pero todas las entradas están fijadas");
                break;
            };

            if let Some((_, entry)) = self.index.remove(&key) {
                info!("🗑 Evictado del caché por límite: {}", entry.path.display());
                if let Err(e) = fs::remove_file(&entry.path) {
                    warn!(
                        "⚠️ No se pudo borrar el archivo evictado {}: {}",
                        entry.path.display(),
                        e
                    );
                }
            }
        }
    }

    /// Purga una entrada inválida junto con su archivo.
    fn purge(&self, key: &str) {
        if let Some((_, entry)) = self.index.remove(key) {
            if let Err(e) = fs::remove_file(&entry.path) {
                warn!(
                    "⚠️ No se pudo borrar archivo corrupto {}: {}",
                    entry.path.display(),
                    e
                );
            }
        }
    }

    /// Escaneo lineal del directorio buscando el video id en el nombre.
    fn scan_for(&self, key: &str) -> Option<PathBuf> {
        let marker = format!("[{}]", key);
        let entries = fs::read_dir(&self.dir).ok()?;

        for item in entries.flatten() {
            let name = item.file_name().to_string_lossy().into_owned();
            if !name.contains(&marker) || !name.ends_with(".mp3") {
                continue;
            }
            let path = item.path();
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            if meta.len() < self.min_file_bytes {
                continue;
            }
            info!("🔄 Archivo encontrado con nombre distinto, adoptando: {}", name);
            return self.commit(key, &path, meta.len()).ok().map(|e| e.path);
        }

        None
    }

    /// Corrige el nombre del archivo al registrarlo: colapsa `.mp3.mp3` y
    /// asegura que el video id quede embebido entre corchetes.
    fn normalize(&self, key: &str, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut fixed = name.replace(".mp3.mp3", ".mp3");
        let marker = format!("[{}]", key);
        if !fixed.contains(&marker) {
            let stem = fixed.strip_suffix(".mp3").unwrap_or(&fixed).to_string();
            fixed = format!("{} {}.mp3", stem, marker);
        }

        if fixed == name {
            return path.to_path_buf();
        }

        let dest = self.dir.join(&fixed);
        if dest.exists() {
            // ya hay una copia con el nombre correcto; descartamos la duplicada
            if let Err(e) = fs::remove_file(path) {
                warn!("⚠️ No se pudo borrar duplicado {}: {}", path.display(), e);
            }
            return dest;
        }

        match fs::rename(path, &dest) {
            Ok(()) => {
                info!("✔️ Nombre normalizado: {} -> {}", name, fixed);
                dest
            }
            Err(e) => {
                warn!("⚠️ No se pudo renombrar {}: {}", name, e);
                path.to_path_buf()
            }
        }
    }
}

/// Limpia un título para usarlo como nombre de archivo.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let out: String = cleaned.chars().take(50).collect();
    if out.is_empty() {
        "Unknown".to_string()
    } else {
        out.trim_end().to_string()
    }
}
