use dashmap::DashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::store::CacheStore;
use crate::error::MusicError;
use crate::sources::{Track, TrackFetcher};

/// Contadores acumulados del coordinador.
#[derive(Debug, Default)]
struct StatsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    downloads: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub downloads: u64,
    pub errors: u64,
}

/// Coordina las descargas hacia el caché con semántica single-flight.
///
/// Para una misma clave hay a lo sumo una descarga en vuelo en todo el
/// proceso, sin importar cuántos guilds la pidan a la vez: los demás
/// llamadores esperan el lock por clave y re-chequean el caché al obtenerlo.
/// Claves distintas descargan en paralelo sin interferirse.
pub struct DownloadCoordinator {
    store: Arc<CacheStore>,
    fetcher: Arc<dyn TrackFetcher>,
    retries: u32,
    retry_delay: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
    stats: Arc<StatsInner>,
}

impl DownloadCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        fetcher: Arc<dyn TrackFetcher>,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            fetcher,
            retries: retries.max(1),
            retry_delay,
            locks: DashMap::new(),
            stats: Arc::new(StatsInner::default()),
        }
    }

    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
            downloads: self.stats.downloads.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    /// Garantiza que el archivo del track esté residente en el caché y
    /// devuelve su ruta local.
    pub async fn ensure(&self, track: &Track) -> Result<PathBuf, MusicError> {
        let key = track.video_id.clone();

        if let Some(path) = self.store.lookup(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        // single-flight: una sola descarga en vuelo por clave
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let cleanup = LockCleanup {
            locks: &self.locks,
            key: key.clone(),
            lock,
        };
        let _guard = cleanup.lock.lock().await;

        // otro llamador pudo completar la descarga mientras esperábamos el lock
        if let Some(path) = self.store.lookup(&key) {
            debug!("✅ Descarga coalescida, el archivo ya está en caché: {}", key);
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }

        info!("📥 Cache miss, descargando: {}", track.title);
        let result = self.run_download(track).await;
        match &result {
            Ok(path) => info!("✅ Descarga completada: {} -> {}", track.title, path.display()),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!("❌ Descarga agotada para {}: {}", track.title, e);
            }
        }
        result
    }

    /// Ejecuta la descarga con reintentos en una tarea aparte.
    ///
    /// Correr en tarea propia hace que un reset del guild que cancele al
    /// llamador no aborte la descarga: el resultado queda registrado en el
    /// caché para un uso futuro.
    async fn run_download(&self, track: &Track) -> Result<PathBuf, MusicError> {
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let stats = self.stats.clone();
        let url = track.url.clone();
        let key = track.video_id.clone();
        let title = track.title.clone();
        let dest = store.canonical_path(&key, &title);
        let retries = self.retries;
        let delay = self.retry_delay;

        let handle = tokio::spawn(async move {
            let mut last_reason = String::from("sin intentos");

            for attempt in 1..=retries {
                match fetcher.fetch(&url, &key, &title, &dest).await {
                    Ok(path) => match fs::metadata(&path) {
                        Ok(meta) if meta.len() >= store.min_file_bytes() => {
                            let entry = store.commit(&key, &path, meta.len())?;
                            stats.downloads.fetch_add(1, Ordering::Relaxed);
                            return Ok(entry.path);
                        }
                        Ok(meta) => {
                            last_reason = format!("archivo truncado ({} bytes)", meta.len());
                            let _ = fs::remove_file(&path);
                        }
                        Err(e) => {
                            last_reason = format!("el archivo no fue creado: {}", e);
                        }
                    },
                    Err(e) => last_reason = e.to_string(),
                }

                if attempt < retries {
                    warn!(
                        "❌ Intento {} de descarga falló para {}: {}",
                        attempt, key, last_reason
                    );
                    // espera creciente entre reintentos
                    tokio::time::sleep(delay * attempt).await;
                }
            }

            Err(MusicError::DownloadFailed {
                attempts: retries,
                reason: last_reason,
            })
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(MusicError::DownloadFailed {
                attempts: 0,
                reason: format!("tarea de descarga abortada: {}", e),
            }),
        }
    }
}

/// Liberación garantizada del lock por clave, ocurra lo que ocurra.
///
/// La entrada del mapa sólo se quita si ningún otro llamador conserva una
/// referencia al mismo mutex: quitarla con esperadores encolados dejaría a un
/// recién llegado crear un mutex nuevo y descargar la misma clave en paralelo.
struct LockCleanup<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockCleanup<'_> {
    fn drop(&mut self) {
        // referencias vivas sin esperadores: la del mapa y la nuestra
        self.locks
            .remove_if(&self.key, |_, v| {
                Arc::ptr_eq(v, &self.lock) && Arc::strong_count(v) <= 2
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    /// Descargador simulado: escribe `payload` en destino, fallando los
    /// primeros `fail_first` intentos.
    struct FakeFetcher {
        calls: AtomicU32,
        fail_first: u32,
        payload: Vec<u8>,
    }

    impl FakeFetcher {
        fn new(fail_first: u32, payload: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_first,
                payload: payload.to_vec(),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TrackFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _video_id: &str,
            _title: &str,
            dest: &Path,
        ) -> anyhow::Result<PathBuf> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                anyhow::bail!("fallo simulado en intento {}", call);
            }
            fs::write(dest, &self.payload)?;
            Ok(dest.to_path_buf())
        }
    }

    fn coordinator(
        dir: &TempDir,
        fetcher: Arc<FakeFetcher>,
    ) -> (Arc<DownloadCoordinator>, Arc<CacheStore>) {
        let store = Arc::new(CacheStore::new(dir.path(), 100, 4).unwrap());
        let coordinator = Arc::new(DownloadCoordinator::new(
            store.clone(),
            fetcher,
            3,
            Duration::from_millis(1),
        ));
        (coordinator, store)
    }

    fn track(video_id: &str) -> Track {
        Track::new(
            video_id,
            format!("Track {}", video_id),
            format!("https://youtu.be/{}", video_id),
            UserId::new(7),
        )
    }

    #[tokio::test]
    async fn test_descarga_y_commit() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(0, b"datos de audio");
        let (coordinator, store) = coordinator(&dir, fetcher.clone());

        let path = coordinator.ensure(&track("abc")).await.unwrap();
        assert!(path.exists());
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(store.lookup("abc"), Some(path));

        // segunda llamada: hit directo, sin descargar
        coordinator.ensure(&track("abc")).await.unwrap();
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(coordinator.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_single_flight_coalesce_llamadas_concurrentes() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(0, b"datos de audio");
        let (coordinator, _) = coordinator(&dir, fetcher.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let track = track("mismo");
            handles.push(tokio::spawn(async move { coordinator.ensure(&track).await }));
        }

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }

        // una única invocación al descargador; todos ven el mismo archivo
        assert_eq!(fetcher.calls(), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_claves_distintas_descargan_en_paralelo() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(0, b"datos de audio");
        let (coordinator, _) = coordinator(&dir, fetcher.clone());

        let track_a = track("aaa");
        let track_b = track("bbb");
        let (a, b) = tokio::join!(
            coordinator.ensure(&track_a),
            coordinator.ensure(&track_b)
        );
        assert!(a.is_ok() && b.is_ok());
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_reintenta_fallos_transitorios() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(2, b"datos de audio");
        let (coordinator, _) = coordinator(&dir, fetcher.clone());

        let path = coordinator.ensure(&track("abc")).await.unwrap();
        assert!(path.exists());
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_reintentos_agotados_devuelve_download_failed() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(u32::MAX, b"");
        let (coordinator, _) = coordinator(&dir, fetcher.clone());

        let err = coordinator.ensure(&track("abc")).await.unwrap_err();
        assert!(matches!(
            err,
            MusicError::DownloadFailed { attempts: 3, .. }
        ));
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(coordinator.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_archivo_truncado_dispara_una_redescarga() {
        let dir = TempDir::new().unwrap();
        let fetcher = FakeFetcher::new(0, b"datos de audio");
        let (coordinator, store) = coordinator(&dir, fetcher.clone());

        let path = coordinator.ensure(&track("abc")).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        // truncamos el archivo por debajo del mínimo: debe tratarse como miss
        fs::write(&path, b"x").unwrap();
        let redownloaded = coordinator.ensure(&track("abc")).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(redownloaded.exists());
        assert!(store.lookup("abc").is_some());
    }

    /// Falla lento en el primer intento y mide cuántas descargas corren a la
    /// vez para la misma clave.
    struct SlowFirstFetcher {
        calls: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
    }

    #[async_trait]
    impl TrackFetcher for SlowFirstFetcher {
        async fn fetch(
            &self,
            _url: &str,
            _video_id: &str,
            _title: &str,
            dest: &Path,
        ) -> anyhow::Result<PathBuf> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            let result = if call == 1 {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(anyhow::anyhow!("fallo lento simulado"))
            } else {
                tokio::time::sleep(Duration::from_millis(10)).await;
                fs::write(dest, b"datos de audio")
                    .map(|_| dest.to_path_buf())
                    .map_err(Into::into)
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_liberado_con_esperadores_no_duplica_descargas() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(SlowFirstFetcher {
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
        });
        let store = Arc::new(CacheStore::new(dir.path(), 100, 4).unwrap());
        let coordinator = Arc::new(DownloadCoordinator::new(
            store,
            fetcher.clone(),
            1,
            Duration::from_millis(1),
        ));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            let track = track("abc");
            async move { coordinator.ensure(&track).await }
        });
        // el primero ya tiene el lock y está descargando
        tokio::time::sleep(Duration::from_millis(5)).await;

        // segundo llamador: queda esperando el lock del primero
        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            let track = track("abc");
            async move { coordinator.ensure(&track).await }
        });

        // el primero agota su único intento y suelta el lock
        assert!(first.await.unwrap().is_err());

        // tercer llamador: llega después de la limpieza del primero; debe
        // encolarse detrás del segundo, no abrir una descarga paralela
        let third = tokio::spawn({
            let coordinator = coordinator.clone();
            let track = track("abc");
            async move { coordinator.ensure(&track).await }
        });

        assert!(second.await.unwrap().is_ok());
        assert!(third.await.unwrap().is_ok());
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_descargador_que_escribe_corto_se_reintenta() {
        let dir = TempDir::new().unwrap();
        // siempre escribe menos que el mínimo de 4 bytes
        let fetcher = FakeFetcher::new(0, b"x");
        let (coordinator, _) = coordinator(&dir, fetcher.clone());

        let err = coordinator.ensure(&track("abc")).await.unwrap_err();
        assert!(matches!(err, MusicError::DownloadFailed { .. }));
        assert_eq!(fetcher.calls(), 3);
    }
}
