use serenity::model::id::{ChannelId, GuildId};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::audio::effects::EffectMode;
use crate::audio::queue::{GuildQueue, QueueSnapshot};
use crate::audio::transport::{PlayerEvent, VoiceConnection, VoiceTransport};
use crate::cache::{CacheStore, DownloadCoordinator};
use crate::config::Config;
use crate::error::MusicError;
use crate::sources::{AutoplaySupplier, Track};

/// Estado del reproductor de un guild.
///
/// Transiciones válidas: Idle → Resolving → Connecting → Playing ⇄ Paused,
/// y cualquier estado → Idle al agotar la cola o resetear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Resolving,
    Connecting,
    Playing,
    Paused,
}

/// Reproductor de un guild: cola + estado + conexión de voz.
///
/// Toda mutación de cola pasa por el mutex interno; el avance de track está
/// serializado por `driver`, así un evento de fin y un enqueue simultáneos
/// nunca arrancan dos reproducciones. `generation` se incrementa en cada
/// reset para que los ciclos de avance en vuelo se abandonen solos.
pub struct GuildPlayer {
    guild_id: GuildId,
    config: Arc<Config>,
    store: Arc<CacheStore>,
    downloads: Arc<DownloadCoordinator>,
    transport: Arc<dyn VoiceTransport>,
    supplier: Option<Arc<dyn AutoplaySupplier>>,
    queue: parking_lot::Mutex<GuildQueue>,
    state: parking_lot::Mutex<PlayerState>,
    connection: AsyncMutex<Option<Arc<dyn VoiceConnection>>>,
    driver: AsyncMutex<()>,
    generation: AtomicU64,
    autoplay_busy: AtomicBool,
    errors: AtomicU64,
}

impl GuildPlayer {
    pub fn new(
        guild_id: GuildId,
        config: Arc<Config>,
        store: Arc<CacheStore>,
        downloads: Arc<DownloadCoordinator>,
        transport: Arc<dyn VoiceTransport>,
        supplier: Option<Arc<dyn AutoplaySupplier>>,
    ) -> Self {
        let max_queue = config.max_queue_size;
        Self {
            guild_id,
            config,
            store,
            downloads,
            transport,
            supplier,
            queue: parking_lot::Mutex::new(GuildQueue::new(max_queue)),
            state: parking_lot::Mutex::new(PlayerState::Idle),
            connection: AsyncMutex::new(None),
            driver: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            autoplay_busy: AtomicBool::new(false),
            errors: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PlayerState {
        *self.state.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.state() == PlayerState::Idle
    }

    pub fn idle_for(&self) -> Duration {
        self.queue.lock().idle_for()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Encola un track y, si el guild estaba ocioso, arranca la reproducción.
    /// Devuelve la posición 1-based asignada en la cola.
    pub async fn enqueue(
        self: &Arc<Self>,
        track: Track,
        channel: ChannelId,
    ) -> Result<usize, MusicError> {
        let position = {
            let mut queue = self.queue.lock();
            queue.set_voice_channel(channel);
            queue.push(track)?
        };

        if self.is_idle() {
            self.advance().await;
        }
        Ok(position)
    }

    /// Procesa un evento del transporte de voz.
    pub async fn handle_event(self: &Arc<Self>, event: PlayerEvent) {
        match event {
            PlayerEvent::Started => {
                // confirma Playing sólo si hay un track vigente; un Started
                // rezagado tras un reset no debe revivir el estado
                if self.queue.lock().current().is_some() {
                    *self.state.lock() = PlayerState::Playing;
                    debug!("▶️ Reproducción iniciada en guild {}", self.guild_id);
                    self.maybe_autoplay();
                }
            }
            PlayerEvent::Finished => {
                self.finish_current();
                self.advance().await;
            }
            PlayerEvent::Errored(reason) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "❌ Error de reproducción en guild {}: {}",
                    self.guild_id, reason
                );
                // mismo camino que un fin normal: descartar y seguir
                self.finish_current();
                self.advance().await;
            }
        }
    }

    /// Cierra el track vigente y libera su pin del caché.
    fn finish_current(&self) {
        let mut queue = self.queue.lock();
        if let Some(track) = queue.current() {
            self.store.unpin(&track.video_id);
        }
        queue.clear_current();
        queue.touch();
    }

    /// Avanza la cola hasta dejar un track sonando o quedar ocioso.
    ///
    /// Los tracks que fallan (descarga, conexión o arranque) se descartan y
    /// se sigue con el próximo; el guild sólo queda ocioso cuando la cola se
    /// agota de verdad.
    pub async fn advance(self: &Arc<Self>) {
        let _driver = self.driver.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);

        loop {
            // un reset a mitad de ciclo invalida todo lo que sigue
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("🔄 Ciclo de avance abandonado en guild {}", self.guild_id);
                return;
            }

            let next = {
                let mut queue = self.queue.lock();
                if queue.current().is_some() {
                    // otro ciclo ya dejó algo sonando
                    return;
                }
                queue.pop_next()
            };

            let track = match next {
                Some(track) => track,
                None => {
                    if self.autoplay_refill().await {
                        continue;
                    }
                    info!("💤 Cola agotada en guild {}, pasando a ocioso", self.guild_id);
                    *self.state.lock() = PlayerState::Idle;
                    return;
                }
            };

            match self.start_track(&track, generation).await {
                Ok(true) => {
                    self.maybe_autoplay();
                    return;
                }
                // reset durante el arranque
                Ok(false) => return,
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    self.store.unpin(&track.video_id);
                    error!(
                        "❌ No se pudo reproducir '{}' en guild {}: {}",
                        track.title, self.guild_id, e
                    );
                    self.queue.lock().clear_current();
                    // seguir con el próximo track
                }
            }
        }
    }

    /// Resuelve el archivo, conecta y arranca el track. Devuelve `Ok(false)`
    /// si un reset invalidó el ciclo a mitad de camino.
    async fn start_track(
        self: &Arc<Self>,
        track: &Track,
        generation: u64,
    ) -> Result<bool, MusicError> {
        *self.state.lock() = PlayerState::Resolving;

        // la descarga corre en su propia tarea: un reset no la aborta y el
        // archivo queda cacheado para la próxima vez
        let file = self.downloads.ensure(track).await?;
        self.store.pin(&track.video_id);

        if self.generation.load(Ordering::SeqCst) != generation {
            self.store.unpin(&track.video_id);
            return Ok(false);
        }

        *self.state.lock() = PlayerState::Connecting;
        let connection = self.get_or_connect().await?;

        if self.generation.load(Ordering::SeqCst) != generation {
            self.store.unpin(&track.video_id);
            return Ok(false);
        }

        connection
            .play(&file)
            .await
            .map_err(|e| MusicError::Playback(e.to_string()))?;

        // un reset pudo llegar con play() en vuelo; deshacemos el arranque
        // antes de pisar el estado Idle que dejó el reset
        if self.generation.load(Ordering::SeqCst) != generation {
            self.store.unpin(&track.video_id);
            let _ = connection.stop().await;
            return Ok(false);
        }

        {
            let mut queue = self.queue.lock();
            queue.set_current_file(file.clone());
            queue.touch();
        }
        *self.state.lock() = PlayerState::Playing;
        info!("🎵 Reproduciendo '{}' en guild {}", track.title, self.guild_id);
        Ok(true)
    }

    /// Reusa la conexión de voz o abre una nueva con timeout.
    async fn get_or_connect(&self) -> Result<Arc<dyn VoiceConnection>, MusicError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let channel = self
            .queue
            .lock()
            .voice_channel()
            .ok_or(MusicError::NoVoiceChannel)?;

        let timeout = self.config.connect_timeout();
        let connection = tokio::time::timeout(timeout, self.transport.connect(self.guild_id, channel))
            .await
            .map_err(|_| MusicError::ConnectionTimeout(timeout))?
            .map_err(|e| MusicError::Playback(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel, self.guild_id);
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Suelta la conexión de voz si existe.
    async fn release_connection(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.disconnect().await {
                warn!("⚠️ Error al desconectar de guild {}: {}", self.guild_id, e);
            }
        }
    }

    /// Pausa si hay algo sonando. Devuelve si hubo cambio.
    pub async fn pause(&self) -> Result<bool, MusicError> {
        if self.state() != PlayerState::Playing {
            return Ok(false);
        }
        let slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            connection
                .pause()
                .await
                .map_err(|e| MusicError::Playback(e.to_string()))?;
        }
        *self.state.lock() = PlayerState::Paused;
        self.queue.lock().touch();
        Ok(true)
    }

    /// Reanuda si estaba en pausa. Devuelve si hubo cambio.
    pub async fn resume(&self) -> Result<bool, MusicError> {
        if self.state() != PlayerState::Paused {
            return Ok(false);
        }
        let slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            connection
                .resume()
                .await
                .map_err(|e| MusicError::Playback(e.to_string()))?;
        }
        *self.state.lock() = PlayerState::Playing;
        self.queue.lock().touch();
        Ok(true)
    }

    /// Corta el track vigente; el evento de fin del transporte dispara el
    /// avance al próximo. Devuelve si había algo que saltar.
    pub async fn skip(&self) -> Result<bool, MusicError> {
        if self.queue.lock().current().is_none() {
            return Ok(false);
        }
        let slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            connection
                .stop()
                .await
                .map_err(|e| MusicError::Playback(e.to_string()))?;
        }
        Ok(true)
    }

    /// Detiene todo: vacía la cola, suelta la conexión y vuelve a ocioso.
    ///
    /// Los ciclos de avance y descargas en vuelo quedan huérfanos: los
    /// primeros se abandonan al ver la nueva generación, las segundas
    /// terminan solas y dejan el archivo en caché.
    pub async fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut queue = self.queue.lock();
            if let Some(track) = queue.current() {
                self.store.unpin(&track.video_id);
            }
            queue.clear();
        }
        *self.state.lock() = PlayerState::Idle;
        self.release_connection().await;
        info!("⏹️ Reproductor de guild {} detenido", self.guild_id);
    }

    /// Quita el track pendiente en la posición 1-based indicada.
    pub fn remove_track(&self, position: usize) -> Result<Track, MusicError> {
        self.queue.lock().remove(position)
    }

    /// Mueve un track pendiente entre posiciones 1-based.
    pub fn move_track(&self, from: usize, to: usize) -> Result<(), MusicError> {
        self.queue.lock().move_track(from, to)
    }

    pub fn shuffle(&self) {
        self.queue.lock().shuffle();
        debug!("🔀 Cola mezclada en guild {}", self.guild_id);
    }

    pub fn set_effect(&self, effect: EffectMode) {
        self.queue.lock().set_effect(effect);
        info!("🎛️ Efecto {} activado en guild {}", effect, self.guild_id);
    }

    pub fn set_autoplay(&self, enabled: bool) {
        self.queue.lock().set_autoplay(enabled);
        info!(
            "♾️ AutoPlay {} en guild {}",
            if enabled { "activado" } else { "desactivado" },
            self.guild_id
        );
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state();
        self.queue.lock().snapshot(
            state == PlayerState::Playing,
            state == PlayerState::Paused,
        )
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.queue.lock().current().cloned()
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.queue.lock().current().and_then(|t| t.file.clone())
    }

    /// Dispara en segundo plano la búsqueda de un candidato de AutoPlay si
    /// quedan pocos pendientes.
    fn maybe_autoplay(self: &Arc<Self>) {
        let (enabled, pending, seed) = {
            let queue = self.queue.lock();
            (
                queue.autoplay(),
                queue.len(),
                queue.current().or(queue.last_played()).cloned(),
            )
        };
        if !enabled || pending > self.config.autoplay_threshold || self.supplier.is_none() {
            return;
        }
        let Some(seed) = seed else { return };

        // un solo chequeo de AutoPlay en vuelo por guild
        if self
            .autoplay_busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let player = self.clone();
        tokio::spawn(async move {
            player.run_autoplay_check(seed).await;
            player.autoplay_busy.store(false, Ordering::SeqCst);
        });
    }

    /// Pide un candidato al proveedor, lo descarga y lo encola si no está
    /// repetido, así el track ya está caliente cuando le toca sonar.
    pub(crate) async fn run_autoplay_check(self: &Arc<Self>, seed: Track) {
        let Some(supplier) = self.supplier.clone() else { return };

        match supplier.recommend(&seed).await {
            Ok(Some(candidate)) => {
                if self.queue.lock().contains(&candidate.video_id) {
                    debug!(
                        "♾️ Candidato de AutoPlay repetido, descartado: {}",
                        candidate.video_id
                    );
                    return;
                }

                // pre-descarga: el candidato entra a la cola ya caliente
                let file = match self.downloads.ensure(&candidate).await {
                    Ok(file) => file,
                    Err(e) => {
                        warn!(
                            "⚠️ AutoPlay no pudo descargar '{}' en guild {}: {}",
                            candidate.title, self.guild_id, e
                        );
                        return;
                    }
                };
                let candidate = candidate.with_file(file);

                let mut queue = self.queue.lock();
                // re-chequeo: alguien pudo encolar el mismo id durante la descarga
                if queue.contains(&candidate.video_id) {
                    debug!(
                        "♾️ Candidato de AutoPlay repetido, descartado: {}",
                        candidate.video_id
                    );
                    return;
                }
                if let Err(e) = queue.push(candidate.clone()) {
                    warn!("⚠️ AutoPlay no pudo encolar en guild {}: {}", self.guild_id, e);
                    return;
                }
                info!(
                    "♾️ AutoPlay encoló '{}' en guild {}",
                    candidate.title, self.guild_id
                );
            }
            Ok(None) => {
                debug!("♾️ AutoPlay sin candidatos para guild {}", self.guild_id);
            }
            Err(e) => {
                warn!("⚠️ Error del proveedor de AutoPlay en guild {}: {}", self.guild_id, e);
            }
        }
    }

    /// Con la cola vacía y AutoPlay activo, intenta rellenar desde la semilla
    /// del último track reproducido. Devuelve si encoló algo.
    async fn autoplay_refill(self: &Arc<Self>) -> bool {
        let (enabled, seed) = {
            let queue = self.queue.lock();
            (queue.autoplay(), queue.last_played().cloned())
        };
        if !enabled || self.supplier.is_none() {
            return false;
        }
        let Some(seed) = seed else { return false };

        self.run_autoplay_check(seed).await;
        !self.queue.lock().is_empty()
    }
}
