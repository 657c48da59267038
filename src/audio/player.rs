use anyhow::Result;
use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tracing::{debug, info};

use crate::audio::controller::GuildPlayer;
use crate::audio::effects::EffectMode;
use crate::audio::queue::QueueSnapshot;
use crate::audio::transport::{PlayerEvent, VoiceTransport};
use crate::cache::{CacheStore, DownloadCoordinator, DownloadStats};
use crate::config::Config;
use crate::error::MusicError;
use crate::sources::{AutoplaySupplier, Track, TrackFetcher};

/// Registro de reproductores, uno por guild.
///
/// Punto de entrada del núcleo: la capa de comandos habla sólo con esta
/// fachada. Los reproductores se crean a demanda y comparten el caché y el
/// coordinador de descargas del proceso.
pub struct PlayerRegistry {
    config: Arc<Config>,
    store: Arc<CacheStore>,
    downloads: Arc<DownloadCoordinator>,
    transport: Arc<dyn VoiceTransport>,
    supplier: Option<Arc<dyn AutoplaySupplier>>,
    players: DashMap<GuildId, Arc<GuildPlayer>>,
}

/// Números agregados del registro, para el comando de estadísticas.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub guilds: usize,
    pub playback_errors: u64,
    pub cached_tracks: usize,
    pub downloads: DownloadStats,
}

impl PlayerRegistry {
    pub fn new(
        config: Config,
        fetcher: Arc<dyn TrackFetcher>,
        transport: Arc<dyn VoiceTransport>,
        supplier: Option<Arc<dyn AutoplaySupplier>>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(CacheStore::new(
            &config.cache_dir,
            config.cache_capacity,
            config.min_file_bytes,
        )?);

        let adopted = store.scan_existing();
        if adopted > 0 {
            info!("📦 Caché inicial: {} archivos adoptados del disco", adopted);
        }

        let downloads = Arc::new(DownloadCoordinator::new(
            store.clone(),
            fetcher,
            config.download_retries,
            config.retry_delay(),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            downloads,
            transport,
            supplier,
            players: DashMap::new(),
        })
    }

    /// Devuelve el reproductor del guild, creándolo si no existe.
    pub fn player(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("🆕 Creando reproductor para guild {}", guild_id);
                Arc::new(GuildPlayer::new(
                    guild_id,
                    self.config.clone(),
                    self.store.clone(),
                    self.downloads.clone(),
                    self.transport.clone(),
                    self.supplier.clone(),
                ))
            })
            .clone()
    }

    /// Encola un track en el guild. Devuelve la posición 1-based.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        track: Track,
        channel: ChannelId,
    ) -> Result<usize, MusicError> {
        self.player(guild_id).enqueue(track, channel).await
    }

    pub async fn skip(&self, guild_id: GuildId) -> Result<bool, MusicError> {
        self.player(guild_id).skip().await
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<bool, MusicError> {
        self.player(guild_id).pause().await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<bool, MusicError> {
        self.player(guild_id).resume().await
    }

    /// Detiene la reproducción del guild y descarta su reproductor.
    pub async fn stop(&self, guild_id: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild_id) {
            player.reset().await;
        }
    }

    /// Quita el track pendiente en la posición 1-based indicada.
    pub fn remove_track(&self, guild_id: GuildId, position: usize) -> Result<Track, MusicError> {
        self.player(guild_id).remove_track(position)
    }

    /// Mueve un track pendiente entre posiciones 1-based.
    pub fn move_track(
        &self,
        guild_id: GuildId,
        from: usize,
        to: usize,
    ) -> Result<(), MusicError> {
        self.player(guild_id).move_track(from, to)
    }

    pub fn shuffle(&self, guild_id: GuildId) {
        self.player(guild_id).shuffle();
    }

    pub fn set_effect(&self, guild_id: GuildId, effect: EffectMode) {
        self.player(guild_id).set_effect(effect);
    }

    pub fn set_autoplay(&self, guild_id: GuildId, enabled: bool) {
        self.player(guild_id).set_autoplay(enabled);
    }

    pub fn queue_info(&self, guild_id: GuildId) -> Option<QueueSnapshot> {
        self.players.get(&guild_id).map(|p| p.snapshot())
    }

    pub fn now_playing(&self, guild_id: GuildId) -> Option<Track> {
        self.players.get(&guild_id).and_then(|p| p.now_playing())
    }

    /// Entrega un evento del transporte al reproductor del guild.
    pub async fn handle_event(&self, guild_id: GuildId, event: PlayerEvent) {
        if let Some(player) = self.players.get(&guild_id).map(|p| p.value().clone()) {
            player.handle_event(event).await;
        }
    }

    /// El bot fue desconectado del canal por fuera (kick, canal borrado).
    pub async fn notify_disconnect(&self, guild_id: GuildId) {
        info!("🔌 Desconexión externa en guild {}", guild_id);
        self.stop(guild_id).await;
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            guilds: self.players.len(),
            playback_errors: self.players.iter().map(|p| p.error_count()).sum(),
            cached_tracks: self.store.len(),
            downloads: self.downloads.stats(),
        }
    }

    /// Lanza la tarea periódica que barre guilds inactivos.
    pub fn start_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.config.cleanup_interval());
            loop {
                interval.tick().await;
                registry.sweep_inactive().await;
            }
        })
    }

    /// Desarma los reproductores ociosos que superaron la ventana de
    /// inactividad. Devuelve cuántos barrió.
    pub async fn sweep_inactive(&self) -> usize {
        let window = self.config.inactivity_window();
        let stale: Vec<GuildId> = self
            .players
            .iter()
            .filter(|p| p.is_idle() && p.idle_for() >= window)
            .map(|p| *p.key())
            .collect();

        for guild_id in &stale {
            info!("🧹 Barriendo reproductor inactivo de guild {}", guild_id);
            self.stop(*guild_id).await;
        }
        stale.len()
    }
}
