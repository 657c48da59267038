use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::path::Path;
use std::sync::Arc;

/// Eventos que el transporte de voz reporta al controlador.
///
/// Un error de reproducción viaja por el mismo camino que un fin normal:
/// ambos terminan el track vigente y disparan el avance de la cola.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// El transporte empezó a emitir audio del track vigente
    Started,
    /// El track terminó de reproducirse completo
    Finished,
    /// La reproducción falló a mitad de camino
    Errored(String),
}

/// Conexión de voz activa de un guild.
///
/// La implementación real envuelve al driver de voz de Discord; los tests
/// usan dobles. Los eventos de fin/error llegan al controlador por fuera de
/// este trait, vía `PlayerRegistry::handle_event`.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Empieza a reproducir el archivo local indicado.
    async fn play(&self, source: &Path) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Corta el track vigente. El transporte debe emitir luego su evento de
    /// fin, igual que si el track hubiera terminado solo.
    async fn stop(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Fábrica de conexiones de voz, una por guild.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>>;
}
