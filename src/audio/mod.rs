//! # Audio Module
//!
//! Per-guild playback: queue, state machine, voice transport seam and the
//! registry that front-ends everything. One `GuildPlayer` per guild, all of
//! them sharing the process-wide cache and download coordinator.

pub mod controller;
pub mod effects;
pub mod player;
pub mod queue;
pub mod transport;

pub use controller::{GuildPlayer, PlayerState};
pub use effects::EffectMode;
pub use player::{PlayerRegistry, RegistryStats};
pub use queue::{GuildQueue, QueueSnapshot};
pub use transport::{PlayerEvent, VoiceConnection, VoiceTransport};
