use rand::seq::SliceRandom;
use serenity::model::id::ChannelId;
use std::collections::VecDeque;
use std::time::Instant;

use crate::audio::effects::EffectMode;
use crate::error::MusicError;
use crate::sources::Track;

/// Cola de reproducción de un guild.
///
/// FIFO estricta: los tracks se consumen en el orden en que se encolaron.
/// El track vigente vive fuera de la cola; `last_played` sobrevive a los
/// avances y sirve de semilla para AutoPlay cuando la cola quedó vacía.
pub struct GuildQueue {
    pending: VecDeque<Track>,
    current: Option<Track>,
    last_played: Option<Track>,
    voice_channel: Option<ChannelId>,
    last_activity: Instant,
    effect: EffectMode,
    autoplay: bool,
    max_size: usize,
}

/// Vista inmutable de la cola para comandos de consulta.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub playing: bool,
    pub paused: bool,
    pub effect: EffectMode,
    pub autoplay: bool,
}

impl GuildQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            last_played: None,
            voice_channel: None,
            last_activity: Instant::now(),
            effect: EffectMode::Normal,
            autoplay: false,
            max_size,
        }
    }

    /// Encola al final y devuelve la posición 1-based asignada.
    pub fn push(&mut self, track: Track) -> Result<usize, MusicError> {
        if self.pending.len() >= self.max_size {
            return Err(MusicError::QueueFull(self.max_size));
        }
        self.pending.push_back(track);
        self.touch();
        Ok(self.pending.len())
    }

    /// Saca el próximo track y lo promueve a vigente.
    pub fn pop_next(&mut self) -> Option<Track> {
        let next = self.pending.pop_front()?;
        self.current = Some(next.clone());
        self.last_played = Some(next.clone());
        self.touch();
        Some(next)
    }

    /// Termina el track vigente sin tocar `last_played`.
    pub fn clear_current(&mut self) {
        self.current = None;
    }

    /// Registra la ruta local resuelta en el track vigente.
    pub fn set_current_file(&mut self, file: std::path::PathBuf) {
        if let Some(current) = self.current.as_mut() {
            current.file = Some(file);
        }
    }

    /// Quita el track en la posición 1-based indicada.
    pub fn remove(&mut self, position: usize) -> Result<Track, MusicError> {
        if position == 0 || position > self.pending.len() {
            return Err(MusicError::InvalidPosition(position));
        }
        self.touch();
        Ok(self.pending.remove(position - 1).unwrap())
    }

    /// Mueve un track entre posiciones 1-based.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), MusicError> {
        if from == 0 || from > self.pending.len() {
            return Err(MusicError::InvalidPosition(from));
        }
        if to == 0 || to > self.pending.len() {
            return Err(MusicError::InvalidPosition(to));
        }
        let track = self.pending.remove(from - 1).unwrap();
        self.pending.insert(to - 1, track);
        self.touch();
        Ok(())
    }

    pub fn shuffle(&mut self) {
        let mut tracks: Vec<Track> = self.pending.drain(..).collect();
        tracks.shuffle(&mut rand::thread_rng());
        self.pending.extend(tracks);
        self.touch();
    }

    /// Vacía pendientes y vigente. `last_played` se conserva.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        self.touch();
    }

    /// Chequea si un id ya está vigente o pendiente, para deduplicar AutoPlay.
    pub fn contains(&self, video_id: &str) -> bool {
        self.current
            .as_ref()
            .map(|t| t.video_id == video_id)
            .unwrap_or(false)
            || self.pending.iter().any(|t| t.video_id == video_id)
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn last_played(&self) -> Option<&Track> {
        self.last_played.as_ref()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn effect(&self) -> EffectMode {
        self.effect
    }

    pub fn set_effect(&mut self, effect: EffectMode) {
        self.effect = effect;
        self.touch();
    }

    pub fn autoplay(&self) -> bool {
        self.autoplay
    }

    pub fn set_autoplay(&mut self, enabled: bool) {
        self.autoplay = enabled;
        self.touch();
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.voice_channel
    }

    pub fn set_voice_channel(&mut self, channel: ChannelId) {
        self.voice_channel = Some(channel);
    }

    /// Marca actividad para la ventana de limpieza por inactividad.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    pub fn snapshot(&self, playing: bool, paused: bool) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.pending.iter().cloned().collect(),
            playing,
            paused,
            effect: self.effect,
            autoplay: self.autoplay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), format!("https://youtu.be/{}", id), UserId::new(1))
    }

    #[test]
    fn test_push_devuelve_posicion_1_based() {
        let mut queue = GuildQueue::new(10);
        assert_eq!(queue.push(track("a")).unwrap(), 1);
        assert_eq!(queue.push(track("b")).unwrap(), 2);
    }

    #[test]
    fn test_orden_fifo() {
        let mut queue = GuildQueue::new(10);
        queue.push(track("a")).unwrap();
        queue.push(track("b")).unwrap();

        assert_eq!(queue.pop_next().unwrap().video_id, "a");
        assert_eq!(queue.current().unwrap().video_id, "a");
        assert_eq!(queue.pop_next().unwrap().video_id, "b");
        assert!(queue.pop_next().is_none());
    }

    #[test]
    fn test_cola_llena() {
        let mut queue = GuildQueue::new(2);
        queue.push(track("a")).unwrap();
        queue.push(track("b")).unwrap();
        assert!(matches!(queue.push(track("c")), Err(MusicError::QueueFull(2))));
    }

    #[test]
    fn test_last_played_sobrevive_al_clear() {
        let mut queue = GuildQueue::new(10);
        queue.push(track("a")).unwrap();
        queue.pop_next();
        queue.clear();

        assert!(queue.current().is_none());
        assert_eq!(queue.last_played().unwrap().video_id, "a");
    }

    #[test]
    fn test_remove_es_1_based() {
        let mut queue = GuildQueue::new(10);
        queue.push(track("a")).unwrap();
        queue.push(track("b")).unwrap();

        assert_eq!(queue.remove(1).unwrap().video_id, "a");
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.remove(0), Err(MusicError::InvalidPosition(0))));
        assert!(matches!(queue.remove(5), Err(MusicError::InvalidPosition(5))));
    }

    #[test]
    fn test_move_track() {
        let mut queue = GuildQueue::new(10);
        queue.push(track("a")).unwrap();
        queue.push(track("b")).unwrap();
        queue.push(track("c")).unwrap();

        queue.move_track(3, 1).unwrap();
        assert_eq!(queue.pop_next().unwrap().video_id, "c");
        assert_eq!(queue.pop_next().unwrap().video_id, "a");
    }

    #[test]
    fn test_contains_mira_vigente_y_pendientes() {
        let mut queue = GuildQueue::new(10);
        queue.push(track("a")).unwrap();
        queue.push(track("b")).unwrap();
        queue.pop_next();

        assert!(queue.contains("a"));
        assert!(queue.contains("b"));
        assert!(!queue.contains("c"));
    }

    #[test]
    fn test_shuffle_conserva_los_tracks() {
        let mut queue = GuildQueue::new(100);
        for i in 0..20 {
            queue.push(track(&format!("t{}", i))).unwrap();
        }
        queue.shuffle();
        assert_eq!(queue.len(), 20);
        assert!(queue.contains("t0"));
        assert!(queue.contains("t19"));
    }
}
