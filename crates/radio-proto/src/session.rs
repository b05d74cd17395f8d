//! The station store and the playback controller wired together.
//!
//! Neither half knows about the other: the store never touches the output and
//! the controller never mutates stations.  `Session` forwards each edit to the
//! controller so removing or re-pointing the playing station behaves.

use tracing::debug;

use crate::playback::{AudioEvent, AudioOutput, PlaybackController, PlaybackState};
use crate::station::StationRecord;
use crate::store::{KeyValueStore, StationStore, StoreError};

pub struct Session<S, O> {
    store: StationStore<S>,
    playback: PlaybackController<O>,
}

impl<S: KeyValueStore, O: AudioOutput> Session<S, O> {
    pub fn new(store: StationStore<S>, playback: PlaybackController<O>) -> Self {
        Self { store, playback }
    }

    /// Load stations from `backend` and start idle on `output`.
    pub fn load(backend: S, output: O) -> Self {
        Self::new(StationStore::load(backend), PlaybackController::new(output))
    }

    pub fn stations(&self) -> &[StationRecord] {
        self.store.stations()
    }

    pub fn store(&self) -> &StationStore<S> {
        &self.store
    }

    pub fn playback(&self) -> &PlaybackState {
        self.playback.state()
    }

    pub fn controller(&self) -> &PlaybackController<O> {
        &self.playback
    }

    pub fn add_station(&mut self, record: StationRecord) -> Result<(), StoreError> {
        self.store.add(record)
    }

    pub fn update_station(&mut self, record: StationRecord) -> Option<StationRecord> {
        let previous = self.store.update(record.clone())?;
        self.playback.on_record_updated(&previous, &record);
        Some(previous)
    }

    pub fn remove_station(&mut self, id: &str) -> Option<StationRecord> {
        let removed = self.store.remove(id);
        self.playback.on_record_removed(id);
        removed
    }

    /// Toggle the station with `id`.  Returns false for an unknown id.
    pub fn toggle_play(&mut self, id: &str) -> bool {
        match self.store.get(id) {
            Some(record) => {
                self.playback.toggle_play(record);
                true
            }
            None => {
                debug!("session: toggle for unknown station '{}'", id);
                false
            }
        }
    }

    pub fn stop(&mut self) {
        self.playback.stop();
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.playback.set_volume(volume);
    }

    /// Returns true when the playback state changed.
    pub fn handle_audio_event(&mut self, event: AudioEvent) -> bool {
        self.playback.handle_event(event)
    }
}
