/// DaemonCore: single-owner event loop for the session.
///
/// All tasks that want to change stations or playback send a `DaemonEvent`
/// here.  DaemonCore owns the `Session` (station store + playback
/// controller) exclusively; socket and HTTP handlers only ever read the
/// snapshot it publishes into `StateManager`.
///
/// After each event that changes the snapshot, DaemonCore broadcasts
/// `BroadcastMessage::StateUpdated` to all listeners.
///
/// Audio outcomes arrive on the same channel: the output worker reports which
/// attempt it handed to mpv, and raw mpv events are translated into
/// `AudioEvent`s by the `EntryTracker`.
use std::sync::Arc;

use radio_proto::form::fresh_id;
use radio_proto::playback::{AudioEvent, AudioOutput};
use radio_proto::protocol::Command;
use radio_proto::session::Session;
use radio_proto::state::StateManager;
use radio_proto::station::StationRecord;
use radio_proto::store::{KeyValueStore, StoreError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::mpv::MpvEvent;
use crate::output::{EntryTracker, OutputEvent};
use crate::BroadcastMessage;

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Add `station` under an id minted here, answering with the stored
    /// record.  The id `station` arrives with is ignored.
    AddStation {
        station: StationRecord,
        reply: oneshot::Sender<Result<StationRecord, StoreError>>,
    },
    /// Outcome reported by the output worker.
    Output(OutputEvent),
    /// Raw mpv unsolicited event (forwarded from the reader task).
    Mpv(MpvEvent),
    /// Shutdown requested.
    Shutdown,
}

// ── DaemonCore ────────────────────────────────────────────────────────────────

pub struct DaemonCore<S, O> {
    session: Session<S, O>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    tracker: EntryTracker,
}

impl<S: KeyValueStore, O: AudioOutput> DaemonCore<S, O> {
    pub fn new(
        mut session: Session<S, O>,
        volume: f32,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        session.set_volume(volume);
        Self {
            session,
            state_manager: Arc::new(StateManager::new(volume)),
            broadcast_tx,
            tracker: EntryTracker::default(),
        }
    }

    /// Borrow the state manager (for the socket and HTTP servers).
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    /// Run the event loop.  Returns on `Shutdown` or when every sender is
    /// gone; playback is stopped on the way out.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.publish().await;

        loop {
            match event_rx.recv().await {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }

        self.session.stop();
        self.publish().await;
        Ok(())
    }

    pub async fn handle_event(&mut self, evt: DaemonEvent) {
        match evt {
            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            DaemonEvent::AddStation { mut station, reply } => {
                station.id = fresh_id(self.session.stations());
                let result = self.session.add_station(station.clone()).map(|()| station);
                match &result {
                    Ok(s) => info!("DaemonCore: added '{}' as {}", s.name, s.id),
                    Err(e) => warn!("DaemonCore: add rejected: {}", e),
                }
                if reply.send(result).is_err() {
                    debug!("DaemonCore: add requester went away");
                }
            }
            DaemonEvent::Output(out) => self.handle_output_event(out),
            DaemonEvent::Mpv(evt) => {
                debug!("mpv event: {:?}", evt.raw);
                if let Some(audio) = self.tracker.translate(&evt) {
                    self.session.handle_audio_event(audio);
                }
            }
            DaemonEvent::Shutdown => {}
        }
        self.publish().await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::AddStation { station } => {
                let name = station.name.clone();
                match self.session.add_station(station) {
                    Ok(()) => info!("DaemonCore: added '{}'", name),
                    Err(e) => self.report(format!("cannot add '{}': {}", name, e)),
                }
            }
            Command::UpdateStation { station } => {
                let id = station.id.clone();
                if self.session.update_station(station).is_none() {
                    debug!("DaemonCore: update for unknown station '{}'", id);
                }
            }
            Command::RemoveStation { id } => {
                if self.session.remove_station(&id).is_none() {
                    debug!("DaemonCore: remove for unknown station '{}'", id);
                }
            }
            Command::TogglePlay { id } => {
                self.session.toggle_play(&id);
            }
            Command::Stop => self.session.stop(),
            Command::Volume { value } => {
                let value = value.clamp(0.0, 1.0);
                self.session.set_volume(value);
                self.state_manager.set_volume(value).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            Command::GetState => {
                // Nothing changes; resend so the asker gets a State frame.
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
        }
    }

    fn handle_output_event(&mut self, evt: OutputEvent) {
        match evt {
            OutputEvent::PlayIssued { attempt, entry_id } => {
                debug!("DaemonCore: {:?} is mpv entry {:?}", attempt, entry_id);
                if let Some(audio) = self.tracker.record(attempt, entry_id) {
                    self.session.handle_audio_event(audio);
                }
            }
            OutputEvent::PlayRejected { attempt, reason } => {
                self.session.handle_audio_event(AudioEvent::Failed {
                    attempt: Some(attempt),
                    reason,
                });
            }
            OutputEvent::Lost => {
                self.session.handle_audio_event(AudioEvent::Failed {
                    attempt: None,
                    reason: "mpv connection lost".to_string(),
                });
            }
        }
    }

    /// Log a rejected request and tell connected clients about it.
    fn report(&self, message: String) {
        warn!("DaemonCore: {}", message);
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    async fn publish(&self) {
        let changed = self
            .state_manager
            .publish(self.session.stations(), self.session.playback())
            .await;
        if changed {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_proto::playback::AttemptId;
    use radio_proto::protocol::PlaybackStatus;
    use radio_proto::station::StationRecord;
    use radio_proto::store::MemoryStore;
    use serde_json::json;

    #[derive(Default)]
    struct Silent {
        plays: Vec<AttemptId>,
    }

    impl AudioOutput for Silent {
        fn assign_source(&mut self, _url: Option<&str>) {}
        fn load(&mut self) {}
        fn play(&mut self, attempt: AttemptId) {
            self.plays.push(attempt);
        }
        fn pause(&mut self) {}
        fn set_volume(&mut self, _volume: f32) {}
    }

    fn core() -> (
        DaemonCore<MemoryStore, Silent>,
        broadcast::Receiver<BroadcastMessage>,
    ) {
        let (tx, rx) = broadcast::channel(32);
        let session = Session::load(MemoryStore::new(), Silent::default());
        (DaemonCore::new(session, 0.8, tx), rx)
    }

    fn toggle(id: &str) -> DaemonEvent {
        DaemonEvent::ClientCommand(Command::TogglePlay { id: id.into() })
    }

    fn mpv(raw: serde_json::Value) -> DaemonEvent {
        DaemonEvent::Mpv(MpvEvent { raw })
    }

    #[tokio::test]
    async fn test_toggle_goes_connecting_then_playing() {
        let (mut core, mut rx) = core();
        core.handle_event(toggle("10")).await;

        let state = core.state_manager().get_state().await;
        assert_eq!(state.playing_id.as_deref(), Some("10"));
        assert_eq!(state.playback_status, PlaybackStatus::Connecting);
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::StateUpdated)));

        let attempt = core.session.controller().output().plays[0];
        core.handle_event(DaemonEvent::Output(OutputEvent::PlayIssued {
            attempt,
            entry_id: Some(1),
        }))
        .await;
        core.handle_event(mpv(json!({"event": "property-change", "id": 1, "data": false})))
            .await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.playback_status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_end_file_error_resets_to_idle() {
        let (mut core, _rx) = core();
        core.handle_event(toggle("7")).await;
        let attempt = core.session.controller().output().plays[0];
        core.handle_event(DaemonEvent::Output(OutputEvent::PlayIssued {
            attempt,
            entry_id: Some(3),
        }))
        .await;

        core.handle_event(mpv(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 3})))
            .await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.playing_id, None);
        assert_eq!(state.playback_status, PlaybackStatus::Idle);
    }

    #[tokio::test]
    async fn test_stale_rejection_keeps_new_station() {
        let (mut core, _rx) = core();
        core.handle_event(toggle("7")).await;
        let first = core.session.controller().output().plays[0];
        core.handle_event(toggle("9")).await;

        core.handle_event(DaemonEvent::Output(OutputEvent::PlayRejected {
            attempt: first,
            reason: "timeout".into(),
        }))
        .await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.playing_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_duplicate_add_is_reported() {
        let (mut core, mut rx) = core();
        let dup = StationRecord {
            id: "7".into(),
            name: "Copy".into(),
            url: "https://example.com".into(),
            domain: "example.com".into(),
            tracklist_url: None,
            stream_url: None,
        };
        core.handle_event(DaemonEvent::ClientCommand(Command::AddStation { station: dup }))
            .await;

        match rx.try_recv() {
            Ok(BroadcastMessage::Error(msg)) => assert!(msg.contains("already exists")),
            other => panic!("expected error broadcast, got {:?}", other),
        }
        assert_eq!(core.state_manager().get_state().await.stations.len(), 5);
    }

    #[tokio::test]
    async fn test_add_event_mints_unique_ids() {
        let (mut core, _rx) = core();
        let station = StationRecord {
            id: String::new(),
            name: "Kiosk".into(),
            url: "https://kioskradio.com".into(),
            domain: "kioskradio.com".into(),
            tracklist_url: None,
            stream_url: None,
        };

        let mut ids = Vec::new();
        for _ in 0..2 {
            let (reply, answer) = oneshot::channel();
            core.handle_event(DaemonEvent::AddStation {
                station: station.clone(),
                reply,
            })
            .await;
            ids.push(answer.await.unwrap().unwrap().id);
        }
        assert_ne!(ids[0], ids[1]);
        assert_eq!(core.state_manager().get_state().await.stations.len(), 7);
    }

    #[tokio::test]
    async fn test_audio_ahead_of_play_issued_still_confirms() {
        let (mut core, _rx) = core();
        core.handle_event(toggle("10")).await;
        let attempt = core.session.controller().output().plays[0];

        core.handle_event(mpv(json!({"event": "start-file", "playlist_entry_id": 4})))
            .await;
        core.handle_event(mpv(json!({"event": "property-change", "id": 1, "data": false})))
            .await;
        core.handle_event(DaemonEvent::Output(OutputEvent::PlayIssued {
            attempt,
            entry_id: Some(4),
        }))
        .await;
        let state = core.state_manager().get_state().await;
        assert_eq!(state.playback_status, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn test_volume_command_updates_snapshot() {
        let (mut core, _rx) = core();
        core.handle_event(DaemonEvent::ClientCommand(Command::Volume { value: 0.25 }))
            .await;
        assert_eq!(core.state_manager().get_state().await.volume, 0.25);
    }
}
