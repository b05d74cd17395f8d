use crate::playback::PlaybackState;
use crate::protocol::{DaemonState, PlaybackStatus};
use crate::station::StationRecord;
use tokio::sync::RwLock;

/// Read side of the daemon state.
///
/// The event loop is the only writer: after each event it publishes a fresh
/// snapshot of the session here.  Socket and HTTP handlers only read.
pub struct StateManager {
    state: RwLock<DaemonState>,
}

impl StateManager {
    pub fn new(volume: f32) -> Self {
        let state = DaemonState {
            rev: 1,
            volume: volume.clamp(0.0, 1.0),
            ..DaemonState::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn get_state(&self) -> DaemonState {
        self.state.read().await.clone()
    }

    /// Replace the snapshot.  `rev` only moves when something differs, and
    /// the return value says whether it did.
    pub async fn publish(&self, stations: &[StationRecord], playback: &PlaybackState) -> bool {
        let playing_id = playback.playing_id().map(str::to_string);
        let status = PlaybackStatus::from(playback);

        let mut state = self.state.write().await;
        if state.stations == stations
            && state.playing_id == playing_id
            && state.playback_status == status
        {
            return false;
        }
        state.stations = stations.to_vec();
        state.playing_id = playing_id;
        state.playback_status = status;
        state.rev += 1;
        true
    }

    pub async fn set_volume(&self, volume: f32) {
        let mut state = self.state.write().await;
        state.volume = volume.clamp(0.0, 1.0);
        state.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{AttemptId, Phase};
    use crate::station::default_stations;

    #[tokio::test]
    async fn test_publish_bumps_rev_only_on_change() {
        let manager = StateManager::new(0.8);
        let stations = default_stations();

        assert!(manager.publish(&stations, &PlaybackState::Idle).await);
        let rev = manager.get_state().await.rev;
        assert!(!manager.publish(&stations, &PlaybackState::Idle).await);
        assert_eq!(manager.get_state().await.rev, rev);

        let playing = PlaybackState::Playing {
            id: "10".into(),
            attempt: AttemptId(1),
            phase: Phase::Tentative,
        };
        assert!(manager.publish(&stations, &playing).await);
        let state = manager.get_state().await;
        assert_eq!(state.rev, rev + 1);
        assert_eq!(state.playing_id.as_deref(), Some("10"));
        assert_eq!(state.playback_status, PlaybackStatus::Connecting);
    }

    #[tokio::test]
    async fn test_volume_is_clamped() {
        let manager = StateManager::new(3.0);
        assert_eq!(manager.get_state().await.volume, 1.0);
        manager.set_volume(-1.0).await;
        assert_eq!(manager.get_state().await.volume, 0.0);
    }
}
