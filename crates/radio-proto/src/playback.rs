//! Single-stream playback control.
//!
//! `PlaybackController` owns the one shared `AudioOutput` and the "which
//! station is playing" state.  Starting a station is optimistic: the state
//! flips to `Playing` (tentative) before the output has produced a sample, and
//! the output reports back through `AudioEvent`s tagged with the `AttemptId`
//! the play was issued for.
//!
//! State machine:
//!
//! ```text
//!   Idle ──toggle(s)──▶ Playing(s, tentative) ──Started──▶ Playing(s, confirmed)
//!    ▲                        │   │                              │
//!    └──── toggle(s) / Failed / removed ◀────────────────────────┘
//!                             └── toggle(t) ──▶ Playing(t, tentative)
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::station::StationRecord;

/// Identifies one start of one source on the output.  Every start or restart
/// gets a fresh id, so callbacks for an abandoned source can be told apart
/// from callbacks for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Play requested, no audio confirmed yet.
    Tentative,
    /// The output reported that audio is flowing.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing {
        id: String,
        attempt: AttemptId,
        phase: Phase,
    },
}

impl PlaybackState {
    pub fn playing_id(&self) -> Option<&str> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Playing { id, .. } => Some(id),
        }
    }

    pub fn attempt(&self) -> Option<AttemptId> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Playing { attempt, .. } => Some(*attempt),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Idle)
    }
}

/// Outcome reported by the audio facility.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// Audio for `attempt` is actually coming out.
    Started { attempt: AttemptId },
    /// The source failed, was rejected or got interrupted.  `None` means the
    /// facility could not say which attempt it belonged to; it is then pinned
    /// on whatever is currently assigned.
    Failed {
        attempt: Option<AttemptId>,
        reason: String,
    },
}

/// The one shared audio-output handle.
///
/// Calls are fire-and-forget and arrive in order.  Outcomes of `play` come
/// back later as `AudioEvent`s carrying the same `AttemptId`.
pub trait AudioOutput {
    /// Point the handle at `url`, or detach it (`None`) to cancel any
    /// in-flight fetch or buffering.
    fn assign_source(&mut self, url: Option<&str>);
    fn load(&mut self);
    fn play(&mut self, attempt: AttemptId);
    fn pause(&mut self);
    fn set_volume(&mut self, volume: f32);
}

pub struct PlaybackController<O> {
    output: O,
    state: PlaybackState,
    last_attempt: u64,
}

impl<O: AudioOutput> PlaybackController<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            state: PlaybackState::Idle,
            last_attempt: 0,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn playing_id(&self) -> Option<&str> {
        self.state.playing_id()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Start `record`, or stop it if it is the one playing.  Stations without
    /// a stream are ignored.
    pub fn toggle_play(&mut self, record: &StationRecord) {
        let Some(source) = record.stream_source() else {
            debug!("playback: '{}' has no stream, ignoring toggle", record.name);
            return;
        };

        if self.state.playing_id() == Some(record.id.as_str()) {
            info!("playback: stopping '{}'", record.name);
            self.stop();
        } else {
            info!("playback: starting '{}'", record.name);
            self.start(&record.id, source);
        }
    }

    /// Halt output and detach the source.  No-op on the state when idle.
    pub fn stop(&mut self) {
        self.halt_output();
        self.state = PlaybackState::Idle;
    }

    /// Returns true when the state changed.
    pub fn handle_event(&mut self, event: AudioEvent) -> bool {
        match event {
            AudioEvent::Started { attempt } => self.handle_started(attempt),
            AudioEvent::Failed { attempt, reason } => {
                self.handle_playback_failure(attempt, &reason)
            }
        }
    }

    /// Confirm the current attempt.  Late success for an abandoned attempt is
    /// dropped so it can't bring back a station the user already left.
    pub fn handle_started(&mut self, attempt: AttemptId) -> bool {
        match &mut self.state {
            PlaybackState::Playing {
                attempt: current,
                phase,
                id,
            } if *current == attempt => {
                if *phase == Phase::Tentative {
                    debug!("playback: '{}' confirmed ({:?})", id, attempt);
                    *phase = Phase::Confirmed;
                    return true;
                }
                false
            }
            _ => {
                debug!("playback: ignoring start for stale {:?}", attempt);
                false
            }
        }
    }

    /// Reset to idle.  Tagged failures only count for the current attempt;
    /// untagged ones always do.
    pub fn handle_playback_failure(&mut self, attempt: Option<AttemptId>, reason: &str) -> bool {
        let current = self.state.attempt();
        if let (Some(failed), Some(current)) = (attempt, current) {
            if failed != current {
                debug!("playback: ignoring failure for stale {:?}: {}", failed, reason);
                return false;
            }
        }
        if attempt.is_some() && current.is_none() {
            debug!("playback: ignoring failure while idle: {}", reason);
            return false;
        }

        match self.state.playing_id() {
            Some(id) => warn!("playback: '{}' failed: {}", id, reason),
            None => warn!("playback: output failed while idle: {}", reason),
        }
        let was_playing = !self.state.is_idle();
        self.stop();
        was_playing
    }

    /// Restart when the playing station's stream changed under it.
    pub fn on_record_updated(&mut self, old: &StationRecord, new: &StationRecord) {
        if self.state.playing_id() != Some(new.id.as_str()) {
            return;
        }
        if old.stream_source() == new.stream_source() {
            return;
        }
        match new.stream_source() {
            Some(source) => {
                info!("playback: stream of '{}' changed, restarting", new.name);
                self.start(&new.id, source);
            }
            None => {
                info!("playback: '{}' lost its stream, stopping", new.name);
                self.stop();
            }
        }
    }

    pub fn on_record_removed(&mut self, id: &str) {
        if self.state.playing_id() == Some(id) {
            info!("playback: playing station '{}' removed, stopping", id);
            self.stop();
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.output.set_volume(volume.clamp(0.0, 1.0));
    }

    fn start(&mut self, id: &str, source: &str) {
        self.last_attempt += 1;
        let attempt = AttemptId(self.last_attempt);

        // State first so readers see the station as active right away.
        self.state = PlaybackState::Playing {
            id: id.to_string(),
            attempt,
            phase: Phase::Tentative,
        };

        // Reassigning the source abandons whatever the previous one was doing.
        self.output.assign_source(Some(source));
        self.output.load();
        self.output.play(attempt);
    }

    fn halt_output(&mut self) {
        self.output.pause();
        self.output.assign_source(None);
    }
}
