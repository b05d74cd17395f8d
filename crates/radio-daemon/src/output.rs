/// mpv-backed `AudioOutput`.
///
/// The playback controller calls `AudioOutput` synchronously from the event
/// loop; `MpvOutput` only queues those calls.  A single worker task drains the
/// queue in order and talks to mpv, so an assign → load → play sequence can
/// never interleave with the next one.
///
/// ```text
///   PlaybackController ──OutputOp──▶ output_worker ──IPC──▶ mpv
///          ▲                               │
///          └── DaemonEvent::Output / Mpv ◀─┘ (play outcome, mpv events)
/// ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use radio_proto::playback::{AttemptId, AudioEvent, AudioOutput};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::DaemonEvent;
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE};

#[derive(Debug)]
enum OutputOp {
    Assign(Option<String>),
    Load,
    Play(AttemptId),
    Pause,
    Volume(f32),
    Shutdown,
}

/// What the worker reports back about the calls it ran.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// mpv accepted the source for `attempt` as playlist entry `entry_id`.
    PlayIssued {
        attempt: AttemptId,
        entry_id: Option<i64>,
    },
    /// The play request for `attempt` failed before any audio.
    PlayRejected { attempt: AttemptId, reason: String },
    /// The mpv connection went away underneath us.
    Lost,
}

#[derive(Clone)]
pub struct MpvOutput {
    tx: mpsc::UnboundedSender<OutputOp>,
}

impl MpvOutput {
    /// Start the worker.  mpv itself is only spawned on the first load.
    pub fn spawn(
        volume: f32,
        core_tx: mpsc::Sender<DaemonEvent>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = OutputWorker {
            driver: MpvDriver::new(volume),
            handle: None,
            connection: Arc::new(AtomicU64::new(0)),
            core_tx,
            source: None,
            loaded: None,
        };
        let join = tokio::spawn(worker.run(rx));
        (Self { tx }, join)
    }

    /// Stop playback and kill mpv; the worker exits afterwards.
    pub fn shutdown(&self) {
        self.push(OutputOp::Shutdown);
    }

    fn push(&self, op: OutputOp) {
        if let Err(e) = self.tx.send(op) {
            debug!("output: worker gone, dropping {:?}", e.0);
        }
    }
}

impl AudioOutput for MpvOutput {
    fn assign_source(&mut self, url: Option<&str>) {
        self.push(OutputOp::Assign(url.map(str::to_string)));
    }

    fn load(&mut self) {
        self.push(OutputOp::Load);
    }

    fn play(&mut self, attempt: AttemptId) {
        self.push(OutputOp::Play(attempt));
    }

    fn pause(&mut self) {
        self.push(OutputOp::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.push(OutputOp::Volume(volume));
    }
}

// ── worker ────────────────────────────────────────────────────────────────────

struct OutputWorker {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    /// Bumped per mpv connection so a dying old connection can't report
    /// itself lost after a fresh one replaced it.
    connection: Arc<AtomicU64>,
    core_tx: mpsc::Sender<DaemonEvent>,
    source: Option<String>,
    /// Outcome of the last load: mpv's entry id, or why it failed.
    loaded: Option<Result<Option<i64>, String>>,
}

impl OutputWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<OutputOp>) {
        while let Some(op) = rx.recv().await {
            debug!("output: {:?}", op);
            match op {
                OutputOp::Assign(Some(url)) => {
                    self.source = Some(url);
                    self.loaded = None;
                }
                OutputOp::Assign(None) => {
                    self.source = None;
                    self.loaded = None;
                    if let Some(h) = self.handle.as_ref() {
                        if let Err(e) = h.stop().await {
                            warn!("output: mpv stop failed: {}", e);
                        }
                    }
                }
                OutputOp::Load => self.load().await,
                OutputOp::Play(attempt) => self.play(attempt).await,
                OutputOp::Pause => {
                    if let Some(h) = self.handle.as_ref() {
                        if let Err(e) = h.set_pause(true).await {
                            warn!("output: mpv pause failed: {}", e);
                        }
                    }
                }
                OutputOp::Volume(v) => {
                    self.driver.last_volume = v;
                    if let Some(h) = self.handle.as_ref() {
                        if let Err(e) = h.set_volume(v).await {
                            warn!("output: set volume failed: {}", e);
                        }
                    }
                }
                OutputOp::Shutdown => break,
            }
        }

        info!("output: shutting down mpv");
        // Retire the connection first so its closing isn't reported as a loss.
        self.connection.fetch_add(1, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.stop().await;
        }
        self.driver.kill().await;
    }

    async fn load(&mut self) {
        let Some(url) = self.source.clone() else {
            self.loaded = Some(Err("no source assigned".to_string()));
            return;
        };
        self.loaded = Some(match self.ensure_handle().await {
            Some(h) => h.load_file(&url).await.map_err(|e| e.to_string()),
            None => Err("mpv unavailable".to_string()),
        });
    }

    async fn play(&mut self, attempt: AttemptId) {
        if self.loaded.is_none() {
            self.load().await;
        }
        let outcome = match self.loaded.clone() {
            Some(Ok(entry_id)) => match self.handle.as_ref() {
                Some(h) => h
                    .set_pause(false)
                    .await
                    .map(|_| entry_id)
                    .map_err(|e| e.to_string()),
                None => Err("mpv unavailable".to_string()),
            },
            Some(Err(reason)) => Err(reason),
            None => Err("nothing loaded".to_string()),
        };

        let event = match outcome {
            Ok(entry_id) => OutputEvent::PlayIssued { attempt, entry_id },
            Err(reason) => {
                warn!("output: play {:?} rejected: {}", attempt, reason);
                OutputEvent::PlayRejected { attempt, reason }
            }
        };
        let _ = self.core_tx.send(DaemonEvent::Output(event)).await;
    }

    async fn ensure_handle(&mut self) -> Option<MpvHandle> {
        if self.handle.is_some() && !self.driver.process_alive() {
            warn!("output: mpv process died, dropping handle");
            self.handle = None;
        }
        if let Some(h) = self.handle.as_ref() {
            return Some(h.clone());
        }

        let generation = self.connection.fetch_add(1, Ordering::SeqCst) + 1;
        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.core_tx.clone();
        let current = Arc::clone(&self.connection);
        tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                if core_tx.send(DaemonEvent::Mpv(evt)).await.is_err() {
                    return;
                }
            }
            if current.load(Ordering::SeqCst) == generation {
                let _ = core_tx.send(DaemonEvent::Output(OutputEvent::Lost)).await;
            }
        });

        match self.driver.spawn_and_connect(event_tx).await {
            Ok(h) => {
                h.observe_core_idle().await;
                self.handle = Some(h.clone());
                Some(h)
            }
            Err(e) => {
                warn!("output: failed to start mpv: {}", e);
                None
            }
        }
    }
}

// ── attempt tracking ──────────────────────────────────────────────────────────

/// Maps mpv playlist entries back to the attempts they were loaded for, and
/// turns raw mpv events into `AudioEvent`s.
///
/// `core-idle=false` only confirms the entry mpv last announced with
/// `start-file`, so a late idle change from an abandoned entry confirms the
/// abandoned attempt (which the controller drops), never the new one.
#[derive(Debug, Default)]
pub struct EntryTracker {
    entries: HashMap<i64, AttemptId>,
    latest: Option<AttemptId>,
    /// Entry of the last `start-file`, when mpv reported one.
    current_entry: Option<i64>,
    /// Last `core-idle` value seen since that `start-file`.
    core_idle: Option<bool>,
}

/// Entries older than this many attempts are forgotten.
const TRACKED_ATTEMPTS: u64 = 16;

impl EntryTracker {
    /// Note that `attempt` went to mpv as `entry_id`.  Returns `Started` when
    /// that entry was already sounding before the note arrived.
    pub fn record(&mut self, attempt: AttemptId, entry_id: Option<i64>) -> Option<AudioEvent> {
        if let Some(entry) = entry_id {
            self.entries.insert(entry, attempt);
        }
        self.latest = Some(attempt);
        let floor = attempt.0.saturating_sub(TRACKED_ATTEMPTS);
        self.entries.retain(|_, a| a.0 > floor);

        let sounding = self.core_idle == Some(false);
        match (entry_id, self.current_entry) {
            (Some(entry), Some(current)) if entry == current && sounding => {
                Some(AudioEvent::Started { attempt })
            }
            _ => None,
        }
    }

    pub fn latest(&self) -> Option<AttemptId> {
        self.latest
    }

    /// Attempt that owns the audio mpv is producing right now, if known.
    fn sounding_attempt(&self) -> Option<AttemptId> {
        match self.current_entry {
            Some(entry) => self.entries.get(&entry).copied(),
            // mpv without entry ids: best guess is the newest attempt.
            None => self.latest,
        }
    }

    pub fn translate(&mut self, evt: &MpvEvent) -> Option<AudioEvent> {
        if let Some((OBS_CORE_IDLE, data)) = evt.as_property_change() {
            let idle = data.as_bool()?;
            self.core_idle = Some(idle);
            if idle {
                return None;
            }
            let attempt = self.sounding_attempt()?;
            return Some(AudioEvent::Started { attempt });
        }

        if evt.event_name() == Some("start-file") {
            if let Some(entry) = evt.playlist_entry_id() {
                self.current_entry = Some(entry);
                self.core_idle = None;
            }
            return None;
        }

        match evt.end_reason()? {
            // "stop" is us replacing or clearing the source; "redirect" is mpv
            // following a playlist.  Neither is a failure.
            "stop" | "redirect" => None,
            reason => {
                let attempt = evt
                    .playlist_entry_id()
                    .and_then(|e| self.entries.get(&e).copied());
                let reason = match evt.file_error() {
                    Some(detail) => format!("{}: {}", reason, detail),
                    None => reason.to_string(),
                };
                Some(AudioEvent::Failed { attempt, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evt(raw: serde_json::Value) -> MpvEvent {
        MpvEvent { raw }
    }

    fn core_idle(idle: bool) -> MpvEvent {
        evt(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": idle}))
    }

    fn start_file(entry: i64) -> MpvEvent {
        evt(json!({"event": "start-file", "playlist_entry_id": entry}))
    }

    #[test]
    fn test_core_idle_confirms_latest_attempt() {
        let mut tracker = EntryTracker::default();
        assert_eq!(tracker.translate(&core_idle(false)), None);

        assert_eq!(tracker.record(AttemptId(3), Some(11)), None);
        assert_eq!(
            tracker.translate(&core_idle(false)),
            Some(AudioEvent::Started { attempt: AttemptId(3) })
        );
        assert_eq!(tracker.translate(&core_idle(true)), None);
    }

    #[test]
    fn test_late_core_idle_confirms_the_abandoned_entry() {
        let mut tracker = EntryTracker::default();
        tracker.record(AttemptId(1), Some(5));
        tracker.translate(&start_file(5));
        assert_eq!(
            tracker.translate(&core_idle(false)),
            Some(AudioEvent::Started { attempt: AttemptId(1) })
        );

        // Switched: attempt 2 is issued but mpv hasn't started entry 6 yet.
        tracker.record(AttemptId(2), Some(6));
        assert_eq!(
            tracker.translate(&core_idle(false)),
            Some(AudioEvent::Started { attempt: AttemptId(1) })
        );

        tracker.translate(&start_file(6));
        assert_eq!(
            tracker.translate(&core_idle(false)),
            Some(AudioEvent::Started { attempt: AttemptId(2) })
        );
    }

    #[test]
    fn test_audio_before_play_issued_confirms_on_record() {
        let mut tracker = EntryTracker::default();
        tracker.translate(&start_file(9));
        assert_eq!(tracker.translate(&core_idle(false)), None);
        assert_eq!(
            tracker.record(AttemptId(4), Some(9)),
            Some(AudioEvent::Started { attempt: AttemptId(4) })
        );
    }

    #[test]
    fn test_end_file_error_is_tagged_by_entry() {
        let mut tracker = EntryTracker::default();
        tracker.record(AttemptId(1), Some(5));
        tracker.record(AttemptId(2), Some(6));

        let stale = evt(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 5}));
        assert_eq!(
            tracker.translate(&stale),
            Some(AudioEvent::Failed {
                attempt: Some(AttemptId(1)),
                reason: "error".into()
            })
        );

        let unknown = evt(json!({"event": "end-file", "reason": "eof", "file_error": "x"}));
        assert_eq!(
            tracker.translate(&unknown),
            Some(AudioEvent::Failed {
                attempt: None,
                reason: "eof: x".into()
            })
        );
    }

    #[test]
    fn test_stop_end_is_not_a_failure() {
        let mut tracker = EntryTracker::default();
        let stop = evt(json!({"event": "end-file", "reason": "stop", "playlist_entry_id": 1}));
        assert_eq!(tracker.translate(&stop), None);
        let other = evt(json!({"event": "file-loaded"}));
        assert_eq!(tracker.translate(&other), None);
    }

    #[test]
    fn test_old_entries_are_forgotten() {
        let mut tracker = EntryTracker::default();
        for n in 1..=40 {
            tracker.record(AttemptId(n), Some(n as i64));
        }
        let ancient = evt(json!({"event": "end-file", "reason": "error", "playlist_entry_id": 2}));
        assert!(matches!(
            tracker.translate(&ancient),
            Some(AudioEvent::Failed { attempt: None, .. })
        ));
        assert_eq!(tracker.latest(), Some(AttemptId(40)));
    }
}
