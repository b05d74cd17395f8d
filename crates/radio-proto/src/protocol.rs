use serde::{Deserialize, Serialize};

use crate::playback::{Phase, PlaybackState};
use crate::station::StationRecord;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Append a station.  The client mints the id.
    AddStation { station: StationRecord },
    /// Replace the station with the same id.
    UpdateStation { station: StationRecord },
    RemoveStation { id: String },
    /// Start the station, or stop it when it is the one playing.
    TogglePlay { id: String },
    Stop,
    Volume { value: f32 },
    GetState,
}

/// Messages sent from the daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full state snapshot.
    Hello {
        protocol_version: u32,
        daemon_rev: u64,
        state: DaemonState,
    },
    State {
        data: DaemonState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Playback as shown to users
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // nothing assigned
    Connecting, // play requested, no audio yet
    Playing,    // output confirmed audio
}

impl From<&PlaybackState> for PlaybackStatus {
    fn from(state: &PlaybackState) -> Self {
        match state {
            PlaybackState::Idle => PlaybackStatus::Idle,
            PlaybackState::Playing {
                phase: Phase::Tentative,
                ..
            } => PlaybackStatus::Connecting,
            PlaybackState::Playing {
                phase: Phase::Confirmed,
                ..
            } => PlaybackStatus::Playing,
        }
    }
}

/// Full state of the daemon.  `rev` is a monotonically increasing counter
/// incremented every time the state changes.  Clients can use it to detect
/// missed updates and request a resync.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DaemonState {
    /// Monotonic revision counter, incremented on every state change.
    #[serde(default)]
    pub rev: u64,
    pub stations: Vec<StationRecord>,
    /// Station the UI should highlight, if any.
    pub playing_id: Option<String>,
    pub playback_status: PlaybackStatus,
    pub volume: f32,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    /// 4-byte big-endian length prefix followed by the JSON body.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`, returning the message and
    /// the number of bytes it used.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let Some(total) = Self::frame_len(data) else {
            anyhow::bail!("Insufficient data for message");
        };
        let msg: Self = serde_json::from_slice(&data[4..total])?;
        Ok((msg, total))
    }

    /// Size of the frame at the front of `data`, header included, once all of
    /// it has arrived.  Lets a reader skip a frame it cannot decode.
    pub fn frame_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        let total = 4 + u32::from_be_bytes(header) as usize;
        (data.len() >= total).then_some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::AttemptId;
    use crate::station::default_stations;

    #[test]
    fn test_command_encode_decode() {
        let msg = Message::Command(Command::TogglePlay { id: "nts-2".into() });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::TogglePlay { id }) => assert_eq!(id, "nts-2"),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_hello_carries_stations() {
        let state = DaemonState {
            rev: 42,
            stations: default_stations(),
            playing_id: Some("7".into()),
            playback_status: PlaybackStatus::Connecting,
            volume: 0.8,
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 42,
            state: state.clone(),
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state: got,
                ..
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(got, state);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_decode_partial_frame() {
        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert!(Message::decode(&encoded[..2]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_frame_len_of_undecodable_frame() {
        let mut data = 3u32.to_be_bytes().to_vec();
        data.extend_from_slice(b"{]}");
        assert!(Message::decode(&data).is_err());
        assert_eq!(Message::frame_len(&data), Some(7));
        assert_eq!(Message::frame_len(&data[..6]), None);
        assert_eq!(Message::frame_len(&data[..2]), None);
    }

    #[test]
    fn test_status_from_playback_state() {
        assert_eq!(PlaybackStatus::from(&PlaybackState::Idle), PlaybackStatus::Idle);
        let playing = PlaybackState::Playing {
            id: "7".into(),
            attempt: AttemptId(3),
            phase: Phase::Confirmed,
        };
        assert_eq!(PlaybackStatus::from(&playing), PlaybackStatus::Playing);
    }
}
