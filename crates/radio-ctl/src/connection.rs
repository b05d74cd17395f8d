use radio_proto::protocol::{Broadcast, Command, DaemonState, Message, PROTOCOL_VERSION};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub struct DaemonConnection<T = TcpStream> {
    stream: T,
    read_buffer: Vec<u8>,
}

impl DaemonConnection {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| anyhow::anyhow!("cannot reach radio-daemon at {}: {}", address, e))?;
        Ok(Self::new(stream))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> DaemonConnection<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    pub async fn send_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let encoded = Message::Command(cmd).encode()?;
        self.stream.write_all(&encoded).await?;
        Ok(())
    }

    /// Next complete broadcast, or `None` once the daemon hangs up.
    pub async fn next_broadcast(&mut self) -> anyhow::Result<Option<Broadcast>> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(total) = Message::frame_len(&self.read_buffer) {
                let decoded = Message::decode(&self.read_buffer);
                self.read_buffer.drain(..total);
                match decoded {
                    Ok((Message::Broadcast(b), _)) => return Ok(Some(b)),
                    Ok((Message::Command(c), _)) => {
                        debug!("ignoring command echoed by daemon: {:?}", c);
                    }
                    // e.g. a broadcast added by a newer daemon
                    Err(e) => warn!("skipping unreadable frame from daemon: {}", e),
                }
                continue;
            }
            match self.stream.read(&mut buf).await? {
                0 => return Ok(None),
                n => self.read_buffer.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Wait for the `Hello` the daemon sends on connect.
    pub async fn handshake(&mut self) -> anyhow::Result<DaemonState> {
        match self.next_broadcast().await? {
            Some(Broadcast::Hello {
                protocol_version,
                state,
                ..
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    warn!(
                        "daemon speaks protocol {}, this client {}",
                        protocol_version, PROTOCOL_VERSION
                    );
                }
                Ok(state)
            }
            Some(other) => anyhow::bail!("expected hello from daemon, got {:?}", other),
            None => anyhow::bail!("daemon closed the connection"),
        }
    }

    /// Wait for a state newer than `after_rev`, failing on an error broadcast.
    pub async fn wait_for_state(&mut self, after_rev: u64) -> anyhow::Result<DaemonState> {
        loop {
            match self.next_broadcast().await? {
                Some(Broadcast::State { data }) if data.rev > after_rev => return Ok(data),
                Some(Broadcast::Error { message }) => anyhow::bail!("daemon: {}", message),
                Some(Broadcast::Log { message }) => debug!("daemon log: {}", message),
                Some(_) => {}
                None => anyhow::bail!("daemon closed the connection"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radio_proto::station::default_stations;

    #[tokio::test]
    async fn test_handshake_then_state() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut conn = DaemonConnection::new(client);

        let hello = DaemonState {
            rev: 4,
            stations: default_stations(),
            ..DaemonState::default()
        };
        let newer = DaemonState {
            rev: 5,
            playing_id: Some("8".into()),
            ..hello.clone()
        };
        let mut frames = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            daemon_rev: 4,
            state: hello,
        })
        .encode()
        .unwrap();
        for b in [
            Broadcast::Log { message: "x".into() },
            Broadcast::State { data: newer },
        ] {
            frames.extend(Message::Broadcast(b).encode().unwrap());
        }
        server.write_all(&frames).await.unwrap();

        let state = conn.handshake().await.unwrap();
        assert_eq!(state.stations.len(), 5);
        let state = conn.wait_for_state(state.rev).await.unwrap();
        assert_eq!(state.playing_id.as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_unknown_frame_is_skipped() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let mut conn = DaemonConnection::new(client);

        let body = br#"{"broadcast":"Lyrics","text":"la"}"#;
        let mut frames = (body.len() as u32).to_be_bytes().to_vec();
        frames.extend_from_slice(body);
        frames.extend(
            Message::Broadcast(Broadcast::Hello {
                protocol_version: PROTOCOL_VERSION,
                daemon_rev: 1,
                state: DaemonState::default(),
            })
            .encode()
            .unwrap(),
        );
        server.write_all(&frames).await.unwrap();

        let state = tokio::time::timeout(std::time::Duration::from_secs(1), conn.handshake())
            .await
            .expect("handshake stalled on an unknown frame")
            .unwrap();
        assert!(state.stations.is_empty());
    }

    #[tokio::test]
    async fn test_error_broadcast_fails_wait() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut conn = DaemonConnection::new(client);
        let frame = Message::Broadcast(Broadcast::Error {
            message: "a station with id '7' already exists".into(),
        })
        .encode()
        .unwrap();
        server.write_all(&frame).await.unwrap();

        let err = conn.wait_for_state(0).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
