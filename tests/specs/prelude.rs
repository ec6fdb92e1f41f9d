//! Shared helpers for daemon specs.

use std::path::PathBuf;
use std::time::Duration;

use dw_daemon::codec::{self, Decoder};
use dw_daemon::{Command, Daemon, DaemonConfig, Response};
use tempfile::TempDir;
use tokio::net::UnixStream;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// An in-process daemon bound to a socket in its own temp dir.
pub struct TestDaemon {
    pub dir: TempDir,
    pub daemon: Daemon,
}

impl TestDaemon {
    pub fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(DaemonConfig::at(dir.path().join("daemon.sock"))).unwrap();
        Self { dir, daemon }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.daemon.socket_path().to_path_buf()
    }

    pub fn workdir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub async fn stop(self) {
        self.daemon.shutdown(Duration::from_secs(2)).await;
    }
}

/// A protocol-level client over a live socket connection.
pub struct RawClient {
    stream: UnixStream,
    decoder: Decoder,
}

impl RawClient {
    pub async fn connect(daemon: &TestDaemon) -> Self {
        let stream = UnixStream::connect(daemon.socket_path()).await.unwrap();
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
        }
    }

    /// Send a command and read the single terminal response.
    pub async fn send(&mut self, cmd: &Command) -> Response {
        let mut responses = self.send_all(cmd).await;
        assert_eq!(responses.len(), 1, "expected one response: {responses:?}");
        responses.remove(0)
    }

    /// Send a command and read the full response sequence.
    pub async fn send_all(&mut self, cmd: &Command) -> Vec<Response> {
        codec::write_command(&mut self.stream, cmd, TIMEOUT)
            .await
            .unwrap();
        let mut responses = Vec::new();
        loop {
            let response = codec::read_response(&mut self.stream, &mut self.decoder, TIMEOUT)
                .await
                .unwrap();
            let terminal = response.is_terminal();
            responses.push(response);
            if terminal {
                return responses;
            }
        }
    }

    /// Write raw bytes on the wire (for malformed-input specs).
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn read_response(&mut self) -> Response {
        codec::read_response(&mut self.stream, &mut self.decoder, TIMEOUT)
            .await
            .unwrap()
    }
}

/// Unwrap a JSON response body.
pub fn json_of(resp: Response) -> serde_json::Value {
    match resp {
        Response::Json { body } => body,
        other => panic!("expected JSON response, got {other:?}"),
    }
}
