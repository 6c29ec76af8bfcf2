use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::status::parse_exit_status;
use super::{Channel, Frame, FrameSocket, TransportError, TransportResult};

/// Normal closure code.
const CLOSE_NORMAL: u16 = 1000;

/// Which output streams the session keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub stdout: bool,
    pub stderr: bool,
    /// Append stderr payload to the stdout buffer
    pub combine_output: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
            combine_output: false,
        }
    }
}

/// One exec connection bound to one remote command.
///
/// Driven by a single drain loop calling [`ExecSession::update`]; buffers are
/// read once the loop observes the session closed.
pub struct ExecSession {
    socket: Option<Box<dyn FrameSocket>>,
    open: bool,
    buffers: BTreeMap<Channel, Vec<u8>>,
    streams: StreamOptions,
    returncode: Option<i32>,
}

impl ExecSession {
    pub fn new(socket: Box<dyn FrameSocket>, mut streams: StreamOptions) -> Self {
        if streams.combine_output && !(streams.stdout && streams.stderr) {
            warn!(
                stdout = streams.stdout,
                stderr = streams.stderr,
                "combined output requested with a disabled stream, enabling both"
            );
            streams.stdout = true;
            streams.stderr = true;
        }

        Self {
            socket: Some(socket),
            open: true,
            buffers: BTreeMap::new(),
            streams,
            returncode: None,
        }
    }

    pub fn streams(&self) -> StreamOptions {
        self.streams
    }

    /// Frame `data` for `channel` and send it.
    pub async fn write(&mut self, channel: Channel, data: &[u8]) -> TransportResult<()> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let socket = self.socket.as_mut().ok_or(TransportError::Closed)?;

        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(channel.id());
        payload.extend_from_slice(data);
        socket.send(payload).await
    }

    pub async fn write_stdin(&mut self, data: &[u8]) -> TransportResult<()> {
        self.write(Channel::Stdin, data).await
    }

    /// Wait for at most one frame and buffer its payload.
    ///
    /// `None` waits indefinitely; a zero timeout returns immediately. A close
    /// frame, end of stream or connection failure marks the session closed.
    pub async fn update(&mut self, timeout: Option<Duration>) {
        if !self.open {
            return;
        }
        if timeout.is_some_and(|t| t.is_zero()) {
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            self.open = false;
            return;
        };

        let next = match timeout {
            Some(limit) => match tokio::time::timeout(limit, socket.recv()).await {
                Ok(next) => next,
                Err(_) => return,
            },
            None => socket.recv().await,
        };

        match next {
            Some(Ok(Frame::Data(bytes))) => self.ingest(&bytes),
            Some(Ok(Frame::Close)) => {
                debug!("exec connection closed by peer");
                self.open = false;
            }
            Some(Err(e)) => {
                warn!(error = %e, "exec connection lost");
                self.open = false;
            }
            None => {
                debug!("exec stream ended");
                self.open = false;
            }
        }
    }

    fn ingest(&mut self, frame: &[u8]) {
        let Some((&id, payload)) = frame.split_first() else {
            return;
        };
        let Some(mut channel) = Channel::from_id(id) else {
            trace!(channel = id, "dropping frame for unknown channel");
            return;
        };

        match channel {
            Channel::Stdout if !self.streams.stdout => return,
            Channel::Stderr if !self.streams.stderr => return,
            Channel::Stderr if self.streams.combine_output => channel = Channel::Stdout,
            _ => {}
        }

        self.buffers
            .entry(channel)
            .or_default()
            .extend_from_slice(payload);
    }

    /// Buffered text of `channel` without consuming it.
    pub fn peek(&self, channel: Channel) -> Option<String> {
        self.buffers
            .get(&channel)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Take the buffered text of `channel`.
    pub fn read(&mut self, channel: Channel) -> Option<String> {
        self.read_bytes(channel)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Take the raw buffered bytes of `channel`.
    pub fn read_bytes(&mut self, channel: Channel) -> Option<Vec<u8>> {
        self.buffers.remove(&channel)
    }

    pub fn read_stdout(&mut self) -> Option<String> {
        self.read(Channel::Stdout)
    }

    pub fn read_stderr(&mut self) -> Option<String> {
        self.read(Channel::Stderr)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Remote command's return code.
    ///
    /// `Ok(None)` while the session is open. Once closed, the status on the
    /// error channel is decoded and memoized. A closed session without any
    /// status is a broken connection.
    pub fn returncode(&mut self) -> TransportResult<Option<i32>> {
        if self.open {
            return Ok(None);
        }
        if let Some(code) = self.returncode {
            return Ok(Some(code));
        }

        let raw = self
            .buffers
            .get(&Channel::Error)
            .ok_or(TransportError::BrokenConnection)?;
        let code = parse_exit_status(raw)?;
        self.returncode = Some(code);
        Ok(Some(code))
    }

    /// Close the connection. Safe to call repeatedly; errors are only logged.
    pub async fn close(&mut self, code: u16, reason: &str) {
        self.open = false;
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(code, reason).await {
                debug!(error = %e, "ignoring error while closing exec connection");
            }
        }
    }

    pub async fn close_normal(&mut self) {
        self.close(CLOSE_NORMAL, "").await;
    }

    /// Buffer input until the session closes or `timeout` elapses.
    pub async fn run_forever(&mut self, timeout: Option<Duration>) {
        match timeout {
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while self.open {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    self.update(Some(deadline - now)).await;
                }
            }
            None => {
                while self.open {
                    self.update(None).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("open", &self.open)
            .field("streams", &self.streams)
            .field("buffered_channels", &self.buffers.keys().collect::<Vec<_>>())
            .field("returncode", &self.returncode)
            .finish()
    }
}
