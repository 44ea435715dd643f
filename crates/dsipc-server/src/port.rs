use std::path::{Path, PathBuf};

use dsipc_protocol::send_advertise;
use dsipc_transport::{IpcStream, PollSource, Transport, UnixDomainSocket};
use tracing::{debug, info};

use crate::config::{PortConfig, PortKind, SuspendMode};
use crate::error::{Result, ServerError};

/// Connection progress of a diagnostic port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Disconnected,
    Connecting,
    Connected,
}

enum Endpoint {
    /// Passive port. Always pollable once bound.
    Listen(UnixDomainSocket),
    /// Reverse port. Dials the monitor and advertises before each use.
    Connect(PathBuf),
}

/// Multiplexer bookkeeping for one configured port.
pub struct DiagnosticPort {
    endpoint: Endpoint,
    suspend: SuspendMode,
    stream: Option<IpcStream>,
    state: PortState,
    advertised: bool,
}

impl DiagnosticPort {
    /// Bind listen ports; connect ports dial lazily from [`prepare`](Self::prepare).
    pub fn open(config: &PortConfig) -> Result<Self> {
        match config.kind {
            PortKind::Listen => {
                let socket = UnixDomainSocket::bind(&config.path)?;
                info!(path = %config.path.display(), "diagnostics listening");
                Ok(Self::from_listener(socket, config.suspend))
            }
            PortKind::Connect => Ok(Self::reverse(&config.path, config.suspend)),
        }
    }

    pub fn from_listener(socket: UnixDomainSocket, suspend: SuspendMode) -> Self {
        Self {
            endpoint: Endpoint::Listen(socket),
            suspend,
            stream: None,
            state: PortState::Connected,
            advertised: false,
        }
    }

    pub fn reverse(path: impl AsRef<Path>, suspend: SuspendMode) -> Self {
        Self {
            endpoint: Endpoint::Connect(path.as_ref().to_path_buf()),
            suspend,
            stream: None,
            state: PortState::Disconnected,
            advertised: false,
        }
    }

    pub fn kind(&self) -> PortKind {
        match self.endpoint {
            Endpoint::Listen(_) => PortKind::Listen,
            Endpoint::Connect(_) => PortKind::Connect,
        }
    }

    pub fn path(&self) -> &Path {
        match &self.endpoint {
            Endpoint::Listen(socket) => socket.path(),
            Endpoint::Connect(path) => path,
        }
    }

    pub fn suspend(&self) -> SuspendMode {
        self.suspend
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// Whether the current reverse connection has sent its advertise frame.
    pub fn is_advertised(&self) -> bool {
        self.advertised
    }

    /// Make the port pollable. Reverse ports without a stream connect and
    /// advertise; a failure leaves the port disconnected for this cycle.
    pub fn prepare(&mut self) -> Result<()> {
        let path = match &self.endpoint {
            Endpoint::Listen(_) => return Ok(()),
            Endpoint::Connect(path) => path,
        };
        if self.stream.is_some() {
            return Ok(());
        }

        self.state = PortState::Connecting;
        let mut stream = match UnixDomainSocket::connect(path) {
            Ok(stream) => stream,
            Err(err) => {
                self.state = PortState::Disconnected;
                return Err(err.into());
            }
        };
        if let Err(err) = send_advertise(&mut stream) {
            let _ = stream.close();
            self.state = PortState::Disconnected;
            return Err(err.into());
        }
        debug!(path = %path.display(), "reverse diagnostics connection advertised");
        self.stream = Some(stream);
        self.advertised = true;
        self.state = PortState::Connected;
        Ok(())
    }

    /// What to poll for this port, if anything.
    pub fn poll_source(&self) -> Option<PollSource<'_>> {
        match &self.endpoint {
            Endpoint::Listen(socket) => Some(PollSource::Listener(socket)),
            Endpoint::Connect(_) => self.stream.as_ref().map(PollSource::Stream),
        }
    }

    /// Produce the stream poll reported ready. Listen ports accept; reverse
    /// ports hand over their connection and reconnect next cycle.
    pub fn take_ready_stream(&mut self) -> Result<IpcStream> {
        match &self.endpoint {
            Endpoint::Listen(socket) => {
                let stream = socket.accept()?;
                debug!(peer = ?stream.peer_credentials(), "diagnostics client accepted");
                Ok(stream)
            }
            Endpoint::Connect(_) => {
                let stream = self.stream.take().ok_or(ServerError::NoStream)?;
                self.state = PortState::Disconnected;
                self.advertised = false;
                Ok(stream)
            }
        }
    }

    /// Drop any reverse connection. Listen ports stay bound.
    pub fn reset(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close();
            debug!(path = %self.path().display(), "diagnostic port reset");
        }
        if matches!(self.endpoint, Endpoint::Connect(_)) {
            self.state = PortState::Disconnected;
            self.advertised = false;
        }
    }
}

impl std::fmt::Debug for DiagnosticPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticPort")
            .field("kind", &self.kind())
            .field("path", &self.path())
            .field("suspend", &self.suspend)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use dsipc_protocol::read_advertise;

    use super::*;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dsipc-port-{label}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn reverse_port_without_monitor_stays_disconnected() {
        let dir = temp_dir("nomonitor");
        let mut port = DiagnosticPort::reverse(dir.join("missing.sock"), SuspendMode::Suspend);

        assert!(port.prepare().is_err());
        assert_eq!(port.state(), PortState::Disconnected);
        assert!(port.poll_source().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reverse_port_advertises_then_hands_over() {
        let dir = temp_dir("advertise");
        let monitor = UnixDomainSocket::bind(dir.join("monitor.sock")).unwrap();
        let mut port = DiagnosticPort::reverse(monitor.path(), SuspendMode::NoSuspend);

        port.prepare().unwrap();
        assert_eq!(port.state(), PortState::Connected);
        assert!(port.is_advertised());
        assert!(matches!(port.poll_source(), Some(PollSource::Stream(_))));

        let mut accepted = monitor.accept().unwrap();
        let frame = read_advertise(&mut accepted, Some(std::time::Duration::from_secs(1))).unwrap();
        assert_eq!(frame.pid, u64::from(std::process::id()));

        let _stream = port.take_ready_stream().unwrap();
        assert_eq!(port.state(), PortState::Disconnected);
        assert!(!port.is_advertised());
        assert!(port.poll_source().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn listen_port_is_always_pollable_and_reset_is_noop() {
        let dir = temp_dir("listen");
        let config = PortConfig::listen(dir.join("l.sock"), SuspendMode::Suspend);
        let mut port = DiagnosticPort::open(&config).unwrap();

        port.prepare().unwrap();
        port.reset();
        assert_eq!(port.state(), PortState::Connected);
        assert_eq!(port.kind(), PortKind::Listen);
        assert!(matches!(port.poll_source(), Some(PollSource::Listener(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
