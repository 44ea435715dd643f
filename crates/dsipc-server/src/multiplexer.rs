//! Connection multiplexer: polls every diagnostic port and yields at most
//! one ready stream per call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dsipc_transport::{poll, IpcStream, PollEvent, PollHandle, PollSource, PollWaker};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, ServerError};
use crate::port::DiagnosticPort;

pub const POLL_TIMEOUT_MIN_MS: u32 = 10;
pub const POLL_TIMEOUT_MAX_MS: u32 = 500;
pub const POLL_TIMEOUT_FALLOFF_FACTOR: f64 = 1.25;

const WAKER_TOKEN: usize = usize::MAX;

/// Next poll timeout after a cycle in which some port failed to connect.
/// `None` is an infinite timeout.
pub fn next_poll_timeout(current: Option<u32>) -> u32 {
    match current {
        None => POLL_TIMEOUT_MIN_MS,
        Some(ms) => {
            let grown = (f64::from(ms) * POLL_TIMEOUT_FALLOFF_FACTOR) as u32;
            grown.clamp(POLL_TIMEOUT_MIN_MS, POLL_TIMEOUT_MAX_MS)
        }
    }
}

/// Poll timeout state across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollBackoff {
    current: Option<u32>,
}

impl PollBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout currently in effect, in milliseconds.
    pub fn current_ms(&self) -> Option<u32> {
        self.current
    }

    /// Advance for a new cycle and return its timeout.
    pub fn on_cycle(&mut self, all_connected: bool) -> Option<u32> {
        self.current = if all_connected {
            None
        } else {
            Some(next_poll_timeout(self.current))
        };
        self.current
    }

    /// After a hangup the next failing cycle starts from the minimum again.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// A ready stream tagged with the index of the port it came from.
#[derive(Debug)]
pub struct ConnectedStream {
    pub port: usize,
    pub stream: IpcStream,
}

/// Owns every diagnostic port and the poll loop over them.
#[derive(Debug)]
pub struct StreamFactory {
    ports: Vec<DiagnosticPort>,
    backoff: PollBackoff,
    waker: Arc<PollWaker>,
    shutdown: Arc<AtomicBool>,
}

impl StreamFactory {
    pub fn new(ports: Vec<DiagnosticPort>, waker: Arc<PollWaker>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            ports,
            backoff: PollBackoff::new(),
            waker,
            shutdown,
        }
    }

    pub fn ports(&self) -> &[DiagnosticPort] {
        &self.ports
    }

    pub fn has_active_ports(&self) -> bool {
        !self.ports.is_empty()
    }

    /// Timeout used by the most recent poll cycle.
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.backoff
            .current_ms()
            .map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Block until a port yields a stream.
    ///
    /// Returns [`ServerError::NoStream`] when a cycle saw an errored handle
    /// and nothing else was ready, and [`ServerError::ShuttingDown`] once the
    /// shutdown flag is set.
    pub fn get_next_available_stream(&mut self) -> Result<ConnectedStream> {
        let mut cycles = 0u32;
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(ServerError::ShuttingDown);
            }

            let mut all_connected = true;
            for (index, port) in self.ports.iter_mut().enumerate() {
                if let Err(err) = port.prepare() {
                    all_connected = false;
                    trace!(port = index, path = %port.path().display(), error = %err, "diagnostic port not connected");
                }
            }
            let timeout = self
                .backoff
                .on_cycle(all_connected)
                .map(|ms| Duration::from_millis(u64::from(ms)));

            let events = {
                let mut handles: Vec<PollHandle<'_>> = self
                    .ports
                    .iter()
                    .enumerate()
                    .filter_map(|(index, port)| {
                        port.poll_source().map(|source| PollHandle::new(source, index))
                    })
                    .collect();
                handles.push(PollHandle::new(PollSource::Waker(&self.waker), WAKER_TOKEN));

                trace!(handles = handles.len(), ?timeout, "polling diagnostic ports");
                let ready = poll(&mut handles, timeout)?;
                cycles += 1;
                if ready == 0 {
                    continue;
                }
                handles
                    .iter()
                    .map(|handle| (handle.token, handle.events))
                    .collect::<Vec<_>>()
            };

            if let Some(connected) = self.take_ready(&events)? {
                debug!(port = connected.port, cycles, "diagnostics stream ready");
                return Ok(connected);
            }
        }
    }

    /// Act on one cycle's poll results.
    ///
    /// Hangups and errors reset only the port that reported them. The first
    /// signaled port in list order yields its stream; later ones wait for
    /// the next call. An error with nothing ready is [`ServerError::NoStream`].
    fn take_ready(&mut self, events: &[(usize, PollEvent)]) -> Result<Option<ConnectedStream>> {
        let mut found = None;
        let mut saw_error = false;
        for &(token, event) in events {
            if token == WAKER_TOKEN {
                if event != PollEvent::None {
                    self.waker.drain();
                }
                continue;
            }
            match event {
                PollEvent::None => {}
                PollEvent::Hangup => {
                    info!(port = token, "diagnostics peer hung up");
                    self.ports[token].reset();
                    self.backoff.reset();
                }
                PollEvent::Error | PollEvent::Unknown => {
                    warn!(port = token, ?event, "diagnostic port poll error");
                    self.ports[token].reset();
                    saw_error = true;
                }
                PollEvent::Signaled if found.is_none() => match self.ports[token].take_ready_stream() {
                    Ok(stream) => found = Some(ConnectedStream { port: token, stream }),
                    Err(err) => {
                        warn!(port = token, error = %err, "failed to take ready stream");
                        saw_error = true;
                    }
                },
                PollEvent::Signaled => {}
            }
        }

        match found {
            Some(connected) => Ok(Some(connected)),
            None if saw_error => Err(ServerError::NoStream),
            None => Ok(None),
        }
    }

    /// Tear down every port. Listening sockets are unlinked.
    pub fn close_ports(&mut self) {
        for port in &mut self.ports {
            port.reset();
        }
        self.ports.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use dsipc_protocol::read_advertise;
    use dsipc_transport::{Transport, UnixDomainSocket};

    use super::*;
    use crate::config::SuspendMode;
    use crate::port::PortState;

    fn temp_dir(label: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dsipc-mux-{label}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn factory(ports: Vec<DiagnosticPort>) -> (StreamFactory, Arc<PollWaker>, Arc<AtomicBool>) {
        let waker = Arc::new(PollWaker::new().unwrap());
        let shutdown = Arc::new(AtomicBool::new(false));
        let factory = StreamFactory::new(ports, Arc::clone(&waker), Arc::clone(&shutdown));
        (factory, waker, shutdown)
    }

    #[test]
    fn falloff_sequence_from_infinite() {
        let mut current = None;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let next = next_poll_timeout(current);
            seen.push(next);
            current = Some(next);
        }
        assert_eq!(seen, vec![10, 12, 15, 18, 22, 27]);
    }

    #[test]
    fn falloff_is_capped() {
        let mut current = None;
        for _ in 0..100 {
            current = Some(next_poll_timeout(current));
            assert!(current.unwrap() <= POLL_TIMEOUT_MAX_MS);
        }
        assert_eq!(current, Some(POLL_TIMEOUT_MAX_MS));
        assert_eq!(next_poll_timeout(Some(450)), POLL_TIMEOUT_MAX_MS);
    }

    #[test]
    fn backoff_resets_on_success_and_hangup() {
        let mut backoff = PollBackoff::new();
        assert_eq!(backoff.on_cycle(false), Some(10));
        assert_eq!(backoff.on_cycle(false), Some(12));
        assert_eq!(backoff.on_cycle(true), None);
        assert_eq!(backoff.on_cycle(false), Some(10));
        assert_eq!(backoff.on_cycle(false), Some(12));
        backoff.reset();
        assert_eq!(backoff.on_cycle(false), Some(10));
    }

    #[test]
    fn drains_one_signaled_port_per_call_in_list_order() {
        let dir = temp_dir("drain");
        let ports: Vec<DiagnosticPort> = (0..3)
            .map(|i| {
                let socket = UnixDomainSocket::bind(dir.join(format!("p{i}.sock"))).unwrap();
                DiagnosticPort::from_listener(socket, SuspendMode::NoSuspend)
            })
            .collect();
        let paths: Vec<PathBuf> = ports.iter().map(|p| p.path().to_path_buf()).collect();
        let (mut factory, _waker, _shutdown) = factory(ports);

        let clients: Vec<IpcStream> = paths
            .iter()
            .rev()
            .map(|path| UnixDomainSocket::connect(path).unwrap())
            .collect();

        let order: Vec<usize> = (0..3)
            .map(|_| factory.get_next_available_stream().unwrap().port)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(factory.poll_timeout(), None);

        drop(clients);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_wakes_blocked_poll() {
        let dir = temp_dir("shutdown");
        let socket = UnixDomainSocket::bind(dir.join("idle.sock")).unwrap();
        let (mut factory, waker, shutdown) =
            factory(vec![DiagnosticPort::from_listener(socket, SuspendMode::NoSuspend)]);

        let worker = thread::spawn(move || factory.get_next_available_stream());
        thread::sleep(Duration::from_millis(50));
        shutdown.store(true, Ordering::SeqCst);
        waker.wake().unwrap();

        let result = worker.join().unwrap();
        assert!(matches!(result, Err(ServerError::ShuttingDown)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn reverse_port_connects_once_monitor_appears() {
        let dir = temp_dir("reverse");
        let monitor_path = dir.join("monitor.sock");
        let (mut factory, _waker, _shutdown) = factory(vec![DiagnosticPort::reverse(
            &monitor_path,
            SuspendMode::Suspend,
        )]);

        let worker = thread::spawn(move || {
            let connected = factory.get_next_available_stream();
            (connected, factory)
        });

        thread::sleep(Duration::from_millis(60));
        let monitor = UnixDomainSocket::bind(&monitor_path).unwrap();
        let mut conn = monitor.accept().unwrap();
        let frame = read_advertise(&mut conn, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(frame.pid, u64::from(std::process::id()));
        conn.write_with_timeout(b"ping", Some(Duration::from_secs(1)))
            .unwrap();

        let (connected, factory) = worker.join().unwrap();
        let mut connected = connected.unwrap();
        assert_eq!(connected.port, 0);
        let mut buf = [0u8; 4];
        connected
            .stream
            .read_with_timeout(&mut buf, Some(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(factory.ports()[0].state(), PortState::Disconnected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// A connected reverse port followed by a listen port with one client
    /// waiting to be accepted.
    fn reverse_then_listen(
        dir: &std::path::Path,
    ) -> (StreamFactory, UnixDomainSocket, IpcStream) {
        let monitor = UnixDomainSocket::bind(dir.join("monitor.sock")).unwrap();
        let listener = UnixDomainSocket::bind(dir.join("diag.sock")).unwrap();
        let client = UnixDomainSocket::connect(listener.path()).unwrap();
        let (mut factory, _waker, _shutdown) = factory(vec![
            DiagnosticPort::reverse(monitor.path(), SuspendMode::NoSuspend),
            DiagnosticPort::from_listener(listener, SuspendMode::NoSuspend),
        ]);
        factory.ports[0].prepare().unwrap();
        assert_eq!(factory.ports[0].state(), PortState::Connected);
        (factory, monitor, client)
    }

    #[test]
    fn errored_port_alone_yields_no_stream_and_resets_only_itself() {
        let dir = temp_dir("error");
        let (mut factory, _monitor, _client) = reverse_then_listen(&dir);

        let result = factory.take_ready(&[(0, PollEvent::Error), (1, PollEvent::None)]);
        assert!(matches!(result, Err(ServerError::NoStream)));
        assert_eq!(factory.ports()[0].state(), PortState::Disconnected);
        assert!(!factory.ports()[0].is_advertised());
        assert_eq!(factory.ports()[1].state(), PortState::Connected);

        let connected = factory.get_next_available_stream().unwrap();
        assert_eq!(connected.port, 1);
        assert_eq!(factory.ports()[0].state(), PortState::Connected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unknown_event_does_not_hide_signaled_port() {
        let dir = temp_dir("unknown");
        let (mut factory, _monitor, _client) = reverse_then_listen(&dir);

        let connected = factory
            .take_ready(&[(0, PollEvent::Unknown), (1, PollEvent::Signaled)])
            .unwrap()
            .expect("listen port should yield its client");
        assert_eq!(connected.port, 1);
        assert_eq!(factory.ports()[0].state(), PortState::Disconnected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn quiet_cycle_yields_nothing() {
        let dir = temp_dir("quiet");
        let (mut factory, _monitor, _client) = reverse_then_listen(&dir);

        let result = factory.take_ready(&[(0, PollEvent::None), (1, PollEvent::None)]);
        assert!(matches!(result, Ok(None)));
        assert_eq!(factory.ports()[0].state(), PortState::Connected);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn hangup_resets_reverse_port_and_reconnects() {
        let dir = temp_dir("hangup");
        let monitor = UnixDomainSocket::bind(dir.join("monitor.sock")).unwrap();
        let (mut factory, _waker, _shutdown) = factory(vec![DiagnosticPort::reverse(
            monitor.path(),
            SuspendMode::NoSuspend,
        )]);

        let worker = thread::spawn(move || factory.get_next_available_stream().map(|c| c.port));

        let mut first = monitor.accept().unwrap();
        read_advertise(&mut first, Some(Duration::from_secs(2))).unwrap();
        first.close().unwrap();
        drop(first);

        let mut second = monitor.accept().unwrap();
        read_advertise(&mut second, Some(Duration::from_secs(2))).unwrap();
        second
            .write_with_timeout(b"x", Some(Duration::from_secs(1)))
            .unwrap();

        assert_eq!(worker.join().unwrap().unwrap(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
