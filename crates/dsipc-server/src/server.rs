use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use dsipc_transport::PollWaker;
use tracing::{error, info, warn};

use crate::config::{ConfigSource, DiagnosticsConfig, PortConfig, SuspendMode};
use crate::dispatch::{Dispatcher, InFlight};
use crate::error::{Result, ServerError};
use crate::gate::StartupGate;
use crate::handlers::Handlers;
use crate::multiplexer::StreamFactory;
use crate::port::DiagnosticPort;

/// Diagnostics IPC server hosted inside a process.
///
/// Owns the dispatch thread and the state it shares with the embedder.
/// Dropping the server shuts it down.
pub struct DiagnosticsServer {
    ports: Vec<PortConfig>,
    gate: Arc<StartupGate>,
    shutdown: Arc<AtomicBool>,
    waker: Option<Arc<PollWaker>>,
    in_flight: Arc<InFlight>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DiagnosticsServer {
    /// Read configuration from `source` and start serving.
    pub fn init(source: &dyn ConfigSource, handlers: Handlers) -> Result<Self> {
        Self::init_with_config(DiagnosticsConfig::from_source(source), handlers)
    }

    /// Start serving the given configuration.
    ///
    /// With diagnostics disabled, or no port that could be opened, this
    /// succeeds without starting a thread.
    pub fn init_with_config(config: DiagnosticsConfig, handlers: Handlers) -> Result<Self> {
        let gate_notice = config.pause_notice();
        if !config.enabled {
            info!("diagnostics server disabled");
            return Ok(Self::disabled());
        }

        let mut opened = Vec::new();
        let mut ports = Vec::new();
        for port_config in &config.ports {
            match DiagnosticPort::open(port_config) {
                Ok(port) => {
                    opened.push(port);
                    ports.push(port_config.clone());
                }
                Err(err) => {
                    error!(port = %port_config, error = %err, "failed to open diagnostic port");
                }
            }
        }
        if opened.is_empty() {
            warn!("no diagnostic ports available, diagnostics disabled");
            return Ok(Self::disabled());
        }

        let gate = StartupGate::new(
            ports
                .iter()
                .map(|port| port.suspend == SuspendMode::Suspend),
        )
        .with_notice(gate_notice);
        if gate.any_suspended_ports() {
            gate.arm();
        }
        let gate = Arc::new(gate);

        let shutdown = Arc::new(AtomicBool::new(false));
        let waker = Arc::new(PollWaker::new()?);
        let factory = StreamFactory::new(opened, Arc::clone(&waker), Arc::clone(&shutdown));
        let in_flight = Arc::new(InFlight::new());
        let dispatcher = Dispatcher::new(
            factory,
            handlers,
            Arc::clone(&gate),
            Arc::clone(&shutdown),
            Arc::clone(&in_flight),
        );

        let handle = thread::Builder::new()
            .name("diagnostics-server".to_string())
            .spawn(move || dispatcher.run())
            .map_err(ServerError::ThreadSpawn)?;

        info!(ports = ports.len(), "diagnostics server initialized");
        Ok(Self {
            ports,
            gate,
            shutdown,
            waker: Some(waker),
            in_flight,
            thread: Mutex::new(Some(handle)),
        })
    }

    fn disabled() -> Self {
        Self {
            ports: Vec::new(),
            gate: Arc::new(StartupGate::new([])),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker: None,
            in_flight: Arc::new(InFlight::new()),
            thread: Mutex::new(None),
        }
    }

    /// Ports the server opened, in poll order.
    pub fn ports(&self) -> &[PortConfig] {
        &self.ports
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the dispatch thread and close every port. Idempotent.
    ///
    /// Wakes a blocked poll and closes the stream being served, so a client
    /// that connected and went silent cannot hold the thread.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(waker) = &self.waker {
            if let Err(err) = waker.wake() {
                warn!(error = %err, "failed to wake diagnostics server");
            }
        }
        self.in_flight.interrupt();
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| ServerError::ThreadPanicked)?;
            info!("diagnostics server shut down");
        }
        Ok(())
    }

    /// Block the startup path until a monitor resumes it. Returns
    /// immediately unless some port is configured to suspend.
    pub fn pause_for_diagnostics_monitor(&self) {
        self.gate.wait_for_resume();
    }

    /// Release a startup pause without waiting for a ResumeRuntime command.
    pub fn resume_runtime_startup(&self) {
        self.gate.resume_all_ports();
        self.gate.signal_resume();
    }

    pub fn is_paused_in_startup(&self) -> bool {
        self.gate.is_paused_in_startup()
    }

    /// The startup gate shared with the dispatch thread.
    pub fn gate(&self) -> &Arc<StartupGate> {
        &self.gate
    }
}

impl Drop for DiagnosticsServer {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "diagnostics server shutdown failed");
        }
    }
}

impl std::fmt::Debug for DiagnosticsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsServer")
            .field("ports", &self.ports)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
