//! Startup pause until a monitor sends ResumeRuntime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

/// How long startup waits before printing the pause notice.
pub const PAUSE_NOTICE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Event {
    armed: bool,
    signaled: bool,
}

/// Auto-reset event the startup path blocks on, plus the per-port suspend
/// flags that decide when it is released.
#[derive(Debug)]
pub struct StartupGate {
    event: Mutex<Event>,
    resumed: Condvar,
    suspended: Vec<AtomicBool>,
    paused: AtomicBool,
    notice_delay: Duration,
    notice: String,
    notice_emitted: AtomicBool,
}

impl StartupGate {
    /// One flag per port, `true` for ports in suspend mode.
    pub fn new(suspended: impl IntoIterator<Item = bool>) -> Self {
        Self {
            event: Mutex::new(Event::default()),
            resumed: Condvar::new(),
            suspended: suspended.into_iter().map(AtomicBool::new).collect(),
            paused: AtomicBool::new(false),
            notice_delay: PAUSE_NOTICE_DELAY,
            notice: String::from("runtime paused at startup awaiting ResumeRuntime"),
            notice_emitted: AtomicBool::new(false),
        }
    }

    pub fn with_notice_delay(mut self, delay: Duration) -> Self {
        self.notice_delay = delay;
        self
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = notice.into();
        self
    }

    /// Enable blocking. Without this every wait returns immediately.
    pub fn arm(&self) {
        let mut event = self.lock();
        event.armed = true;
        event.signaled = false;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn any_suspended_ports(&self) -> bool {
        self.suspended.iter().any(|flag| flag.load(Ordering::SeqCst))
    }

    pub fn is_port_suspended(&self, index: usize) -> bool {
        self.suspended
            .get(index)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Clear one port's suspend mode. Out-of-range indexes are ignored.
    pub fn resume_port(&self, index: usize) {
        if let Some(flag) = self.suspended.get(index) {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn resume_all_ports(&self) {
        for flag in &self.suspended {
            flag.store(false, Ordering::SeqCst);
        }
    }

    /// Release a pending or future wait. No-op when unarmed.
    pub fn signal_resume(&self) {
        let mut event = self.lock();
        if !event.armed {
            return;
        }
        event.signaled = true;
        self.resumed.notify_all();
    }

    /// Block startup until resumed. Returns immediately unless the gate is
    /// armed and some port is still suspended.
    pub fn wait_for_resume(&self) {
        if !self.is_armed() || !self.any_suspended_ports() {
            return;
        }

        self.paused.store(true, Ordering::SeqCst);
        info!("startup paused, waiting for ResumeRuntime");

        let event = self.lock();
        let (event, waited) = self
            .resumed
            .wait_timeout_while(event, self.notice_delay, |e| !e.signaled)
            .unwrap_or_else(PoisonError::into_inner);
        let mut event = if waited.timed_out() {
            self.emit_notice();
            self.resumed
                .wait_while(event, |e| !e.signaled)
                .unwrap_or_else(PoisonError::into_inner)
        } else {
            event
        };
        event.signaled = false;
        drop(event);

        self.paused.store(false, Ordering::SeqCst);
        info!("startup resumed");
    }

    /// True while the startup path is blocked in [`wait_for_resume`](Self::wait_for_resume).
    pub fn is_paused_in_startup(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the long-pause notice has been printed.
    pub fn notice_emitted(&self) -> bool {
        self.notice_emitted.load(Ordering::SeqCst)
    }

    fn emit_notice(&self) {
        if self.notice_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        eprintln!("{}", self.notice);
        warn!(notice = %self.notice, "startup still paused");
    }

    fn lock(&self) -> MutexGuard<'_, Event> {
        self.event.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
