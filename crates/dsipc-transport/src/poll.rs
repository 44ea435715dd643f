//! Readiness polling across listening sockets and connected streams.

use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;
use crate::uds::UnixDomainSocket;

/// What `poll` observed on one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Nothing happened before the timeout.
    None,
    /// Data (or a pending connection) is ready.
    Signaled,
    /// The peer hung up.
    Hangup,
    /// The descriptor is in an error state.
    Error,
    /// `revents` carried bits we do not interpret.
    Unknown,
}

impl PollEvent {
    /// Map `revents`. Hangup is checked first: a closed socket also reads
    /// as `POLLIN` because `read` would not block.
    pub fn from_revents(revents: libc::c_short) -> Self {
        if revents == 0 {
            PollEvent::None
        } else if revents & libc::POLLHUP != 0 {
            PollEvent::Hangup
        } else if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            PollEvent::Error
        } else if revents & (libc::POLLIN | libc::POLLPRI) != 0 {
            PollEvent::Signaled
        } else {
            PollEvent::Unknown
        }
    }
}

/// The object a poll handle watches. Exactly one kind per handle.
#[derive(Debug, Clone, Copy)]
pub enum PollSource<'a> {
    /// A listening port; signaled means `accept` will not block.
    Listener(&'a UnixDomainSocket),
    /// A connected stream; signaled means a message is arriving.
    Stream(&'a IpcStream),
    /// The shutdown waker.
    Waker(&'a PollWaker),
}

impl PollSource<'_> {
    fn raw_fd(&self) -> RawFd {
        match self {
            PollSource::Listener(listener) => listener.as_raw_fd(),
            PollSource::Stream(stream) => stream.as_raw_fd(),
            PollSource::Waker(waker) => waker.reader.as_raw_fd(),
        }
    }
}

/// One entry of a poll set, valid for a single poll cycle.
#[derive(Debug)]
pub struct PollHandle<'a> {
    pub source: PollSource<'a>,
    /// Caller-chosen tag, typically the index of the owning port.
    pub token: usize,
    /// Filled in by [`poll`].
    pub events: PollEvent,
}

impl<'a> PollHandle<'a> {
    pub fn new(source: PollSource<'a>, token: usize) -> Self {
        Self {
            source,
            token,
            events: PollEvent::None,
        }
    }
}

/// Wait until at least one handle changes state or `timeout` expires.
///
/// `None` waits forever. Returns the number of handles with events; each
/// handle's `events` field is updated in place.
pub fn poll(handles: &mut [PollHandle<'_>], timeout: Option<Duration>) -> Result<usize> {
    let mut fds: Vec<libc::pollfd> = handles
        .iter()
        .map(|handle| libc::pollfd {
            fd: handle.source.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms: libc::c_int = match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    };

    let ready = loop {
        // SAFETY: `fds` is a live, exclusively borrowed buffer of `fds.len()`
        // initialized pollfd records.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(TransportError::Poll(err));
    };

    for (handle, fd) in handles.iter_mut().zip(&fds) {
        handle.events = PollEvent::from_revents(fd.revents);
        if fd.revents != 0 {
            trace!(token = handle.token, revents = fd.revents, "poll revents");
        }
    }

    Ok(ready)
}

/// Interrupts a blocked [`poll`] from another thread.
///
/// Include [`PollSource::Waker`] in the poll set; [`PollWaker::wake`] makes
/// it readable until [`PollWaker::drain`] is called.
pub struct PollWaker {
    reader: UnixStream,
    writer: UnixStream,
}

impl PollWaker {
    pub fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Make the waker readable. A full buffer already means "woken".
    pub fn wake(&self) -> Result<()> {
        match (&self.writer).write(&[1u8]) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(()),
            Err(err) => Err(TransportError::Io(err)),
        }
    }

    /// Consume pending wake-ups.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return,
            }
        }
    }
}

impl std::fmt::Debug for PollWaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollWaker").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn revents_mapping_prefers_hangup() {
        assert_eq!(PollEvent::from_revents(0), PollEvent::None);
        assert_eq!(
            PollEvent::from_revents(libc::POLLIN | libc::POLLHUP),
            PollEvent::Hangup
        );
        assert_eq!(PollEvent::from_revents(libc::POLLERR), PollEvent::Error);
        assert_eq!(PollEvent::from_revents(libc::POLLNVAL), PollEvent::Error);
        assert_eq!(PollEvent::from_revents(libc::POLLIN), PollEvent::Signaled);
        assert_eq!(PollEvent::from_revents(libc::POLLPRI), PollEvent::Signaled);
        assert_eq!(PollEvent::from_revents(libc::POLLOUT), PollEvent::Unknown);
    }

    #[test]
    fn poll_times_out_without_events() {
        let (left, _right) = IpcStream::pair().unwrap();
        let mut handles = vec![PollHandle::new(PollSource::Stream(&left), 7)];

        let start = Instant::now();
        let ready = poll(&mut handles, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(ready, 0);
        assert_eq!(handles[0].events, PollEvent::None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn poll_reports_signaled_stream() {
        let (left, mut right) = IpcStream::pair().unwrap();
        right.write_all(b"x").unwrap();

        let mut handles = vec![PollHandle::new(PollSource::Stream(&left), 3)];
        let ready = poll(&mut handles, None).unwrap();
        assert_eq!(ready, 1);
        assert_eq!(handles[0].events, PollEvent::Signaled);
        assert_eq!(handles[0].token, 3);
    }

    #[test]
    fn poll_reports_hangup_on_closed_peer() {
        let (left, right) = IpcStream::pair().unwrap();
        drop(right);

        let mut handles = vec![PollHandle::new(PollSource::Stream(&left), 0)];
        poll(&mut handles, Some(Duration::from_millis(100))).unwrap();
        assert_eq!(handles[0].events, PollEvent::Hangup);
    }

    #[test]
    fn waker_interrupts_infinite_poll() {
        let waker = std::sync::Arc::new(PollWaker::new().unwrap());
        let remote = std::sync::Arc::clone(&waker);
        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.wake().unwrap();
        });

        let mut handles = vec![PollHandle::new(PollSource::Waker(&waker), usize::MAX)];
        let ready = poll(&mut handles, None).unwrap();
        assert_eq!(ready, 1);
        assert_eq!(handles[0].events, PollEvent::Signaled);
        thread.join().unwrap();

        waker.drain();
        let ready = poll(&mut handles, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(ready, 0);
    }
}
