use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

/// Blocking byte channel with per-call deadlines.
///
/// `None` means wait forever. `Some(d)` bounds the whole call, not each
/// syscall; expiry surfaces as [`TransportError::Timeout`].
pub trait Transport: Read + Write + Send {
    /// Read until `buf` is full or the peer closes.
    ///
    /// Returns the number of bytes read, which is short only on EOF.
    fn read_with_timeout(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize>;

    /// Write all of `buf`. Returns the number of bytes written.
    fn write_with_timeout(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize>;

    /// Flush buffered output.
    fn flush_stream(&mut self) -> Result<()>;

    /// Shut the channel down in both directions.
    fn close(&mut self) -> Result<()>;
}

/// A connected IPC stream: implements Read + Write.
///
/// Returned both by accepting on a listening port and by dialing out on a
/// reverse port; the codec and dispatcher treat the two identically.
/// On Unix, this wraps a Unix domain socket stream.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl IpcStream {
    /// Create an IpcStream from a Unix domain socket stream.
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair of streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Set read timeout on the underlying stream.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Set write timeout on the underlying stream.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Half-close: the peer sees EOF, replies can still be read.
    pub fn shutdown_write(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream
                .shutdown(std::net::Shutdown::Write)
                .map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Get the credentials of the connected peer (Linux only).
    ///
    /// Returns `(uid, gid, pid)` via `SO_PEERCRED`, or `None` if unavailable.
    #[cfg(target_os = "linux")]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        use std::os::fd::AsRawFd;

        let fd = match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        };

        let mut cred = libc::ucred {
            pid: 0,
            uid: 0,
            gid: 0,
        };
        let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

        // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
        // and `fd` is an open Unix socket descriptor owned by this process.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_PEERCRED,
                (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
                &mut len,
            )
        };

        if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
            Some((cred.uid, cred.gid, cred.pid as u32))
        } else {
            None
        }
    }

    /// Get the credentials of the connected peer.
    ///
    /// Returns `None` on platforms that do not expose peer credentials.
    #[cfg(not(target_os = "linux"))]
    pub fn peer_credentials(&self) -> Option<(u32, u32, u32)> {
        None
    }
}

impl Transport for IpcStream {
    fn read_with_timeout(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let deadline = Deadline::new(timeout);
        let mut offset = 0usize;
        while offset < buf.len() {
            self.set_read_timeout(deadline.remaining()?)?;
            match self.read(&mut buf[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout_kind(err.kind()) => {
                    if let Some(limit) = timeout {
                        return Err(TransportError::Timeout(limit));
                    }
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        if timeout.is_some() {
            self.set_read_timeout(None)?;
        }
        Ok(offset)
    }

    fn write_with_timeout(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        let deadline = Deadline::new(timeout);
        let mut offset = 0usize;
        while offset < buf.len() {
            self.set_write_timeout(deadline.remaining()?)?;
            match self.write(&buf[offset..]) {
                Ok(0) => break,
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout_kind(err.kind()) => {
                    if let Some(limit) = timeout {
                        return Err(TransportError::Timeout(limit));
                    }
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        if timeout.is_some() {
            self.set_write_timeout(None)?;
        }
        Ok(offset)
    }

    fn flush_stream(&mut self) -> Result<()> {
        loop {
            match self.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => match stream.shutdown(std::net::Shutdown::Both) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(TransportError::Io(err)),
            },
        }
    }
}

#[cfg(unix)]
impl std::os::fd::AsRawFd for IpcStream {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match &self.inner {
            IpcStreamInner::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => f.debug_struct("IpcStream").field("type", &"unix").finish(),
        }
    }
}

fn is_timeout_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Tracks the time left for a bounded operation.
struct Deadline {
    limit: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Deadline {
    fn new(limit: Option<Duration>) -> Self {
        Self {
            limit,
            expires_at: limit.map(|d| Instant::now() + d),
        }
    }

    /// Socket timeout for the next syscall. Zero is rejected by the OS, so
    /// an expired deadline is reported as an error instead.
    fn remaining(&self) -> Result<Option<Duration>> {
        match (self.limit, self.expires_at) {
            (Some(limit), Some(expires_at)) => {
                let left = expires_at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(TransportError::Timeout(limit))
                } else {
                    Ok(Some(left))
                }
            }
            _ => Ok(None),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn read_with_timeout_fills_buffer_across_writes() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        let writer = std::thread::spawn(move || {
            right.write_all(b"ab").unwrap();
            std::thread::sleep(Duration::from_millis(20));
            right.write_all(b"cd").unwrap();
        });

        let mut buf = [0u8; 4];
        let n = left.read_with_timeout(&mut buf, None).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf, b"abcd");
        writer.join().unwrap();
    }

    #[test]
    fn read_with_timeout_reports_short_read_on_eof() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        right.write_all(b"xy").unwrap();
        drop(right);

        let mut buf = [0u8; 8];
        let n = left.read_with_timeout(&mut buf, None).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn read_with_timeout_expires() {
        let (mut left, _right) = IpcStream::pair().unwrap();
        let mut buf = [0u8; 1];
        let err = left
            .read_with_timeout(&mut buf, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn write_then_close_signals_eof() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        let written = left
            .write_with_timeout(b"hello", Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(written, 5);
        left.close().unwrap();

        let mut buf = [0u8; 16];
        let n = right.read_with_timeout(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
