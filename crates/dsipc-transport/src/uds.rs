use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Permission mode of a bound diagnostics socket.
pub const SOCKET_MODE: u32 = 0o600;

/// Longest usable `sockaddr_un.sun_path`, excluding the NUL.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// The listening half of a diagnostics port.
///
/// Reverse ports never bind; they dial out through
/// [`UnixDomainSocket::connect`].
pub struct UnixDomainSocket {
    listener: UnixListener,
    file: SocketFile,
}

impl UnixDomainSocket {
    /// Bind a listening diagnostics port at `path`.
    ///
    /// A socket left behind by a previous process is replaced. Any other
    /// kind of file at `path` is an error and is left alone.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_path_len(path)?;
        let bind_error = |source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        remove_stale_socket(path).map_err(bind_error)?;
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        let file = SocketFile::identify(path).map_err(bind_error)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .map_err(bind_error)?;

        info!(?path, "diagnostics port listening");
        Ok(Self { listener, file })
    }

    /// Accept one pending connection.
    ///
    /// The multiplexer only calls this after poll reported the listener as
    /// readable, so in practice it returns immediately.
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(path = ?self.file.path, "accepted diagnostics connection");
        Ok(IpcStream::from_unix(stream))
    }

    /// Dial a listening socket: a monitor for reverse ports, a runtime for
    /// clients.
    pub fn connect(path: impl AsRef<Path>) -> Result<IpcStream> {
        let path = path.as_ref();
        check_path_len(path)?;
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "connected to diagnostics socket");
        Ok(IpcStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

impl AsRawFd for UnixDomainSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl std::fmt::Debug for UnixDomainSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixDomainSocket")
            .field("path", &self.file.path)
            .finish()
    }
}

/// Filesystem entry created by a bind, identified by device and inode.
///
/// Unlinked on drop only while the path still names that same socket, so a
/// port that was replaced by another process is never removed.
struct SocketFile {
    path: PathBuf,
    dev: u64,
    ino: u64,
}

impl SocketFile {
    fn identify(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    fn is_ours(&self) -> bool {
        std::fs::symlink_metadata(&self.path).is_ok_and(|metadata| {
            metadata.file_type().is_socket()
                && metadata.dev() == self.dev
                && metadata.ino() == self.ino
        })
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if self.is_ours() {
            debug!(path = ?self.path, "unlinking diagnostics socket");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "diagnostics socket replaced, leaving path");
        }
    }
}

fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            debug!(?path, "removing stale diagnostics socket");
            std::fs::remove_file(path)
        }
        Ok(_) => Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "existing path is not a unix socket",
        )),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn check_path_len(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}
