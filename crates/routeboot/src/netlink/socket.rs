//! Low-level async rtnetlink socket.

use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::{Error, Result};

/// Receive buffer size. Large enough for a full dump batch from the kernel.
const RECV_BUF_SIZE: usize = 32768;

/// Async NETLINK_ROUTE socket.
pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    /// Local port ID (assigned by kernel).
    pid: u32,
}

impl NetlinkSocket {
    /// Open a socket in the caller's network namespace.
    pub fn new() -> Result<Self> {
        Self::create_socket()
    }

    /// Open a socket inside the network namespace at `ns_path`
    /// (e.g. `/var/run/netns/blue` or `/proc/<pid>/ns/net`).
    ///
    /// The calling thread is switched into the namespace just long enough to
    /// create the socket, then switched back. The socket keeps operating in the
    /// target namespace afterwards.
    pub fn new_in_namespace_path<P: AsRef<Path>>(ns_path: P) -> Result<Self> {
        let ns_file = File::open(ns_path.as_ref()).map_err(|e| {
            Error::InvalidMessage(format!(
                "cannot open namespace '{}': {}",
                ns_path.as_ref().display(),
                e
            ))
        })?;
        let current_ns = File::open("/proc/self/ns/net")
            .map_err(|e| Error::InvalidMessage(format!("cannot open current namespace: {}", e)))?;

        // SAFETY: both descriptors are open namespace files owned above.
        let ret = unsafe { libc::setns(ns_file.as_raw_fd(), libc::CLONE_NEWNET) };
        if ret < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let result = Self::create_socket();

        // SAFETY: see above.
        let restore_ret = unsafe { libc::setns(current_ns.as_raw_fd(), libc::CLONE_NEWNET) };
        if restore_ret < 0 {
            tracing::warn!(
                "failed to restore original namespace: {}",
                std::io::Error::last_os_error()
            );
        }

        result
    }

    fn create_socket() -> Result<Self> {
        let mut socket = Socket::new(protocols::NETLINK_ROUTE)?;
        socket.set_non_blocking(true)?;

        let mut addr = SocketAddr::new(0, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        let pid = addr.port_number();

        // Extended ACK gives better error messages; older kernels lack it.
        socket.set_ext_ack(true).ok();

        // SAFETY: the socket owns its descriptor and AsyncFd owns the socket,
        // so the fd stays open and unchanged until the AsyncFd is dropped.
        let fd = unsafe { AsyncFd::register(socket) }.map_err(std::io::Error::from)?;

        Ok(Self {
            fd,
            seq: AtomicU32::new(1),
            pid,
        })
    }

    /// Get the next sequence number.
    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Get the local port ID.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Send a message.
    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one datagram, which may hold several netlink messages.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);

        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(buf.to_vec());
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_registers_with_runtime() {
        let socket = NetlinkSocket::new().unwrap();
        assert_ne!(socket.pid(), 0);
        assert!(socket.as_raw_fd() >= 0);
        let seq = socket.next_seq();
        assert_eq!(socket.next_seq(), seq + 1);
    }
}
