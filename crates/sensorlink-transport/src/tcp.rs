use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// TCP transport for peers on the local network.
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen on a TCP address (`"0.0.0.0:7420"`, `"127.0.0.1:0"`, ...).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let listener = TcpListener::bind(&addr).map_err(|source| TransportError::Bind {
            addr: label.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| TransportError::Bind {
            addr: label,
            source,
        })?;
        info!(%local_addr, "listening on tcp socket");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<IpcStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted tcp connection");
        Ok(IpcStream::from_tcp(stream))
    }

    /// Accept an incoming connection, polling `cancelled` every `poll`.
    pub fn accept_until(&self, cancelled: &AtomicBool, poll: Duration) -> Result<IpcStream> {
        self.listener
            .set_nonblocking(true)
            .map_err(TransportError::Accept)?;
        let result = loop {
            if cancelled.load(Ordering::SeqCst) {
                break Err(TransportError::Cancelled);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    debug!(%peer, "accepted tcp connection");
                    break Ok(IpcStream::from_tcp(stream));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => std::thread::sleep(poll),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(TransportError::Accept(err)),
            }
        };
        self.listener
            .set_nonblocking(false)
            .map_err(TransportError::Accept)?;
        result
    }

    /// Dial a TCP address with a connect timeout.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<IpcStream> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|source| {
            TransportError::Connect {
                addr: addr.to_string(),
                source,
            }
        })?;
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to tcp socket");
        Ok(IpcStream::from_tcp(stream))
    }

    /// The bound address (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn bind_accept_connect() {
        let socket = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr();

        let client = std::thread::spawn(move || {
            let mut stream = TcpSocket::connect(addr, Duration::from_secs(1)).unwrap();
            stream.write_all(b"hi").unwrap();
        });

        let mut server = socket.accept().unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        client.join().unwrap();
    }

    #[test]
    fn connect_refused_maps_to_connect_error() {
        let socket = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr();
        drop(socket);

        let result = TcpSocket::connect(addr, Duration::from_millis(200));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
