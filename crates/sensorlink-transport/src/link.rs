//! Connection-lifecycle contract shared by every transport.
//!
//! A [`Link`] knows how to discover peers, dial them, or wait for them. It
//! hands back a [`Connection`], which carries no protocol knowledge at all.

use std::fmt;
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::tcp::TcpSocket;
use crate::traits::IpcStream;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

const ACCEPT_POLL: Duration = Duration::from_millis(25);

/// A peer address discovered by [`Link::search`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    #[cfg(unix)]
    Path(PathBuf),
    Addr(SocketAddr),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Target::Path(path) => write!(f, "{}", path.display()),
            Target::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// An established transport connection.
pub struct Connection {
    stream: IpcStream,
    connected: AtomicBool,
    label: String,
}

impl Connection {
    /// Wrap a connected stream.
    pub fn new(stream: IpcStream) -> Self {
        let label = stream.peer_label();
        Self {
            stream,
            connected: AtomicBool::new(true),
            label,
        }
    }

    /// A new handle onto the same stream, used by the reader loop.
    pub fn reader(&self) -> Result<IpcStream> {
        self.stream.try_clone()
    }

    /// A new handle onto the same stream, used for writes.
    pub fn writer(&self) -> Result<IpcStream> {
        self.stream.try_clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Mark the connection lost without touching the socket.
    pub fn mark_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Close the underlying handle. Blocked reads on clones return EOF.
    pub fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.label, "closing connection");
        }
        let _ = self.stream.shutdown();
    }

    /// Remote end description for logs.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.label)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Transport-specific discovery and connection establishment.
///
/// Implementations must make `listen` and `connect` interruptible through
/// `cancel_search`, so a new search can replace a stale one.
pub trait Link: Send + Sync {
    /// Transport name for diagnostics.
    fn name(&self) -> &'static str;

    /// Discover reachable peers.
    fn search(&self) -> Result<Vec<Target>>;

    /// Dial a discovered peer.
    fn connect(&self, target: &Target) -> Result<Connection>;

    /// Wait for a peer to dial in.
    fn listen(&self) -> Result<Connection>;

    /// True while a `search` or `listen` is in progress.
    fn is_searching(&self) -> bool;

    /// Abort any in-progress `search`/`listen`.
    fn cancel_search(&self);
}

struct SearchFlags {
    searching: AtomicBool,
    cancelled: AtomicBool,
}

impl SearchFlags {
    fn new() -> Self {
        Self {
            searching: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    fn begin(&self) -> SearchGuard<'_> {
        self.cancelled.store(false, Ordering::SeqCst);
        self.searching.store(true, Ordering::SeqCst);
        SearchGuard { flags: self }
    }
}

struct SearchGuard<'a> {
    flags: &'a SearchFlags,
}

impl Drop for SearchGuard<'_> {
    fn drop(&mut self) {
        self.flags.searching.store(false, Ordering::SeqCst);
    }
}

/// Unix domain socket link: devices listen on a path, controllers dial it.
#[cfg(unix)]
pub struct UdsLink {
    path: PathBuf,
    socket: Mutex<Option<UnixDomainSocket>>,
    flags: SearchFlags,
}

#[cfg(unix)]
impl UdsLink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            socket: Mutex::new(None),
            flags: SearchFlags::new(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[cfg(unix)]
impl Link for UdsLink {
    fn name(&self) -> &'static str {
        "uds"
    }

    fn search(&self) -> Result<Vec<Target>> {
        let _guard = self.flags.begin();
        if self.path.exists() {
            Ok(vec![Target::Path(self.path.clone())])
        } else {
            Err(TransportError::NoTargets(self.name()))
        }
    }

    fn connect(&self, target: &Target) -> Result<Connection> {
        match target {
            Target::Path(path) => Ok(Connection::new(UnixDomainSocket::connect(path)?)),
            Target::Addr(addr) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "uds link cannot dial a network address",
                ),
            }),
        }
    }

    fn listen(&self) -> Result<Connection> {
        let _guard = self.flags.begin();
        let mut socket = self
            .socket
            .lock()
            .map_err(|_| TransportError::Shutdown)?;
        if socket.is_none() {
            *socket = Some(UnixDomainSocket::bind(&self.path)?);
        }
        let Some(listener) = socket.as_ref() else {
            return Err(TransportError::Shutdown);
        };
        let stream = listener.accept_until(&self.flags.cancelled, ACCEPT_POLL)?;
        let connection = Connection::new(stream);
        info!(peer = connection.label(), "peer connected over uds");
        Ok(connection)
    }

    fn is_searching(&self) -> bool {
        self.flags.searching.load(Ordering::SeqCst)
    }

    fn cancel_search(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }
}

/// TCP link: devices listen on an address, controllers dial a candidate list.
pub struct TcpLink {
    bind_addr: Option<SocketAddr>,
    candidates: Vec<SocketAddr>,
    connect_timeout: Duration,
    socket: Mutex<Option<TcpSocket>>,
    flags: SearchFlags,
}

impl TcpLink {
    /// A link that listens on `addr`.
    pub fn listening(addr: SocketAddr) -> Self {
        Self {
            bind_addr: Some(addr),
            candidates: Vec::new(),
            connect_timeout: Duration::from_secs(2),
            socket: Mutex::new(None),
            flags: SearchFlags::new(),
        }
    }

    /// A link that dials the first reachable address of `candidates`.
    pub fn dialing(candidates: Vec<SocketAddr>) -> Self {
        Self {
            bind_addr: None,
            candidates,
            connect_timeout: Duration::from_secs(2),
            socket: Mutex::new(None),
            flags: SearchFlags::new(),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Address actually bound by `listen`, once it has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .lock()
            .ok()
            .and_then(|socket| socket.as_ref().map(TcpSocket::local_addr))
    }

    /// Bind eagerly so callers can learn the assigned port before listening.
    pub fn bind(&self) -> Result<SocketAddr> {
        let addr = self.bind_addr.ok_or(TransportError::NoTargets("tcp"))?;
        let mut socket = self.socket.lock().map_err(|_| TransportError::Shutdown)?;
        if socket.is_none() {
            *socket = Some(TcpSocket::bind(addr)?);
        }
        socket
            .as_ref()
            .map(TcpSocket::local_addr)
            .ok_or(TransportError::Shutdown)
    }
}

impl Link for TcpLink {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn search(&self) -> Result<Vec<Target>> {
        let _guard = self.flags.begin();
        if self.candidates.is_empty() {
            return Err(TransportError::NoTargets(self.name()));
        }
        Ok(self.candidates.iter().copied().map(Target::Addr).collect())
    }

    fn connect(&self, target: &Target) -> Result<Connection> {
        if self.flags.cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Cancelled);
        }
        match target {
            Target::Addr(addr) => Ok(Connection::new(TcpSocket::connect(
                *addr,
                self.connect_timeout,
            )?)),
            #[cfg(unix)]
            Target::Path(path) => Err(TransportError::Connect {
                addr: path.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "tcp link cannot dial a socket path",
                ),
            }),
        }
    }

    fn listen(&self) -> Result<Connection> {
        self.bind()?;
        let _guard = self.flags.begin();
        let socket = self.socket.lock().map_err(|_| TransportError::Shutdown)?;
        let Some(listener) = socket.as_ref() else {
            return Err(TransportError::Shutdown);
        };
        let stream = listener.accept_until(&self.flags.cancelled, ACCEPT_POLL)?;
        let connection = Connection::new(stream);
        info!(peer = connection.label(), "peer connected over tcp");
        Ok(connection)
    }

    fn is_searching(&self) -> bool {
        self.flags.searching.load(Ordering::SeqCst)
    }

    fn cancel_search(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::sync::Arc;

    use super::*;

    fn sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sl-link-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("link.sock")
    }

    #[test]
    fn uds_listen_and_dial() {
        let path = sock_path("dial");
        let device = Arc::new(UdsLink::new(&path));

        let listener = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || device.listen().unwrap())
        };

        let controller = UdsLink::new(&path);
        let targets = loop {
            match controller.search() {
                Ok(targets) => break targets,
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        };
        let conn = controller.connect(&targets[0]).unwrap();
        let accepted = listener.join().unwrap();

        let mut writer = conn.writer().unwrap();
        writer.write_all(b"abc").unwrap();
        let mut reader = accepted.reader().unwrap();
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");

        conn.close();
        assert!(!conn.is_connected());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn uds_search_without_socket_finds_nothing() {
        let path = sock_path("missing");
        let link = UdsLink::new(path.with_file_name("absent.sock"));
        assert!(matches!(link.search(), Err(TransportError::NoTargets("uds"))));
        assert!(!link.is_searching());
    }

    #[test]
    fn cancel_search_interrupts_listen() {
        let path = sock_path("cancel");
        let link = Arc::new(UdsLink::new(&path));

        let handle = {
            let link = Arc::clone(&link);
            std::thread::spawn(move || link.listen())
        };
        while !link.is_searching() {
            std::thread::sleep(Duration::from_millis(5));
        }
        link.cancel_search();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(!link.is_searching());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn tcp_link_listen_and_dial() {
        let device = Arc::new(TcpLink::listening("127.0.0.1:0".parse().unwrap()));
        let addr = device.bind().unwrap();

        let listener = {
            let device = Arc::clone(&device);
            std::thread::spawn(move || device.listen().unwrap())
        };

        let controller = TcpLink::dialing(vec![addr]);
        let targets = controller.search().unwrap();
        assert_eq!(targets, vec![Target::Addr(addr)]);
        let conn = controller.connect(&targets[0]).unwrap();
        let accepted = listener.join().unwrap();
        assert!(accepted.label().starts_with("tcp:"));
        assert!(conn.is_connected());
    }
}
