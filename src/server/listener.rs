//! Binding sockets and running the event loops.
//!
//! This module provides [`Server`], the entry point for actually hosting
//! a function. A server binds its listen socket synchronously, then starts
//! one event loop thread per configured worker. Every thread holds its own
//! clone of the listen socket and accepts connections independently, and a
//! connection stays on the thread that accepted it for its entire life.
//!
//! [`Server`]: struct.Server.html

#[cfg(unix)] use std::fs;
#[cfg(unix)] use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
#[cfg(unix)] use std::os::unix::net::UnixListener as StdUnixListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use log::{debug, error, info};
use tokio::runtime;
use crate::config::{Config, ListenTarget};
use crate::error::{ExitError, Failed};
use crate::handler::Handler;
use super::conn;
use super::router::Router;


//------------ Server --------------------------------------------------------

/// A server hosting a single function.
///
/// A server is created from a [`Config`] via [`new`], optionally given a
/// handler via [`with_handler`], and then started via [`run`] which only
/// returns when the process has been told to shut down. If you need to
/// know the actual listen address first, for instance because you bound
/// to port 0, use [`bind`] and [`BoundServer`] instead.
///
/// [`Config`]: ../../config/struct.Config.html
/// [`new`]: #method.new
/// [`with_handler`]: #method.with_handler
/// [`run`]: #method.run
/// [`bind`]: #method.bind
/// [`BoundServer`]: struct.BoundServer.html
pub struct Server {
    /// The configuration to run with.
    config: Config,

    /// The handler serving invocations.
    handler: Option<Arc<dyn Handler>>,
}

impl Server {
    /// Creates a new server from a configuration.
    pub fn new(config: Config) -> Self {
        Server {
            config,
            handler: None,
        }
    }

    /// Sets the handler serving invocations.
    ///
    /// Without a handler, every accepted invocation receives the default
    /// response.
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Binds the listen socket.
    ///
    /// Errors are logged and the process should exit.
    pub fn bind(self) -> Result<BoundServer, ExitError> {
        let socket = match self.config.listen {
            ListenTarget::Addr(addr) => bind_tcp(addr)?,
            ListenTarget::Unix(ref path) => bind_unix(path)?,
        };
        info!("Listening on {}.", self.config.listen);
        Ok(BoundServer {
            socket,
            router: Arc::new(Router::new(self.handler)),
            workers: self.config.worker_threads,
        })
    }

    /// Binds the socket, starts serving, and waits for shutdown.
    pub fn run(self) -> Result<(), ExitError> {
        self.bind()?.run()
    }
}


//------------ BoundServer ---------------------------------------------------

/// A server that has bound its listen socket but isn’t serving yet.
pub struct BoundServer {
    /// The bound listen socket.
    socket: ListenSocket,

    /// The router answering requests.
    router: Arc<Router>,

    /// The number of event loop threads to start.
    workers: usize,
}

impl BoundServer {
    /// Returns the local address of the listen socket.
    ///
    /// Returns `None` for Unix domain sockets.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket {
            ListenSocket::Tcp(ref listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenSocket::Unix(_) => None,
        }
    }

    /// Starts the event loop threads.
    ///
    /// The threads are detached. They run until the process exits.
    pub fn start(&self) -> Result<(), Failed> {
        for i in 0..self.workers {
            let socket = self.socket.try_clone()?;
            let router = self.router.clone();
            let res = thread::Builder::new()
                .name(format!("worker-{}", i))
                .spawn(move || worker(socket, router));
            if let Err(err) = res {
                error!("Fatal: failed to start worker thread: {}", err);
                return Err(Failed)
            }
        }
        Ok(())
    }

    /// Serves until the process is told to shut down.
    pub fn run(self) -> Result<(), ExitError> {
        self.start()?;
        wait_for_signals()?;
        self.cleanup();
        Ok(())
    }

    /// Removes the socket file of a Unix domain listener.
    fn cleanup(&self) {
        #[cfg(unix)]
        {
            if let ListenSocket::Unix(ref listener) = self.socket {
                if let Ok(addr) = listener.local_addr() {
                    if let Some(path) = addr.as_pathname() {
                        if let Err(err) = fs::remove_file(path) {
                            debug!(
                                "Failed to remove socket file {}: {}",
                                path.display(), err
                            );
                        }
                    }
                }
            }
        }
    }
}


//------------ ListenSocket --------------------------------------------------

/// The listen socket of a server.
///
/// The socket is kept in its blocking std form so it can be cloned into
/// each worker thread and only converted into a Tokio listener on the
/// thread’s own runtime.
enum ListenSocket {
    Tcp(StdTcpListener),
    #[cfg(unix)]
    Unix(StdUnixListener),
}

impl ListenSocket {
    /// Clones the socket for another worker thread.
    fn try_clone(&self) -> Result<Self, Failed> {
        match *self {
            ListenSocket::Tcp(ref listener) => {
                match listener.try_clone() {
                    Ok(listener) => Ok(ListenSocket::Tcp(listener)),
                    Err(err) => {
                        error!(
                            "Fatal: failed to clone listen socket: {}", err
                        );
                        Err(Failed)
                    }
                }
            }
            #[cfg(unix)]
            ListenSocket::Unix(ref listener) => {
                match listener.try_clone() {
                    Ok(listener) => Ok(ListenSocket::Unix(listener)),
                    Err(err) => {
                        error!(
                            "Fatal: failed to clone listen socket: {}", err
                        );
                        Err(Failed)
                    }
                }
            }
        }
    }
}

/// Binds a TCP listen socket.
fn bind_tcp(addr: SocketAddr) -> Result<ListenSocket, ExitError> {
    let listener = match StdTcpListener::bind(addr) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Fatal: error listening on {}: {}", addr, err);
            return Err(ExitError::Generic)
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        error!(
            "Fatal: error switching listen socket to nonblocking: {}", err
        );
        return Err(ExitError::Generic)
    }
    Ok(ListenSocket::Tcp(listener))
}

/// Binds a Unix domain listen socket.
#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<ListenSocket, ExitError> {
    use std::os::unix::fs::FileTypeExt;

    // A socket file left behind by an earlier run blocks the bind. Remove
    // it, but refuse to remove anything other than a socket.
    match fs::metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                error!(
                    "Fatal: listen path {} exists but is not a socket.",
                    path.display()
                );
                return Err(ExitError::Generic)
            }
            if let Err(err) = fs::remove_file(path) {
                error!(
                    "Fatal: cannot remove stale socket file {}: {}",
                    path.display(), err
                );
                return Err(ExitError::Generic)
            }
        }
        Err(ref err) if err.kind() == io::ErrorKind::NotFound => { }
        Err(err) => {
            error!(
                "Fatal: cannot check listen path {}: {}",
                path.display(), err
            );
            return Err(ExitError::Generic)
        }
    }
    let listener = match StdUnixListener::bind(path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(
                "Fatal: error listening on unix:{}: {}", path.display(), err
            );
            return Err(ExitError::Generic)
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        error!(
            "Fatal: error switching listen socket to nonblocking: {}", err
        );
        return Err(ExitError::Generic)
    }
    Ok(ListenSocket::Unix(listener))
}

#[cfg(not(unix))]
fn bind_unix(_path: &Path) -> Result<ListenSocket, ExitError> {
    error!("Fatal: Unix domain sockets are not supported on this platform.");
    Err(ExitError::Generic)
}


//------------ Event Loops and Signals ---------------------------------------

/// Runs a single event loop thread.
fn worker(socket: ListenSocket, router: Arc<Router>) {
    let runtime = match runtime::Builder::new_current_thread()
        .enable_io().build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to build event loop: {}", err);
            return
        }
    };
    runtime.block_on(async {
        match socket {
            ListenSocket::Tcp(listener) => {
                let listener = match tokio::net::TcpListener::from_std(
                    listener
                ) {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!("Failed to register listen socket: {}", err);
                        return
                    }
                };
                loop {
                    match listener.accept().await {
                        Ok((sock, _addr)) => {
                            tokio::spawn(conn::serve(sock, router.clone()));
                        }
                        Err(err) => {
                            debug!("Failed to accept connection: {}", err);
                        }
                    }
                }
            }
            #[cfg(unix)]
            ListenSocket::Unix(listener) => {
                let listener = match tokio::net::UnixListener::from_std(
                    listener
                ) {
                    Ok(listener) => listener,
                    Err(err) => {
                        error!("Failed to register listen socket: {}", err);
                        return
                    }
                };
                loop {
                    match listener.accept().await {
                        Ok((sock, _addr)) => {
                            tokio::spawn(conn::serve(sock, router.clone()));
                        }
                        Err(err) => {
                            debug!("Failed to accept connection: {}", err);
                        }
                    }
                }
            }
        }
    })
}

/// Blocks until the process is told to shut down.
fn wait_for_signals() -> Result<(), Failed> {
    let runtime = match runtime::Builder::new_current_thread()
        .enable_all().build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Fatal: failed to build signal runtime: {}", err);
            return Err(Failed)
        }
    };
    runtime.block_on(signal_wait())
}

/// Waits for SIGINT or SIGTERM.
#[cfg(unix)]
async fn signal_wait() -> Result<(), Failed> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            error!("Fatal: cannot listen for signals: {}", err);
            return Err(Failed)
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received. Shutting down.");
        }
        _ = term.recv() => {
            info!("SIGTERM received. Shutting down.");
        }
    }
    Ok(())
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
async fn signal_wait() -> Result<(), Failed> {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Fatal: cannot listen for signals: {}", err);
        return Err(Failed)
    }
    info!("Shutting down.");
    Ok(())
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use crate::context::Context;
    use crate::message::Body;
    use super::*;

    fn echo_server(listen: ListenTarget) -> BoundServer {
        let config = Config {
            listen,
            worker_threads: 2,
            .. Config::default()
        };
        Server::new(config)
            .with_handler(|_: &Context, body: Option<Body>| body)
            .bind().unwrap()
    }

    const REQUEST: &[u8] =
        b"POST /call HTTP/1.1\r\n\
          Fn-Call-Id: 01ABC\r\n\
          Fn-Deadline: 2026-01-01T00:00:00Z\r\n\
          Fn-Http-Method: POST\r\n\
          Fn-Http-Request-Url: http://localhost:8080/t/app/hello\r\n\
          Content-Length: 4\r\n\
          Connection: close\r\n\r\n\
          ping";

    fn roundtrip<Sock: Read + Write>(mut sock: Sock) {
        sock.write_all(REQUEST).unwrap();
        let mut response = Vec::new();
        sock.read_to_end(&mut response).unwrap();
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("\r\nconnection: close\r\n"));
        assert!(response.ends_with("\r\n\r\nping"));
    }

    #[test]
    fn tcp_end_to_end() {
        let server = echo_server(
            ListenTarget::Addr("127.0.0.1:0".parse().unwrap())
        );
        let addr = server.local_addr().unwrap();
        server.start().unwrap();
        roundtrip(TcpStream::connect(addr).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn unix_end_to_end() {
        use std::os::unix::net::UnixStream;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fnhost.sock");
        let server = echo_server(ListenTarget::Unix(path.clone()));
        assert!(server.local_addr().is_none());
        server.start().unwrap();
        roundtrip(UnixStream::connect(&path).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn stale_socket_cleanup() {
        use std::os::unix::net::UnixListener;

        let dir = tempfile::tempdir().unwrap();

        // A socket file from an earlier run gets removed and the bind
        // succeeds.
        let sock_path = dir.path().join("fnhost.sock");
        drop(UnixListener::bind(&sock_path).unwrap());
        assert!(sock_path.exists());
        let config = Config {
            listen: ListenTarget::Unix(sock_path.clone()),
            .. Config::default()
        };
        assert!(Server::new(config).bind().is_ok());

        // Anything else at the path is left alone and the bind fails.
        let file_path = dir.path().join("fnhost.conf");
        fs::write(&file_path, b"not a socket").unwrap();
        let config = Config {
            listen: ListenTarget::Unix(file_path.clone()),
            .. Config::default()
        };
        assert!(Server::new(config).bind().is_err());
        assert_eq!(fs::read(&file_path).unwrap(), b"not a socket");
    }
}
