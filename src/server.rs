//! HTTP server and graceful shutdown.
//!
//! # Shutdown
//!
//! A shutdown is requested through a [`ShutdownHandle`] or, unless disabled
//! with [`Server::handle_signals`], by **SIGTERM** or **Ctrl-C**.
//!
//! A graceful shutdown:
//! 1. stops accepting new connections;
//! 2. asks every open connection to finish its in-flight request and close;
//! 3. waits up to the shutdown timeout, then closes whatever is left.
//!
//! [`ShutdownHandle::close`] skips the waiting and closes every connection
//! at once, also while a graceful shutdown is already draining.
//!
//! When running under Kubernetes, keep `terminationGracePeriodSeconds` above
//! the shutdown timeout so the drain is not cut short by SIGKILL.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::router::Router;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stop {
    /// Drain within the given limit, or the configured shutdown timeout.
    Graceful(Option<Duration>),
    Close,
}

enum Bind {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    config: ServerConfig,
    signals: bool,
    stop: Arc<watch::Sender<Option<Stop>>>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use wend::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr
            .parse()
            .unwrap_or_else(|e| panic!("invalid socket address `{addr}`: {e}"));
        Self::with_bind(Bind::Addr(addr))
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with_bind(Bind::Listener(listener))
    }

    fn with_bind(bind: Bind) -> Self {
        Self {
            bind,
            config: ServerConfig::default(),
            signals: true,
            stop: Arc::new(watch::Sender::new(None)),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the read, write and header-read timeouts at once.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.config.read_timeout = Some(limit);
        self.config.write_timeout = Some(limit);
        self.config.read_header_timeout = Some(limit);
        self
    }

    pub fn read_timeout(mut self, limit: Duration) -> Self {
        self.config.read_timeout = Some(limit);
        self
    }

    pub fn write_timeout(mut self, limit: Duration) -> Self {
        self.config.write_timeout = Some(limit);
        self
    }

    pub fn read_header_timeout(mut self, limit: Duration) -> Self {
        self.config.read_header_timeout = Some(limit);
        self
    }

    pub fn shutdown_timeout(mut self, limit: Duration) -> Self {
        self.config.shutdown_timeout = limit;
        self
    }

    /// Whether SIGTERM and Ctrl-C trigger a graceful shutdown. On by default.
    pub fn handle_signals(mut self, on: bool) -> Self {
        self.signals = on;
        self
    }

    /// A handle for stopping the server from another task.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle { stop: Arc::clone(&self.stop) }
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns after the server has shut down and every connection is closed.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.run(router, None).await
    }

    /// Like [`serve`](Server::serve), terminating TLS with the PEM
    /// certificate chain and private key at the given paths. HTTP/2 and
    /// HTTP/1.1 are offered through ALPN.
    pub async fn serve_tls(
        self,
        router: Router,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Result<(), Error> {
        let acceptor = tls_acceptor(cert.as_ref(), key.as_ref())?;
        self.run(router, Some(acceptor)).await
    }

    async fn run(self, router: Router, tls: Option<TlsAcceptor>) -> Result<(), Error> {
        let listener = match self.bind {
            Bind::Addr(addr) => TcpListener::bind(addr).await?,
            Bind::Listener(listener) => listener,
        };
        let addr = listener.local_addr()?;

        let dispatcher = Arc::new(router.into_dispatcher());
        let config = Arc::new(self.config);

        info!(%addr, tls = tls.is_some(), "wend listening");

        // Flipped to `true` to ask open connections to finish up.
        let (drain_tx, drain_rx) = watch::channel(false);
        let mut stop_rx = self.stop.subscribe();
        let mut tasks = JoinSet::new();

        let os_signal = async {
            if self.signals {
                shutdown_signal().await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(os_signal);

        let early = *stop_rx.borrow_and_update();
        let stop = match early {
            Some(stop) => stop,
            None => loop {
                tokio::select! {
                    // Check shutdown first so a stop request wins over a
                    // queue of pending connections.
                    biased;

                    stop = next_stop(&mut stop_rx) => break stop,

                    () = &mut os_signal => {
                        info!("shutdown signal received");
                        break Stop::Graceful(None);
                    }

                    res = listener.accept() => {
                        let (stream, remote_addr) = match res {
                            Ok(v) => v,
                            Err(e) => {
                                error!("accept error: {e}");
                                continue;
                            }
                        };

                        tasks.spawn(connection(
                            stream,
                            remote_addr,
                            tls.clone(),
                            Arc::clone(&dispatcher),
                            Arc::clone(&config),
                            drain_rx.clone(),
                        ));
                    }

                    // Reap finished connection tasks so the JoinSet does not
                    // grow without bound on long-running servers.
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                }
            },
        };
        drop(listener);

        match stop {
            Stop::Close => {
                info!(in_flight = tasks.len(), "closing connections");
                tasks.abort_all();
            }
            Stop::Graceful(limit) => {
                let limit = limit.unwrap_or(config.shutdown_timeout);
                info!(in_flight = tasks.len(), ?limit, "draining connections");
                drain_tx.send_replace(true);
                drain(&mut tasks, &mut stop_rx, limit).await;
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("wend stopped");
        Ok(())
    }
}

/// Waits for every connection to finish, closing the rest once `limit`
/// elapses or a forced close is requested.
async fn drain(tasks: &mut JoinSet<()>, stop_rx: &mut watch::Receiver<Option<Stop>>, limit: Duration) {
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                if joined.is_none() {
                    return;
                }
            }
            () = &mut deadline => {
                warn!(remaining = tasks.len(), "shutdown timeout elapsed, closing connections");
                tasks.abort_all();
                return;
            }
            stop = next_stop(stop_rx) => match stop {
                Stop::Close => {
                    info!(remaining = tasks.len(), "closing connections");
                    tasks.abort_all();
                    return;
                }
                Stop::Graceful(Some(sooner)) if Instant::now() + sooner < deadline.deadline() => {
                    deadline.as_mut().reset(Instant::now() + sooner);
                }
                Stop::Graceful(_) => {}
            },
        }
    }
}

/// Resolves with the next stop request sent after the last one seen.
async fn next_stop(rx: &mut watch::Receiver<Option<Stop>>) -> Stop {
    loop {
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
        if let Some(stop) = *rx.borrow_and_update() {
            return stop;
        }
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    drain: watch::Receiver<bool>,
) {
    match tls {
        None => serve_connection(TokioIo::new(stream), remote_addr, dispatcher, config, drain).await,
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_connection(TokioIo::new(stream), remote_addr, dispatcher, config, drain).await,
            Err(e) => warn!(peer = %remote_addr, "tls handshake failed: {e}"),
        },
    }
}

async fn serve_connection<I>(
    io: I,
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    config: Arc<ServerConfig>,
    mut drain: watch::Receiver<bool>,
) where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let mut builder = ConnBuilder::new(TokioExecutor::new());
    if let Some(limit) = config.read_header_timeout {
        builder.http1().timer(TokioTimer::new()).header_read_timeout(limit);
    }

    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        let config = Arc::clone(&config);
        async move { dispatcher.serve_http(req, Some(remote_addr), &config).await }
    });

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        () = async { let _ = drain.wait_for(|draining| *draining).await; } => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = res {
        error!(peer = %remote_addr, "connection error: {e}");
    }
}

fn tls_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor, Error> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {}", cert.display())));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", key.display())))?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

/// Stops a running [`Server`]. Clones control the same server.
///
/// Requests made before [`Server::serve`] starts take effect as soon as it
/// does.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<watch::Sender<Option<Stop>>>,
}

impl ShutdownHandle {
    /// Graceful shutdown bounded by the configured shutdown timeout.
    pub fn shutdown(&self) {
        self.stop.send_replace(Some(Stop::Graceful(None)));
    }

    /// Graceful shutdown bounded by `limit`. While a drain is already in
    /// progress, only a tighter limit has an effect.
    pub fn shutdown_within(&self, limit: Duration) {
        self.stop.send_replace(Some(Stop::Graceful(Some(limit))));
    }

    /// Closes every connection immediately.
    pub fn close(&self) {
        self.stop.send_replace(Some(Stop::Close));
    }
}

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. A signal that cannot be installed is
/// logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
