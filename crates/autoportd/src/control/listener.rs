//! Accept loop for the loopback control socket.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{CONTROL_TARGET, ConnectionHandler, ListenerError, PendingReply};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const BACKLOG: i32 = 128;

/// Bound control socket, not yet accepting.
#[derive(Debug)]
pub(crate) struct ControlListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ControlListener {
    /// Binds with `SO_REUSEADDR` so a crashed daemon's port is reusable at
    /// once.
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let addr = resolve(host, port)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ListenerError::Socket { source })?;
        socket
            .set_reuse_address(true)
            .map_err(|source| ListenerError::Socket { source })?;
        socket
            .bind(&addr.into())
            .map_err(|source| ListenerError::Bind { addr, source })?;
        socket
            .listen(BACKLOG)
            .map_err(|source| ListenerError::Bind { addr, source })?;
        let listener = TcpListener::from(socket);
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::LocalAddr { source })?;
        Ok(Self { listener, addr })
    }

    /// Address actually bound; differs from the request when port 0 was used.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("control-listener".to_owned())
            .spawn(move || run_accept_loop(&self, &shutdown_flag, &handler))
            .map_err(|source| ListenerError::ThreadSpawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background listener thread.
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Stops accepting new connections.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept loop and every reply still being awaited.
    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &ControlListener,
    shutdown: &AtomicBool,
    handler: &Arc<dyn ConnectionHandler>,
) {
    info!(
        target: CONTROL_TARGET,
        addr = %listener.addr,
        "control listener active"
    );
    let mut replies: Vec<JoinHandle<()>> = Vec::new();
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        replies.retain(|reply| !reply.is_finished());
        match accept_connection(&listener.listener) {
            Ok(Some((stream, peer))) => {
                last_error = None;
                debug!(target: CONTROL_TARGET, %peer, "control connection accepted");
                if let Some(pending) = handler.handle(stream) {
                    spawn_reply(pending, &mut replies);
                }
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: CONTROL_TARGET,
                        error = %error,
                        "control accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    for reply in replies {
        if reply.join().is_err() {
            warn!(target: CONTROL_TARGET, "reply thread panicked");
        }
    }
    info!(target: CONTROL_TARGET, "control listener stopped");
}

fn spawn_reply(pending: PendingReply, replies: &mut Vec<JoinHandle<()>>) {
    match thread::Builder::new()
        .name("control-reply".to_owned())
        .spawn(move || pending.finish())
    {
        Ok(reply) => replies.push(reply),
        Err(error) => warn!(
            target: CONTROL_TARGET,
            error = %error,
            "failed to spawn reply thread"
        ),
    }
}

fn accept_connection(listener: &TcpListener) -> io::Result<Option<(TcpStream, SocketAddr)>> {
    match listener.accept() {
        Ok((stream, peer)) => {
            stream.set_nonblocking(false)?;
            Ok(Some((stream, peer)))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })
}
