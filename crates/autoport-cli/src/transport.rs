//! Control socket exchange with the daemon.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use autoport_config::Config;

use crate::AppError;
use crate::command::{ControlRequest, ReplyMode};

pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Longer than the daemon allows for teardown, so a `stop` reply is not cut
/// short.
pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to the configured control endpoint and exchanges `request`.
pub(crate) fn send(config: &Config, request: &ControlRequest) -> Result<Option<String>, AppError> {
    let mut stream = connect(config)?;
    stream
        .set_read_timeout(Some(REPLY_TIMEOUT))
        .map_err(|source| AppError::ReadResponse {
            function: request.function(),
            source,
        })?;
    exchange(&mut stream, request)
}

fn connect(config: &Config) -> Result<TcpStream, AppError> {
    let (host, port) = config.control_endpoint();
    let endpoint = format!("{host}:{port}");
    let address = resolve(host, port).map_err(|source| AppError::Resolve {
        endpoint: endpoint.clone(),
        source,
    })?;
    TcpStream::connect_timeout(&address, CONNECTION_TIMEOUT)
        .map_err(|source| AppError::Connect { endpoint, source })
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}

/// Writes `request` and, when it expects one, reads the daemon's reply up to
/// the point where the daemon closes the connection.
pub(crate) fn exchange<S: Read + Write>(
    stream: &mut S,
    request: &ControlRequest,
) -> Result<Option<String>, AppError> {
    let function = request.function();
    request
        .write_line(stream)
        .map_err(|source| AppError::SendRequest { function, source })?;
    if request.reply() == ReplyMode::None {
        return Ok(None);
    }
    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .map_err(|source| AppError::ReadResponse { function, source })?;
    Ok(Some(reply))
}
