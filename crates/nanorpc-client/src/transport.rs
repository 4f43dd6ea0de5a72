//! Stream transport: dialing TCP and Unix-domain sockets.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::Remote;
use crate::types::{Error, Result};

/// Any bidirectional byte stream a session can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Identity of one established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub remote: Remote,
    /// Resolved peer address, when the socket reports one.
    pub peer: Option<String>,
}

/// A freshly dialed connection, handed to the session factory.
pub struct Connection {
    pub info: ConnInfo,
    pub stream: BoxedStream,
}

impl Connection {
    /// Wrap an already-connected stream (in-memory pipes, TLS wrappers).
    pub fn new(remote: Remote, stream: impl AsyncStream + 'static) -> Self {
        Self {
            info: ConnInfo { remote, peer: None },
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("info", &self.info).finish_non_exhaustive()
    }
}

/// Dial `remote`, giving up after `timeout`.
pub async fn dial(remote: &Remote, timeout: Duration) -> Result<Connection> {
    match tokio::time::timeout(timeout, connect(remote)).await {
        Ok(conn) => conn,
        Err(_) => Err(Error::Timeout("dial")),
    }
}

async fn connect(remote: &Remote) -> Result<Connection> {
    match remote {
        Remote::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            let peer = stream.peer_addr().ok().map(|a| a.to_string());
            Ok(Connection {
                info: ConnInfo {
                    remote: remote.clone(),
                    peer,
                },
                stream: Box::new(stream),
            })
        }
        #[cfg(unix)]
        Remote::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            Ok(Connection {
                info: ConnInfo {
                    remote: remote.clone(),
                    peer: Some(path.display().to_string()),
                },
                stream: Box::new(stream),
            })
        }
        #[cfg(not(unix))]
        Remote::Unix(_) => Err(Error::Transport(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dial_tcp_reports_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let remote = Remote::Tcp {
            host: "127.0.0.1".into(),
            port: addr.port(),
        };

        let conn = dial(&remote, Duration::from_secs(2)).await.unwrap();
        assert_eq!(conn.info.remote, remote);
        assert_eq!(conn.info.peer.as_deref(), Some(addr.to_string().as_str()));
    }

    #[tokio::test]
    async fn dial_refused_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let remote = Remote::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let err = dial(&remote, Duration::from_secs(2)).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dial_missing_unix_socket_fails() {
        let remote = Remote::Unix("/nonexistent/nanorpc.sock".into());
        let err = dial(&remote, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }
}
