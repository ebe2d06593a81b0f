//! Server configuration limits and timeouts
//!
//! Every struct carries a hidden `_priv` field, so values are built with
//! struct update syntax on top of [`Default`].
//!
//! # Examples
//!
//! ```no_run
//! use remote_server::{Request, Response, Server, ServerManager, HandlerError};
//! use remote_server::limits::{ConnLimits, ReqLimits, ServerLimits};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ServerManager::new();
//!
//!     let server = Server::builder()
//!         .port(8888)
//!         .handler(|_: &Request| -> Result<Response, HandlerError> {
//!             Ok(Response::text(200, "success"))
//!         })
//!         .server_limits(ServerLimits {
//!             max_connections: 256,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             socket_read_timeout: Duration::from_secs(5),
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             body_size: 64 * 1024,
//!             ..ReqLimits::default()
//!         })
//!         .build();
//!
//!     manager.start(server).await.unwrap();
//! }
//! ```

use std::time::Duration;

/// Controls the worker pool and the listening socket.
///
/// # Connection management
/// ```text
///                          [------------]
///                          [ Tcp accept ]
///                          [------------]
///                                ||
///                                \/
///                     /---------------------\   No   [------------------]
///                     | Admission available? | =====> [ RejectionPolicy  ]
///                     \---------------------/        [------------------]
///                                || Yes
///                                \/
///                          [------------]
///                          [ Spawn task ] ==> waits for a worker slot ==> [ Worker ]
///                          [------------]
/// ```
///
/// With `max_connections == 0` the pool is unbounded: every accepted
/// connection is spawned immediately onto the runtime and nothing is
/// ever rejected. Accept never waits on pool capacity in either mode.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of connections processed at the same time (default: `0`, unbounded).
    pub max_connections: usize,

    /// Connections allowed to wait for a worker slot in bounded mode (default: `1024`).
    ///
    /// A connection accepted while `max_connections + max_pending_connections`
    /// connections are already admitted is handed to [`rejection`](Self::rejection).
    pub max_pending_connections: usize,

    /// What happens to a connection that cannot be admitted (default: [`RejectionPolicy::Abort`]).
    pub rejection: RejectionPolicy,

    /// Listen backlog passed to the socket (default: `1024`).
    pub backlog: i32,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 0,
            max_pending_connections: 1024,
            rejection: RejectionPolicy::Abort,
            backlog: 1024,

            _priv: (),
        }
    }
}

impl ServerLimits {
    #[inline]
    pub(crate) const fn is_bounded(&self) -> bool {
        self.max_connections != 0
    }

    #[inline]
    pub(crate) fn admission_capacity(&self) -> usize {
        self.max_connections
            .saturating_add(self.max_pending_connections)
    }
}

/// Policy for connections accepted while a bounded pool is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// Treat saturation as fatal for the acceptor.
    ///
    /// The rejected connection is closed, an error is logged and the
    /// acceptor stops; the server enters
    /// [`ServerState::Failed`](crate::ServerState::Failed). In-flight
    /// connections still complete and `stop` still drains them.
    Abort,

    /// Answer `503` and close the connection, then keep accepting.
    ///
    /// The status description comes from the server's code description hook.
    ServiceUnavailable,
}

/// Per-connection timeouts and socket options.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to read the whole request, head and body (default: `30 seconds`).
    ///
    /// Expiry is reported to the error hook as an I/O error of kind
    /// [`TimedOut`](std::io::ErrorKind::TimedOut).
    pub socket_read_timeout: Duration,

    /// Maximum time to write the whole response (default: `30 seconds`).
    pub socket_write_timeout: Duration,

    /// Sets `TCP_NODELAY` on accepted sockets (default: `true`).
    pub tcp_nodelay: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(30),
            socket_write_timeout: Duration::from_secs(30),
            tcp_nodelay: true,

            _priv: (),
        }
    }
}

/// Request parsing limits.
///
/// # Memory allocation strategy
///
/// Each connection allocates one read buffer of `buffer_size` bytes. Head
/// lines grow up to `line_size` bytes each, and the body is allocated once
/// with exactly the announced length after it was checked against
/// `body_size`.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum length of the request line or one header line, terminator included (default: `8 KiB`).
    pub line_size: usize,

    /// Maximum number of header lines, including skipped malformed ones (default: `100`).
    pub header_count: usize,

    /// Maximum accepted `content-length` (default: `16 MiB`).
    pub body_size: usize,

    /// Capacity of the buffered reader (default: `4 KiB`).
    pub buffer_size: usize,

    /// Rejects a `POST` whose `content-type` is absent or unrecognised (default: `false`).
    ///
    /// When enabled, such requests fail with
    /// [`ParseError::UnknownContentType`](crate::ParseError::UnknownContentType)
    /// instead of carrying [`ContentType::None`](crate::ContentType::None) or
    /// [`ContentType::Unknown`](crate::ContentType::Unknown).
    pub strict_content_type: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            line_size: 8 * 1024,
            header_count: 100,
            body_size: 16 * 1024 * 1024,
            buffer_size: 4 * 1024,
            strict_content_type: false,

            _priv: (),
        }
    }
}
