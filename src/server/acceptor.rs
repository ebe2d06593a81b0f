use crate::{
    limits::{RejectionPolicy, ServerLimits},
    server::{
        lifecycle::{AtomicState, InFlight, ServerState},
        server_impl::{Handler, Service},
        transport::Transport,
    },
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{io, net::SocketAddr, ops::ControlFlow, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{watch, OwnedSemaphorePermit, Semaphore},
};
use tracing::{debug, error, warn};

/// Opens a non-blocking listener with `SO_REUSEADDR`, so a stopped
/// server's port can be bound again right away.
pub(crate) fn bind(address: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;

    TcpListener::from_std(socket.into())
}

/// Errors that belong to one connection, not to the listener.
#[inline]
fn is_connection_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

enum Pool {
    Unbounded,
    Bounded {
        /// Worker slots plus waiting room. Taken without waiting.
        admission: Arc<Semaphore>,
        /// Worker slots. Awaited inside the connection task.
        workers: Arc<Semaphore>,
    },
}

impl Pool {
    fn new(limits: &ServerLimits) -> Self {
        match limits.is_bounded() {
            false => Pool::Unbounded,
            true => Pool::Bounded {
                admission: Arc::new(Semaphore::new(
                    limits.admission_capacity().min(Semaphore::MAX_PERMITS),
                )),
                workers: Arc::new(Semaphore::new(
                    limits.max_connections.min(Semaphore::MAX_PERMITS),
                )),
            },
        }
    }
}

/// The accept loop of one server.
pub(crate) struct Acceptor<H: Handler, T: Transport> {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<Service<H, T>>,
    limits: ServerLimits,
    pool: Pool,
    state: Arc<AtomicState>,
    in_flight: Arc<InFlight>,
    shutdown: watch::Receiver<bool>,
}

impl<H: Handler, T: Transport> Acceptor<H, T> {
    pub(crate) fn new(
        listener: TcpListener,
        local_addr: SocketAddr,
        service: Arc<Service<H, T>>,
        limits: ServerLimits,
        state: Arc<AtomicState>,
        in_flight: Arc<InFlight>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool: Pool::new(&limits),
            listener,
            local_addr,
            service,
            limits,
            state,
            in_flight,
            shutdown,
        }
    }

    /// Accepts until stopped or until a fatal fault.
    ///
    /// The listener is closed when this returns, so connections attempted
    /// during the drain are refused by the system.
    pub(crate) async fn run(mut self) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if self.dispatch(stream, peer).is_break() {
                        self.state.advance(ServerState::Running, ServerState::Failed);
                        return;
                    }
                }
                Err(err) => {
                    if self.accept_failed(&err).is_break() {
                        break;
                    }
                }
            }
        }

        debug!(address = %self.local_addr, "acceptor finished");
    }

    /// Decides whether the loop survives a failed accept.
    ///
    /// Faults of a single connection are retried. Anything else is fatal
    /// and leaves the server `Failed`, unless a stop is already under way.
    fn accept_failed(&self, err: &io::Error) -> ControlFlow<()> {
        if self.state.load() != ServerState::Running {
            return ControlFlow::Break(());
        }

        if is_connection_error(err) {
            debug!(address = %self.local_addr, error = %err, "accept failed, retrying");
            return ControlFlow::Continue(());
        }

        error!(address = %self.local_addr, error = %err, "accept failed, acceptor stopped");
        self.state.advance(ServerState::Running, ServerState::Failed);
        ControlFlow::Break(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) -> ControlFlow<()> {
        let (admission, workers) = match &self.pool {
            Pool::Unbounded => (None, None),
            Pool::Bounded { admission, workers } => match admission.clone().try_acquire_owned() {
                Ok(permit) => (Some(permit), Some(workers.clone())),
                Err(_) => return self.reject(stream, peer),
            },
        };

        if self.service.conn_limits.tcp_nodelay {
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, error = %err, "failed to set TCP_NODELAY");
            }
        }

        debug!(%peer, "connection accepted");

        let guard = self.in_flight.enter();
        let service = self.service.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let _admission: Option<OwnedSemaphorePermit> = admission;

            let _slot = match workers {
                Some(workers) => match workers.acquire_owned().await {
                    Ok(slot) => Some(slot),
                    Err(_) => return,
                },
                None => None,
            };

            service.serve(stream, peer).await;
        });

        ControlFlow::Continue(())
    }

    fn reject(&self, stream: TcpStream, peer: SocketAddr) -> ControlFlow<()> {
        match self.limits.rejection {
            RejectionPolicy::Abort => {
                error!(
                    address = %self.local_addr,
                    %peer,
                    max_connections = self.limits.max_connections,
                    max_pending_connections = self.limits.max_pending_connections,
                    "connection pool saturated, acceptor stopped"
                );
                drop(stream);
                ControlFlow::Break(())
            }
            RejectionPolicy::ServiceUnavailable => {
                warn!(address = %self.local_addr, %peer, "connection pool saturated, answering 503");

                let guard = self.in_flight.enter();
                let service = self.service.clone();

                tokio::spawn(async move {
                    let _guard = guard;
                    service.unavailable(stream, peer).await;
                });

                ControlFlow::Continue(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::HandlerError,
        http::{request::Request, response::Response},
        server::{server_impl::Server, transport::Plain},
    };

    type Route = fn(&Request) -> Result<Response, HandlerError>;

    fn success(_: &Request) -> Result<Response, HandlerError> {
        Ok(Response::new(200))
    }

    fn acceptor(state: ServerState) -> Acceptor<Route, Plain> {
        let server = Server::builder()
            .address("127.0.0.1:0".parse().unwrap())
            .handler(success as Route)
            .build();

        let listener = bind(server.address(), 16).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let (_, shutdown) = watch::channel(false);

        Acceptor::new(
            listener,
            local_addr,
            server.service,
            server.server_limits,
            Arc::new(AtomicState::new(state)),
            Arc::new(InFlight::default()),
            shutdown,
        )
    }

    #[tokio::test]
    async fn bind_reuses_port() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let address = listener.local_addr().unwrap();
        assert_ne!(address.port(), 0);

        let client = TcpStream::connect(address).await.unwrap();
        let (_accepted, _) = listener.accept().await.unwrap();
        drop(client);
        drop(listener);

        let again = bind(address, 16).unwrap();
        assert_eq!(again.local_addr().unwrap(), address);
    }

    #[tokio::test]
    async fn bind_taken_port_fails() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), 16).unwrap();
        let address = listener.local_addr().unwrap();

        assert!(bind(address, 16).is_err());
    }

    #[test]
    fn connection_errors() {
        #[rustfmt::skip]
        let cases = vec![
            (io::ErrorKind::ConnectionAborted, true),
            (io::ErrorKind::ConnectionReset, true),
            (io::ErrorKind::Interrupted, true),
            (io::ErrorKind::WouldBlock, true),
            (io::ErrorKind::PermissionDenied, false),
            (io::ErrorKind::Other, false),
        ];

        for (kind, expected) in cases {
            assert_eq!(is_connection_error(&kind.into()), expected, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn accept_faults() {
        #[rustfmt::skip]
        let cases = vec![
            (ServerState::Running, io::ErrorKind::ConnectionReset, false, ServerState::Running),
            (ServerState::Running, io::ErrorKind::WouldBlock, false, ServerState::Running),
            (ServerState::Running, io::ErrorKind::PermissionDenied, true, ServerState::Failed),
            (ServerState::Running, io::ErrorKind::Other, true, ServerState::Failed),
            (ServerState::StopRequested, io::ErrorKind::Other, true, ServerState::StopRequested),
            (ServerState::StopRequested, io::ErrorKind::ConnectionReset, true, ServerState::StopRequested),
        ];

        for (before, kind, stops, after) in cases {
            let acceptor = acceptor(before);

            let flow = acceptor.accept_failed(&kind.into());
            assert_eq!(flow.is_break(), stops, "{before:?} {kind:?}");
            assert_eq!(acceptor.state.load(), after, "{before:?} {kind:?}");
        }
    }

    #[test]
    fn pool_shape() {
        assert!(matches!(Pool::new(&ServerLimits::default()), Pool::Unbounded));

        let pool = Pool::new(&ServerLimits {
            max_connections: 2,
            max_pending_connections: 3,
            ..ServerLimits::default()
        });

        match pool {
            Pool::Bounded { admission, workers } => {
                assert_eq!(admission.available_permits(), 5);
                assert_eq!(workers.available_permits(), 2);
            }
            Pool::Unbounded => panic!("expected a bounded pool"),
        }
    }
}
