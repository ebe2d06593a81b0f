use crate::{
    errors::StartError,
    server::{
        acceptor::{bind, Acceptor},
        lifecycle::{AtomicState, InFlight, ServerHandle, ServerState},
        server_impl::{Handler, Server},
        transport::Transport,
    },
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch;
use tracing::info;

/// Owns every running server, keyed by port.
///
/// The manager is an ordinary value: create one, share it (for example in an
/// `Arc`), and drop it when done. Dropping it stops accepting on all of its
/// servers without waiting for in-flight connections; call
/// [`stop_all`](Self::stop_all) first for a graceful shutdown.
///
/// # Examples
///
/// ```
/// use remote_server::{HandlerError, Request, Response, Server, ServerManager, ServerState};
///
/// # #[tokio::main]
/// # async fn main() {
/// let manager = ServerManager::new();
///
/// let server = Server::builder()
///     .address("127.0.0.1:0".parse().unwrap())
///     .handler(|_: &Request| -> Result<Response, HandlerError> { Ok(Response::text(200, "success")) })
///     .build();
///
/// let port = manager.start(server).await.unwrap().port();
/// assert_eq!(manager.state(port), Some(ServerState::Running));
///
/// assert!(manager.stop(port).await);
/// assert!(!manager.stop(port).await);
/// assert_eq!(manager.state(port), None);
/// # }
/// ```
#[derive(Default)]
pub struct ServerManager {
    servers: Mutex<HashMap<u16, Arc<ServerHandle>>>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Arc<ServerHandle>>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn handle(&self, port: u16) -> Option<Arc<ServerHandle>> {
        self.lock().get(&port).cloned()
    }

    /// Binds the server's address and starts accepting.
    ///
    /// Returns the bound address once the acceptor is running; with port `0`
    /// it carries the port actually chosen.
    ///
    /// # Errors
    ///
    /// - [`StartError::AlreadyStarted`] if this manager already has a server on the port.
    ///   The running server is not affected.
    /// - [`StartError::Io`] if the socket cannot be created or bound.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime.
    pub async fn start<H, T>(&self, server: Server<H, T>) -> Result<SocketAddr, StartError>
    where
        H: Handler,
        T: Transport,
    {
        let mut servers = self.lock();

        let requested = server.address.port();
        if requested != 0 && servers.contains_key(&requested) {
            return Err(StartError::AlreadyStarted { port: requested });
        }

        let listener = bind(server.address, server.server_limits.backlog)?;
        let local_addr = listener.local_addr()?;
        if servers.contains_key(&local_addr.port()) {
            return Err(StartError::AlreadyStarted {
                port: local_addr.port(),
            });
        }

        let state = Arc::new(AtomicState::new(ServerState::Created));
        let in_flight = Arc::new(InFlight::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let acceptor = Acceptor::new(
            listener,
            local_addr,
            server.service,
            server.server_limits,
            state.clone(),
            in_flight.clone(),
            shutdown_rx,
        );

        state.store(ServerState::Running);
        let task = tokio::spawn(acceptor.run());

        servers.insert(
            local_addr.port(),
            Arc::new(ServerHandle::new(local_addr, state, in_flight, shutdown, task)),
        );

        info!(address = %local_addr, "server started");
        Ok(local_addr)
    }

    /// Stops the server on `port` gracefully.
    ///
    /// New connections are refused at once; the call returns after every
    /// in-flight connection has completed and the port is released.
    /// Returns `false` if no server was registered on the port.
    pub async fn stop(&self, port: u16) -> bool {
        let Some(handle) = self.handle(port) else {
            return false;
        };

        self.stop_handle(port, &handle).await;
        true
    }

    /// Stops `handle` and unregisters it, unless `port` already belongs to
    /// a server started after it.
    async fn stop_handle(&self, port: u16, handle: &Arc<ServerHandle>) {
        handle.stop().await;

        let mut servers = self.lock();
        if servers
            .get(&port)
            .is_some_and(|current| Arc::ptr_eq(current, handle))
        {
            servers.remove(&port);
        }
    }

    /// Stops every server, one after another.
    pub async fn stop_all(&self) {
        for port in self.ports() {
            self.stop(port).await;
        }
    }

    /// `true` while the server on `port` is accepting connections.
    pub fn is_running(&self, port: u16) -> bool {
        self.state(port) == Some(ServerState::Running)
    }

    pub fn state(&self, port: u16) -> Option<ServerState> {
        self.handle(port).map(|handle| handle.state.load())
    }

    /// Number of connections being processed by the server on `port`.
    pub fn in_flight(&self, port: u16) -> Option<usize> {
        self.handle(port).map(|handle| handle.in_flight.count())
    }

    /// Address the server on `port` is bound to.
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.handle(port).map(|handle| handle.local_addr)
    }

    /// Ports of all registered servers, ascending.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::HandlerError,
        http::{request::Request, response::Response},
        limits::{RejectionPolicy, ServerLimits},
    };
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        sync::Semaphore,
        time::{sleep, timeout},
    };

    const GET: &[u8] = b"GET /test/get HTTP/1.1\r\nHost: localhost\r\n\r\n";

    fn success(_: &Request) -> Result<Response, HandlerError> {
        Ok(Response::new(200))
    }

    fn local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn try_request(address: SocketAddr, raw: &[u8]) -> io::Result<String> {
        let mut client = TcpStream::connect(address).await?;
        client.write_all(raw).await?;

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await?;
        Ok(String::from_utf8_lossy(&answer).into_owned())
    }

    async fn request(address: SocketAddr, raw: &[u8]) -> String {
        try_request(address, raw).await.unwrap()
    }

    /// Handler that parks every request until released.
    #[derive(Clone)]
    struct Gate {
        entered: Arc<AtomicUsize>,
        release: Arc<Semaphore>,
    }

    impl Gate {
        fn new() -> Self {
            Self {
                entered: Arc::new(AtomicUsize::new(0)),
                release: Arc::new(Semaphore::new(0)),
            }
        }

        fn entered(&self) -> usize {
            self.entered.load(Ordering::SeqCst)
        }

        fn open(&self, n: usize) {
            self.release.add_permits(n);
        }
    }

    impl Handler for Gate {
        async fn handle(&self, _: &Request) -> Result<Response, HandlerError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.release.acquire().await?.forget();
            Ok(Response::text(200, "released"))
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn get_scenario() {
        let manager = ServerManager::new();
        let server = Server::builder().address(local()).handler(success).build();

        let address = manager.start(server).await.unwrap();
        assert!(manager.is_running(address.port()));
        assert_eq!(manager.local_addr(address.port()), Some(address));

        let answer = request(address, GET).await;
        assert_eq!(answer, "HTTP/1.1 200 Success\r\n\r\n");

        assert!(manager.stop(address.port()).await);
        assert!(!manager.is_running(address.port()));
        assert!(manager.ports().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn already_started_keeps_first_server() {
        let manager = ServerManager::new();

        let first = Server::builder().address(local()).handler(success).build();
        let address = manager.start(first).await.unwrap();

        let second = Server::builder().address(address).handler(success).build();
        match manager.start(second).await {
            Err(StartError::AlreadyStarted { port }) => assert_eq!(port, address.port()),
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(manager.is_running(address.port()));
        assert_eq!(request(address, GET).await, "HTTP/1.1 200 Success\r\n\r\n");

        manager.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stop_drains_in_flight_connections() {
        const N: usize = 4;

        let manager = Arc::new(ServerManager::new());
        let gate = Gate::new();

        let server = Server::builder().address(local()).handler(gate.clone()).build();
        let address = manager.start(server).await.unwrap();
        let port = address.port();

        let clients: Vec<_> = (0..N)
            .map(|_| tokio::spawn(request(address, GET)))
            .collect();

        wait_until(|| gate.entered() == N).await;
        assert_eq!(manager.in_flight(port), Some(N));

        let stopping = tokio::spawn({
            let manager = manager.clone();
            async move { manager.stop(port).await }
        });

        wait_until(|| manager.state(port) == Some(ServerState::StopRequested)).await;
        sleep(Duration::from_millis(50)).await;
        assert!(!stopping.is_finished());

        // No accepts after stop.
        assert!(TcpStream::connect(address).await.is_err());
        assert_eq!(gate.entered(), N);

        gate.open(N);

        assert!(timeout(Duration::from_secs(5), stopping).await.unwrap().unwrap());
        for client in clients {
            let answer = client.await.unwrap();
            assert!(answer.ends_with("released"), "{answer}");
        }

        assert_eq!(manager.state(port), None);
        assert_eq!(manager.in_flight(port), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_all_wait_for_drain() {
        let manager = Arc::new(ServerManager::new());
        let gate = Gate::new();

        let server = Server::builder().address(local()).handler(gate.clone()).build();
        let address = manager.start(server).await.unwrap();
        let port = address.port();

        let client = tokio::spawn(request(address, GET));
        wait_until(|| gate.entered() == 1).await;

        let stops: Vec<_> = (0..3)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.stop(port).await })
            })
            .collect();

        sleep(Duration::from_millis(50)).await;
        assert!(stops.iter().all(|stop| !stop.is_finished()));

        gate.open(1);
        for stop in stops {
            timeout(Duration::from_secs(5), stop).await.unwrap().unwrap();
        }

        assert!(client.await.unwrap().ends_with("released"));
        assert!(manager.ports().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn restart_after_stop() {
        let manager = ServerManager::new();

        let first = Server::builder().address(local()).handler(success).build();
        let address = manager.start(first).await.unwrap();
        assert_eq!(request(address, GET).await, "HTTP/1.1 200 Success\r\n\r\n");
        assert!(manager.stop(address.port()).await);

        let second = Server::builder()
            .address(address)
            .handler(|_: &Request| -> Result<Response, HandlerError> {
                Ok(Response::text(200, "again"))
            })
            .build();
        let again = manager.start(second).await.unwrap();

        assert_eq!(again, address);
        assert!(request(address, GET).await.ends_with("again"));

        manager.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn late_stop_keeps_restarted_server() {
        let manager = ServerManager::new();

        let first = Server::builder().address(local()).handler(success).build();
        let address = manager.start(first).await.unwrap();
        let port = address.port();

        // A second stop that looked the old server up before the first one finished.
        let stale = manager.handle(port).unwrap();
        assert!(manager.stop(port).await);

        let second = Server::builder()
            .address(address)
            .handler(|_: &Request| -> Result<Response, HandlerError> {
                Ok(Response::text(200, "again"))
            })
            .build();
        assert_eq!(manager.start(second).await.unwrap(), address);

        manager.stop_handle(port, &stale).await;

        assert!(manager.is_running(port));
        assert_eq!(manager.ports(), vec![port]);
        assert!(request(address, GET).await.ends_with("again"));

        assert!(manager.stop(port).await);
        assert!(manager.ports().is_empty());
    }

    /// Fails the handshake of every connection that opens with `!`.
    #[derive(Clone, Default)]
    struct Picky {
        wrapped: Arc<AtomicUsize>,
        refused: Arc<AtomicUsize>,
    }

    impl Transport for Picky {
        type Stream = TcpStream;

        async fn wrap(&self, stream: TcpStream) -> io::Result<TcpStream> {
            let mut first = [0; 1];
            stream.peek(&mut first).await?;

            if first[0] == b'!' {
                self.refused.fetch_add(1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::InvalidData, "handshake rejected"));
            }

            self.wrapped.fetch_add(1, Ordering::SeqCst);
            Ok(stream)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn custom_transport() {
        let manager = ServerManager::new();
        let transport = Picky::default();

        let server = Server::builder()
            .address(local())
            .handler(success)
            .transport(transport.clone())
            .build();
        let address = manager.start(server).await.unwrap();
        let port = address.port();

        #[rustfmt::skip]
        let cases: Vec<(&[u8], Option<&str>)> = vec![
            (GET, Some("HTTP/1.1 200 Success\r\n\r\n")),
            (b"!handshake\r\n", None),
            (GET, Some("HTTP/1.1 200 Success\r\n\r\n")),
            (b"!handshake\r\n", None),
            (GET, Some("HTTP/1.1 200 Success\r\n\r\n")),
        ];

        for (raw, expected) in cases {
            match expected {
                Some(expected) => assert_eq!(request(address, raw).await, expected),
                // Closed without a response; a reset is fine too.
                None => match try_request(address, raw).await {
                    Ok(answer) => assert!(answer.is_empty(), "{answer}"),
                    Err(_) => {}
                },
            }
            assert!(manager.is_running(port));
        }

        assert_eq!(transport.wrapped.load(Ordering::SeqCst), 3);
        assert_eq!(transport.refused.load(Ordering::SeqCst), 2);

        assert!(manager.stop(port).await);
        assert_eq!(manager.in_flight(port), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturated_pool_answers_503() {
        let manager = ServerManager::new();
        let gate = Gate::new();

        let server = Server::builder()
            .address(local())
            .handler(gate.clone())
            .server_limits(ServerLimits {
                max_connections: 1,
                max_pending_connections: 1,
                rejection: RejectionPolicy::ServiceUnavailable,
                ..ServerLimits::default()
            })
            .code_description_hook(|code| match code {
                503 => "Service Unavailable".to_string(),
                other => crate::default_code_description(other).to_string(),
            })
            .build();

        let address = manager.start(server).await.unwrap();
        let port = address.port();

        // One connection in the worker slot, one waiting for it.
        let busy = tokio::spawn(request(address, GET));
        wait_until(|| gate.entered() == 1).await;
        let waiting = tokio::spawn(request(address, GET));
        wait_until(|| manager.in_flight(port) == Some(2)).await;

        let rejected = request(address, GET).await;
        assert_eq!(rejected, "HTTP/1.1 503 Service Unavailable\r\n\r\n");
        assert!(manager.is_running(port));

        gate.open(2);
        assert!(busy.await.unwrap().ends_with("released"));
        assert!(waiting.await.unwrap().ends_with("released"));
        assert_eq!(gate.entered(), 2);

        manager.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saturated_pool_aborts_acceptor() {
        let manager = ServerManager::new();
        let gate = Gate::new();

        let server = Server::builder()
            .address(local())
            .handler(gate.clone())
            .server_limits(ServerLimits {
                max_connections: 1,
                max_pending_connections: 0,
                rejection: RejectionPolicy::Abort,
                ..ServerLimits::default()
            })
            .build();

        let address = manager.start(server).await.unwrap();
        let port = address.port();

        let busy = tokio::spawn(request(address, GET));
        wait_until(|| gate.entered() == 1).await;

        // Rejected and closed without an answer.
        match try_request(address, GET).await {
            Ok(answer) => assert!(answer.is_empty(), "{answer}"),
            Err(_) => {}
        }
        wait_until(|| manager.state(port) == Some(ServerState::Failed)).await;
        assert!(!manager.is_running(port));

        // In-flight work still completes and stop still drains.
        gate.open(1);
        assert!(busy.await.unwrap().ends_with("released"));
        assert!(manager.stop(port).await);
        assert!(manager.ports().is_empty());
    }
}
