use crate::{
    errors::{HandlerError, ServeError},
    http::{
        request::{Parser, Request},
        response::Response,
        types::default_code_description,
    },
    limits::{ConnLimits, ReqLimits, ServerLimits},
    server::transport::{Plain, Transport},
};
use std::{
    future::{ready, Future},
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

/// A trait for turning requests into responses.
///
/// The handler is shared by every connection of a server, so `&self` is the
/// place for shared state (connection pools, counters, routing tables).
/// It runs once per connection in its own task: an `Err` or a panic is passed
/// to the server's error hook and never takes the server down.
///
/// Any `Fn(&Request) -> Result<Response, HandlerError>` closure is a handler.
///
/// # Examples
///
/// ```
/// use remote_server::{Handler, HandlerError, Request, Response};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct Counter(AtomicUsize);
///
/// impl Handler for Counter {
///     async fn handle(&self, request: &Request) -> Result<Response, HandlerError> {
///         match request.path() {
///             "/count" => {
///                 let n = self.0.fetch_add(1, Ordering::Relaxed) + 1;
///                 Ok(Response::text(200, n.to_string()))
///             }
///             _ => Err(format!("no route for {}", request.path()).into()),
///         }
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Processes one request.
    fn handle(
        &self,
        request: &Request,
    ) -> impl Future<Output = Result<Response, HandlerError>> + Send;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    #[inline]
    fn handle(
        &self,
        request: &Request,
    ) -> impl Future<Output = Result<Response, HandlerError>> + Send {
        ready(self(request))
    }
}

pub(crate) type ErrorHook = Arc<dyn Fn(&ServeError) -> Response + Send + Sync>;
pub(crate) type CodeDescriptionHook = Arc<dyn Fn(u16) -> String + Send + Sync>;

/// Error hook used when none is configured.
///
/// Answers `500` with a text body naming the failure kind and its message.
///
/// # Examples
/// ```
/// use remote_server::{default_error_hook, ParseError, ServeError};
///
/// let response = default_error_hook(&ServeError::Parse(ParseError::EmptyRequest));
///
/// assert_eq!(response.code(), 500);
/// assert_eq!(response.body(), Some(&b"error: EmptyRequest empty request"[..]));
/// ```
pub fn default_error_hook(err: &ServeError) -> Response {
    Response::text(500, format!("error: {} {}", err.name(), err))
}

/// Everything a connection task needs, shared by all connections of a server.
pub(crate) struct Service<H, T> {
    pub(crate) handler: Arc<H>,
    pub(crate) transport: T,
    pub(crate) parser: Parser,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) error_hook: ErrorHook,
    pub(crate) code_description: CodeDescriptionHook,
}

impl<H, T> Service<H, T> {
    #[inline]
    pub(crate) fn recover(&self, err: &ServeError) -> Response {
        (self.error_hook)(err)
    }

    #[inline]
    pub(crate) fn describe(&self, code: u16) -> String {
        (self.code_description)(code)
    }
}

/// A configured server, ready to be started by a [`ServerManager`](crate::ServerManager).
///
/// Building a server does not bind anything; the socket is opened by
/// [`ServerManager::start`](crate::ServerManager::start).
///
/// # Examples
///
/// ```no_run
/// use remote_server::{HandlerError, Request, Response, Server, ServerManager};
///
/// fn route(request: &Request) -> Result<Response, HandlerError> {
///     match request.path() {
///         "/test/get" => Ok(Response::text(200, "success")),
///         _ => Ok(Response::text(400, "unknown command")),
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let manager = ServerManager::new();
///
///     let server = Server::builder().port(8888).handler(route).build();
///     let address = manager.start(server).await.unwrap();
///
///     // ...
///
///     manager.stop(address.port()).await;
/// }
/// ```
pub struct Server<H: Handler, T: Transport = Plain> {
    pub(crate) address: SocketAddr,
    pub(crate) server_limits: ServerLimits,
    pub(crate) service: Arc<Service<H, T>>,
}

impl<H: Handler> Server<H> {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder<H> {
        ServerBuilder {
            address: None,
            handler: None,
            transport: Plain,
            custom_types: Vec::new(),
            error_hook: None,
            code_description: None,

            server_limits: None,
            connection_limits: None,
            request_limits: None,
        }
    }
}

impl<H: Handler, T: Transport> Server<H, T> {
    /// Address the server will bind to.
    #[inline(always)]
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

//

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder<H: Handler, T: Transport = Plain> {
    address: Option<SocketAddr>,
    handler: Option<H>,
    transport: T,
    custom_types: Vec<String>,
    error_hook: Option<ErrorHook>,
    code_description: Option<CodeDescriptionHook>,

    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    request_limits: Option<ReqLimits>,
}

impl<H: Handler, T: Transport> ServerBuilder<H, T> {
    /// Listens on `0.0.0.0:port`. Port `0` picks a free port.
    ///
    /// **This or [`address`](Self::address) is required.**
    #[inline(always)]
    pub fn port(self, port: u16) -> Self {
        self.address(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Listens on the given address.
    ///
    /// **This or [`port`](Self::port) is required.**
    ///
    /// # Examples
    ///
    /// ```
    /// use remote_server::{HandlerError, Request, Response, Server};
    ///
    /// let server = Server::builder()
    ///     .address("127.0.0.1:0".parse().unwrap())
    ///     .handler(|_: &Request| -> Result<Response, HandlerError> { Ok(Response::new(200)) })
    ///     .build();
    ///
    /// assert!(server.address().ip().is_loopback());
    /// ```
    #[inline(always)]
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets the request handler.
    ///
    /// **This is a required component.**
    #[inline(always)]
    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Registers a content type recognised on requests.
    ///
    /// Matching is case-insensitive and happens after the built-in
    /// `application/json` and `text/plain`; a match is reported as
    /// [`ContentType::Custom`](crate::ContentType::Custom).
    #[inline(always)]
    pub fn custom_content_type<S: Into<String>>(mut self, value: S) -> Self {
        self.custom_types.push(value.into());
        self
    }

    /// Replaces the hook that turns failures into responses.
    ///
    /// Defaults to [`default_error_hook`].
    ///
    /// # Examples
    ///
    /// ```
    /// use remote_server::{HandlerError, Request, Response, ServeError, Server};
    ///
    /// let server = Server::builder()
    ///     .port(8888)
    ///     .handler(|_: &Request| -> Result<Response, HandlerError> { Ok(Response::new(200)) })
    ///     .error_hook(|err: &ServeError| match err {
    ///         ServeError::Parse(_) => Response::text(400, err.to_string()),
    ///         _ => Response::new(500),
    ///     })
    ///     .build();
    /// ```
    #[inline(always)]
    pub fn error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ServeError) -> Response + Send + Sync + 'static,
    {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    /// Replaces the status description table used on status lines.
    ///
    /// Defaults to [`default_code_description`].
    #[inline(always)]
    pub fn code_description_hook<F, S>(mut self, hook: F) -> Self
    where
        F: Fn(u16) -> S + Send + Sync + 'static,
        S: Into<String>,
    {
        self.code_description = Some(Arc::new(move |code: u16| -> String { hook(code).into() }));
        self
    }

    /// Configures the worker pool and the listening socket.
    #[inline(always)]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Configures per-connection timeouts and socket options.
    #[inline(always)]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Configures request parsing limits.
    #[inline(always)]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.request_limits = Some(limits);
        self
    }

    /// Serves connections over another [`Transport`].
    #[inline(always)]
    pub fn transport<NewT: Transport>(self, transport: NewT) -> ServerBuilder<H, NewT> {
        ServerBuilder {
            address: self.address,
            handler: self.handler,
            transport,
            custom_types: self.custom_types,
            error_hook: self.error_hook,
            code_description: self.code_description,

            server_limits: self.server_limits,
            connection_limits: self.connection_limits,
            request_limits: self.request_limits,
        }
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Error messages:
    /// - ``The `port` or `address` method must be called to create``
    /// - ``The `handler` method must be called to create``
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server<H, T> {
        let address = self
            .address
            .expect("The `port` or `address` method must be called to create");
        let handler = self
            .handler
            .expect("The `handler` method must be called to create");

        let parser = Parser::new(self.request_limits.unwrap_or_default())
            .with_custom_types(self.custom_types);

        Server {
            address,
            server_limits: self.server_limits.unwrap_or_default(),
            service: Arc::new(Service {
                handler: Arc::new(handler),
                transport: self.transport,
                parser,
                conn_limits: self.connection_limits.unwrap_or_default(),
                error_hook: self
                    .error_hook
                    .unwrap_or_else(|| Arc::new(default_error_hook)),
                code_description: self
                    .code_description
                    .unwrap_or_else(|| Arc::new(|code: u16| default_code_description(code).to_owned())),
            }),
        }
    }
}
