//! remote_server - Minimal request/response server over raw TCP sockets
//!
//! A small server for control endpoints and test doubles: one request per
//! connection, a strict line-oriented wire format, and a lifecycle you can
//! start, stop and restart from code.
//!
//! # Protocol
//!
//! - **Requests**: `GET` and `POST` with a query string, headers and, for
//!   `POST`, a `content-length` body
//! - **Responses**: `HTTP/1.1 <code> <description>`, plus `content-type` and
//!   `content-length` when a body is present
//! - **One exchange per connection**: the stream is closed after the response
//!
//! # Characteristics
//!
//! - **Graceful stop** - [`ServerManager::stop`] refuses new connections and
//!   returns only after every in-flight request is answered
//! - **Bounded pool** - optional worker limit with a waiting room and a
//!   [rejection policy](limits::RejectionPolicy) for the overflow
//! - **Hooks** - failures of any stage are turned into responses by a
//!   user-supplied error hook
//! - **Pluggable transport** - [`Transport`] wraps accepted sockets, for
//!   example in TLS
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use remote_server::{HandlerError, Request, Response, Server, ServerManager};
//!
//! fn route(request: &Request) -> Result<Response, HandlerError> {
//!     match request.path() {
//!         "/test/get" => Ok(Response::text(200, "success")),
//!         _ => Ok(Response::text(400, "unknown command")),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ServerManager::new();
//!
//!     let server = Server::builder().port(8888).handler(route).build();
//!     manager.start(server).await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     manager.stop(8888).await;
//! }
//! ```
//! Custom handler with state:
//! ```no_run
//! use remote_server::{Handler, HandlerError, Request, Response, Server, ServerManager};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl Handler for Counter {
//!     async fn handle(&self, _: &Request) -> Result<Response, HandlerError> {
//!         let seen = self.0.fetch_add(1, Ordering::Relaxed) + 1;
//!         Ok(Response::text(200, seen.to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ServerManager::new();
//!
//!     let server = Server::builder()
//!         .port(8888)
//!         .handler(Counter(AtomicUsize::new(0)))
//!         .build();
//!     manager.start(server).await.unwrap();
//!
//!     tokio::signal::ctrl_c().await.unwrap();
//!     manager.stop_all().await;
//! }
//! ```

pub(crate) mod http {
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod acceptor;
    pub(crate) mod connection;
    pub(crate) mod lifecycle;
    pub(crate) mod manager;
    pub(crate) mod server_impl;
    pub(crate) mod transport;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::{HandlerError, ParseError, ServeError, StartError},
    http::{
        query,
        request::{Parser, Request, RequestHead},
        response::Response,
        types::{
            default_code_description, Content, ContentType, Method, HEADER_CONTENT_LENGTH,
            HEADER_CONTENT_TYPE, PROTOCOL,
        },
    },
    server::{
        lifecycle::ServerState,
        manager::ServerManager,
        server_impl::{default_error_hook, Handler, Server, ServerBuilder},
        transport::{Plain, Transport},
    },
};
