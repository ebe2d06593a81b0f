use crate::{
    errors::{ParseError, ServeError},
    http::{request::Request, response::Response},
    server::{
        server_impl::{Handler, Service},
        transport::Transport,
    },
};
use std::{any::Any, io, net::SocketAddr};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
    task::JoinError,
    time::timeout,
};
use tracing::{debug, warn};

impl<H: Handler, T: Transport> Service<H, T> {
    /// Serves one accepted connection end to end.
    ///
    /// Never fails: every fault is either turned into a response by the
    /// error hook or logged. The stream is closed on return.
    pub(crate) async fn serve(&self, stream: TcpStream, peer: SocketAddr) {
        let mut stream = match self.transport.wrap(stream).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%peer, error = %err, "transport setup failed");
                return;
            }
        };

        let response = self.respond(&mut stream, peer).await;
        self.send(&mut stream, &response, peer).await;
    }

    /// Answers `503` without reading the request.
    pub(crate) async fn unavailable(&self, stream: TcpStream, peer: SocketAddr) {
        let mut stream = match self.transport.wrap(stream).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(%peer, error = %err, "transport setup failed");
                return;
            }
        };

        self.send(&mut stream, &Response::new(503), peer).await;

        // Unread request bytes would turn the close into a reset and
        // could destroy the response before the client reads it.
        let _ = timeout(
            self.conn_limits.socket_read_timeout,
            tokio::io::copy(&mut stream, &mut tokio::io::sink()),
        )
        .await;
    }

    async fn respond(&self, stream: &mut T::Stream, peer: SocketAddr) -> Response {
        let request = match self.read_request(stream).await {
            Ok(request) => request,
            Err(err) => {
                debug!(%peer, error = %err, kind = err.name(), "failed to parse request");
                return self.recover(&ServeError::Parse(err));
            }
        };

        debug!(%peer, %request, "request received");

        let handler = self.handler.clone();
        let handled = tokio::spawn(async move { handler.handle(&request).await }).await;

        match handled {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!(%peer, error = %err, "handler failed");
                self.recover(&ServeError::Handler(err))
            }
            Err(err) => {
                let message = panic_message(err);
                warn!(%peer, panic = %message, "handler panicked");
                self.recover(&ServeError::Panic(message))
            }
        }
    }

    async fn read_request(&self, stream: &mut T::Stream) -> Result<Request, ParseError> {
        let mut reader = BufReader::with_capacity(self.parser.limits().buffer_size, stream);

        match timeout(
            self.conn_limits.socket_read_timeout,
            self.parser.parse(&mut reader),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout").into()),
        }
    }

    async fn send(&self, stream: &mut T::Stream, response: &Response, peer: SocketAddr) {
        let description = self.describe(response.code());

        match timeout(
            self.conn_limits.socket_write_timeout,
            response.write_to(stream, &description),
        )
        .await
        {
            Ok(Ok(())) => debug!(%peer, code = response.code(), "response sent"),
            Ok(Err(err)) => warn!(%peer, error = %err, "failed to write response"),
            Err(_) => warn!(%peer, "response write timed out"),
        }

        if let Err(err) = stream.shutdown().await {
            debug!(%peer, error = %err, "failed to shut down stream");
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload_message(payload.as_ref()),
        Err(err) => err.to_string(),
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::HandlerError,
        limits::{ConnLimits, ReqLimits},
        server::server_impl::Server,
        ContentType,
    };
    use std::time::Duration;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    async fn roundtrip<H: Handler>(server: Server<H>, raw: &[u8], close_write: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let service = server.service.clone();
        let task = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            service.serve(stream, peer).await;
        });

        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(raw).await.unwrap();
        if close_write {
            client.shutdown().await.unwrap();
        }

        let mut answer = Vec::new();
        client.read_to_end(&mut answer).await.unwrap();
        task.await.unwrap();

        String::from_utf8_lossy(&answer).into_owned()
    }

    fn route(request: &Request) -> Result<Response, HandlerError> {
        match (request.path(), request.content()) {
            ("/test/get", None) => Ok(Response::new(200)),
            ("/echo", Some(content)) if content.content_type() == &ContentType::Text => {
                Ok(Response::with_body(200, content.body(), ContentType::Text))
            }
            ("/fail", _) => Err("database offline".into()),
            ("/panic", _) => panic!("handler exploded"),
            _ => Ok(Response::text(400, "unknown command")),
        }
    }

    fn server() -> Server<fn(&Request) -> Result<Response, HandlerError>> {
        Server::builder()
            .port(0)
            .handler(route as fn(&Request) -> Result<Response, HandlerError>)
            .build()
    }

    #[tokio::test]
    async fn serve_requests() {
        #[rustfmt::skip]
        let cases: Vec<(&[u8], &str)> = vec![
            (
                b"GET /test/get HTTP/1.1\r\nX-Anything: 1\r\n\r\n",
                "HTTP/1.1 200 Success\r\n\r\n",
            ),
            (
                b"POST /echo HTTP/1.1\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello",
                "HTTP/1.1 200 Success\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello",
            ),
            (
                b"GET /nowhere HTTP/1.1\r\nHost: x\r\n\r\n",
                "HTTP/1.1 400 Bad Request\r\ncontent-type: text/plain\r\ncontent-length: 15\r\n\r\nunknown command",
            ),
            (
                b"GET /fail HTTP/1.1\r\nHost: x\r\n\r\n",
                "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\ncontent-length: 36\r\n\r\nerror: HandlerError database offline",
            ),
            (
                b"DELETE / HTTP/1.1\r\nHost: x\r\n\r\n",
                "HTTP/1.1 500 Internal Server Error\r\ncontent-type: text/plain\r\ncontent-length: 46\r\n\r\nerror: UnknownRequestType unknown request type",
            ),
        ];

        for (raw, expected) in cases {
            let answer = roundtrip(server(), raw, false).await;
            assert_eq!(answer, expected, "{:?}", String::from_utf8_lossy(raw));
        }
    }

    #[tokio::test]
    async fn handler_panic_goes_through_error_hook() {
        let server = Server::builder()
            .port(0)
            .handler(route)
            .error_hook(|err: &ServeError| Response::text(500, err.to_string()))
            .build();

        let answer = roundtrip(server, b"GET /panic HTTP/1.1\r\nHost: x\r\n\r\n", false).await;

        assert!(answer.starts_with("HTTP/1.1 500 Internal Server Error\r\n"), "{answer}");
        assert!(answer.ends_with("handler panicked: handler exploded"), "{answer}");
    }

    #[tokio::test]
    async fn empty_connection_is_answered() {
        let answer = roundtrip(server(), b"", true).await;

        assert!(answer.contains("error: EmptyRequest empty request"), "{answer}");
    }

    #[tokio::test]
    async fn read_timeout_is_an_io_error() {
        let server = Server::builder()
            .port(0)
            .handler(route)
            .connection_limits(ConnLimits {
                socket_read_timeout: Duration::from_millis(50),
                ..ConnLimits::default()
            })
            .error_hook(|err: &ServeError| match err {
                ServeError::Parse(ParseError::Io(err)) => Response::text(408, format!("{:?}", err.kind())),
                _ => Response::new(500),
            })
            .build();

        let answer = roundtrip(server, b"GET /test/get HTTP/1.1\r\n", false).await;

        assert!(answer.starts_with("HTTP/1.1 408 Unknown\r\n"), "{answer}");
        assert!(answer.ends_with("TimedOut"), "{answer}");
    }

    #[tokio::test]
    async fn request_limits_apply() {
        let server = Server::builder()
            .port(0)
            .handler(route)
            .request_limits(ReqLimits {
                body_size: 2,
                ..ReqLimits::default()
            })
            .build();

        let raw = b"POST /echo HTTP/1.1\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello";
        let answer = roundtrip(server, raw, false).await;

        assert!(answer.contains("error: BodyTooLarge"), "{answer}");
    }

    #[test]
    fn panic_payloads() {
        #[rustfmt::skip]
        let cases: Vec<(Box<dyn Any + Send>, &str)> = vec![
            (Box::new("static message"), "static message"),
            (Box::new(String::from("owned message")), "owned message"),
            (Box::new(42_u8), "unknown panic payload"),
        ];

        for (payload, expected) in cases {
            assert_eq!(payload_message(payload.as_ref()), expected);
        }
    }
}
