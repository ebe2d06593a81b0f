use std::{future::Future, io};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// Turns an accepted TCP stream into the byte stream a connection is served over.
///
/// This is the seam for transport security: a TLS implementation performs its
/// handshake in [`wrap`](Transport::wrap) and returns the encrypted stream.
/// Wrapping runs inside the connection task, so a slow handshake never holds
/// up the accept loop. A failed wrap closes only that connection.
///
/// # Examples
///
/// A transport that counts handshakes and otherwise serves plain TCP:
/// ```
/// use remote_server::Transport;
/// use std::{io, sync::atomic::{AtomicUsize, Ordering}};
/// use tokio::net::TcpStream;
///
/// #[derive(Default)]
/// struct Counting(AtomicUsize);
///
/// impl Transport for Counting {
///     type Stream = TcpStream;
///
///     async fn wrap(&self, stream: TcpStream) -> io::Result<TcpStream> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(stream)
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Stream produced by the transport.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Prepares an accepted stream for serving.
    fn wrap(&self, stream: TcpStream) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP, the default transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plain;

impl Transport for Plain {
    type Stream = TcpStream;

    async fn wrap(&self, stream: TcpStream) -> io::Result<TcpStream> {
        Ok(stream)
    }
}
