//! Response model and its wire encoding.

use crate::http::types::{Content, ContentType, HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE, PROTOCOL};
use std::{collections::HashMap, fmt, io};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A response returned by a [`Handler`](crate::Handler) or an error hook.
///
/// # Wire format
///
/// ```text
/// HTTP/1.1 SP [CODE] SP [DESCRIPTION] CRLF
/// content-type: [TYPE] CRLF        (only with a body)
/// content-length: [N] CRLF         (only with a body)
/// CRLF
/// [BODY]
/// ```
///
/// The description comes from the server's code description hook, which
/// defaults to [`default_code_description`](crate::default_code_description).
/// Entries in [`headers`](Response::headers) are kept on the value but are
/// not written to the wire.
///
/// # Examples
/// ```
/// use remote_server::{ContentType, Response};
///
/// let response = Response::text(200, "success").header("x-request-id", "42");
///
/// assert_eq!(response.code(), 200);
/// assert_eq!(response.content_type(), Some(&ContentType::Text));
/// assert_eq!(response.body(), Some(&b"success"[..]));
/// assert_eq!(
///     response.serialize("Success"),
///     b"HTTP/1.1 200 Success\r\ncontent-type: text/plain\r\ncontent-length: 7\r\n\r\nsuccess"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    headers: HashMap<String, String>,
    content: Option<Content>,
}

impl Response {
    /// A bodyless response.
    #[inline]
    pub fn new(code: u16) -> Self {
        Self {
            code,
            headers: HashMap::new(),
            content: None,
        }
    }

    /// A response with a `text/plain` body.
    #[inline]
    pub fn text<B: Into<String>>(code: u16, body: B) -> Self {
        Self::with_body(code, body.into().into_bytes(), ContentType::Text)
    }

    /// A response with an `application/json` body. The body is sent as is.
    #[inline]
    pub fn json<B: Into<String>>(code: u16, body: B) -> Self {
        Self::with_body(code, body.into().into_bytes(), ContentType::Json)
    }

    /// A response with raw bytes of any type.
    #[inline]
    pub fn with_body<B: Into<Vec<u8>>>(code: u16, body: B, content_type: ContentType) -> Self {
        Self {
            code,
            headers: HashMap::new(),
            content: Some(Content::new(body, content_type)),
        }
    }

    /// Adds a header to the value.
    #[inline]
    pub fn header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[inline(always)]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[inline(always)]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    #[inline(always)]
    pub const fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.content.as_ref().map(Content::body)
    }

    #[inline]
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content.as_ref().map(Content::content_type)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response{{code={}", self.code)?;
        if !self.headers.is_empty() {
            write!(f, ",headers={:?}", self.headers)?;
        }
        if let Some(content) = &self.content {
            content.fmt_summary(f)?;
        }
        f.write_str("}")
    }
}

// ENCODING

impl Response {
    /// Encodes the status line, content headers and blank line.
    pub fn serialize_head(&self, description: &str) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(64);

        buffer.extend_from_slice(PROTOCOL.as_bytes());
        buffer.push(b' ');
        write_number(&mut buffer, self.code as usize);
        buffer.push(b' ');
        buffer.extend_from_slice(description.as_bytes());
        buffer.extend_from_slice(b"\r\n");

        if let Some(content) = &self.content {
            buffer.extend_from_slice(HEADER_CONTENT_TYPE.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(content.content_type.as_str().as_bytes());
            buffer.extend_from_slice(b"\r\n");

            buffer.extend_from_slice(HEADER_CONTENT_LENGTH.as_bytes());
            buffer.extend_from_slice(b": ");
            write_number(&mut buffer, content.len());
            buffer.extend_from_slice(b"\r\n");
        }

        buffer.extend_from_slice(b"\r\n");
        buffer
    }

    /// Encodes the whole response into one buffer.
    pub fn serialize(&self, description: &str) -> Vec<u8> {
        let mut buffer = self.serialize_head(description);
        if let Some(content) = &self.content {
            buffer.extend_from_slice(&content.body);
        }
        buffer
    }

    /// Writes the response, flushing after the head and after the body.
    ///
    /// The body is written as raw bytes with no text encoding applied.
    pub async fn write_to<W>(&self, writer: &mut W, description: &str) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.serialize_head(description)).await?;
        writer.flush().await?;

        if let Some(content) = &self.content {
            writer.write_all(&content.body).await?;
            writer.flush().await?;
        }

        Ok(())
    }
}

#[inline]
fn write_number(buffer: &mut Vec<u8>, mut n: usize) {
    let mut digits = [b'0'; 20];
    let mut i = digits.len();

    loop {
        i -= 1;
        digits[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }

    buffer.extend_from_slice(&digits[i..]);
}
