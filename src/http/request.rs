use crate::{
    errors::ParseError,
    http::types::{Content, ContentType, Method, HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE},
    limits::ReqLimits,
    query::{self, Query},
};
use memchr::{memchr, memmem};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// A parsed request.
///
/// One value is produced per connection and handed to the
/// [`Handler`](crate::Handler) by reference. A `GET` never carries a body;
/// a `POST` always carries one of exactly the announced length.
///
/// # Wire format
///
/// ```text
/// [METHOD] SP [TARGET] [SP anything] LF
/// [NAME] ": " [VALUE] LF
/// ...
/// LF
/// [BODY: exactly content-length bytes, POST only]
/// ```
///
/// Lines may end with `CRLF` or a bare `LF`. The method is matched
/// case-insensitively against `GET` and `POST`; anything after the target
/// on the request line (usually the protocol version) is ignored. Header
/// lines that do not contain exactly one `": "` are skipped, and at least
/// one well-formed header is required. Keys keep their original casing;
/// use [`header`](Request::header) for case-insensitive lookup.
///
/// # Examples
/// ```
/// use remote_server::{ContentType, Method, Request};
///
/// let request = Request::new(
///     Method::Get,
///     "/test/get",
///     Default::default(),
///     [("Host".to_string(), "localhost".to_string())].into(),
///     None,
/// )
/// .unwrap();
///
/// assert_eq!(request.method(), Method::Get);
/// assert_eq!(request.header("host"), Some("localhost"));
/// assert!(request.body().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `GET`, never with a body.
    Get(RequestHead),
    /// `POST`, always with a body.
    Post(RequestHead, Content),
}

/// Everything a request carries besides its body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHead {
    /// Target path without the query component.
    pub path: String,
    /// Query parameters, unique keys.
    pub query_parameters: HashMap<String, String>,
    /// Headers with their original key casing.
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Builds a request, checking that body presence matches the method.
    ///
    /// # Errors
    ///
    /// [`ParseError::BadRequestType`] for a `GET` with content or a `POST`
    /// without content.
    pub fn new<P: Into<String>>(
        method: Method,
        path: P,
        query_parameters: HashMap<String, String>,
        headers: HashMap<String, String>,
        content: Option<Content>,
    ) -> Result<Self, ParseError> {
        let head = RequestHead {
            path: path.into(),
            query_parameters,
            headers,
        };

        match (method.has_body(), content) {
            (false, None) => Ok(Request::Get(head)),
            (true, Some(content)) => Ok(Request::Post(head, content)),
            _ => Err(ParseError::BadRequestType),
        }
    }

    #[inline(always)]
    pub const fn method(&self) -> Method {
        match self {
            Request::Get(_) => Method::Get,
            Request::Post(..) => Method::Post,
        }
    }

    #[inline(always)]
    pub const fn head(&self) -> &RequestHead {
        match self {
            Request::Get(head) | Request::Post(head, _) => head,
        }
    }

    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.head().path
    }

    #[inline(always)]
    pub fn query_parameters(&self) -> &HashMap<String, String> {
        &self.head().query_parameters
    }

    /// Returns one query parameter by exact key.
    #[inline]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.head().query_parameters.get(key).map(String::as_str)
    }

    #[inline(always)]
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.head().headers
    }

    /// Returns a header value with case-insensitive name matching.
    /// Surrounding whitespace in stored names is ignored.
    ///
    /// When several stored names match, the smallest one in byte order wins.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.head().headers, name)
    }

    #[inline(always)]
    pub const fn content(&self) -> Option<&Content> {
        match self {
            Request::Get(_) => None,
            Request::Post(_, content) => Some(content),
        }
    }

    /// Returns the request body if present.
    #[inline]
    pub fn body(&self) -> Option<&[u8]> {
        self.content().map(Content::body)
    }

    #[inline]
    pub fn content_type(&self) -> Option<&ContentType> {
        self.content().map(Content::content_type)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = self.head();
        write!(f, "Request{{type={},path={}", self.method(), head.path)?;
        if !head.query_parameters.is_empty() {
            write!(f, ",queryParameters={:?}", head.query_parameters)?;
        }
        if !head.headers.is_empty() {
            write!(f, ",headers={:?}", head.headers)?;
        }
        if let Some(content) = self.content() {
            content.fmt_summary(f)?;
        }
        f.write_str("}")
    }
}

#[inline]
fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name))
        .min_by_key(|(key, _)| key.as_str())
        .map(|(_, value)| value.as_str())
}

/// The first header named `content-length` or `content-type`, in wire order.
///
/// A repeat of the exact same name replaces the value, as in the header map;
/// a differently cased repeat is ignored.
#[derive(Debug, Default)]
struct FirstHeader(Option<(String, String)>);

impl FirstHeader {
    fn offer(&mut self, key: &str, value: &str) {
        if let Some((first, stored)) = &mut self.0 {
            if first == key {
                *stored = value.to_owned();
            }
            return;
        }

        self.0 = Some((key.to_owned(), value.to_owned()));
    }

    #[inline]
    fn value(&self) -> Option<&str> {
        self.0.as_ref().map(|(_, value)| value.as_str())
    }
}

/// Headers that decide how the body is read.
#[derive(Debug, Default)]
struct Framing {
    length: FirstHeader,
    content_type: FirstHeader,
}

impl Framing {
    fn offer(&mut self, key: &str, value: &str) {
        let name = key.trim();

        if name.eq_ignore_ascii_case(HEADER_CONTENT_LENGTH) {
            self.length.offer(key, value);
        } else if name.eq_ignore_ascii_case(HEADER_CONTENT_TYPE) {
            self.content_type.offer(key, value);
        }
    }
}

impl From<query::Error> for ParseError {
    fn from(_: query::Error) -> Self {
        ParseError::UnknownRequestQuery
    }
}

//

/// Caller-registered content types, keyed by lower-cased wire value.
pub(crate) type CustomTypes = Arc<HashMap<String, ContentType>>;

/// Reads one [`Request`] from a buffered byte stream.
///
/// Head lines are read line by line; the body is then read with an
/// exact-length binary read from the same buffer, so bytes after the head
/// are never decoded as text.
///
/// # Examples
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use remote_server::{limits::ReqLimits, ContentType, Parser};
/// use tokio::io::BufReader;
///
/// let raw = b"POST /echo HTTP/1.1\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello";
/// let parser = Parser::new(ReqLimits::default());
///
/// let request = parser.parse(&mut BufReader::new(&raw[..])).await.unwrap();
/// assert_eq!(request.content_type(), Some(&ContentType::Text));
/// assert_eq!(request.body(), Some(&b"hello"[..]));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Parser {
    limits: ReqLimits,
    custom_types: CustomTypes,
}

impl Parser {
    pub fn new(limits: ReqLimits) -> Self {
        Self {
            limits,
            custom_types: CustomTypes::default(),
        }
    }

    /// Registers content types consulted after the built-in ones.
    ///
    /// Lookup is case-insensitive; matching values are reported as
    /// [`ContentType::Custom`].
    pub fn with_custom_types<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = values
            .into_iter()
            .map(|value| {
                let value = value.into();
                (value.to_ascii_lowercase(), ContentType::Custom(value))
            })
            .collect();

        self.custom_types = Arc::new(table);
        self
    }

    pub(crate) fn limits(&self) -> &ReqLimits {
        &self.limits
    }

    /// Parses a request.
    ///
    /// # Errors
    ///
    /// One [`ParseError`] kind per malformed case; stream faults come back
    /// as [`ParseError::Io`] carrying the original error.
    pub async fn parse<R>(&self, reader: &mut R) -> Result<Request, ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let first_line = self
            .read_line(reader)
            .await?
            .filter(|line| !line.is_empty())
            .ok_or(ParseError::EmptyRequest)?;

        let mut tokens = first_line.split(' ');
        let method = tokens
            .next()
            .and_then(Method::from_token)
            .ok_or(ParseError::UnknownRequestType)?;
        let target = tokens
            .next()
            .filter(|target| !target.is_empty())
            .ok_or(ParseError::UnknownRequestQuery)?;

        let (path, query_parameters) = Query::split_target(target)?;
        let path = path.to_owned();

        let (headers, framing) = self.read_headers(reader).await?;
        if headers.is_empty() {
            return Err(ParseError::EmptyRequest);
        }

        let head = RequestHead {
            path,
            query_parameters,
            headers,
        };

        match method {
            Method::Get => Ok(Request::Get(head)),
            Method::Post => {
                let content = self.read_content(reader, &framing).await?;
                Ok(Request::Post(head, content))
            }
        }
    }

    async fn read_headers<R>(
        &self,
        reader: &mut R,
    ) -> Result<(HashMap<String, String>, Framing), ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut headers = HashMap::new();
        let mut framing = Framing::default();
        let mut lines = 0;

        while let Some(line) = self.read_line(reader).await? {
            if line.is_empty() {
                break;
            }

            lines += 1;
            if lines > self.limits.header_count {
                return Err(ParseError::TooManyHeaders);
            }

            if let Some((key, value)) = split_header(&line) {
                framing.offer(key, value);
                headers.insert(key.to_owned(), value.to_owned());
            }
        }

        Ok((headers, framing))
    }

    async fn read_content<R>(
        &self,
        reader: &mut R,
        framing: &Framing,
    ) -> Result<Content, ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let length = framing
            .length
            .value()
            .and_then(|value| value.parse::<usize>().ok())
            .ok_or(ParseError::UnknownContentLength)?;

        if length > self.limits.body_size {
            return Err(ParseError::BodyTooLarge {
                announced: length,
                limit: self.limits.body_size,
            });
        }

        let content_type = self.content_type(framing.content_type.value())?;

        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;

        Ok(Content { body, content_type })
    }

    fn content_type(&self, value: Option<&str>) -> Result<ContentType, ParseError> {
        let strict = self.limits.strict_content_type;

        let Some(value) = value else {
            return match strict {
                true => Err(ParseError::UnknownContentType),
                false => Ok(ContentType::None),
            };
        };

        if let Some(builtin) = ContentType::builtin(value) {
            return Ok(builtin);
        }

        match self.custom_types.get(&value.to_ascii_lowercase()) {
            Some(custom) => Ok(custom.clone()),
            None if strict => Err(ParseError::UnknownContentType),
            None => Ok(ContentType::Unknown(value.to_owned())),
        }
    }

    /// Reads one line without its `LF` / `CRLF` terminator.
    ///
    /// Returns `None` at end of stream. A final line without terminator is
    /// returned as is.
    async fn read_line<R>(&self, reader: &mut R) -> Result<Option<String>, ParseError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();

        loop {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                break;
            }

            let (taken, complete) = match memchr(b'\n', available) {
                Some(index) => (index + 1, true),
                None => (available.len(), false),
            };

            if line.len() + taken > self.limits.line_size {
                return Err(ParseError::LineTooLong);
            }

            line.extend_from_slice(&available[..taken]);
            reader.consume(taken);

            if complete {
                break;
            }
        }

        if line.is_empty() {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }

        Ok(Some(decode(line)))
    }
}

#[inline]
fn decode(bytes: Vec<u8>) -> String {
    match simdutf8::basic::from_utf8(&bytes) {
        // SAFETY: validated just above
        Ok(_) => unsafe { String::from_utf8_unchecked(bytes) },
        Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// Splits `key: value`; the line must contain exactly one `": "`.
#[inline]
fn split_header(line: &str) -> Option<(&str, &str)> {
    let mut found = memmem::find_iter(line.as_bytes(), b": ");
    let index = found.next()?;

    match found.next() {
        Some(_) => None,
        None => Some((&line[..index], &line[index + 2..])),
    }
}
