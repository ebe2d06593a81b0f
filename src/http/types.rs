//! Core protocol types shared by requests and responses

use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// Protocol token written at the start of every status line.
pub const PROTOCOL: &str = "HTTP/1.1";

/// Header carrying the body length. Matched case-insensitively on requests.
pub const HEADER_CONTENT_LENGTH: &str = "content-length";

/// Header carrying the body type. Matched case-insensitively on requests.
pub const HEADER_CONTENT_TYPE: &str = "content-type";

// METHOD

/// Request methods understood by the parser
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// Bodyless request
    Get,
    /// Request with a fixed-length body
    Post,
}

impl Method {
    const ALL: [Method; 2] = [Method::Get, Method::Post];

    /// Canonical upper-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }

    /// Case-insensitive lookup of a method token.
    #[inline]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(token))
    }

    /// Whether requests with this method carry a body.
    #[inline]
    pub const fn has_body(&self) -> bool {
        match self {
            Method::Get => false,
            Method::Post => true,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// CONTENT TYPE

/// Type of a request or response body.
///
/// Equality and hashing use the wire string only, so
/// `ContentType::Custom("application/json".into()) == ContentType::Json`.
///
/// # Examples
/// ```
/// use remote_server::ContentType;
///
/// assert_eq!(ContentType::Json.as_str(), "application/json");
/// assert_eq!(ContentType::Custom("text/plain".into()), ContentType::Text);
/// assert_eq!(
///     ContentType::Unknown("application/weird".into()),
///     ContentType::Custom("application/weird".into()),
/// );
/// ```
#[derive(Debug, Clone)]
pub enum ContentType {
    /// No `content-type` header was sent.
    None,
    /// `application/json`
    Json,
    /// `text/plain`
    Text,
    /// A value matched neither a built-in nor a custom type.
    Unknown(String),
    /// A caller-registered type.
    Custom(String),
}

impl ContentType {
    /// Canonical wire string.
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::None => "none",
            ContentType::Json => "application/json",
            ContentType::Text => "text/plain",
            ContentType::Unknown(value) | ContentType::Custom(value) => value,
        }
    }

    /// Case-insensitive match against the built-in types.
    #[inline]
    pub(crate) fn builtin(value: &str) -> Option<Self> {
        [ContentType::Json, ContentType::Text]
            .into_iter()
            .find(|known| known.as_str().eq_ignore_ascii_case(value))
    }
}

impl PartialEq for ContentType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for ContentType {}

impl Hash for ContentType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// CONTENT

/// A body together with its type.
///
/// Keeps "body present" and "content type present" in one place, so one
/// can never exist without the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub(crate) body: Vec<u8>,
    pub(crate) content_type: ContentType,
}

impl Content {
    /// Creates a content from raw bytes.
    #[inline]
    pub fn new<B: Into<Vec<u8>>>(body: B, content_type: ContentType) -> Self {
        Self {
            body: body.into(),
            content_type,
        }
    }

    /// Raw body bytes.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Type of the body.
    #[inline(always)]
    pub fn content_type(&self) -> &ContentType {
        &self.content_type
    }

    /// Byte length, as written to `content-length`.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// `true` for a zero-length body.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub(crate) fn fmt_summary(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.content_type == ContentType::Text {
            write!(f, ",body=\"{}\"", String::from_utf8_lossy(&self.body))?;
        }
        write!(
            f,
            ",contentType={},contentLength={}",
            self.content_type,
            self.body.len()
        )
    }
}

// STATUS DESCRIPTION

/// Built-in status description table.
///
/// # Examples
/// ```
/// use remote_server::default_code_description;
///
/// assert_eq!(default_code_description(200), "Success");
/// assert_eq!(default_code_description(418), "Unknown");
/// ```
pub fn default_code_description(code: u16) -> &'static str {
    match code {
        200 => "Success",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
