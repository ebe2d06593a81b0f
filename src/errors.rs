//! Error types for request parsing, connection serving and server lifecycle.

use std::{error, fmt, io};

/// Boxed error returned by a [`Handler`](crate::Handler).
pub type HandlerError = Box<dyn error::Error + Send + Sync + 'static>;

/// A request could not be read from the connection.
///
/// Every malformed request maps to one specific variant. Stream faults
/// surface unchanged as [`ParseError::Io`].
#[derive(Debug)]
pub enum ParseError {
    /// The request line is missing or empty, or no header line was collected.
    EmptyRequest,
    /// The first token of the request line is not a known method.
    UnknownRequestType,
    /// The request target is missing, empty, or has a malformed query.
    UnknownRequestQuery,
    /// A `POST` without a valid non-negative `content-length`.
    UnknownContentLength,
    /// A `POST` without a recognised `content-type`.
    ///
    /// Only produced when [`ReqLimits::strict_content_type`](crate::limits::ReqLimits::strict_content_type)
    /// is enabled.
    UnknownContentType,
    /// Body presence does not match the request method.
    ///
    /// The parser builds requests per method, so this only comes out of
    /// [`Request::new`](crate::Request::new).
    BadRequestType,

    /// A head line exceeded [`ReqLimits::line_size`](crate::limits::ReqLimits::line_size).
    LineTooLong,
    /// More header lines than [`ReqLimits::header_count`](crate::limits::ReqLimits::header_count).
    TooManyHeaders,
    /// The announced body exceeds [`ReqLimits::body_size`](crate::limits::ReqLimits::body_size).
    BodyTooLarge {
        /// Announced `content-length`.
        announced: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Underlying stream fault, including read timeouts.
    Io(io::Error),
}

impl ParseError {
    /// Short name of the error kind, as used by the default error hook.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EmptyRequest => "EmptyRequest",
            Self::UnknownRequestType => "UnknownRequestType",
            Self::UnknownRequestQuery => "UnknownRequestQuery",
            Self::UnknownContentLength => "UnknownContentLength",
            Self::UnknownContentType => "UnknownContentType",
            Self::BadRequestType => "BadRequestType",
            Self::LineTooLong => "LineTooLong",
            Self::TooManyHeaders => "TooManyHeaders",
            Self::BodyTooLarge { .. } => "BodyTooLarge",
            Self::Io(_) => "Io",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::UnknownRequestType => write!(f, "unknown request type"),
            Self::UnknownRequestQuery => write!(f, "unknown request query"),
            Self::UnknownContentLength => write!(f, "unknown content length"),
            Self::UnknownContentType => write!(f, "unknown content type"),
            Self::BadRequestType => write!(f, "body presence does not match request type"),
            Self::LineTooLong => write!(f, "request line too long"),
            Self::TooManyHeaders => write!(f, "too many headers"),
            Self::BodyTooLarge { announced, limit } => {
                write!(f, "body too large: announced={announced}, limit={limit}")
            }
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ParseError {
    fn from(err: io::Error) -> Self {
        ParseError::Io(err)
    }
}

/// Why a connection did not get a response from its handler.
///
/// Passed to the error hook, which turns it into the response written
/// back to the client.
#[derive(Debug)]
pub enum ServeError {
    /// The request could not be parsed.
    Parse(ParseError),
    /// The handler returned an error.
    Handler(HandlerError),
    /// The handler panicked; carries the panic message when it was a string.
    Panic(String),
}

impl ServeError {
    /// Short name of the failure, as used by the default error hook.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parse(err) => err.name(),
            Self::Handler(_) => "HandlerError",
            Self::Panic(_) => "HandlerPanic",
        }
    }
}

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "{err}"),
            Self::Handler(err) => write!(f, "{err}"),
            Self::Panic(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

impl error::Error for ServeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Handler(err) => Some(err.as_ref()),
            Self::Panic(_) => None,
        }
    }
}

impl From<ParseError> for ServeError {
    fn from(err: ParseError) -> Self {
        ServeError::Parse(err)
    }
}

/// A server could not be started.
#[derive(Debug)]
pub enum StartError {
    /// A server is already registered on this port.
    AlreadyStarted {
        /// The contested port.
        port: u16,
    },
    /// Creating or binding the listening socket failed.
    Io(io::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted { port } => {
                write!(f, "server on port number: {port} already started")
            }
            Self::Io(err) => write!(f, "failed to bind listener: {err}"),
        }
    }
}

impl error::Error for StartError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::AlreadyStarted { .. } => None,
        }
    }
}

impl From<io::Error> for StartError {
    fn from(err: io::Error) -> Self {
        StartError::Io(err)
    }
}
