//! Request target splitting and strict query string parsing.

use memchr::{memchr, memchr_iter};
use std::{collections::HashMap, error, fmt};

/// Strict query string parser.
///
/// A target is `path[?query]` with at most one `?`. The query is a list of
/// `key=value` pairs joined by `&`, and every pair must contain exactly one
/// `=`. Empty keys and empty values are allowed (`=v`, `k=`), bare keys
/// (`flag`) and empty pairs (`a=1&&b=2`) are not. No percent-decoding is
/// applied. Repeated keys keep the last value.
///
/// # Examples
/// ```rust
/// use remote_server::query::Query;
///
/// let (path, params) = Query::split_target("/search?q=rust&page=2").unwrap();
/// assert_eq!(path, "/search");
/// assert_eq!(params["q"], "rust");
/// assert_eq!(params["page"], "2");
///
/// assert!(Query::split_target("/search?flag").is_err());
/// assert!(Query::split_target("/a?b=1?c=2").is_err());
/// ```
pub struct Query;

impl Query {
    /// Splits a request target into its path and query parameters.
    pub fn split_target(target: &str) -> Result<(&str, HashMap<String, String>), Error> {
        let bytes = target.as_bytes();
        let mut marks = memchr_iter(b'?', bytes);

        match (marks.next(), marks.next()) {
            (None, _) => Ok((target, HashMap::new())),
            (Some(mark), None) => Ok((&target[..mark], Self::parse(&target[mark + 1..])?)),
            (Some(_), Some(_)) => Err(Error::ExtraSeparator),
        }
    }

    /// Parses the part after `?` into a map.
    ///
    /// # Examples
    /// ```
    /// use remote_server::query::{Error, Query};
    ///
    /// let params = Query::parse("name=john&age=").unwrap();
    /// assert_eq!(params["name"], "john");
    /// assert_eq!(params["age"], "");
    ///
    /// assert_eq!(Query::parse(""), Err(Error::MalformedPair(String::new())));
    /// assert_eq!(Query::parse("a=b=c"), Err(Error::MalformedPair("a=b=c".to_string())));
    /// ```
    pub fn parse(query: &str) -> Result<HashMap<String, String>, Error> {
        let mut result = HashMap::new();

        for pair in query.split('&') {
            let (key, value) = Self::split_pair(pair)?;
            result.insert(key.to_owned(), value.to_owned());
        }

        Ok(result)
    }

    #[inline]
    fn split_pair(pair: &str) -> Result<(&str, &str), Error> {
        let bytes = pair.as_bytes();
        let index = memchr(b'=', bytes).ok_or_else(|| Error::MalformedPair(pair.to_owned()))?;

        if memchr(b'=', &bytes[index + 1..]).is_some() {
            return Err(Error::MalformedPair(pair.to_owned()));
        }

        Ok((&pair[..index], &pair[index + 1..]))
    }
}

/// Query parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The target contains more than one `?`.
    ExtraSeparator,
    /// A pair does not split on `=` into exactly two parts.
    ///
    /// # Fields
    /// - `0`: The offending pair
    MalformedPair(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ExtraSeparator => write!(f, "query contains more than one '?'"),
            Error::MalformedPair(pair) => write!(f, "malformed query parameter: {pair:?}"),
        }
    }
}
