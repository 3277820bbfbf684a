//! Structured cluster errors.
//!
//! A [`ClusterError`] is a tree: a numeric code, a message, free-form
//! attributes and an ordered list of inner errors. Both transports decode
//! failures into this one shape, so callers can search for a specific code no
//! matter which transport or which layer produced it.
//!
//! ## Formatting
//!
//! - `{}` (brief): the root message and its attributes, then only the *last*
//!   inner error, recursively.
//! - `{:#}` (detailed): every node in tree order, one attribute per line. The
//!   root line carries a `yt: ` prefix.
//!
//! ## Construction
//!
//! ```rust
//! use ytclient::cluster_err;
//! use ytclient::cluster_error::{codes, ErrorAttr};
//!
//! let cause = cluster_err!(codes::UNAVAILABLE, "chunk is unavailable");
//! let err = cluster_err!("read failed", ErrorAttr::new("path", "//tmp/t"), cause);
//! assert!(err.contains_code(codes::UNAVAILABLE));
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Error Codes
// ============================================================================

/// Numeric error code carried by every node of a [`ClusterError`] tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known error codes.
pub mod codes {
    use super::ErrorCode;

    /// Default code; suppressed when rendering.
    pub const GENERIC: ErrorCode = ErrorCode(1);
    pub const CANCELED: ErrorCode = ErrorCode(2);
    pub const TIMEOUT: ErrorCode = ErrorCode(3);
    pub const TRANSPORT_ERROR: ErrorCode = ErrorCode(100);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(101);
    pub const NO_SUCH_SERVICE: ErrorCode = ErrorCode(102);
    pub const NO_SUCH_METHOD: ErrorCode = ErrorCode(103);
    pub const UNAVAILABLE: ErrorCode = ErrorCode(105);
    pub const REQUEST_QUEUE_SIZE_LIMIT_EXCEEDED: ErrorCode = ErrorCode(108);
    pub const PROXY_BANNED: ErrorCode = ErrorCode(2100);
}

fn default_code() -> ErrorCode {
    codes::GENERIC
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// ClusterError
// ============================================================================

/// Recursive error value reported by the cluster.
///
/// Inner errors are owned by their parent, so a node can never appear as its
/// own ancestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterError {
    #[serde(default = "default_code")]
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attributes: HashMap<String, serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub inner_errors: Vec<ClusterError>,
}

/// Named attribute attached to a [`ClusterError`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorAttr {
    pub name: String,
    pub value: serde_json::Value,
}

impl ErrorAttr {
    /// Build an attribute from any serializable value.
    ///
    /// # Panics
    ///
    /// Panics if `value` cannot be represented as a tree value (for example a
    /// map with non-string keys). That is a misuse at the call site, not a
    /// condition callers are expected to handle.
    pub fn new(name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => panic!("can't create cluster error attribute {name:?}: {e}"),
        };
        ErrorAttr { name, value }
    }
}

/// One argument of [`ClusterError::from_args`].
///
/// The accepted kinds are closed: anything else is rejected at compile time
/// by the missing `From` conversion.
#[derive(Debug, Clone)]
pub enum ErrorArg {
    Code(ErrorCode),
    Message(String),
    Inner(ClusterError),
    Attr(ErrorAttr),
    Foreign(String),
}

impl ErrorArg {
    /// Wrap an arbitrary error value as a generic inner error.
    pub fn foreign(err: &dyn std::error::Error) -> Self {
        ErrorArg::Foreign(err.to_string())
    }
}

impl From<ErrorCode> for ErrorArg {
    fn from(code: ErrorCode) -> Self {
        ErrorArg::Code(code)
    }
}

impl From<&str> for ErrorArg {
    fn from(message: &str) -> Self {
        ErrorArg::Message(message.to_string())
    }
}

impl From<String> for ErrorArg {
    fn from(message: String) -> Self {
        ErrorArg::Message(message)
    }
}

impl From<ClusterError> for ErrorArg {
    fn from(inner: ClusterError) -> Self {
        ErrorArg::Inner(inner)
    }
}

impl From<ErrorAttr> for ErrorArg {
    fn from(attr: ErrorAttr) -> Self {
        ErrorArg::Attr(attr)
    }
}

/// Build a [`ClusterError`] from a heterogeneous argument list.
///
/// Codes override the default code, strings set the message, cluster errors
/// become inner errors, and [`ErrorAttr`]s populate the attributes.
#[macro_export]
macro_rules! cluster_err {
    ($($arg:expr),* $(,)?) => {
        $crate::cluster_error::ClusterError::from_args(vec![
            $($crate::cluster_error::ErrorArg::from($arg)),*
        ])
    };
}

impl ClusterError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ClusterError {
            code,
            message: message.into(),
            attributes: HashMap::new(),
            inner_errors: Vec::new(),
        }
    }

    /// Apply arguments in order on top of a generic, empty error.
    pub fn from_args(args: Vec<ErrorArg>) -> Self {
        let mut err = ClusterError::new(codes::GENERIC, "");
        for arg in args {
            match arg {
                ErrorArg::Code(code) => err.code = code,
                ErrorArg::Message(message) => err.message = message,
                ErrorArg::Inner(inner) => err.inner_errors.push(inner),
                ErrorArg::Attr(attr) => {
                    err.attributes.insert(attr.name, attr.value);
                }
                ErrorArg::Foreign(message) => {
                    err.inner_errors.push(ClusterError::new(codes::GENERIC, message));
                }
            }
        }
        err
    }

    /// Wrap a foreign error as a generic node carrying its text.
    pub fn wrap_foreign(err: &dyn std::error::Error) -> Self {
        ClusterError::new(codes::GENERIC, err.to_string())
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let attr = ErrorAttr::new(name, value);
        self.attributes.insert(attr.name, attr.value);
        self
    }

    pub fn with_inner(mut self, inner: ClusterError) -> Self {
        self.inner_errors.push(inner);
        self
    }

    /// First node in pre-order whose code equals `code`.
    pub fn find_code(&self, code: ErrorCode) -> Option<&ClusterError> {
        if self.code == code {
            return Some(self);
        }
        self.inner_errors.iter().find_map(|inner| inner.find_code(code))
    }

    pub fn contains_code(&self, code: ErrorCode) -> bool {
        self.find_code(code).is_some()
    }

    /// Whether any node's message matches `re`.
    ///
    /// Prefer [`ClusterError::contains_code`] where a code exists.
    pub fn matches_message(&self, re: &Regex) -> bool {
        re.is_match(&self.message) || self.inner_errors.iter().any(|inner| inner.matches_message(re))
    }

    fn sorted_attributes(&self) -> Vec<(&String, &serde_json::Value)> {
        let mut attrs: Vec<_> = self.attributes.iter().collect();
        attrs.sort_by(|a, b| a.0.cmp(b.0));
        attrs
    }

    fn fmt_brief(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = self;
        loop {
            f.write_str(&node.message)?;
            let attrs = node.sorted_attributes();
            if !attrs.is_empty() {
                f.write_str(" {")?;
                for (i, (name, value)) in attrs.into_iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={}", AttrValue(value))?;
                }
                f.write_str("}")?;
            }

            // Brief output only follows the last inner error.
            match node.inner_errors.last() {
                Some(last) => {
                    f.write_str(": ")?;
                    node = last;
                }
                None => return Ok(()),
            }
        }
    }

    fn fmt_detailed(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "yt: {}", self.message)?;
        self.fmt_attributes(f)?;
        for inner in &self.inner_errors {
            inner.fmt_node(f)?;
        }
        Ok(())
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        self.fmt_attributes(f)?;
        for inner in &self.inner_errors {
            inner.fmt_node(f)?;
        }
        Ok(())
    }

    fn fmt_attributes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show_code = self.code != codes::GENERIC;
        let attrs = self.sorted_attributes();

        let mut width = if show_code { "code".len() } else { 0 };
        for (name, _) in &attrs {
            width = width.max(name.len());
        }

        if show_code {
            writeln!(f, "  {:<width$} {}", "code:", self.code, width = width + 1)?;
        }
        for (name, value) in attrs {
            let label = format!("{name}:");
            writeln!(f, "  {:<width$} {}", label, AttrValue(value), width = width + 1)?;
        }
        Ok(())
    }
}

/// Strings render bare, everything else as compact JSON.
struct AttrValue<'a>(&'a serde_json::Value);

impl fmt::Display for AttrValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            self.fmt_detailed(f)
        } else {
            self.fmt_brief(f)
        }
    }
}

impl std::error::Error for ClusterError {}

// ============================================================================
// Search over arbitrary error values
// ============================================================================

fn as_cluster_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a ClusterError> {
    if let Some(cluster) = err.downcast_ref::<ClusterError>() {
        return Some(cluster);
    }
    err.downcast_ref::<crate::Error>()
        .and_then(crate::Error::cluster_error)
}

/// Locate the first structured error in `err`'s source chain.
pub fn find_cluster_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a ClusterError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(cluster) = as_cluster_error(e) {
            return Some(cluster);
        }
        current = e.source();
    }
    None
}

/// Depth-first search for `code` in the structured error wrapped by `err`.
///
/// Errors that do not wrap a [`ClusterError`] simply report not found.
pub fn find_error_code<'a>(
    err: &'a (dyn std::error::Error + 'static),
    code: ErrorCode,
) -> Option<&'a ClusterError> {
    find_cluster_error(err).and_then(|cluster| cluster.find_code(code))
}

pub fn contains_error_code(err: &(dyn std::error::Error + 'static), code: ErrorCode) -> bool {
    find_error_code(err, code).is_some()
}

/// Whether any message in the wrapped structured error matches `re`.
pub fn contains_message_re(err: &(dyn std::error::Error + 'static), re: &Regex) -> bool {
    find_cluster_error(err).is_some_and(|cluster| cluster.matches_message(re))
}

// ============================================================================
// Tests
// ============================================================================
