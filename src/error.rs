use std::{
  borrow::{Borrow, Cow},
  fmt,
  io::Error as IoError,
};
use url::ParseError;

/// An enum representing the type of error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ErrorKind {
  /// A fatal client configuration error.
  Config,
  /// An IO error with an underlying connection.
  IO,
  /// A protocol error such as an invalid or unexpected reply from the server.
  Protocol,
  /// An error discovering or communicating with the sentinel deployment.
  Sentinel,
  /// A timeout error.
  Timeout,
  /// An error indicating the request was canceled.
  Canceled,
  /// An error indicating the client was closed before or during the operation.
  Closed,
  /// An unknown error.
  Unknown,
}

impl ErrorKind {
  pub fn to_str(&self) -> &'static str {
    match *self {
      ErrorKind::Config => "Config Error",
      ErrorKind::IO => "IO Error",
      ErrorKind::Protocol => "Protocol Error",
      ErrorKind::Sentinel => "Sentinel Error",
      ErrorKind::Timeout => "Timeout Error",
      ErrorKind::Canceled => "Canceled",
      ErrorKind::Closed => "Closed",
      ErrorKind::Unknown => "Unknown Error",
    }
  }
}

/// An error from the server or client.
#[derive(Debug)]
pub struct Error {
  /// Details about the specific error condition.
  details: Cow<'static, str>,
  /// The kind of error.
  kind:    ErrorKind,
}

impl Clone for Error {
  fn clone(&self) -> Self {
    Error::new(self.kind.clone(), self.details.clone())
  }
}

impl PartialEq for Error {
  fn eq(&self, other: &Self) -> bool {
    self.kind == other.kind && self.details == other.details
  }
}

impl Eq for Error {}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}: {}", self.kind.to_str(), self.details)
  }
}

#[doc(hidden)]
impl From<IoError> for Error {
  fn from(e: IoError) -> Self {
    Error::new(ErrorKind::IO, format!("{e:?}"))
  }
}

#[doc(hidden)]
impl From<ParseError> for Error {
  fn from(e: ParseError) -> Self {
    Error::new(ErrorKind::Config, format!("{e:?}"))
  }
}

#[doc(hidden)]
impl From<tokio::sync::oneshot::error::RecvError> for Error {
  fn from(e: tokio::sync::oneshot::error::RecvError) -> Self {
    Error::new(ErrorKind::Unknown, format!("{e}"))
  }
}

#[doc(hidden)]
impl From<tokio::task::JoinError> for Error {
  fn from(e: tokio::task::JoinError) -> Self {
    Error::new(ErrorKind::Unknown, format!("Spawn Error: {e:?}"))
  }
}

impl Error {
  /// Create a new error with the provided details.
  pub fn new<T>(kind: ErrorKind, details: T) -> Error
  where
    T: Into<Cow<'static, str>>,
  {
    Error {
      kind,
      details: details.into(),
    }
  }

  /// Read the type of error without any associated data.
  pub fn kind(&self) -> &ErrorKind {
    &self.kind
  }

  /// Read details about the error.
  pub fn details(&self) -> &str {
    self.details.borrow()
  }

  /// Create a new empty Canceled error.
  pub fn new_canceled() -> Self {
    Error::new(ErrorKind::Canceled, "Canceled.")
  }

  /// Create a new error indicating the client is closed.
  pub(crate) fn new_closed() -> Self {
    Error::new(ErrorKind::Closed, "Client is closed.")
  }

  /// Create a new protocol error with the provided details.
  pub(crate) fn new_protocol<T>(details: T) -> Self
  where
    T: Into<Cow<'static, str>>,
  {
    Error::new(ErrorKind::Protocol, details)
  }

  /// Whether the error is a `Canceled` error.
  pub fn is_canceled(&self) -> bool {
    matches!(self.kind, ErrorKind::Canceled)
  }

  /// Whether the error is a `Closed` error.
  pub fn is_closed(&self) -> bool {
    matches!(self.kind, ErrorKind::Closed)
  }

  /// Whether the error is a `Timeout` error.
  pub fn is_timeout(&self) -> bool {
    matches!(self.kind, ErrorKind::Timeout)
  }

  /// Whether the error is a `Protocol` error.
  pub fn is_protocol(&self) -> bool {
    matches!(self.kind, ErrorKind::Protocol)
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    None
  }
}
