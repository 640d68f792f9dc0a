use crate::{
  error::{Error, ErrorKind},
  interfaces::{Conn, Pool},
};
use bytes_utils::Str;
use futures::future::BoxFuture;
use std::{fmt, future::Future, str::FromStr, sync::Arc};
use url::Url;

/// The default port on which sentinel nodes listen.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// State necessary to identify or connect to a server.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Server {
  /// The hostname or IP address of the server.
  pub host: Str,
  /// The port on which the server is listening.
  pub port: u16,
}

impl Server {
  /// Create a new `Server` from the provided parts.
  pub fn new<H: Into<Str>>(host: H, port: u16) -> Server {
    Server {
      host: host.into(),
      port,
    }
  }
}

impl fmt::Display for Server {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}

impl From<(&str, u16)> for Server {
  fn from((host, port): (&str, u16)) -> Self {
    Server::new(host, port)
  }
}

impl From<(String, u16)> for Server {
  fn from((host, port): (String, u16)) -> Self {
    Server::new(host, port)
  }
}

/// Parse a server from a `host:port` string or a `redis://host:port` style URL.
///
/// A URL without a port implies the default sentinel port.
impl FromStr for Server {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.contains("://") {
      let url = Url::parse(s)?;
      let host = url
        .host_str()
        .ok_or_else(|| Error::new(ErrorKind::Config, "Invalid server address: missing host."))?;
      Ok(Server::new(host.to_owned(), url.port().unwrap_or(DEFAULT_SENTINEL_PORT)))
    } else {
      let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| Error::new(ErrorKind::Config, "Invalid server address: expected host:port."))?;
      if host.is_empty() {
        return Err(Error::new(ErrorKind::Config, "Invalid server address: missing host."));
      }
      let port = port
        .parse()
        .map_err(|_| Error::new(ErrorKind::Config, "Invalid server address: invalid port."))?;
      Ok(Server::new(host.to_owned(), port))
    }
  }
}

/// A shared handle to a client pool for one server.
pub type SharedPool = Arc<dyn Pool>;

/// A function that opens a single connection to a sentinel node.
pub type ConnFunc = Arc<dyn Fn(Server) -> BoxFuture<'static, Result<Box<dyn Conn>, Error>> + Send + Sync>;

/// A function that creates a client pool for a server in the replication group.
pub type PoolFunc = Arc<dyn Fn(Server) -> BoxFuture<'static, Result<SharedPool, Error>> + Send + Sync>;

/// Create a [ConnFunc] from an async closure.
pub fn conn_func<F, Fut>(func: F) -> ConnFunc
where
  F: Fn(Server) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Box<dyn Conn>, Error>> + Send + 'static,
{
  Arc::new(move |server| -> BoxFuture<'static, Result<Box<dyn Conn>, Error>> { Box::pin(func(server)) })
}

/// Create a [PoolFunc] from an async closure.
pub fn pool_func<F, Fut>(func: F) -> PoolFunc
where
  F: Fn(Server) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<SharedPool, Error>> + Send + 'static,
{
  Arc::new(move |server| -> BoxFuture<'static, Result<SharedPool, Error>> { Box::pin(func(server)) })
}

/// A server and the role it currently holds in the replication group.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeInfo {
  /// The server address.
  pub server:  Server,
  /// Whether the server is currently the primary.
  pub primary: bool,
}

/// A description of one committed topology change.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TopologyChanged {
  /// Servers that joined the replication group.
  pub added:   Vec<NodeInfo>,
  /// Servers that left the replication group. Their pools are closed after this event.
  pub removed: Vec<NodeInfo>,
  /// Servers present before and after whose role changed.
  pub changed: Vec<NodeInfo>,
}

/// An observer for committed topology changes.
///
/// Callbacks run synchronously on the background reconciliation task and therefore
/// block it. They must not call back into the client.
pub trait Tracer: Send + Sync {
  fn topology_changed(&self, _event: TopologyChanged) {}
}

/// The clients for a replication group, keyed by role.
#[derive(Clone)]
pub struct ReplicaSet {
  /// The client pool for the current primary.
  pub primary:     SharedPool,
  /// Client pools for the current replicas.
  pub secondaries: Vec<SharedPool>,
}

impl fmt::Debug for ReplicaSet {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("ReplicaSet")
      .field("primary", &self.primary.addr())
      .field("secondaries", &self.secondaries.iter().map(|p| p.addr()).collect::<Vec<_>>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn should_parse_host_port_pairs() {
    let server: Server = "10.0.0.1:26379".parse().unwrap();
    assert_eq!(server, Server::new("10.0.0.1", 26379));
  }

  #[test]
  fn should_parse_redis_urls() {
    let server: Server = "redis://sentinel-1.internal:26380".parse().unwrap();
    assert_eq!(server, Server::new("sentinel-1.internal", 26380));

    let server: Server = "redis://sentinel-1.internal".parse().unwrap();
    assert_eq!(server.port, DEFAULT_SENTINEL_PORT);
  }

  #[test]
  fn should_reject_invalid_addresses() {
    assert!("10.0.0.1".parse::<Server>().is_err());
    assert!(":26379".parse::<Server>().is_err());
    assert!("10.0.0.1:redis".parse::<Server>().is_err());
  }
}
