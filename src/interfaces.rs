use crate::{
  error::Error,
  protocol::{Command, Value},
  types::Server,
};
use async_trait::async_trait;

/// A single connection to a sentinel node.
///
/// The crate ships no wire codec; implementations own the socket and the encoding.
/// Dropping the connection closes it.
#[async_trait]
pub trait Conn: Send {
  /// Send the provided commands as one pipeline and read one reply per command.
  async fn run(&mut self, commands: &[Command]) -> Result<Vec<Value>, Error>;

  /// Read the next pushed frame, such as a pub/sub message.
  ///
  /// This should wait until a frame arrives or the connection dies.
  async fn read(&mut self) -> Result<Value, Error>;

  /// The address of the connected server.
  fn addr(&self) -> Server;
}

impl std::fmt::Debug for dyn Conn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Conn").field("addr", &self.addr()).finish()
  }
}

/// A client pool for a single server in the replication group.
///
/// Pools are shared with callers via `Arc`, so a pool may still be running a command
/// when the topology reconciler closes it. Implementations must tolerate `close`
/// racing an in-flight `run` call; commands issued after `close` should fail with a
/// `Closed` error.
#[async_trait]
pub trait Pool: Send + Sync {
  /// Send the provided commands as one pipeline and read one reply per command.
  async fn run(&self, commands: &[Command]) -> Result<Vec<Value>, Error>;

  /// Close the pool and any live connections.
  ///
  /// The owner calls this exactly once.
  async fn close(&self);

  /// The address of the server this pool connects to.
  fn addr(&self) -> Server;
}
