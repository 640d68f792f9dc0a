use crate::{
  error::{Error, ErrorKind},
  interfaces::{Conn, Pool},
  protocol::{Command, Value},
  types::{ConnFunc, Server},
  utils,
};
use async_trait::async_trait;
use std::sync::atomic::AtomicBool;
use tokio::sync::Mutex as AsyncMutex;

/// A [Pool] implementation holding one connection behind an async lock.
///
/// This is the default pool when no `PoolFunc` is configured. Commands acquire the
/// connection exclusively, so callers that need concurrent commands against one
/// server should provide a real pool instead.
pub struct SingleConnPool {
  addr:   Server,
  conn:   AsyncMutex<Option<Box<dyn Conn>>>,
  closed: AtomicBool,
}

impl std::fmt::Debug for SingleConnPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SingleConnPool")
      .field("addr", &self.addr)
      .field("closed", &self.closed)
      .finish()
  }
}

impl SingleConnPool {
  /// Connect to the provided server.
  pub async fn connect(addr: Server, connect: &ConnFunc) -> Result<SingleConnPool, Error> {
    let conn = connect(addr.clone()).await?;

    Ok(SingleConnPool {
      addr,
      conn: AsyncMutex::new(Some(conn)),
      closed: AtomicBool::new(false),
    })
  }
}

#[async_trait]
impl Pool for SingleConnPool {
  async fn run(&self, commands: &[Command]) -> Result<Vec<Value>, Error> {
    if utils::read_bool_atomic(&self.closed) {
      return Err(Error::new(ErrorKind::Closed, "Pool is closed."));
    }

    let mut guard = self.conn.lock().await;
    match guard.as_mut() {
      Some(conn) => conn.run(commands).await,
      None => Err(Error::new(ErrorKind::Closed, "Pool is closed.")),
    }
  }

  async fn close(&self) {
    if !utils::set_bool_atomic(&self.closed, true) {
      // dropping the connection closes it
      let _ = self.conn.lock().await.take();
    }
  }

  fn addr(&self) -> Server {
    self.addr.clone()
  }
}

#[cfg(all(test, feature = "mocks"))]
mod tests {
  use super::*;
  use crate::mocks::StubCluster;

  fn server(addr: &str) -> Server {
    addr.parse().unwrap()
  }

  #[tokio::test]
  async fn should_run_commands_until_closed() {
    let cluster = StubCluster::new(
      "mygroup",
      server("10.0.0.10:6379"),
      Vec::new(),
      vec![server("10.0.0.2:26379")],
    );
    let pool = SingleConnPool::connect(server("10.0.0.2:26379"), &cluster.conn_func())
      .await
      .unwrap();
    assert_eq!(pool.addr(), server("10.0.0.2:26379"));

    let replies = pool.run(&[Command::new(["PING"])]).await.unwrap();
    assert_eq!(replies[0].as_str(), Some("PONG"));

    pool.close().await;
    let error = pool.run(&[Command::new(["PING"])]).await.unwrap_err();
    assert!(error.is_closed());
  }

  #[tokio::test]
  async fn should_fail_to_connect_to_unreachable_servers() {
    let cluster = StubCluster::new(
      "mygroup",
      server("10.0.0.10:6379"),
      Vec::new(),
      vec![server("10.0.0.2:26379")],
    );
    cluster.set_unreachable(server("10.0.0.2:26379"));

    let error = SingleConnPool::connect(server("10.0.0.2:26379"), &cluster.conn_func())
      .await
      .unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::IO);
  }
}
