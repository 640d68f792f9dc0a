use crate::{
  clients::{SentinelClient, SingleConnPool},
  error::{Error, ErrorKind},
  inner::SentinelInner,
  router::{self, listener::FailoverListener},
  types::{self, ConnFunc, PoolFunc, Server, SharedPool, Tracer},
};
use bytes_utils::Str;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A helper for building a [SentinelClient].
///
/// ```rust no_run no_compile
/// let mut builder = Builder::new("mygroup");
/// builder
///   .set_sentinels(vec!["10.0.0.2:26379".parse()?, "10.0.0.3:26379".parse()?])
///   .set_conn_func(my_conn_func);
/// let client = builder.init().await?;
/// ```
#[derive(Clone)]
pub struct Builder {
  name:      Str,
  sentinels: Vec<Server>,
  conn_func: Option<ConnFunc>,
  pool_func: Option<PoolFunc>,
  error_tx:  Option<mpsc::Sender<Error>>,
  tracer:    Option<Arc<dyn Tracer>>,
}

impl Builder {
  /// Create a new builder for the provided replication group name.
  pub fn new<S: Into<Str>>(name: S) -> Builder {
    Builder {
      name:      name.into(),
      sentinels: Vec::new(),
      conn_func: None,
      pool_func: None,
      error_tx:  None,
      tracer:    None,
    }
  }

  /// Set the sentinel addresses used to bootstrap discovery.
  ///
  /// These are kept for the lifetime of the client as last-resort dial targets.
  pub fn set_sentinels<I>(&mut self, sentinels: I) -> &mut Self
  where
    I: IntoIterator<Item = Server>,
  {
    self.sentinels = sentinels.into_iter().collect();
    self
  }

  /// Set the function used to open sentinel connections. Required.
  pub fn set_conn_func(&mut self, func: ConnFunc) -> &mut Self {
    self.conn_func = Some(func);
    self
  }

  /// Set the function used to create a client pool per node in the replication
  /// group.
  ///
  /// When unset each node gets a [SingleConnPool](crate::clients::SingleConnPool)
  /// built from the connection function.
  pub fn set_pool_func(&mut self, func: PoolFunc) -> &mut Self {
    self.pool_func = Some(func);
    self
  }

  /// Set a channel that receives errors encountered by the background tasks.
  ///
  /// Delivery never blocks: errors are dropped when the channel is full. The sender
  /// is dropped when the client is closed.
  pub fn set_error_channel(&mut self, tx: mpsc::Sender<Error>) -> &mut Self {
    self.error_tx = Some(tx);
    self
  }

  /// Set an observer for committed topology changes.
  pub fn set_tracer(&mut self, tracer: Arc<dyn Tracer>) -> &mut Self {
    self.tracer = Some(tracer);
    self
  }

  /// Discover the replication group and return a connected client.
  ///
  /// This performs one blocking bootstrap reconciliation, then starts the failover
  /// subscription and the control loop. On error nothing keeps running and no
  /// client is returned.
  pub async fn init(&self) -> Result<SentinelClient, Error> {
    if self.name.is_empty() {
      return Err(Error::new(ErrorKind::Config, "A replication group name is required."));
    }
    if self.sentinels.is_empty() {
      return Err(Error::new(ErrorKind::Config, "At least one sentinel address is required."));
    }
    let conn_func = match self.conn_func {
      Some(ref func) => func.clone(),
      None => return Err(Error::new(ErrorKind::Config, "A connection function is required.")),
    };
    let pool_func = self
      .pool_func
      .clone()
      .unwrap_or_else(|| default_pool_func(conn_func.clone()));

    let (inner, signal_rx) = SentinelInner::new(
      self.name.clone(),
      self.sentinels.clone(),
      conn_func,
      pool_func,
      self.tracer.clone(),
      self.error_tx.clone(),
    );
    debug!("{}: Bootstrapping against {} sentinel node(s)", inner.id, self.sentinels.len());

    // the bootstrap connection is only used for initialization and dropped after
    if let Err(e) = bootstrap(&inner).await {
      let clients: Vec<SharedPool> = {
        let mut state = inner.topology.write();
        state.clients.drain().map(|(_, client)| client).collect()
      };
      for client in clients {
        client.close().await;
      }
      return Err(e);
    }

    let _ = inner.listener.set(FailoverListener::spawn(inner.clone()));
    // subscribe before spawning so a close cannot race task startup
    let shutdown_rx = inner.shutdown_rx();
    let task = tokio::spawn(router::spin(inner.clone(), signal_rx, shutdown_rx));
    *inner.spin_task.lock() = Some(task);

    Ok(SentinelClient { inner })
  }
}

async fn bootstrap(inner: &Arc<SentinelInner>) -> Result<(), Error> {
  let mut conn = router::dial_sentinel(inner).await?;
  router::reconcile::sync_sentinel_peers(inner, &mut conn).await?;
  router::reconcile::sync_clients(inner, &mut conn).await?;
  Ok(())
}

fn default_pool_func(conn_func: ConnFunc) -> PoolFunc {
  types::pool_func(move |server| {
    let conn_func = conn_func.clone();
    async move {
      let pool = SingleConnPool::connect(server, &conn_func).await?;
      Ok(Arc::new(pool) as SharedPool)
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn noop_conn_func() -> ConnFunc {
    types::conn_func(|server| async move {
      Err(Error::new(
        ErrorKind::IO,
        format!("Connection refused: {}", server),
      ))
    })
  }

  #[tokio::test]
  async fn should_require_a_group_name() {
    let mut builder = Builder::new("");
    builder
      .set_sentinels(vec![Server::new("10.0.0.1", 26379)])
      .set_conn_func(noop_conn_func());

    let error = builder.init().await.unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::Config);
  }

  #[tokio::test]
  async fn should_require_sentinel_addresses() {
    let mut builder = Builder::new("mygroup");
    builder.set_conn_func(noop_conn_func());

    let error = builder.init().await.unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::Config);
  }

  #[tokio::test]
  async fn should_require_a_conn_func() {
    let mut builder = Builder::new("mygroup");
    builder.set_sentinels(vec![Server::new("10.0.0.1", 26379)]);

    let error = builder.init().await.unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::Config);
  }

  #[tokio::test]
  async fn should_fail_bootstrap_when_no_sentinel_is_reachable() {
    let mut builder = Builder::new("mygroup");
    builder
      .set_sentinels(vec![Server::new("10.0.0.1", 26379)])
      .set_conn_func(noop_conn_func());

    let error = builder.init().await.unwrap_err();
    assert_eq!(*error.kind(), ErrorKind::IO);
  }
}
