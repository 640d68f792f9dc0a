use crate::{
  error::{Error, ErrorKind},
  inner::SentinelInner,
  protocol::{Command, Value},
  types::{ReplicaSet, Server, SharedPool},
};
use bytes_utils::Str;
use std::{collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// A client for a Redis replication group behind a sentinel layer.
///
/// In the background the client connects to an available sentinel node and handles
/// all of the following:
///
/// * Keeps a client pool for the current primary and each replica, as advertised by
///   the sentinel.
/// * Listens for `switch-master` events and re-routes commands to the new primary.
/// * Keeps track of the other sentinels monitoring the group, and uses them if the
///   currently connected one becomes unreachable.
///
/// Created via [Builder](crate::builder::Builder). Cheaply cloneable; all clones
/// share the same topology and background tasks. [close](Self::close) must be called
/// to shut the background tasks down.
#[derive(Clone)]
pub struct SentinelClient {
  pub(crate) inner: Arc<SentinelInner>,
}

impl fmt::Debug for SentinelClient {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("SentinelClient")
      .field("id", &self.inner.id)
      .field("name", &self.inner.name)
      .field("primary", &self.inner.topology.read().primary)
      .finish()
  }
}

impl SentinelClient {
  /// The name of the monitored replication group.
  pub fn name(&self) -> &Str {
    &self.inner.name
  }

  /// Send the provided commands to the current primary as one pipeline.
  ///
  /// There is no retry when a failover happens mid-call; callers that care should
  /// retry after the error surfaces.
  pub async fn run(&self, commands: &[Command]) -> Result<Vec<Value>, Error> {
    let client = self.primary_client()?;
    client.run(commands).await
  }

  /// Send the provided commands to any replica, or the primary if the group
  /// currently has no replicas.
  ///
  /// Replicas must be configured with `replica-read-only` for reads to succeed.
  pub async fn run_secondary(&self, commands: &[Command]) -> Result<Vec<Value>, Error> {
    let client = self.secondary_client()?;
    client.run(commands).await
  }

  /// Read the clients for the replication group.
  ///
  /// The returned map always has exactly one entry, keyed by the current primary.
  pub fn clients(&self) -> Result<HashMap<Server, ReplicaSet>, Error> {
    self.inner.check_closed()?;

    let state = self.inner.topology.read();
    let primary = match state.clients.get(&state.primary) {
      Some(client) => client.clone(),
      None => return Err(Error::new(ErrorKind::Sentinel, "No primary client available.")),
    };
    let secondaries = state
      .clients
      .iter()
      .filter(|(addr, _)| **addr != state.primary)
      .map(|(_, client)| client.clone())
      .collect();

    let mut out = HashMap::with_capacity(1);
    out.insert(state.primary.clone(), ReplicaSet { primary, secondaries });
    Ok(out)
  }

  /// Read the addresses of all known sentinel nodes.
  pub fn sentinel_addrs(&self) -> Result<Vec<Server>, Error> {
    self.inner.check_closed()?;
    Ok(self.inner.topology.read().sentinels.iter().cloned().collect())
  }

  /// Close the client.
  ///
  /// This stops the control loop and the failover subscription, waits for both to
  /// exit, and then closes every client pool exactly once. Later calls fail with a
  /// `Closed` error, as does any other operation issued after this one.
  pub async fn close(&self) -> Result<(), Error> {
    if crate::utils::set_bool_atomic(&self.inner.closed, true) {
      return Err(Error::new_closed());
    }
    debug!("{}: Closing sentinel client.", self.inner.id);
    let _ = self.inner.shutdown_tx.send(());

    let spin_task = self.inner.spin_task.lock().take();
    if let Some(task) = spin_task {
      let _ = task.await;
    }
    if let Some(listener) = self.inner.listener.get() {
      listener.close().await;
    }

    let clients: Vec<SharedPool> = {
      let mut state = self.inner.topology.write();
      state.clients.drain().map(|(_, client)| client).collect()
    };
    for client in clients {
      client.close().await;
    }

    // drop the error sender so the receiving side observes end-of-stream
    let _ = self.inner.error_tx.lock().take();
    Ok(())
  }

  /// Look up the primary's pool under the read lock, pinning a reference so the
  /// lock is not held during the command itself.
  fn primary_client(&self) -> Result<SharedPool, Error> {
    self.inner.check_closed()?;

    let state = self.inner.topology.read();
    match state.clients.get(&state.primary) {
      Some(client) => Ok(client.clone()),
      None => {
        if self.inner.is_closed() {
          Err(Error::new_closed())
        } else {
          Err(Error::new(ErrorKind::Sentinel, "No primary client available."))
        }
      },
    }
  }

  /// Select any non-primary pool, falling back to the primary when the group has no
  /// replicas. Selection order is map iteration order.
  fn secondary_client(&self) -> Result<SharedPool, Error> {
    self.inner.check_closed()?;

    let state = self.inner.topology.read();
    for (addr, client) in state.clients.iter() {
      if *addr != state.primary {
        return Ok(client.clone());
      }
    }

    match state.clients.get(&state.primary) {
      Some(client) => Ok(client.clone()),
      None => {
        if self.inner.is_closed() {
          Err(Error::new_closed())
        } else {
          Err(Error::new(ErrorKind::Sentinel, "No clients available."))
        }
      },
    }
  }

  /// Inject a failover signal, optionally delaying the reconciliation that follows
  /// it. Only useful for tests.
  #[doc(hidden)]
  pub async fn force_master_switch(&self, delay: Duration) {
    self
      .inner
      .switch_delay_ms
      .store(delay.as_millis() as u64, std::sync::atomic::Ordering::SeqCst);
    let _ = self.inner.signal_tx.send(()).await;
  }

  /// Take the lifecycle event receiver. Only useful for tests.
  #[doc(hidden)]
  pub fn take_event_rx(&self) -> Option<mpsc::Receiver<Str>> {
    self.inner.event_rx.lock().take()
  }
}
