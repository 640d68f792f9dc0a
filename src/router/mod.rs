use crate::{
  error::{Error, ErrorKind},
  inner::SentinelInner,
  interfaces::Conn,
  utils,
};
use std::{
  sync::{atomic::Ordering, Arc},
  time::Duration,
};
use tokio::{
  sync::{broadcast, mpsc},
  time::{interval_at, sleep, Instant, MissedTickBehavior},
};

pub mod listener;
pub mod reconcile;

/// How often the control loop reconciles topology without being signaled.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);
/// The deadline applied to each reconciliation pass.
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the control loop and the failover listener wait before retrying after an
/// error.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Open a connection to the first reachable sentinel node.
///
/// The runtime-discovered set is tried first, in arbitrary order. If every known
/// node fails, the bootstrap addresses are tried in their original order as a last
/// resort; their errors are suppressed since they may reflect stale configuration,
/// and the last error from the known set is returned instead.
pub async fn dial_sentinel(inner: &Arc<SentinelInner>) -> Result<Box<dyn Conn>, Error> {
  let known: Vec<_> = inner.topology.read().sentinels.iter().cloned().collect();

  let mut last_error = None;
  for server in known.into_iter() {
    match (inner.conn_func)(server.clone()).await {
      Ok(conn) => {
        debug!("{}: Connected to sentinel {}", inner.id, server);
        return Ok(conn);
      },
      Err(e) => {
        debug!("{}: Error connecting to sentinel {}: {}", inner.id, server, e);
        last_error = Some(e);
      },
    }
  }

  for server in inner.init_addrs.iter() {
    if let Ok(conn) = (inner.conn_func)(server.clone()).await {
      debug!("{}: Connected to bootstrap sentinel {}", inner.id, server);
      return Ok(conn);
    }
  }

  Err(last_error.unwrap_or_else(|| Error::new(ErrorKind::Sentinel, "No reachable sentinel nodes.")))
}

/// Run the control loop until the client is closed.
///
/// Errors from the inner loop are delivered to the caller's error channel and the
/// loop restarts against a freshly dialed sentinel after a short delay.
///
/// The shutdown receiver must be subscribed before this task is spawned, otherwise a
/// caller could close the client before the task starts and the broadcast would be
/// missed.
pub async fn spin(
  inner: Arc<SentinelInner>,
  mut signal_rx: mpsc::Receiver<()>,
  mut shutdown: broadcast::Receiver<()>,
) {
  loop {
    let result = inner_spin(&inner, &mut signal_rx, &mut shutdown).await;

    // also checked inside `inner_spin`, but the error from an interrupted pass
    // should not outlive the client that produced it
    if inner.is_closed() {
      debug!("{}: Stopping control loop.", inner.id);
      return;
    }

    if let Err(e) = result {
      debug!("{}: Restarting control loop after error: {}", inner.id, e);
      inner.report_error(e);

      tokio::select! {
        _ = sleep(RETRY_DELAY) => {},
        _ = shutdown.recv() => return,
      }
    }
  }
}

/// Dial a sentinel and service the group until that connection goes bad.
///
/// Each pass refreshes the sentinel peer set, reconciles the client pools, and pings
/// the failover subscription, all under one deadline. A failover signal arriving
/// during a pass is deferred until the pass completes; the following pass picks the
/// new primary up.
async fn inner_spin(
  inner: &Arc<SentinelInner>,
  signal_rx: &mut mpsc::Receiver<()>,
  shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), Error> {
  let mut conn = dial_sentinel(inner).await?;

  let mut tick = interval_at(Instant::now() + RECONCILE_INTERVAL, RECONCILE_INTERVAL);
  tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

  let mut switch_master = false;
  loop {
    utils::apply_timeout(
      async {
        reconcile::sync_sentinel_peers(inner, &mut conn)
          .await
          .map_err(|e| step_error("Error refreshing sentinel peers", e))?;
        reconcile::sync_clients(inner, &mut conn)
          .await
          .map_err(|e| step_error("Error refreshing clients", e))?;
        if let Some(listener) = inner.listener.get() {
          listener
            .ping()
            .await
            .map_err(|e| step_error("Error pinging failover subscription", e))?;
        }
        Ok(())
      },
      RECONCILE_TIMEOUT,
    )
    .await?;

    if switch_master {
      inner.emit_event("switch-master completed");
      switch_master = false;
    }

    tokio::select! {
      _ = tick.tick() => {},
      Some(_) = signal_rx.recv() => {
        switch_master = true;
        let delay = inner.switch_delay_ms.swap(0, Ordering::SeqCst);
        if delay > 0 {
          sleep(Duration::from_millis(delay)).await;
        }
      },
      _ = shutdown.recv() => return Ok(()),
    }
  }
}

fn step_error(context: &str, e: Error) -> Error {
  Error::new(e.kind().clone(), format!("{}: {}", context, e.details()))
}

#[cfg(all(test, feature = "mocks"))]
mod tests {
  use super::*;
  use crate::{
    mocks::StubCluster,
    types::{self, Server, SharedPool},
  };

  fn server(addr: &str) -> Server {
    addr.parse().unwrap()
  }

  fn failing_pool_func() -> types::PoolFunc {
    types::pool_func(|_| async move { Err::<SharedPool, Error>(Error::new(ErrorKind::IO, "Unused.")) })
  }

  #[tokio::test]
  async fn should_fall_back_to_bootstrap_sentinels() {
    let cluster = StubCluster::new(
      "mygroup",
      server("10.0.0.10:6379"),
      Vec::new(),
      vec![server("10.0.0.2:26379")],
    );
    let (inner, _) = SentinelInner::new(
      "mygroup".into(),
      vec![server("10.0.0.2:26379")],
      cluster.conn_func(),
      cluster.pool_func(),
      None,
      None,
    );
    // the runtime-discovered set no longer contains a live node
    inner.topology.write().sentinels = [server("10.0.0.9:26379")].into_iter().collect();

    let conn = dial_sentinel(&inner).await.unwrap();
    assert_eq!(conn.addr(), server("10.0.0.2:26379"));
  }

  #[tokio::test]
  async fn should_surface_known_set_errors_over_bootstrap_errors() {
    let conn_func = types::conn_func(|server: Server| async move {
      let context = if server.port == 1111 {
        "known set failure"
      } else {
        "bootstrap failure"
      };
      Err(Error::new(ErrorKind::IO, format!("{}: {}", context, server)))
    });
    let (inner, _) = SentinelInner::new(
      "mygroup".into(),
      vec![server("10.0.0.1:2222")],
      conn_func,
      failing_pool_func(),
      None,
      None,
    );
    inner.topology.write().sentinels = [server("10.0.0.1:1111")].into_iter().collect();

    let error = dial_sentinel(&inner).await.unwrap_err();
    assert!(error.details().contains("known set failure"));
  }
}
