use crate::{
  error::{Error, ErrorKind},
  inner::SentinelInner,
  interfaces::Conn,
  protocol::{Command, SWITCH_MASTER_CHANNEL},
  router,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
  sync::{broadcast, mpsc, oneshot},
  task::JoinHandle,
  time::sleep,
};

/// What woke the listener task up.
enum Wake {
  Frame(Result<crate::protocol::Value, Error>),
  Ping(oneshot::Sender<Result<(), Error>>),
}

/// A durable subscription to the `switch-master` channel.
///
/// A background task dials a sentinel through the shared dialer, subscribes, and
/// forwards every pushed frame as an opaque "primary may have changed" signal. The
/// payload is never parsed; the reconciler queries a sentinel authoritatively
/// instead. Connection loss is masked by redialing: the control loop only observes
/// signals and ping errors.
pub struct FailoverListener {
  ctl_tx: mpsc::Sender<oneshot::Sender<Result<(), Error>>>,
  task:   Mutex<Option<JoinHandle<()>>>,
}

impl FailoverListener {
  /// Spawn the subscription task.
  pub fn spawn(inner: Arc<SentinelInner>) -> FailoverListener {
    let (ctl_tx, ctl_rx) = mpsc::channel(8);
    // subscribe before spawning so a close cannot race task startup
    let shutdown = inner.shutdown_rx();
    let task = tokio::spawn(listen(inner, ctl_rx, shutdown));

    FailoverListener {
      ctl_tx,
      task: Mutex::new(Some(task)),
    }
  }

  /// Check that the subscription connection is alive by pinging it.
  pub async fn ping(&self) -> Result<(), Error> {
    let (tx, rx) = oneshot::channel();
    if self.ctl_tx.send(tx).await.is_err() {
      return Err(Error::new(ErrorKind::Closed, "Failover listener is not running."));
    }
    rx.await?
  }

  /// Wait for the subscription task to exit. The shutdown broadcast must have been
  /// sent first.
  pub async fn close(&self) {
    let task = self.task.lock().take();
    if let Some(task) = task {
      let _ = task.await;
    }
  }
}

async fn listen(
  inner: Arc<SentinelInner>,
  mut ctl_rx: mpsc::Receiver<oneshot::Sender<Result<(), Error>>>,
  mut shutdown: broadcast::Receiver<()>,
) {
  'redial: loop {
    if inner.is_closed() {
      return;
    }

    let mut conn = match subscribe(&inner).await {
      Ok(conn) => conn,
      Err(e) => {
        debug!("{}: Error subscribing to {}: {}", inner.id, SWITCH_MASTER_CHANNEL, e);
        tokio::select! {
          _ = sleep(router::RETRY_DELAY) => continue 'redial,
          _ = shutdown.recv() => return,
        }
      },
    };
    debug!("{}: Subscribed to {} on {}", inner.id, SWITCH_MASTER_CHANNEL, conn.addr());

    loop {
      let wake = tokio::select! {
        frame = conn.read() => Wake::Frame(frame),
        req = ctl_rx.recv() => match req {
          Some(tx) => Wake::Ping(tx),
          None => return,
        },
        _ = shutdown.recv() => return,
      };

      match wake {
        Wake::Frame(Ok(_)) => {
          // coalesced: a signal already in flight covers this one
          let _ = inner.signal_tx.try_send(());
        },
        Wake::Frame(Err(e)) => {
          debug!("{}: Lost {} subscription: {}", inner.id, SWITCH_MASTER_CHANNEL, e);
          continue 'redial;
        },
        Wake::Ping(tx) => {
          let result = conn.run(&[Command::ping()]).await.map(|_| ());
          let failed = result.is_err();
          let _ = tx.send(result);
          if failed {
            continue 'redial;
          }
        },
      }
    }
  }
}

async fn subscribe(inner: &Arc<SentinelInner>) -> Result<Box<dyn Conn>, Error> {
  let mut conn = router::dial_sentinel(inner).await?;
  let _ = conn.run(&[Command::subscribe(SWITCH_MASTER_CHANNEL)]).await?;
  Ok(conn)
}
