use crate::{
  error::Error,
  router::listener::FailoverListener,
  types::{ConnFunc, PoolFunc, Server, SharedPool, Tracer},
  utils,
};
use bytes_utils::Str;
use parking_lot::{Mutex, RwLock};
use std::{
  collections::{HashMap, HashSet},
  sync::{
    atomic::{AtomicBool, AtomicU64},
    Arc, OnceLock,
  },
};
use tokio::{
  sync::{broadcast, mpsc},
  task::JoinHandle,
};

/// The topology published to readers.
///
/// All three fields are guarded by one reader/writer lock so that a new primary is
/// never observable without the client map that contains it. Writers commit with a
/// single short lock section; readers clone the `Arc` handles they need and drop the
/// guard before doing any IO.
pub struct Topology {
  /// The current primary's address.
  pub primary:   Server,
  /// A client pool per server in the replication group (primary and replicas).
  pub clients:   HashMap<Server, SharedPool>,
  /// The sentinel addresses discovered at runtime.
  pub sentinels: HashSet<Server>,
}

pub struct SentinelInner {
  /// The client ID used for logging.
  pub id:         Str,
  /// The name of the monitored replication group.
  pub name:       Str,
  /// The sentinel addresses provided at construction, used as last-resort dial targets.
  pub init_addrs: Vec<Server>,
  /// The sentinel connection factory.
  pub conn_func:  ConnFunc,
  /// The node pool factory.
  pub pool_func:  PoolFunc,
  /// An optional topology change observer.
  pub tracer:     Option<Arc<dyn Tracer>>,

  /// The shared topology state.
  pub topology: RwLock<Topology>,
  /// Whether `close` has been called.
  pub closed:   AtomicBool,

  /// Interrupts the background tasks when `close` is called.
  pub shutdown_tx: broadcast::Sender<()>,
  /// Delivers coalesced failover signals to the control loop. Capacity 1: extra
  /// signals during a reconciliation pass are dropped and the periodic pass catches
  /// any missed state.
  pub signal_tx:   mpsc::Sender<()>,
  /// An optional sink for asynchronous errors. Dropped on close so the receiving
  /// side observes end-of-stream.
  pub error_tx:    Mutex<Option<mpsc::Sender<Error>>>,

  /// The persistent `switch-master` subscription, set once during initialization.
  pub listener:  OnceLock<FailoverListener>,
  /// The control loop task.
  pub spin_task: Mutex<Option<JoinHandle<()>>>,

  /// Emits lifecycle events such as "switch-master completed" so tests can wait for
  /// the control loop to act. Non-blocking; events are dropped when nobody listens.
  pub event_tx:        mpsc::Sender<Str>,
  /// Storage for the receiver half of the event channel until a test takes it.
  pub event_rx:        Mutex<Option<mpsc::Receiver<Str>>>,
  /// Injects latency (in milliseconds) between a failover signal and the following
  /// reconciliation. Reset to zero when read.
  pub switch_delay_ms: AtomicU64,
}

impl SentinelInner {
  /// Create the shared state and return it along with the failover signal receiver
  /// consumed by the control loop.
  pub fn new(
    name: Str,
    init_addrs: Vec<Server>,
    conn_func: ConnFunc,
    pool_func: PoolFunc,
    tracer: Option<Arc<dyn Tracer>>,
    error_tx: Option<mpsc::Sender<Error>>,
  ) -> (Arc<SentinelInner>, mpsc::Receiver<()>) {
    let id = Str::from(format!("{}-{}", name, utils::random_string(8)));
    let (shutdown_tx, _) = broadcast::channel(4);
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::channel(1);
    let sentinels: HashSet<Server> = init_addrs.iter().cloned().collect();

    let inner = Arc::new(SentinelInner {
      id,
      name,
      init_addrs,
      conn_func,
      pool_func,
      tracer,
      topology: RwLock::new(Topology {
        primary: Server::new("", 0),
        clients: HashMap::new(),
        sentinels,
      }),
      closed: AtomicBool::new(false),
      shutdown_tx,
      signal_tx,
      error_tx: Mutex::new(error_tx),
      listener: OnceLock::new(),
      spin_task: Mutex::new(None),
      event_tx,
      event_rx: Mutex::new(Some(event_rx)),
      switch_delay_ms: AtomicU64::new(0),
    });

    (inner, signal_rx)
  }

  pub fn is_closed(&self) -> bool {
    utils::read_bool_atomic(&self.closed)
  }

  /// Return a `Closed` error if `close` has been called.
  pub fn check_closed(&self) -> Result<(), Error> {
    if self.is_closed() {
      Err(Error::new_closed())
    } else {
      Ok(())
    }
  }

  pub fn shutdown_rx(&self) -> broadcast::Receiver<()> {
    self.shutdown_tx.subscribe()
  }

  /// Deliver an asynchronous error to the caller's error channel, if one was
  /// provided. Never blocks; the error is dropped if the channel is full.
  pub fn report_error(&self, error: Error) {
    let guard = self.error_tx.lock();
    if let Some(tx) = guard.as_ref() {
      if let Err(e) = tx.try_send(error) {
        debug!("{}: Dropping error: {:?}", self.id, e);
      }
    } else {
      debug!("{}: No error listener. The error was: {:?}", self.id, error);
    }
  }

  /// Emit a lifecycle event. Never blocks; dropped when nobody listens.
  pub fn emit_event(&self, event: &'static str) {
    let _ = self.event_tx.try_send(Str::from_static(event));
  }
}
