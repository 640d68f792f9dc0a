//! An in-memory sentinel deployment for writing tests.
//!
//! [StubCluster] models a replication group and the sentinel nodes monitoring it.
//! The [conn_func](StubCluster::conn_func) and [pool_func](StubCluster::pool_func)
//! factories plug into a [Builder](crate::builder::Builder) so an entire client can
//! run against it without any sockets. Topology changes are applied with
//! [promote](StubCluster::promote) and announced with
//! [publish_switch_master](StubCluster::publish_switch_master).

use crate::{
  error::{Error, ErrorKind},
  interfaces::{Conn, Pool},
  protocol::{Command, Value, SWITCH_MASTER_CHANNEL},
  types::{self, ConnFunc, PoolFunc, Server, SharedPool},
  utils,
};
use async_trait::async_trait;
use bytes_utils::Str;
use parking_lot::Mutex;
use std::{
  collections::HashSet,
  sync::{atomic::AtomicBool, Arc},
};
use tokio::sync::mpsc;

fn bulk<S: Into<Str>>(s: S) -> Value {
  Value::Bulk(s.into())
}

struct ClusterState {
  primary:       Server,
  replicas:      Vec<Server>,
  sentinels:     Vec<Server>,
  unreachable:   HashSet<Server>,
  broken_master: bool,
  pool_failures: HashSet<Server>,
}

struct ClusterInner {
  name:          Str,
  state:         Mutex<ClusterState>,
  subscribers:   Mutex<Vec<mpsc::UnboundedSender<Value>>>,
  closed_pools:  Mutex<Vec<Server>>,
  pool_commands: Mutex<Vec<(Server, Command)>>,
}

/// An in-memory sentinel deployment: a replication group plus the sentinel nodes
/// monitoring it.
#[derive(Clone)]
pub struct StubCluster {
  inner: Arc<ClusterInner>,
}

impl StubCluster {
  /// Create a new deployment. Only the listed sentinel addresses accept
  /// connections.
  pub fn new<S: Into<Str>>(name: S, primary: Server, replicas: Vec<Server>, sentinels: Vec<Server>) -> StubCluster {
    StubCluster {
      inner: Arc::new(ClusterInner {
        name:          name.into(),
        state:         Mutex::new(ClusterState {
          primary,
          replicas,
          sentinels,
          unreachable: HashSet::new(),
          broken_master: false,
          pool_failures: HashSet::new(),
        }),
        subscribers:   Mutex::new(Vec::new()),
        closed_pools:  Mutex::new(Vec::new()),
        pool_commands: Mutex::new(Vec::new()),
      }),
    }
  }

  /// A connection function serving the deployment's sentinel nodes.
  pub fn conn_func(&self) -> ConnFunc {
    let cluster = self.inner.clone();
    types::conn_func(move |server| {
      let cluster = cluster.clone();
      async move { StubConn::open(cluster, server) }
    })
  }

  /// A pool function creating stub pools that record the commands and close calls
  /// they receive.
  pub fn pool_func(&self) -> PoolFunc {
    let cluster = self.inner.clone();
    types::pool_func(move |server| {
      let cluster = cluster.clone();
      async move {
        if cluster.state.lock().pool_failures.contains(&server) {
          return Err(Error::new(ErrorKind::IO, format!("Connection refused: {}", server)));
        }
        Ok(Arc::new(StubPool {
          addr: server,
          closed: AtomicBool::new(false),
          cluster,
        }) as SharedPool)
      }
    })
  }

  /// Change the replication group topology. Takes effect on the next sentinel
  /// query; call [publish_switch_master](Self::publish_switch_master) or inject a
  /// failover signal to trigger one immediately.
  pub fn promote(&self, primary: Server, replicas: Vec<Server>) {
    let mut state = self.inner.state.lock();
    state.primary = primary;
    state.replicas = replicas;
  }

  /// Replace the set of sentinel nodes monitoring the group.
  pub fn set_sentinels(&self, sentinels: Vec<Server>) {
    self.inner.state.lock().sentinels = sentinels;
  }

  /// Refuse new connections to the provided sentinel address.
  pub fn set_unreachable(&self, server: Server) {
    self.inner.state.lock().unreachable.insert(server);
  }

  /// Accept new connections to the provided sentinel address again.
  pub fn set_reachable(&self, server: &Server) {
    self.inner.state.lock().unreachable.remove(server);
  }

  /// Whether `SENTINEL MASTER` replies should be empty, which readers treat as
  /// malformed.
  pub fn break_master_replies(&self, broken: bool) {
    self.inner.state.lock().broken_master = broken;
  }

  /// Refuse pool creation for the provided server.
  pub fn fail_pool_creation(&self, server: Server) {
    self.inner.state.lock().pool_failures.insert(server);
  }

  /// Publish a `switch-master` message to every subscribed connection.
  pub fn publish_switch_master(&self) {
    let payload = {
      let state = self.inner.state.lock();
      format!("{} {} {}", self.inner.name, state.primary.host, state.primary.port)
    };
    let message = Value::Array(vec![
      bulk("message"),
      bulk(SWITCH_MASTER_CHANNEL),
      bulk(payload),
    ]);

    self.inner.subscribers.lock().retain(|tx| tx.send(message.clone()).is_ok());
  }

  /// The number of live `switch-master` subscriptions.
  pub fn subscriber_count(&self) -> usize {
    let mut subscribers = self.inner.subscribers.lock();
    subscribers.retain(|tx| !tx.is_closed());
    subscribers.len()
  }

  /// Every pool close call so far, in order. An address appearing twice means a
  /// pool was closed twice.
  pub fn closed_pools(&self) -> Vec<Server> {
    self.inner.closed_pools.lock().clone()
  }

  /// Every command routed to a pool so far, with the pool's address.
  pub fn pool_commands(&self) -> Vec<(Server, Command)> {
    self.inner.pool_commands.lock().clone()
  }
}

struct StubConn {
  addr:    Server,
  cluster: Arc<ClusterInner>,
  sub_rx:  Option<mpsc::UnboundedReceiver<Value>>,
}

impl StubConn {
  fn open(cluster: Arc<ClusterInner>, addr: Server) -> Result<Box<dyn Conn>, Error> {
    {
      let state = cluster.state.lock();
      if state.unreachable.contains(&addr) || !state.sentinels.contains(&addr) {
        return Err(Error::new(ErrorKind::IO, format!("Connection refused: {}", addr)));
      }
    }

    Ok(Box::new(StubConn {
      addr,
      cluster,
      sub_rx: None,
    }))
  }

  fn node_pairs(server: &Server, flags: &str) -> Value {
    Value::Array(vec![
      bulk("name"),
      bulk(server.to_string()),
      bulk("ip"),
      bulk(server.host.clone()),
      bulk("port"),
      bulk(server.port.to_string()),
      bulk("flags"),
      bulk(flags),
    ])
  }

  fn dispatch(&mut self, command: &Command) -> Result<Value, Error> {
    let args: Vec<&str> = command.args.iter().map(|arg| &**arg).collect();

    match args.as_slice() {
      ["PING"] => Ok(Value::Simple(Str::from_static("PONG"))),
      ["SUBSCRIBE", channel] => {
        let (tx, rx) = mpsc::unbounded_channel();
        self.cluster.subscribers.lock().push(tx);
        self.sub_rx = Some(rx);
        Ok(Value::Array(vec![bulk("subscribe"), bulk(*channel), Value::Int(1)]))
      },
      ["SENTINEL", sub, name] => {
        if *name != &*self.cluster.name {
          return Err(Error::new(
            ErrorKind::Protocol,
            format!("No such master with that name: {}", name),
          ));
        }

        let state = self.cluster.state.lock();
        match *sub {
          "MASTER" => {
            if state.broken_master {
              Ok(Value::Array(Vec::new()))
            } else {
              Ok(StubConn::node_pairs(&state.primary, "master"))
            }
          },
          "SLAVES" => Ok(Value::Array(
            state
              .replicas
              .iter()
              .map(|server| StubConn::node_pairs(server, "slave"))
              .collect(),
          )),
          "SENTINELS" => Ok(Value::Array(
            state
              .sentinels
              .iter()
              .filter(|server| **server != self.addr)
              .map(|server| StubConn::node_pairs(server, "sentinel"))
              .collect(),
          )),
          _ => Err(Error::new(
            ErrorKind::Protocol,
            format!("Unsupported sentinel subcommand: {}", sub),
          )),
        }
      },
      _ => Err(Error::new(
        ErrorKind::Protocol,
        format!("Unsupported command: {}", command),
      )),
    }
  }
}

#[async_trait]
impl Conn for StubConn {
  async fn run(&mut self, commands: &[Command]) -> Result<Vec<Value>, Error> {
    let mut out = Vec::with_capacity(commands.len());
    for command in commands.iter() {
      out.push(self.dispatch(command)?);
    }
    Ok(out)
  }

  async fn read(&mut self) -> Result<Value, Error> {
    match self.sub_rx {
      Some(ref mut rx) => rx
        .recv()
        .await
        .ok_or_else(|| Error::new(ErrorKind::IO, "Connection closed.")),
      None => Err(Error::new(ErrorKind::Protocol, "Connection is not subscribed.")),
    }
  }

  fn addr(&self) -> Server {
    self.addr.clone()
  }
}

struct StubPool {
  addr:    Server,
  closed:  AtomicBool,
  cluster: Arc<ClusterInner>,
}

#[async_trait]
impl Pool for StubPool {
  async fn run(&self, commands: &[Command]) -> Result<Vec<Value>, Error> {
    if utils::read_bool_atomic(&self.closed) {
      return Err(Error::new(ErrorKind::Closed, "Pool is closed."));
    }

    let mut log = self.cluster.pool_commands.lock();
    for command in commands.iter() {
      log.push((self.addr.clone(), command.clone()));
    }
    Ok(commands.iter().map(|_| Value::Simple(Str::from_static("OK"))).collect())
  }

  async fn close(&self) {
    utils::set_bool_atomic(&self.closed, true);
    self.cluster.closed_pools.lock().push(self.addr.clone());
  }

  fn addr(&self) -> Server {
    self.addr.clone()
  }
}
