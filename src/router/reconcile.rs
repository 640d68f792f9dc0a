use crate::{
  error::Error,
  inner::SentinelInner,
  interfaces::Conn,
  protocol::{node_addr, Command},
  types::{NodeInfo, Server, SharedPool, TopologyChanged},
};
use std::{
  collections::{HashMap, HashSet},
  sync::Arc,
};

/// Refresh the set of known sentinel addresses from the connected sentinel.
///
/// `SENTINEL SENTINELS` does not include the queried node itself, so the connected
/// address is added manually. The known set is replaced wholesale; the bootstrap
/// addresses remain available to the dialer as a last resort.
pub async fn sync_sentinel_peers(inner: &Arc<SentinelInner>, conn: &mut Box<dyn Conn>) -> Result<(), Error> {
  let mut replies = conn.run(&[Command::sentinel_sentinels(&inner.name)]).await?;
  let reply = match replies.pop() {
    Some(reply) if replies.is_empty() => reply,
    _ => return Err(Error::new_protocol("Expected one SENTINEL SENTINELS reply.")),
  };

  let mut sentinels = HashSet::new();
  sentinels.insert(conn.addr());
  for map in reply.into_maps()? {
    match node_addr(&map, "SENTINEL SENTINELS") {
      Ok(addr) => {
        sentinels.insert(addr);
      },
      Err(e) => {
        warn!("{}: Skipping malformed sentinel peer entry: {}", inner.id, e);
      },
    }
  }

  inner.topology.write().sentinels = sentinels;
  Ok(())
}

/// Reconcile the client pools with the topology the connected sentinel reports.
///
/// Pool creation happens outside the lock since it may block on the network. The
/// swap of `primary` and `clients` is one write-lock section so readers never
/// observe a partial topology, and orphaned pools are closed only after the commit.
pub async fn sync_clients(inner: &Arc<SentinelInner>, conn: &mut Box<dyn Conn>) -> Result<(), Error> {
  let mut replies = conn
    .run(&[
      Command::sentinel_master(&inner.name),
      Command::sentinel_slaves(&inner.name),
    ])
    .await?;
  if replies.len() != 2 {
    return Err(Error::new_protocol("Expected two replies from the sentinel pipeline."));
  }
  let (replicas, primary) = match (replies.pop(), replies.pop()) {
    (Some(replicas), Some(primary)) => (replicas, primary),
    _ => return Err(Error::new_protocol("Expected two replies from the sentinel pipeline.")),
  };

  let new_primary = node_addr(&primary.into_map()?, "SENTINEL MASTER")?;
  let mut desired: Vec<Server> = vec![new_primary.clone()];
  for map in replicas.into_maps()? {
    desired.push(node_addr(&map, "SENTINEL SLAVES")?);
  }

  // make sure a pool exists for every desired server before taking the write lock
  let mut new_clients: HashMap<Server, SharedPool> = HashMap::with_capacity(desired.len());
  for server in desired.into_iter() {
    if new_clients.contains_key(&server) {
      continue;
    }
    let client = ensure_client(inner, &server).await.map_err(|e| {
      Error::new(
        e.kind().clone(),
        format!("Error creating client for {}: {}", server, e.details()),
      )
    })?;
    new_clients.insert(server, client);
  }

  let mut to_close: Vec<SharedPool> = Vec::new();
  let mut prev_nodes: HashMap<Server, NodeInfo> = HashMap::new();
  let new_nodes: HashMap<Server, NodeInfo>;
  {
    let mut state = inner.topology.write();

    // carry forward the pool instances already held for shared addresses and
    // collect the rest for closing after the commit
    for (server, client) in state.clients.iter() {
      prev_nodes.insert(server.clone(), NodeInfo {
        server:  server.clone(),
        primary: *server == state.primary,
      });

      if new_clients.contains_key(server) {
        new_clients.insert(server.clone(), client.clone());
      } else {
        to_close.push(client.clone());
      }
    }
    new_nodes = new_clients
      .keys()
      .map(|server| {
        (server.clone(), NodeInfo {
          server:  server.clone(),
          primary: *server == new_primary,
        })
      })
      .collect();

    state.primary = new_primary;
    state.clients = new_clients;
  }

  for client in to_close.into_iter() {
    debug!("{}: Closing client for {}", inner.id, client.addr());
    client.close().await;
  }
  trace_topology_changed(inner, prev_nodes, new_nodes);
  Ok(())
}

/// Idempotently read or create the client pool for `server`.
///
/// Two tasks may race to create a pool for the same address. The loser closes its
/// freshly created pool and returns the one that was installed first, so at most one
/// pool per address is ever observable.
pub async fn ensure_client(inner: &Arc<SentinelInner>, server: &Server) -> Result<SharedPool, Error> {
  if let Some(client) = inner.topology.read().clients.get(server) {
    return Ok(client.clone());
  }

  let created = (inner.pool_func)(server.clone()).await?;
  let existing = {
    let mut state = inner.topology.write();
    match state.clients.get(server) {
      Some(client) => Some(client.clone()),
      None => {
        state.clients.insert(server.clone(), created.clone());
        None
      },
    }
  };

  if let Some(existing) = existing {
    created.close().await;
    Ok(existing)
  } else {
    Ok(created)
  }
}

fn trace_topology_changed(
  inner: &Arc<SentinelInner>,
  prev: HashMap<Server, NodeInfo>,
  new: HashMap<Server, NodeInfo>,
) {
  let tracer = match inner.tracer {
    Some(ref tracer) => tracer,
    None => return,
  };

  let mut added = Vec::new();
  let mut removed = Vec::new();
  let mut changed = Vec::new();
  for (server, prev_node) in prev.iter() {
    match new.get(server) {
      Some(new_node) => {
        if new_node != prev_node {
          changed.push(new_node.clone());
        }
      },
      None => removed.push(prev_node.clone()),
    }
  }
  for (server, new_node) in new.iter() {
    if !prev.contains_key(server) {
      added.push(new_node.clone());
    }
  }

  if added.len() + removed.len() + changed.len() == 0 {
    return;
  }
  debug!(
    "{}: Topology changed. Added: {}, removed: {}, changed: {}",
    inner.id,
    added.len(),
    removed.len(),
    changed.len()
  );
  tracer.topology_changed(TopologyChanged { added, removed, changed });
}
