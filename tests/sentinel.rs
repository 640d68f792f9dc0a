#![cfg(feature = "mocks")]

use sentinel_client::{mocks::StubCluster, prelude::*};
use std::{collections::HashSet, time::Duration};
use tokio::{sync::mpsc, time::timeout};

fn server(addr: &str) -> Server {
  addr.parse().unwrap()
}

fn test_cluster() -> StubCluster {
  StubCluster::new(
    "mygroup",
    server("10.0.0.10:6379"),
    vec![server("10.0.0.11:6379")],
    vec![server("10.0.0.2:26379")],
  )
}

async fn connect(cluster: &StubCluster) -> SentinelClient {
  let _ = pretty_env_logger::try_init();

  let mut builder = Builder::new("mygroup");
  builder
    .set_sentinels(vec![server("10.0.0.2:26379")])
    .set_conn_func(cluster.conn_func())
    .set_pool_func(cluster.pool_func());

  builder.init().await.unwrap()
}

#[tokio::test]
async fn should_bootstrap_and_route_commands() {
  let cluster = test_cluster();
  let client = connect(&cluster).await;

  let replies = client.run(&[Command::new(["SET", "foo", "bar"])]).await.unwrap();
  assert_eq!(replies.len(), 1);
  assert_eq!(replies[0].as_str(), Some("OK"));

  let sentinels = client.sentinel_addrs().unwrap();
  assert_eq!(sentinels, vec![server("10.0.0.2:26379")]);

  client.close().await.unwrap();
}

#[tokio::test]
async fn should_route_or_fail_cleanly_while_closing() {
  let cluster = test_cluster();
  let client = connect(&cluster).await;

  let mut tasks = Vec::with_capacity(100);
  for _ in 0 .. 100 {
    let client = client.clone();
    tasks.push(tokio::spawn(async move {
      client.run_secondary(&[Command::new(["GET", "foo"])]).await
    }));
  }
  let closer = {
    let client = client.clone();
    tokio::spawn(async move { client.close().await })
  };

  for task in tasks {
    // every call either ran against a live pool or failed with a closed error
    match task.await.unwrap() {
      Ok(replies) => assert_eq!(replies.len(), 1),
      Err(e) => assert!(e.is_closed(), "unexpected error: {}", e),
    }
  }
  closer.await.unwrap().unwrap();

  // both pools closed exactly once
  let closed = cluster.closed_pools();
  assert_eq!(closed.len(), 2);
  let unique: HashSet<_> = closed.iter().cloned().collect();
  assert_eq!(unique.len(), 2);
}

#[tokio::test]
async fn should_react_to_published_switch_master_messages() {
  let cluster = test_cluster();
  let client = connect(&cluster).await;
  let mut events = client.take_event_rx().unwrap();

  // wait for the switch-master subscription to come up
  let mut waited = 0;
  while cluster.subscriber_count() == 0 {
    tokio::time::sleep(Duration::from_millis(10)).await;
    waited += 1;
    assert!(waited < 500, "timed out waiting on the failover subscription");
  }

  cluster.promote(server("10.0.0.11:6379"), vec![server("10.0.0.10:6379")]);
  cluster.publish_switch_master();

  let event = timeout(Duration::from_secs(5), events.recv())
    .await
    .expect("timed out waiting on the failover event")
    .expect("event channel closed");
  assert_eq!(&*event, "switch-master completed");

  let clients = client.clients().unwrap();
  assert_eq!(clients.len(), 1);
  assert!(clients.contains_key(&server("10.0.0.11:6379")));

  client.close().await.unwrap();
}

#[tokio::test]
async fn should_close_the_error_channel_on_shutdown() {
  let cluster = test_cluster();
  let (error_tx, mut error_rx) = mpsc::channel(16);

  let mut builder = Builder::new("mygroup");
  builder
    .set_sentinels(vec![server("10.0.0.2:26379")])
    .set_conn_func(cluster.conn_func())
    .set_pool_func(cluster.pool_func())
    .set_error_channel(error_tx);
  let client = builder.init().await.unwrap();

  client.close().await.unwrap();

  // the sender is dropped on close, so the stream ends after any pending errors
  let drained = timeout(Duration::from_secs(5), async {
    while error_rx.recv().await.is_some() {}
  })
  .await;
  assert!(drained.is_ok());
}
