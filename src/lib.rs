#![doc = include_str!("../README.md")]
#![allow(clippy::type_complexity)]

#[macro_use]
extern crate log;

/// Client construction.
pub mod builder;
/// The client structs.
pub mod clients;
/// Error types returned by the client.
pub mod error;
/// The traits connecting the client to a transport.
pub mod interfaces;
/// Command and reply types.
pub mod protocol;
/// Shared value and configuration types.
pub mod types;

mod inner;
mod router;
mod utils;

/// An in-memory sentinel deployment for writing tests.
#[cfg(feature = "mocks")]
#[cfg_attr(docsrs, doc(cfg(feature = "mocks")))]
pub mod mocks;

/// Convenience module to import everything a caller usually needs.
pub mod prelude {
  pub use crate::{
    builder::Builder,
    clients::{SentinelClient, SingleConnPool},
    error::{Error, ErrorKind},
    interfaces::{Conn, Pool},
    protocol::{Command, Value},
    types::{conn_func, pool_func, NodeInfo, ReplicaSet, Server, SharedPool, TopologyChanged, Tracer},
  };
}
