use crate::{
  error::{Error, ErrorKind},
  types::Server,
};
use bytes_utils::Str;
use std::{collections::HashMap, fmt};

/// The pub/sub channel sentinel nodes use to announce a completed failover.
pub const SWITCH_MASTER_CHANNEL: &str = "switch-master";

/// A single command and its arguments.
///
/// Commands are opaque to this layer beyond the sentinel discovery queries it issues
/// itself. Anything the underlying transport understands can be sent through
/// [run](crate::clients::SentinelClient::run).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
  pub args: Vec<Str>,
}

impl Command {
  pub fn new<I, S>(args: I) -> Command
  where
    I: IntoIterator<Item = S>,
    S: Into<Str>,
  {
    Command {
      args: args.into_iter().map(|arg| arg.into()).collect(),
    }
  }

  pub(crate) fn sentinel_master(name: &Str) -> Command {
    Command::new(["SENTINEL", "MASTER", &*name])
  }

  pub(crate) fn sentinel_slaves(name: &Str) -> Command {
    Command::new(["SENTINEL", "SLAVES", &*name])
  }

  pub(crate) fn sentinel_sentinels(name: &Str) -> Command {
    Command::new(["SENTINEL", "SENTINELS", &*name])
  }

  pub(crate) fn subscribe(channel: &str) -> Command {
    Command::new(["SUBSCRIBE", channel])
  }

  pub(crate) fn ping() -> Command {
    Command::new(["PING"])
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    for (idx, arg) in self.args.iter().enumerate() {
      if idx > 0 {
        write!(f, " ")?;
      }
      write!(f, "{arg}")?;
    }
    Ok(())
  }
}

/// A reply from the server.
///
/// This is a deliberately small model of the wire protocol. Sentinel returns its
/// discovery data as flat arrays of field/value pairs, exposed here via
/// [into_map](Self::into_map) and [into_maps](Self::into_maps).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
  Nil,
  Simple(Str),
  Bulk(Str),
  Int(i64),
  Array(Vec<Value>),
}

impl Value {
  /// Read the inner string value, if the reply is a string.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Simple(s) | Value::Bulk(s) => Some(s),
      _ => None,
    }
  }

  fn into_field(self) -> Option<Str> {
    match self {
      Value::Simple(s) | Value::Bulk(s) => Some(s),
      Value::Int(i) => Some(Str::from(i.to_string())),
      _ => None,
    }
  }

  /// Convert a flat array of field/value pairs into a map.
  pub fn into_map(self) -> Result<HashMap<Str, Str>, Error> {
    let values = match self {
      Value::Array(values) => values,
      _ => return Err(Error::new_protocol("Expected an array reply.")),
    };
    if values.len() % 2 != 0 {
      return Err(Error::new_protocol("Expected an even number of fields."));
    }

    let mut out = HashMap::with_capacity(values.len() / 2);
    let mut iter = values.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
      let field = field
        .into_field()
        .ok_or_else(|| Error::new_protocol("Expected a string field."))?;
      let value = value
        .into_field()
        .ok_or_else(|| Error::new_protocol("Expected a string value."))?;
      out.insert(field, value);
    }
    Ok(out)
  }

  /// Convert an array of field/value pair arrays into maps.
  pub fn into_maps(self) -> Result<Vec<HashMap<Str, Str>>, Error> {
    match self {
      Value::Array(values) => values.into_iter().map(|value| value.into_map()).collect(),
      _ => Err(Error::new_protocol("Expected an array reply.")),
    }
  }
}

/// Read the `ip` and `port` fields from a sentinel reply map.
///
/// A missing or empty field is a protocol error attributed to `cmd`.
pub(crate) fn node_addr(map: &HashMap<Str, Str>, cmd: &str) -> Result<Server, Error> {
  let ip = map.get("ip").map(|s| &**s).unwrap_or("");
  let port = map.get("port").map(|s| &**s).unwrap_or("");
  if ip.is_empty() || port.is_empty() {
    return Err(Error::new(
      ErrorKind::Protocol,
      format!("Malformed {cmd} reply: missing ip or port."),
    ));
  }

  let port: u16 = port
    .parse()
    .map_err(|_| Error::new(ErrorKind::Protocol, format!("Malformed {cmd} reply: invalid port.")))?;
  Ok(Server::new(ip, port))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bulk(s: &str) -> Value {
    Value::Bulk(Str::from(s))
  }

  #[test]
  fn should_convert_flat_pairs_into_map() {
    let value = Value::Array(vec![bulk("ip"), bulk("10.0.0.1"), bulk("port"), Value::Int(6379)]);
    let map = value.into_map().unwrap();
    assert_eq!(&**map.get("ip").unwrap(), "10.0.0.1");
    assert_eq!(&**map.get("port").unwrap(), "6379");
  }

  #[test]
  fn should_error_on_odd_pair_count() {
    let value = Value::Array(vec![bulk("ip")]);
    assert!(value.into_map().unwrap_err().is_protocol());
  }

  #[test]
  fn should_convert_nested_arrays_into_maps() {
    let value = Value::Array(vec![
      Value::Array(vec![bulk("ip"), bulk("10.0.0.1"), bulk("port"), bulk("6379")]),
      Value::Array(vec![bulk("ip"), bulk("10.0.0.2"), bulk("port"), bulk("6380")]),
    ]);
    let maps = value.into_maps().unwrap();
    assert_eq!(maps.len(), 2);
    assert_eq!(&**maps[1].get("ip").unwrap(), "10.0.0.2");
  }

  #[test]
  fn should_parse_node_addresses() {
    let map = Value::Array(vec![bulk("ip"), bulk("10.0.0.1"), bulk("port"), bulk("6379")])
      .into_map()
      .unwrap();
    assert_eq!(node_addr(&map, "SENTINEL MASTER").unwrap(), Server::new("10.0.0.1", 6379));
  }

  #[test]
  fn should_reject_missing_or_empty_node_addresses() {
    let empty = Value::Array(Vec::new()).into_map().unwrap();
    assert!(node_addr(&empty, "SENTINEL MASTER").unwrap_err().is_protocol());

    let blank = Value::Array(vec![bulk("ip"), bulk(""), bulk("port"), bulk("6379")])
      .into_map()
      .unwrap();
    assert!(node_addr(&blank, "SENTINEL MASTER").unwrap_err().is_protocol());

    let invalid = Value::Array(vec![bulk("ip"), bulk("10.0.0.1"), bulk("port"), bulk("redis")])
      .into_map()
      .unwrap();
    assert!(node_addr(&invalid, "SENTINEL MASTER").unwrap_err().is_protocol());
  }
}
