use crate::error::{Error, ErrorKind};
use rand::{distributions::Alphanumeric, Rng};
use std::{
  future::Future,
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

pub fn random_string(len: usize) -> String {
  rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(len)
    .map(char::from)
    .collect()
}

pub fn read_bool_atomic(val: &AtomicBool) -> bool {
  val.load(Ordering::SeqCst)
}

pub fn set_bool_atomic(val: &AtomicBool, new: bool) -> bool {
  val.swap(new, Ordering::SeqCst)
}

/// Run a future, converting an elapsed timer into a `Timeout` error.
pub async fn apply_timeout<T, Fut>(ft: Fut, duration: Duration) -> Result<T, Error>
where
  Fut: Future<Output = Result<T, Error>>,
{
  match tokio::time::timeout(duration, ft).await {
    Ok(result) => result,
    Err(_) => Err(Error::new(ErrorKind::Timeout, "Request timed out.")),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn should_apply_timeout_to_slow_futures() {
    let ft = async {
      tokio::time::sleep(Duration::from_secs(10)).await;
      Ok::<(), Error>(())
    };

    let error = apply_timeout(ft, Duration::from_millis(20)).await.unwrap_err();
    assert!(error.is_timeout());
  }

  #[tokio::test]
  async fn should_not_interrupt_fast_futures() {
    let result = apply_timeout(async { Ok(1) }, Duration::from_secs(5)).await;
    assert_eq!(result.unwrap(), 1);
  }
}
