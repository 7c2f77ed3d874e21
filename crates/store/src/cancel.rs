//! Cooperative cancellation (§5). Every operation that suspends on storage
//! I/O accepts an optional `CancellationToken` (teacher's own pattern, see
//! `backend/src/actor/watcher.rs`'s `WatcherConfig`/`cancel` field); on
//! cancellation it releases its reader and returns `Error::Cancelled`
//! promptly instead of running the request to completion.

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};

/// Race `fut` against `token` being cancelled. `None` means "no cancellation
/// requested for this call" and `fut` always runs to completion.
pub async fn race<T>(token: Option<&CancellationToken>, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
  match token {
    Some(token) => {
      tokio::select! {
        biased;
        _ = token.cancelled() => Err(StoreError::Core(contextframe_core::Error::Cancelled)),
        res = fut => res,
      }
    }
    None => fut.await,
  }
}

/// Checked between iterations of an in-memory residual-evaluation loop, so a
/// long scan over a batch stream can still abort partway through a batch.
pub fn check(token: Option<&CancellationToken>) -> Result<()> {
  if let Some(token) = token
    && token.is_cancelled()
  {
    return Err(StoreError::Core(contextframe_core::Error::Cancelled));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_race_returns_cancelled_when_token_already_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    let result: Result<()> = race(Some(&token), async { Ok(()) }).await;
    assert!(matches!(result, Err(StoreError::Core(contextframe_core::Error::Cancelled))));
  }

  #[tokio::test]
  async fn test_race_runs_future_when_no_token_given() {
    let result = race(None, async { Ok(42) }).await;
    assert_eq!(result.unwrap(), 42);
  }

  #[test]
  fn test_check_passes_when_not_cancelled() {
    let token = CancellationToken::new();
    assert!(check(Some(&token)).is_ok());
  }

  #[test]
  fn test_check_fails_when_cancelled() {
    let token = CancellationToken::new();
    token.cancel();
    assert!(check(Some(&token)).is_err());
  }
}
