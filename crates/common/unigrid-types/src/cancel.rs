use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a bounded operation did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The caller cancelled the token
    Cancelled,
    /// The operation ran past its time limit
    TimedOut,
}

/// Drive `fut` to completion unless `cancel` fires or `limit` elapses first.
///
/// A `None` limit means the operation may run for as long as it needs.
pub async fn run_bounded<F, T>(
    cancel: &CancellationToken,
    limit: Option<Duration>,
    fut: F,
) -> Result<T, Interrupted>
where
    F: Future<Output = T>,
{
    let bounded = async {
        match limit {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Interrupted::TimedOut),
            None => Ok(fut.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let cancel = CancellationToken::new();
        let result = run_bounded(&cancel, Some(Duration::from_secs(1)), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_times_out() {
        let cancel = CancellationToken::new();
        let result = run_bounded(
            &cancel,
            Some(Duration::from_millis(10)),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(result, Err(Interrupted::TimedOut));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_bounded(&cancel, None, async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }
}
