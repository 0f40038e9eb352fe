//! Per-call deadline wrapper for Store/Cache/chain calls made from inside a
//! service method (§5: "every request carries a deadline" -- the
//! `TimeoutLayer` in `main.rs` only bounds the whole HTTP request; a single
//! slow Store round-trip inside a multi-call service method like
//! `getAnalytics` needs its own bound too).

use crate::error::AppError;
use std::future::Future;
use std::time::Duration;

pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, AppError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(AppError::Internal),
        Err(_) => Err(AppError::Unavailable("store call exceeded its deadline".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_within_deadline() {
        let result = with_deadline(Duration::from_millis(50), async { Ok::<_, anyhow::Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn exceeding_deadline_surfaces_unavailable() {
        let result = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, anyhow::Error>(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Unavailable(_))));
    }
}
