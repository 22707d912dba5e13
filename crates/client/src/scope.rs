//! Screen-scoped cancellation.
//!
//! A [`ScreenScope`] belongs to one screen. Queries and mutations started
//! through it are abandoned when the screen unmounts: the caller sees
//! `ClientError::Cancelled` and the dropped future performs no cache write
//! (a pending mutation restores its snapshot instead).

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::ClientError;

/// Lifetime of one mounted screen. Clones share the same lifetime.
#[derive(Debug, Clone)]
pub struct ScreenScope {
    mounted: Arc<watch::Sender<bool>>,
}

impl Default for ScreenScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenScope {
    /// A scope for a freshly mounted screen.
    #[must_use]
    pub fn new() -> Self {
        let (mounted, _) = watch::channel(true);
        Self {
            mounted: Arc::new(mounted),
        }
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        *self.mounted.borrow()
    }

    /// Mark the screen unmounted, abandoning everything running in it.
    pub fn unmount(&self) {
        if self.mounted.send_replace(false) {
            debug!("Screen unmounted, cancelling scoped work");
        }
    }

    /// Drive `fut` until it settles or the screen unmounts.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Cancelled` if the screen is or becomes unmounted
    /// first, otherwise whatever `fut` returns.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        if !self.is_mounted() {
            return Err(ClientError::Cancelled);
        }
        let mut mounted = self.mounted.subscribe();
        let unmounted = async move {
            let _ = mounted.wait_for(|m| !*m).await;
        };

        tokio::select! {
            biased;
            () = unmounted => Err(ClientError::Cancelled),
            result = fut => result,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_completes_while_mounted() {
        let scope = ScreenScope::new();
        let value = scope.run(async { Ok::<_, ClientError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_unmount_cancels_running_work() {
        let scope = ScreenScope::new();
        let running = tokio::spawn({
            let scope = scope.clone();
            async move {
                scope
                    .run(async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok::<_, ClientError>(())
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.unmount();
        assert_eq!(running.await.unwrap(), Err(ClientError::Cancelled));
    }

    #[tokio::test]
    async fn test_unmounted_scope_runs_nothing() {
        let scope = ScreenScope::new();
        scope.unmount();
        let mut ran = false;
        let result = scope
            .run(async {
                ran = true;
                Ok::<_, ClientError>(())
            })
            .await;
        assert_eq!(result, Err(ClientError::Cancelled));
        assert!(!ran);
    }
}
