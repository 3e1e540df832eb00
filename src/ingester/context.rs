//! Per-request context
//!
//! Carries the tenant, a request id for log correlation, a cancellation
//! token and an optional deadline. Read paths run their store calls through
//! [`RequestContext::guard`], which drops the in-flight call as soon as the
//! caller goes away.

use crate::ingester::error::{IngesterError, IngesterResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant: String,
    request_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Builder method: expire the request after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Builder method: cancel this request when `parent` is cancelled
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the request is already cancelled or past its deadline
    pub fn check(&self) -> IngesterResult<()> {
        if self.cancel.is_cancelled() {
            return Err(IngesterError::Cancelled);
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(IngesterError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` until it completes, the request is cancelled, or the
    /// deadline passes. The future is dropped on cancellation.
    pub async fn guard<F, T, E>(&self, fut: F) -> IngesterResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<IngesterError>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IngesterError::Cancelled),
            _ = deadline => Err(IngesterError::DeadlineExceeded),
            res = fut => res.map_err(Into::into),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = RequestContext::new("t1");
        let v = ctx
            .guard(async { Ok::<_, StoreError>(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
        assert_eq!(ctx.tenant(), "t1");
    }

    #[tokio::test]
    async fn test_guard_cancelled() {
        let ctx = RequestContext::new("t1");
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });

        let res = ctx
            .guard(async {
                std::future::pending::<()>().await;
                Ok::<(), StoreError>(())
            })
            .await;
        assert!(matches!(res, Err(IngesterError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_deadline() {
        let ctx = RequestContext::new("t1").with_timeout(Duration::from_secs(1));
        let res = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), StoreError>(())
            })
            .await;
        assert!(matches!(res, Err(IngesterError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = RequestContext::new("t1").with_parent(&parent);
        parent.cancel();
        assert!(matches!(ctx.check(), Err(IngesterError::Cancelled)));
    }
}
