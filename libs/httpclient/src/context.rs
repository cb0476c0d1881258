//! Per-call context: cancellation, deadline and request correlation.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-owned context a request is bound to.
///
/// Cancelling the token (or passing the deadline) aborts the in-flight call
/// and surfaces as [`HttpError::Cancelled`](crate::HttpError::Cancelled) /
/// [`HttpError::DeadlineExceeded`](crate::HttpError::DeadlineExceeded) from
/// that call only. Cloning is cheap; clones share the cancellation token.
///
/// # Example
///
/// ```ignore
/// let ctx = RequestContext::new()
///     .with_request_id("7c0e4a52")
///     .with_timeout(Duration::from_millis(500));
///
/// let resp = client.request(&ctx, "GET", url, NO_HEADERS, None).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    request_id: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with no request id, no deadline and a fresh token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a request id, logged as `requestId` on the outcome record
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Bind the context to an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set an absolute deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now, on the tokio clock.
    ///
    /// A timeout too large to represent leaves the context without a deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Derive a child context: cancelling the parent cancels the child, not vice versa.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel this context (and every child derived from it)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the deadline, if any, has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = RequestContext::new().with_request_id("req-1");
        let child = parent.child();

        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.request_id(), Some("req-1"));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = RequestContext::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_deadline() {
        let ctx = RequestContext::new().with_deadline(Instant::now());
        assert!(ctx.is_expired());

        let ctx = RequestContext::new().with_timeout(Duration::from_secs(60));
        assert!(!ctx.is_expired());
        assert!(RequestContext::new().deadline().is_none());
        assert!(RequestContext::new().with_timeout(Duration::MAX).deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_follows_tokio_clock() {
        let ctx = RequestContext::new().with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_expired());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(ctx.is_expired());
    }
}
