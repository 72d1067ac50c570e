use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation and deadline a caller attaches to an RPC call.
///
/// The client applies its own per-request timeout on top of this; whichever of the two deadlines
/// comes first bounds the call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline of its own.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            cancellation,
            deadline: None,
        }
    }

    /// Bound the context by `deadline`. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `min(caller deadline, now + timeout)`.
    pub(crate) fn deadline_within(&self, timeout: Duration) -> Instant {
        let bound = Instant::now() + timeout;
        self.deadline.map_or(bound, |deadline| deadline.min(bound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_earliest_deadline_wins() {
        let now = Instant::now();

        let ctx = CallContext::background();
        assert_eq!(ctx.deadline_within(Duration::from_secs(5)), now + Duration::from_secs(5));

        let ctx = ctx.with_timeout(Duration::from_secs(1));
        assert_eq!(ctx.deadline_within(Duration::from_secs(5)), now + Duration::from_secs(1));
        assert_eq!(
            ctx.deadline_within(Duration::from_millis(100)),
            now + Duration::from_millis(100)
        );

        let ctx = ctx.with_timeout(Duration::from_secs(30));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
